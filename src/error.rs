//! Stage failure taxonomy for the pipeline.
//!
//! Every stage returns one [`PipelineError`] kind. Collaborator errors declared in
//! [`crate::contract`] convert into the kind owned by the stage that consumes them, so a
//! stage can use `?` and still report the right class of failure to the orchestrator.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::contract::{FetchError, MailError, ResolveError, StorageError, StoreError, TransformError};

/// One sequential step of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Resolve,
    Acquire,
    Edit,
    Package,
    Publish,
    Notify,
    Cleanup,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolve => "resolve",
            Stage::Acquire => "acquire",
            Stage::Edit => "edit",
            Stage::Package => "package",
            Stage::Publish => "publish",
            Stage::Notify => "notify",
            Stage::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Resolution or acquisition failed (no stream, timeout, missing credential, ...).
    #[error("download error: {0}")]
    Download(String),
    /// Probe, segmentation or packaging failed.
    #[error("editing error: {0}")]
    Editing(String),
    /// Storage upload or record persistence failed.
    #[error("upload error: {0}")]
    Upload(String),
    /// Every recipient of the active distribution failed.
    #[error("email notification error: {0}")]
    EmailNotification(String),
    /// Anything outside the categories above.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl PipelineError {
    /// Categorised errors end a run without propagating past the orchestrator.
    pub fn is_categorised(&self) -> bool {
        !matches!(self, PipelineError::Unexpected(_))
    }
}

impl From<ResolveError> for PipelineError {
    fn from(e: ResolveError) -> Self {
        PipelineError::Download(e.to_string())
    }
}

impl From<FetchError> for PipelineError {
    fn from(e: FetchError) -> Self {
        PipelineError::Download(e.to_string())
    }
}

impl From<TransformError> for PipelineError {
    fn from(e: TransformError) -> Self {
        PipelineError::Editing(e.to_string())
    }
}

impl From<StorageError> for PipelineError {
    fn from(e: StorageError) -> Self {
        PipelineError::Upload(e.to_string())
    }
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        PipelineError::Upload(e.to_string())
    }
}

impl From<MailError> for PipelineError {
    fn from(e: MailError) -> Self {
        PipelineError::EmailNotification(e.to_string())
    }
}

/// A failure observed during a run, kept in the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub stage: Stage,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collaborator_errors_map_to_owning_stage_kind() {
        let err: PipelineError = FetchError::NoSuitableStream.into();
        assert!(matches!(err, PipelineError::Download(_)));
        assert!(err.to_string().contains("no suitable stream"));

        let err: PipelineError = StorageError::Request("boom".into()).into();
        assert!(matches!(err, PipelineError::Upload(_)));

        let err: PipelineError = TransformError::Probe("bad header".into()).into();
        assert!(matches!(err, PipelineError::Editing(_)));
    }

    #[test]
    fn only_unexpected_is_uncategorised() {
        assert!(PipelineError::Download("x".into()).is_categorised());
        assert!(PipelineError::EmailNotification("x".into()).is_categorised());
        assert!(!PipelineError::Unexpected("x".into()).is_categorised());
    }
}
