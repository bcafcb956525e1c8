//! # contract: interfaces to every external collaborator of the pipeline
//!
//! The orchestrator never talks to YouTube, yt-dlp, ffmpeg, cloud storage, the database or
//! an SMTP relay directly. Each of those sits behind one narrow async trait defined here,
//! together with the error type that collaborator may return.
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall`, so tests (and downstream crates, through the
//!   default `test-export-mocks` feature) get a `Mock*` implementation for free.
//! - Concrete adapters live next to the stage that consumes them (`resolve`, `download`,
//!   `segment`, `publish`, `database`, `notify`).
//!
//! ## Error Handling
//! - Errors are small `thiserror` enums, one per collaborator. Stages convert them into a
//!   [`crate::error::PipelineError`] kind via `From`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

/// Errors from the source lookup service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("missing credential: {0} not found")]
    MissingCredential(&'static str),
    #[error("source lookup timed out after {0:?}")]
    Timeout(Duration),
    #[error("source lookup failed: {0}")]
    TransientNetwork(String),
    #[error("malformed lookup response: {0}")]
    MalformedResponse(String),
    #[error("no completed item found for channel {0}")]
    NoResults(String),
}

/// Looks up the most recent item for a channel.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SourceLookup: Send + Sync {
    /// Return the canonical URL of the newest item matching `event_type`, or `None`.
    async fn find_latest(
        &self,
        channel_id: &str,
        event_type: &str,
    ) -> Result<Option<String>, ResolveError>;
}

/// Media fetched to local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMedia {
    pub local_path: PathBuf,
    /// Human title of the source, unsanitised.
    pub title: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The fetch worked but no stream matched the format requirements.
    #[error("no suitable stream available")]
    NoSuitableStream,
    #[error("fetch failed: {0}")]
    Failed(String),
}

/// Downloads raw media for a source URL.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<FetchedMedia, FetchError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("probe failed: {0}")]
    Probe(String),
    #[error("cut failed: {0}")]
    Cut(String),
}

/// The external transcoding engine, used as a black box.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait TransformEngine: Send + Sync {
    /// Total media duration.
    async fn probe(&self, path: &Path) -> Result<Duration, TransformError>;

    /// Write `length` of media starting at `start` into `out_path`.
    async fn cut(
        &self,
        path: &Path,
        start: Duration,
        length: Duration,
        out_path: &Path,
    ) -> Result<(), TransformError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("missing credential: {0} not found")]
    MissingCredential(&'static str),
    #[error("could not read {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("storage request failed: {0}")]
    Request(String),
}

/// Durable object storage.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Upload `local_path` as `remote_name` and return its public URL.
    async fn upload(&self, local_path: &Path, remote_name: &str) -> Result<String, StorageError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("database connection failed: {0}")]
    Connect(String),
    #[error("database query failed: {0}")]
    Query(String),
}

/// Relational store for published videos.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait VideoStore: Send + Sync {
    /// Insert one record and return its surrogate key.
    async fn insert_video(&self, project_name: &str, url: &str) -> Result<i64, StoreError>;

    /// Release the underlying connections. Called once at the end of a run.
    async fn close(&self);
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MailError {
    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("could not build message: {0}")]
    Message(String),
    #[error("mail transport failed: {0}")]
    Transport(String),
}

/// Outbound mail delivery.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), MailError>;
}
