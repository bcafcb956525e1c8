//! # pipeline: the orchestrator
//!
//! Runs the stages strictly in order:
//! `Init → Resolved → Acquired → Edited → Packaged → Published → Notified → Done`.
//!
//! ## Failure handling
//! - A failing stage moves the run to `Failed(stage)`; no later stage runs.
//! - If a project name had been derived, the operator gets one failure notice (no link). A
//!   failing success notice does not trigger a second mail.
//! - Cleanup runs exactly once on every path. Its errors are recorded, never raised.
//! - Categorised failures come back as `Ok(report)`; only `PipelineError::Unexpected`
//!   propagates as `Err`. A panic inside a stage is caught and treated as `Unexpected`
//!   for the stage in progress, after the same notice and cleanup.
//!
//! ## Logging
//! Every run is wrapped in a `pipeline_run` span carrying a fresh `run_id`; each stage logs
//! its start and its `elapsed_ms`.

use std::any::Any;
use std::future::Future;
use std::io;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{PipelineConfig, SEGMENT_LENGTH};
use crate::contract::{
    MailTransport, MediaFetcher, ObjectStorage, SourceLookup, TransformEngine, VideoStore,
};
use crate::download::acquire;
use crate::error::{ErrorRecord, PipelineError, Stage};
use crate::naming;
use crate::notify::{notify, Delivery};
use crate::package::package;
use crate::publish::publish;
use crate::resolve::resolve_source;
use crate::retry::RetryPolicy;
use crate::segment::segment_media;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Init,
    Resolved,
    Acquired,
    Edited,
    Packaged,
    Published,
    Notified,
    Done,
    Failed(Stage),
}

/// Artefacts produced so far. Each field is set by exactly one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineRun {
    pub source_url: Option<String>,
    pub local_media_path: Option<PathBuf>,
    pub project_name: Option<String>,
    pub segment_dir: Option<PathBuf>,
    pub archive_path: Option<PathBuf>,
    pub publish_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub state: PipelineState,
    pub run: PipelineRun,
    pub record_id: Option<i64>,
    /// Set when a notification (success or compensating) was delivered to someone.
    pub notification: Option<Delivery>,
    pub errors: Vec<ErrorRecord>,
}

impl RunReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            state: PipelineState::Init,
            run: PipelineRun::default(),
            record_id: None,
            notification: None,
            errors: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == PipelineState::Done
    }
}

impl PipelineState {
    /// The stage that runs next from this state.
    fn stage_in_progress(self) -> Stage {
        match self {
            PipelineState::Init => Stage::Resolve,
            PipelineState::Resolved => Stage::Acquire,
            PipelineState::Acquired => Stage::Edit,
            PipelineState::Edited => Stage::Package,
            PipelineState::Packaged => Stage::Publish,
            PipelineState::Published => Stage::Notify,
            PipelineState::Notified | PipelineState::Done => Stage::Cleanup,
            PipelineState::Failed(stage) => stage,
        }
    }
}

/// Handles to every external collaborator of a run.
#[derive(Clone)]
pub struct Collaborators {
    pub lookup: Arc<dyn SourceLookup>,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub engine: Arc<dyn TransformEngine>,
    pub storage: Arc<dyn ObjectStorage>,
    pub store: Arc<dyn VideoStore>,
    pub mailer: Arc<dyn MailTransport>,
}

pub struct Pipeline {
    config: PipelineConfig,
    deps: Collaborators,
}

type StageResult<T> = Result<T, (Stage, PipelineError)>;

/// Run one stage with start/finish logging and timing.
async fn timed<T, F>(stage: Stage, fut: F) -> StageResult<T>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    let started = Instant::now();
    info!(%stage, "[PIPELINE][STAGE] Starting");
    let result = fut.await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &result {
        Ok(_) => info!(%stage, elapsed_ms, "[PIPELINE][STAGE] Finished"),
        Err(e) => error!(%stage, elapsed_ms, error = %e, "[PIPELINE][STAGE] Failed"),
    }
    result.map_err(|e| (stage, e))
}

impl Pipeline {
    pub fn new(config: PipelineConfig, deps: Collaborators) -> Self {
        Self { config, deps }
    }

    /// Execute one full run.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", %run_id);
        self.execute(run_id).instrument(span).await
    }

    async fn execute(&self, run_id: Uuid) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        info!("[PIPELINE] Run started");
        let mut report = RunReport::new(run_id);

        let caught = AssertUnwindSafe(self.run_stages(&mut report))
            .catch_unwind()
            .await;
        let outcome = match caught {
            Ok(result) => result,
            Err(payload) => {
                let stage = report.state.stage_in_progress();
                Err((
                    stage,
                    PipelineError::Unexpected(format!(
                        "{stage} stage panicked: {}",
                        panic_message(payload.as_ref())
                    )),
                ))
            }
        };

        let failure = match outcome {
            Ok(()) => {
                report.state = PipelineState::Done;
                None
            }
            Err((stage, err)) => {
                error!(%stage, error = %err, "[PIPELINE] Run failed");
                report.state = PipelineState::Failed(stage);
                report.errors.push(ErrorRecord::new(stage, err.to_string()));
                if stage != Stage::Notify {
                    self.notify_failure(&mut report).await;
                }
                Some(err)
            }
        };

        self.cleanup(&mut report).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(state = ?report.state, errors = report.errors.len(), elapsed_ms, "[PIPELINE] Run finished");

        match failure {
            Some(err) if !err.is_categorised() => Err(err),
            _ => Ok(report),
        }
    }

    async fn run_stages(&self, report: &mut RunReport) -> StageResult<()> {
        let cfg = &self.config;

        let url = timed(
            Stage::Resolve,
            resolve_source(
                self.deps.lookup.as_ref(),
                &cfg.source.channel_id,
                &cfg.source.event_type,
            ),
        )
        .await?;
        report.run.source_url = Some(url.clone());
        report.state = PipelineState::Resolved;

        let policy = RetryPolicy::immediate(cfg.acquire_attempts);
        let acquired = timed(
            Stage::Acquire,
            acquire(self.deps.fetcher.as_ref(), &url, &cfg.paths.input_dir, &policy),
        )
        .await?;
        let project = acquired.project_name.clone();
        report.run.local_media_path = Some(acquired.local_path.clone());
        report.run.project_name = Some(project.clone());
        report.state = PipelineState::Acquired;

        let edited = timed(
            Stage::Edit,
            segment_media(
                Arc::clone(&self.deps.engine),
                &acquired.local_path,
                &project,
                &cfg.paths.output_dir,
                SEGMENT_LENGTH,
                cfg.worker_count(),
            ),
        )
        .await?;
        report.run.segment_dir = Some(edited.segment_dir.clone());
        report.state = PipelineState::Edited;

        let archive = timed(
            Stage::Package,
            package(&edited.segment_dir, &cfg.paths.archive_dir, &edited.project_name),
        )
        .await?;
        report.run.archive_path = Some(archive.clone());
        report.state = PipelineState::Packaged;

        let published = timed(
            Stage::Publish,
            publish(
                self.deps.storage.as_ref(),
                self.deps.store.as_ref(),
                &archive,
                &project,
            ),
        )
        .await?;
        report.run.publish_url = Some(published.url.clone());
        report.record_id = Some(published.record_id);
        report.state = PipelineState::Published;

        let delivery = timed(
            Stage::Notify,
            notify(
                self.deps.mailer.as_ref(),
                &cfg.mail.recipients,
                &project,
                Some(&published.url),
            ),
        )
        .await?;
        record_partial_delivery(report, &delivery);
        report.notification = Some(delivery);
        report.state = PipelineState::Notified;

        Ok(())
    }

    /// Best-effort failure notice. Only sent once a project name exists.
    async fn notify_failure(&self, report: &mut RunReport) {
        let Some(project) = report.run.project_name.clone() else {
            info!("[PIPELINE][NOTIFY] No project name derived, skipping failure notice");
            return;
        };

        match notify(
            self.deps.mailer.as_ref(),
            &self.config.mail.recipients,
            &project,
            None,
        )
        .await
        {
            Ok(delivery) => {
                record_partial_delivery(report, &delivery);
                report.notification = Some(delivery);
            }
            Err(e) => {
                warn!(error = %e, "[PIPELINE][NOTIFY] Failure notice could not be delivered");
                report.errors.push(ErrorRecord::new(Stage::Notify, e.to_string()));
            }
        }
    }

    /// Remove transient local artefacts and release the store. The archive is kept.
    async fn cleanup(&self, report: &mut RunReport) {
        let started = Instant::now();
        info!("[PIPELINE][CLEANUP] Starting");
        let switches = self.config.cleanup;

        if switches.remove_input {
            if let Some(path) = report.run.local_media_path.clone() {
                if let Err(e) = remove_path(&path, false).await {
                    warn!(path = %path.display(), error = %e, "[PIPELINE][CLEANUP] Could not remove input media");
                    report.errors.push(ErrorRecord::new(
                        Stage::Cleanup,
                        format!("could not remove {}: {e}", path.display()),
                    ));
                }
            }
        }

        if switches.remove_segments {
            // The directory may hold partial output even when the edit stage failed.
            let dir = report.run.segment_dir.clone().or_else(|| {
                report
                    .run
                    .project_name
                    .as_deref()
                    .map(|p| naming::segment_dir(&self.config.paths.output_dir, p))
            });
            if let Some(dir) = dir {
                if let Err(e) = remove_path(&dir, true).await {
                    warn!(path = %dir.display(), error = %e, "[PIPELINE][CLEANUP] Could not remove segments");
                    report.errors.push(ErrorRecord::new(
                        Stage::Cleanup,
                        format!("could not remove {}: {e}", dir.display()),
                    ));
                }
            }
        }

        self.deps.store.close().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(elapsed_ms, "[PIPELINE][CLEANUP] Finished");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

fn record_partial_delivery(report: &mut RunReport, delivery: &Delivery) {
    for (recipient, reason) in &delivery.failed {
        report.errors.push(ErrorRecord::new(
            Stage::Notify,
            format!("delivery to {recipient} failed: {reason}"),
        ));
    }
}

/// Remove a file or directory tree. A path that is already gone is not an error.
async fn remove_path(path: &Path, dir: bool) -> io::Result<()> {
    let result = if dir {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
