//! Segmentation: split one media file into fixed 15-minute parts, concurrently.
//!
//! Every part is an independent [`SegmentTask`] run in a bounded task group. The stage waits
//! for all tasks before it decides anything, so one bad segment never discards the ones that
//! were produced correctly.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::contract::{TransformEngine, TransformError};
use crate::error::PipelineError;
use crate::naming;

/// One independent unit of segmentation work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentTask {
    /// 0-based ordinal.
    pub index: usize,
    pub start_offset: Duration,
    pub length: Duration,
    pub output_path: PathBuf,
}

/// Output of the edit stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditedMedia {
    pub segment_dir: PathBuf,
    pub project_name: String,
}

/// Number of segments needed to cover `duration`: `ceil(duration / segment_length)`.
pub fn segment_count(duration: Duration, segment_length: Duration) -> usize {
    let seg = segment_length.as_nanos().max(1);
    duration.as_nanos().div_ceil(seg) as usize
}

/// Build the tasks covering `duration`. Lengths always sum to `duration` exactly.
pub fn plan_segments(
    duration: Duration,
    segment_length: Duration,
    segment_dir: &Path,
    project_name: &str,
) -> Vec<SegmentTask> {
    (0..segment_count(duration, segment_length))
        .map(|index| {
            let start_offset = segment_length * index as u32;
            let length = segment_length.min(duration - start_offset);
            SegmentTask {
                index,
                start_offset,
                length,
                output_path: segment_dir.join(naming::segment_file_name(project_name, index + 1)),
            }
        })
        .collect()
}

/// Cut `input` into segments under `<output_dir>/<project_name>/`.
pub async fn segment_media(
    engine: Arc<dyn TransformEngine>,
    input: &Path,
    project_name: &str,
    output_dir: &Path,
    segment_length: Duration,
    workers: usize,
) -> Result<EditedMedia, PipelineError> {
    info!(input = %input.display(), project_name, "[PIPELINE][EDIT] Starting segmentation");

    if !input.exists() {
        error!(input = %input.display(), "[PIPELINE][EDIT] Input media missing");
        return Err(PipelineError::Editing(format!(
            "input media {} does not exist",
            input.display()
        )));
    }

    let duration = engine.probe(input).await?;
    if duration.is_zero() {
        return Err(PipelineError::Editing(format!(
            "input media {} has zero duration",
            input.display()
        )));
    }

    let segment_dir = naming::segment_dir(output_dir, project_name);
    prepare_segment_dir(&segment_dir).await?;

    let tasks = plan_segments(duration, segment_length, &segment_dir, project_name);
    let total = tasks.len();
    let workers = workers.max(1);
    info!(
        duration_secs = duration.as_secs_f64(),
        segments = total,
        workers,
        "[PIPELINE][EDIT] Planned segments"
    );

    let failures = run_tasks(engine, input, tasks, workers).await;

    if failures.is_empty() {
        info!(segments = total, dir = %segment_dir.display(), "[PIPELINE][EDIT] All segments written");
        return Ok(EditedMedia {
            segment_dir,
            project_name: project_name.to_string(),
        });
    }

    let details = failures
        .iter()
        .map(|(index, msg)| match index {
            Some(i) => format!("segment {}: {msg}", i + 1),
            None => format!("segment ?: {msg}"),
        })
        .collect::<Vec<_>>()
        .join("; ");
    error!(failed = failures.len(), total, "[PIPELINE][EDIT] Segmentation incomplete");
    Err(PipelineError::Editing(format!(
        "{} of {total} segments failed: {details}",
        failures.len()
    )))
}

/// Start from an empty `<output_dir>/<project_name>/`. Leftovers from an earlier run would
/// otherwise end up in the archive.
async fn prepare_segment_dir(segment_dir: &Path) -> Result<(), PipelineError> {
    let unprepared = |e: std::io::Error| {
        error!(error = ?e, path = %segment_dir.display(), "Failed to prepare segment directory");
        PipelineError::Unexpected(format!(
            "could not prepare segment directory {}: {e}",
            segment_dir.display()
        ))
    };

    match tokio::fs::remove_dir_all(segment_dir).await {
        Ok(()) => debug!(path = %segment_dir.display(), "Removed stale segment directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(unprepared(e)),
    }
    tokio::fs::create_dir_all(segment_dir).await.map_err(unprepared)
}

/// Run every task to completion and return the failures, ordered by segment index.
async fn run_tasks(
    engine: Arc<dyn TransformEngine>,
    input: &Path,
    tasks: Vec<SegmentTask>,
    workers: usize,
) -> Vec<(Option<usize>, String)> {
    let permits = Arc::new(Semaphore::new(workers));
    let input = Arc::new(input.to_path_buf());
    let mut set = JoinSet::new();

    for task in tasks {
        let engine = Arc::clone(&engine);
        let permits = Arc::clone(&permits);
        let input = Arc::clone(&input);
        set.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => return (task.index, Err(format!("worker pool closed: {e}"))),
            };
            debug!(
                segment = task.index + 1,
                start_secs = task.start_offset.as_secs_f64(),
                length_secs = task.length.as_secs_f64(),
                "Cutting segment"
            );
            let cut = async {
                engine
                    .cut(&input, task.start_offset, task.length, &task.output_path)
                    .await
            };
            let outcome = match AssertUnwindSafe(cut).catch_unwind().await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err("segment task panicked".to_string()),
            };
            (task.index, outcome)
        });
    }

    let mut failures = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, Ok(()))) => debug!(segment = index + 1, "Segment written"),
            Ok((index, Err(msg))) => {
                warn!(segment = index + 1, error = %msg, "Segment failed");
                failures.push((Some(index), msg));
            }
            Err(e) => {
                warn!(error = %e, "Segment task did not complete");
                failures.push((None, e.to_string()));
            }
        }
    }
    failures.sort_by_key(|(index, _)| index.unwrap_or(usize::MAX));
    failures
}

/// Transform engine backed by the `ffprobe` and `ffmpeg` executables.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegEngine {
    pub fn new() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl Default for FfmpegEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_probe_output(stdout: &str) -> Result<Duration, TransformError> {
    let raw = stdout.trim();
    let secs: f64 = raw
        .parse()
        .map_err(|_| TransformError::Probe(format!("unreadable duration {raw:?}")))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(TransformError::Probe(format!("invalid duration {secs}")));
    }
    Ok(Duration::from_secs_f64(secs))
}

#[async_trait]
impl TransformEngine for FfmpegEngine {
    async fn probe(&self, path: &Path) -> Result<Duration, TransformError> {
        let output = Command::new(&self.ffprobe)
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg(path)
            .output()
            .await
            .map_err(|e| TransformError::Probe(format!("failed to launch ffprobe: {e}")))?;

        if !output.status.success() {
            return Err(TransformError::Probe(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }

    async fn cut(
        &self,
        path: &Path,
        start: Duration,
        length: Duration,
        out_path: &Path,
    ) -> Result<(), TransformError> {
        let output = Command::new(&self.ffmpeg)
            .arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-ss")
            .arg(format!("{:.3}", start.as_secs_f64()))
            .arg("-i")
            .arg(path)
            .arg("-t")
            .arg(format!("{:.3}", length.as_secs_f64()))
            .arg("-c:v")
            .arg("libx264")
            .arg("-c:a")
            .arg("aac")
            .arg(out_path)
            .output()
            .await
            .map_err(|e| TransformError::Cut(format!("failed to launch ffmpeg: {e}")))?;

        if !output.status.success() {
            return Err(TransformError::Cut(format!(
                "{}: {}",
                out_path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIFTEEN_MIN: Duration = Duration::from_secs(900);

    #[test]
    fn count_is_ceiling_division() {
        assert_eq!(segment_count(Duration::from_secs(1), FIFTEEN_MIN), 1);
        assert_eq!(segment_count(Duration::from_secs(900), FIFTEEN_MIN), 1);
        assert_eq!(segment_count(Duration::from_secs(901), FIFTEEN_MIN), 2);
        assert_eq!(segment_count(Duration::from_secs(1000), FIFTEEN_MIN), 2);
        assert_eq!(segment_count(Duration::from_secs(2700), FIFTEEN_MIN), 3);
        assert_eq!(segment_count(Duration::ZERO, FIFTEEN_MIN), 0);
    }

    #[test]
    fn lengths_sum_to_duration() {
        for millis in [1u64, 899_999, 900_000, 900_001, 1_000_000, 3_600_500, 10_799_999] {
            let duration = Duration::from_millis(millis);
            let tasks = plan_segments(duration, FIFTEEN_MIN, Path::new("out"), "p");
            assert_eq!(tasks.len(), segment_count(duration, FIFTEEN_MIN));
            let sum: Duration = tasks.iter().map(|t| t.length).sum();
            assert_eq!(sum, duration, "duration {millis}ms");
            let last = tasks.last().unwrap();
            assert_eq!(last.length, duration - FIFTEEN_MIN * (tasks.len() as u32 - 1));
        }
    }

    #[test]
    fn thousand_seconds_gives_two_tasks() {
        let tasks = plan_segments(
            Duration::from_secs(1000),
            FIFTEEN_MIN,
            Path::new("output/Demo-Title"),
            "Demo-Title",
        );
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].start_offset, Duration::ZERO);
        assert_eq!(tasks[0].length, Duration::from_secs(900));
        assert_eq!(tasks[1].start_offset, Duration::from_secs(900));
        assert_eq!(tasks[1].length, Duration::from_secs(100));
        assert_eq!(
            tasks[1].output_path,
            PathBuf::from("output/Demo-Title/Demo-Title_segment_002.mp4")
        );
    }

    #[test]
    fn short_media_is_one_task() {
        let tasks = plan_segments(Duration::from_secs(42), FIFTEEN_MIN, Path::new("o"), "p");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].length, Duration::from_secs(42));
    }

    #[test]
    fn probe_output_parsing() {
        assert_eq!(
            parse_probe_output("1000.500000\n").unwrap(),
            Duration::from_millis(1_000_500)
        );
        assert!(parse_probe_output("N/A").is_err());
        assert!(parse_probe_output("-3").is_err());
    }
}
