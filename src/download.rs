//! Acquisition: fetch the source media to local storage and derive the project name.
//!
//! The fetch is retried up to the configured attempt bound with no extra delay, because
//! yt-dlp already waits and retries on its own. A "no suitable stream" answer is final.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::contract::{FetchError, FetchedMedia, MediaFetcher};
use crate::error::PipelineError;
use crate::naming::sanitize;
use crate::retry::{retry, RetryAction, RetryFailure, RetryPolicy};

/// Output of the acquire stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredMedia {
    pub local_path: PathBuf,
    /// Sanitised once here and reused verbatim downstream.
    pub project_name: String,
}

pub async fn acquire<F>(
    fetcher: &F,
    url: &str,
    input_dir: &Path,
    policy: &RetryPolicy,
) -> Result<AcquiredMedia, PipelineError>
where
    F: MediaFetcher + ?Sized,
{
    info!(url, input_dir = %input_dir.display(), "[PIPELINE][ACQUIRE] Starting download");

    tokio::fs::create_dir_all(input_dir).await.map_err(|e| {
        error!(error = ?e, path = %input_dir.display(), "Failed to create input directory");
        PipelineError::Unexpected(format!(
            "could not create input directory {}: {e}",
            input_dir.display()
        ))
    })?;

    let fetched = retry(policy, "fetch", move |attempt| async move {
        debug!(url, attempt = attempt + 1, "Fetch attempt");
        match fetcher.fetch(url, input_dir).await {
            Ok(media) => RetryAction::Success(media),
            Err(e @ FetchError::NoSuitableStream) => RetryAction::Fail(e),
            Err(e) => RetryAction::Retry(e),
        }
    })
    .await
    .map_err(|failure| match failure {
        RetryFailure::Exhausted {
            attempts,
            last_error,
        } => {
            error!(url, attempts, error = %last_error, "[PIPELINE][ACQUIRE] All attempts failed");
            PipelineError::Download(format!(
                "failed to download {url} after {attempts} attempts: {last_error}"
            ))
        }
        RetryFailure::Aborted { error, .. } => {
            error!(url, error = %error, "[PIPELINE][ACQUIRE] Download aborted");
            PipelineError::Download(format!("{url}: {error}"))
        }
    })?;

    let FetchedMedia { local_path, title } = fetched;
    let project_name = sanitize(&title);
    if project_name.is_empty() {
        return Err(PipelineError::Download(format!(
            "title {title:?} of {url} yields an empty project name"
        )));
    }

    info!(
        path = %local_path.display(),
        project_name = %project_name,
        "[PIPELINE][ACQUIRE] Download succeeded"
    );
    Ok(AcquiredMedia {
        local_path,
        project_name,
    })
}

/// Stream selector: best progressive mp4, falling back to any mp4.
const FORMAT_SELECTOR: &str = "best[ext=mp4][vcodec!=none][acodec!=none]/best[ext=mp4]";

/// Fetches media by running the `yt-dlp` executable.
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    program: PathBuf,
}

impl YtDlpFetcher {
    pub fn new() -> Self {
        Self::with_program("yt-dlp")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// yt-dlp prints the title first and the final file path last.
fn parse_fetch_output(stdout: &str) -> Result<FetchedMedia, FetchError> {
    let lines: Vec<&str> = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    match lines.as_slice() {
        [title, .., path] => Ok(FetchedMedia {
            local_path: PathBuf::from(path),
            title: title.to_string(),
        }),
        _ => Err(FetchError::Failed(format!(
            "unexpected yt-dlp output: {stdout:?}"
        ))),
    }
}

fn classify_failure(stderr: &str) -> FetchError {
    if stderr.contains("Requested format is not available") {
        FetchError::NoSuitableStream
    } else {
        let last = stderr.lines().rev().find(|l| !l.trim().is_empty());
        FetchError::Failed(last.unwrap_or("yt-dlp exited with an error").trim().to_string())
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<FetchedMedia, FetchError> {
        let template = dest_dir.join("%(id)s.%(ext)s");
        let output = Command::new(&self.program)
            .arg("--no-simulate")
            .arg("--no-progress")
            .arg("--no-playlist")
            .arg("-f")
            .arg(FORMAT_SELECTOR)
            .arg("-o")
            .arg(&template)
            .arg("--print")
            .arg("title")
            .arg("--print")
            .arg("after_move:filepath")
            .arg(url)
            .output()
            .await
            .map_err(|e| FetchError::Failed(format!("failed to launch yt-dlp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(status = ?output.status, url, "yt-dlp exited with non-zero code");
            return Err(classify_failure(&stderr));
        }

        let media = parse_fetch_output(&String::from_utf8_lossy(&output.stdout))?;
        if !media.local_path.exists() {
            return Err(FetchError::Failed(format!(
                "yt-dlp reported {} but the file is missing",
                media.local_path.display()
            )));
        }
        Ok(media)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_title_and_path() {
        let media = parse_fetch_output("Demo Title\ninput/abc.mp4\n").unwrap();
        assert_eq!(media.title, "Demo Title");
        assert_eq!(media.local_path, PathBuf::from("input/abc.mp4"));
    }

    #[test]
    fn single_line_output_is_an_error() {
        assert!(matches!(
            parse_fetch_output("only-one-line\n"),
            Err(FetchError::Failed(_))
        ));
    }

    #[test]
    fn format_error_is_no_suitable_stream() {
        let stderr = "ERROR: [youtube] abc: Requested format is not available. Use --list-formats";
        assert_eq!(classify_failure(stderr), FetchError::NoSuitableStream);
        assert_eq!(
            classify_failure("WARNING: x\nERROR: HTTP Error 403: Forbidden\n"),
            FetchError::Failed("ERROR: HTTP Error 403: Forbidden".into())
        );
    }
}
