// vod-slicer/src/config.rs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Segments are always 15 minutes long.
pub const SEGMENT_LENGTH: Duration = Duration::from_secs(15 * 60);

pub const DEFAULT_EVENT_TYPE: &str = "completed";
pub const DEFAULT_LOOKUP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_ACQUIRE_ATTEMPTS: u32 = 3;

/// Everything one pipeline run needs, fully resolved (file + environment).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub paths: PathsConfig,
    /// Total download attempts, including the first.
    pub acquire_attempts: u32,
    /// Segmenter pool size; `None` means available parallelism.
    pub max_workers: Option<usize>,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub mail: MailConfig,
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub channel_id: String,
    pub event_type: String,
    /// Optional at load time: a missing key is reported by the resolver.
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub archive_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("input"),
            output_dir: PathBuf::from("output"),
            archive_dir: PathBuf::from("final_project"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub access_token: Option<String>,
    /// Base URL of the storage API, overridable for emulators.
    pub endpoint: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub sender: String,
    pub password: Option<String>,
    pub recipients: Recipients,
}

/// The two fixed distribution lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipients {
    pub success: Vec<String>,
    /// Single operator address.
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub remove_input: bool,
    pub remove_segments: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            remove_input: true,
            remove_segments: true,
        }
    }
}

impl PipelineConfig {
    pub fn trace_loaded(&self) {
        info!(
            channel_id = %self.source.channel_id,
            event_type = %self.source.event_type,
            api_key_set = self.source.api_key.is_some(),
            input_dir = %self.paths.input_dir.display(),
            output_dir = %self.paths.output_dir.display(),
            archive_dir = %self.paths.archive_dir.display(),
            bucket = %self.storage.bucket,
            success_recipients = self.mail.recipients.success.len(),
            "Loaded PipelineConfig"
        );
        debug!(
            acquire_attempts = self.acquire_attempts,
            max_workers = ?self.max_workers,
            cleanup = ?self.cleanup,
            smtp_host = %self.mail.smtp_host,
            smtp_port = self.mail.smtp_port,
            "PipelineConfig details"
        );
    }

    /// Worker pool size for the segmenter.
    pub fn worker_count(&self) -> usize {
        self.max_workers
            .filter(|n| *n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
    }
}
