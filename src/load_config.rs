use crate::config::{
    CleanupConfig, DatabaseConfig, MailConfig, PathsConfig, PipelineConfig, Recipients,
    SourceConfig, StorageConfig, DEFAULT_ACQUIRE_ATTEMPTS, DEFAULT_EVENT_TYPE,
    DEFAULT_LOOKUP_TIMEOUT_SECS,
};
use crate::publish::GCS_API_BASE;
use anyhow::{bail, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Non-secret settings read from the YAML file. Every section is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StaticConfig {
    source: SourceSection,
    paths: PathsConfig,
    acquire_attempts: Option<u32>,
    max_workers: Option<usize>,
    storage: StorageSection,
    database: DatabaseSection,
    mail: MailSection,
    cleanup: CleanupConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SourceSection {
    channel_id: Option<String>,
    event_type: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StorageSection {
    bucket: Option<String>,
    endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DatabaseSection {
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MailSection {
    smtp_host: Option<String>,
    smtp_port: Option<u16>,
    sender: Option<String>,
    success_recipients: Vec<String>,
    error_recipient: Option<String>,
}

/// Loads the optional YAML file and merges in secrets and overrides from the process
/// environment.
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    load_config_with(path, |name| std::env::var(name).ok())
}

/// Same as [`load_config`] with an explicit environment lookup.
pub fn load_config_with<F>(path: Option<&Path>, env: F) -> Result<PipelineConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let static_conf = match path {
        Some(path) => read_static(path)?,
        None => {
            info!("No config file given, using environment and defaults");
            StaticConfig::default()
        }
    };
    let env = |name: &str| env(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let channel_id = required(
        "YOUTUBE_CHANNEL_ID",
        env("YOUTUBE_CHANNEL_ID").or(static_conf.source.channel_id),
    )?;
    let bucket = required("GCS_BUCKET", env("GCS_BUCKET").or(static_conf.storage.bucket))?;
    let database_url = required("DATABASE_URL", env("DATABASE_URL").or(static_conf.database.url))?;
    let sender = required("SENDER_EMAIL", env("SENDER_EMAIL").or(static_conf.mail.sender))?;

    let success = match env("SUCCESS_RECIPIENTS") {
        Some(list) => split_list(&list),
        None => static_conf.mail.success_recipients,
    };
    if success.is_empty() {
        error!("No success recipients configured");
        bail!("SUCCESS_RECIPIENTS not set: at least one success recipient is required");
    }
    let error_recipient = required(
        "ERROR_RECIPIENT",
        env("ERROR_RECIPIENT").or(static_conf.mail.error_recipient),
    )?;

    let smtp_port = match env("SMTP_PORT") {
        Some(raw) => raw.parse::<u16>().map_err(|e| {
            error!(error = ?e, var = %raw, "SMTP_PORT must be a valid port");
            anyhow::anyhow!("SMTP_PORT must be a valid port: {e}")
        })?,
        None => static_conf.mail.smtp_port.unwrap_or(DEFAULT_SMTP_PORT),
    };

    let api_key = env("YOUTUBE_API_KEY");
    if api_key.is_none() {
        info!("YOUTUBE_API_KEY not set; source resolution will fail");
    }

    let config = PipelineConfig {
        source: SourceConfig {
            channel_id,
            event_type: static_conf
                .source
                .event_type
                .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string()),
            api_key,
            timeout: Duration::from_secs(
                static_conf
                    .source
                    .timeout_secs
                    .unwrap_or(DEFAULT_LOOKUP_TIMEOUT_SECS),
            ),
        },
        paths: static_conf.paths,
        acquire_attempts: static_conf
            .acquire_attempts
            .unwrap_or(DEFAULT_ACQUIRE_ATTEMPTS)
            .max(1),
        max_workers: static_conf.max_workers,
        storage: StorageConfig {
            bucket,
            access_token: env("GCS_ACCESS_TOKEN"),
            endpoint: static_conf
                .storage
                .endpoint
                .unwrap_or_else(|| GCS_API_BASE.to_string()),
        },
        database: DatabaseConfig { url: database_url },
        mail: MailConfig {
            smtp_host: env("SMTP_HOST")
                .or(static_conf.mail.smtp_host)
                .unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
            smtp_port,
            sender,
            password: env("SENDER_PASSWORD"),
            recipients: Recipients {
                success,
                error: error_recipient,
            },
        },
        cleanup: static_conf.cleanup,
    };

    info!(
        channel_id = %config.source.channel_id,
        bucket = %config.storage.bucket,
        "Config loaded and merged successfully"
    );
    Ok(config)
}

/// Database URL only, for commands that need nothing else.
pub fn load_database_url(path: Option<&Path>) -> Result<String> {
    let from_file = match path {
        Some(path) => read_static(path)?.database.url,
        None => None,
    };
    let from_env = std::env::var("DATABASE_URL")
        .ok()
        .filter(|v| !v.trim().is_empty());
    required("DATABASE_URL", from_env.or(from_file))
}

fn read_static(path: &Path) -> Result<StaticConfig> {
    info!(config_path = ?path, "Loading configuration from file");

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path, "Failed to read config file");
            return Err(anyhow::anyhow!("Failed to read config file {:?}: {}", path, e));
        }
    };

    match serde_yaml::from_str::<Option<StaticConfig>>(&content) {
        Ok(conf) => {
            info!(config_path = ?path, "Parsed config YAML successfully");
            Ok(conf.unwrap_or_default())
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path, "Failed to parse config YAML");
            Err(anyhow::anyhow!("Failed to parse config YAML: {e}"))
        }
    }
}

fn required(name: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => {
            error!(var = name, "Required setting missing");
            bail!("{name} not set: provide it in the environment or the config file")
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const FULL_ENV: &[(&str, &str)] = &[
        ("YOUTUBE_API_KEY", "key"),
        ("YOUTUBE_CHANNEL_ID", "UC123"),
        ("SENDER_EMAIL", "bot@example.com"),
        ("SENDER_PASSWORD", "secret"),
        ("GCS_BUCKET", "movie-edit"),
        ("DATABASE_URL", "sqlite::memory:"),
        ("SUCCESS_RECIPIENTS", "a@example.com, b@example.com,"),
        ("ERROR_RECIPIENT", "ops@example.com"),
    ];

    #[test]
    fn environment_alone_is_enough() {
        let config = load_config_with(None, env_of(FULL_ENV)).unwrap();
        assert_eq!(config.source.channel_id, "UC123");
        assert_eq!(config.source.event_type, "completed");
        assert_eq!(config.source.timeout, Duration::from_secs(30));
        assert_eq!(config.acquire_attempts, 3);
        assert_eq!(
            config.mail.recipients.success,
            ["a@example.com", "b@example.com"]
        );
        assert_eq!(config.mail.recipients.error, "ops@example.com");
        assert_eq!(config.mail.smtp_port, 587);
        assert_eq!(config.paths, PathsConfig::default());
        assert_eq!(config.cleanup, CleanupConfig::default());
        assert_eq!(config.storage.endpoint, GCS_API_BASE);
    }

    #[test]
    fn missing_required_value_names_the_variable() {
        let env: Vec<_> = FULL_ENV
            .iter()
            .copied()
            .filter(|(k, _)| *k != "GCS_BUCKET")
            .collect();
        let err = load_config_with(None, env_of(&env)).unwrap_err();
        assert!(err.to_string().contains("GCS_BUCKET"), "{err}");
    }

    #[test]
    fn api_key_is_optional_at_load_time() {
        let env: Vec<_> = FULL_ENV
            .iter()
            .copied()
            .filter(|(k, _)| *k != "YOUTUBE_API_KEY")
            .collect();
        let config = load_config_with(None, env_of(&env)).unwrap();
        assert!(config.source.api_key.is_none());
    }

    #[test]
    fn bad_smtp_port_is_rejected() {
        let mut env = FULL_ENV.to_vec();
        env.push(("SMTP_PORT", "not-a-port"));
        let err = load_config_with(None, env_of(&env)).unwrap_err();
        assert!(err.to_string().contains("SMTP_PORT"));
    }
}
