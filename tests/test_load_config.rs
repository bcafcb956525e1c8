use serial_test::serial;
use std::env;
use std::fs::write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

const ENV_VARS: &[&str] = &[
    "YOUTUBE_API_KEY",
    "YOUTUBE_CHANNEL_ID",
    "SENDER_EMAIL",
    "SENDER_PASSWORD",
    "SMTP_HOST",
    "SMTP_PORT",
    "GCS_BUCKET",
    "GCS_ACCESS_TOKEN",
    "DATABASE_URL",
    "SUCCESS_RECIPIENTS",
    "ERROR_RECIPIENT",
];

fn clear_env() {
    for var in ENV_VARS {
        env::remove_var(var);
    }
}

const CONFIG_YAML: &str = r#"
source:
  channel_id: UC-from-file
  timeout_secs: 10
paths:
  input_dir: ./tmp/input
  output_dir: ./tmp/output
acquire_attempts: 5
max_workers: 4
storage:
  bucket: movie-edit
database:
  url: "sqlite://videos.db"
mail:
  sender: bot@example.com
  success_recipients:
    - a@example.com
    - b@example.com
  error_recipient: ops@example.com
cleanup:
  remove_input: false
"#;

/// Static YAML plus secrets from the environment produce a complete PipelineConfig.
#[tokio::test]
#[serial]
async fn test_load_config_merges_file_and_env() {
    clear_env();
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), CONFIG_YAML).unwrap();

    env::set_var("YOUTUBE_API_KEY", "top-secret-test-key");
    env::set_var("SENDER_PASSWORD", "app-password");
    env::set_var("GCS_ACCESS_TOKEN", "token");

    let config = vod_slicer::load_config::load_config(Some(config_file.path()))
        .expect("Config should load");

    assert_eq!(config.source.channel_id, "UC-from-file");
    assert_eq!(config.source.timeout, Duration::from_secs(10));
    assert_eq!(config.source.api_key.as_deref(), Some("top-secret-test-key"));
    assert_eq!(config.paths.input_dir, PathBuf::from("./tmp/input"));
    assert_eq!(config.paths.archive_dir, PathBuf::from("final_project"));
    assert_eq!(config.acquire_attempts, 5);
    assert_eq!(config.worker_count(), 4);
    assert_eq!(config.storage.bucket, "movie-edit");
    assert_eq!(config.storage.access_token.as_deref(), Some("token"));
    assert_eq!(config.database.url, "sqlite://videos.db");
    assert_eq!(config.mail.password.as_deref(), Some("app-password"));
    assert_eq!(config.mail.recipients.success.len(), 2);
    assert!(!config.cleanup.remove_input);
    assert!(config.cleanup.remove_segments);

    clear_env();
}

/// Environment values override the file.
#[tokio::test]
#[serial]
async fn test_load_config_env_overrides_file() {
    clear_env();
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), CONFIG_YAML).unwrap();

    env::set_var("YOUTUBE_CHANNEL_ID", "UC-from-env");
    env::set_var("SUCCESS_RECIPIENTS", "only@example.com");

    let config = vod_slicer::load_config::load_config(Some(config_file.path()))
        .expect("Config should load");
    assert_eq!(config.source.channel_id, "UC-from-env");
    assert_eq!(config.mail.recipients.success, ["only@example.com"]);

    clear_env();
}

#[tokio::test]
#[serial]
async fn test_load_config_errors_on_missing_recipients() {
    clear_env();
    env::set_var("YOUTUBE_CHANNEL_ID", "UC");
    env::set_var("SENDER_EMAIL", "bot@example.com");
    env::set_var("GCS_BUCKET", "movie-edit");
    env::set_var("DATABASE_URL", "sqlite::memory:");

    let err = vod_slicer::load_config::load_config(None).unwrap_err();
    assert!(err.to_string().contains("SUCCESS_RECIPIENTS"), "{err}");

    clear_env();
}

#[tokio::test]
#[serial]
async fn test_load_config_errors_on_invalid_yaml() {
    clear_env();
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), "source: [unterminated").unwrap();

    let err = vod_slicer::load_config::load_config(Some(config_file.path())).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config YAML"));
}
