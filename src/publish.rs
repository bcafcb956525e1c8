//! Publishing: upload the archive, then persist exactly one record for it.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::contract::{ObjectStorage, StorageError, VideoStore};
use crate::error::PipelineError;
use crate::naming;

pub const GCS_API_BASE: &str = "https://storage.googleapis.com";

/// Result of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub url: String,
    pub record_id: i64,
}

/// Upload `archive_path` as `<project>_final_version.zip` and record the public URL.
///
/// The record is written only after the upload returned a non-empty URL.
pub async fn publish<S, V>(
    storage: &S,
    store: &V,
    archive_path: &Path,
    project_name: &str,
) -> Result<Published, PipelineError>
where
    S: ObjectStorage + ?Sized,
    V: VideoStore + ?Sized,
{
    info!(archive = %archive_path.display(), "[PIPELINE][PUBLISH] Uploading archive");

    if !archive_path.is_file() {
        error!(archive = %archive_path.display(), "[PIPELINE][PUBLISH] Archive missing");
        return Err(PipelineError::Upload(format!(
            "archive {} does not exist",
            archive_path.display()
        )));
    }

    let remote_name = naming::archive_file_name(project_name);
    let url = storage.upload(archive_path, &remote_name).await?;
    if url.trim().is_empty() {
        error!(remote_name = %remote_name, "[PIPELINE][PUBLISH] Storage returned an empty URL");
        return Err(PipelineError::Upload(format!(
            "upload of {remote_name} returned no public URL"
        )));
    }
    info!(url = %url, "[PIPELINE][PUBLISH] Upload complete");

    let record_id = store.insert_video(project_name, &url).await?;
    info!(record_id, project_name, "[PIPELINE][PUBLISH] Record stored");
    Ok(Published { url, record_id })
}

/// Google Cloud Storage JSON API client using a bearer access token.
pub struct GcsStorage {
    http: reqwest::Client,
    bucket: String,
    access_token: Option<String>,
    endpoint: String,
}

impl GcsStorage {
    pub fn new(
        bucket: impl Into<String>,
        access_token: Option<String>,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::Request(format!("client setup: {e}")))?;
        Ok(Self {
            http,
            bucket: bucket.into(),
            access_token,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// Public URL of an object in this bucket.
    pub fn public_url(&self, remote_name: &str) -> String {
        format!("{GCS_API_BASE}/{}/{remote_name}", self.bucket)
    }
}

#[async_trait]
impl ObjectStorage for GcsStorage {
    async fn upload(&self, local_path: &Path, remote_name: &str) -> Result<String, StorageError> {
        let token = self
            .access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(StorageError::MissingCredential("GCS_ACCESS_TOKEN"))?;

        let body = tokio::fs::read(local_path)
            .await
            .map_err(|e| StorageError::Read {
                path: local_path.display().to_string(),
                reason: e.to_string(),
            })?;

        let url = format!("{}/upload/storage/v1/b/{}/o", self.endpoint, self.bucket);
        debug!(url = %url, remote_name, bytes = body.len(), "Uploading object");

        self.http
            .post(&url)
            .query(&[
                ("uploadType", "media"),
                ("name", remote_name),
                ("predefinedAcl", "publicRead"),
            ])
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/zip")
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| StorageError::Request(e.to_string()))?;

        Ok(self.public_url(remote_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{MockObjectStorage, MockVideoStore, StoreError};
    use mockall::predicate::eq;
    use tempfile::tempdir;

    #[tokio::test]
    async fn uploads_then_inserts() {
        let tmp = tempdir().unwrap();
        let archive = tmp.path().join("Demo_final_version.zip");
        std::fs::write(&archive, b"zip").unwrap();

        let mut storage = MockObjectStorage::new();
        storage
            .expect_upload()
            .withf(|_, name| name == "Demo_final_version.zip")
            .times(1)
            .returning(|_, _| Ok("https://example/x.zip".into()));
        let mut store = MockVideoStore::new();
        store
            .expect_insert_video()
            .with(eq("Demo"), eq("https://example/x.zip"))
            .times(1)
            .returning(|_, _| Ok(7));

        let published = publish(&storage, &store, &archive, "Demo").await.unwrap();
        assert_eq!(
            published,
            Published {
                url: "https://example/x.zip".into(),
                record_id: 7
            }
        );
    }

    #[tokio::test]
    async fn missing_archive_skips_upload() {
        let tmp = tempdir().unwrap();
        let mut storage = MockObjectStorage::new();
        storage.expect_upload().never();
        let mut store = MockVideoStore::new();
        store.expect_insert_video().never();

        let err = publish(&storage, &store, &tmp.path().join("none.zip"), "Demo")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Upload(_)));
    }

    #[tokio::test]
    async fn insert_failure_is_upload_error() {
        let tmp = tempdir().unwrap();
        let archive = tmp.path().join("a.zip");
        std::fs::write(&archive, b"zip").unwrap();

        let mut storage = MockObjectStorage::new();
        storage
            .expect_upload()
            .returning(|_, _| Ok("https://example/x.zip".into()));
        let mut store = MockVideoStore::new();
        store
            .expect_insert_video()
            .returning(|_, _| Err(StoreError::Query("disk I/O error".into())));

        let err = publish(&storage, &store, &archive, "Demo").await.unwrap_err();
        assert!(matches!(err, PipelineError::Upload(ref m) if m.contains("disk I/O error")));
    }

    #[tokio::test]
    async fn gcs_requires_a_token() {
        let tmp = tempdir().unwrap();
        let archive = tmp.path().join("a.zip");
        std::fs::write(&archive, b"zip").unwrap();
        let gcs = GcsStorage::new("movie-edit", None, "http://127.0.0.1:9", Duration::from_secs(1))
            .unwrap();
        assert_eq!(
            gcs.upload(&archive, "a.zip").await.unwrap_err(),
            StorageError::MissingCredential("GCS_ACCESS_TOKEN")
        );
    }

    #[test]
    fn public_url_uses_bucket_and_name() {
        let gcs = GcsStorage::new("movie-edit", None, GCS_API_BASE, Duration::from_secs(1)).unwrap();
        assert_eq!(
            gcs.public_url("Demo_final_version.zip"),
            "https://storage.googleapis.com/movie-edit/Demo_final_version.zip"
        );
    }
}
