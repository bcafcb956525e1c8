//! SQLite-backed record store for published videos.
//!
//! The store is constructed explicitly by the caller and handed to the orchestrator, which
//! closes it during cleanup. There is no process-wide handle.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, error, info};

use crate::contract::{StoreError, VideoStore};
use crate::retry::{retry, Backoff, RetryAction, RetryFailure, RetryPolicy};

const CREATE_VIDEOS_TABLE: &str = "CREATE TABLE IF NOT EXISTS videos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    video_name TEXT NOT NULL,
    project_link TEXT NOT NULL
)";

/// One row of the `videos` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRecord {
    pub id: i64,
    pub video_name: String,
    pub project_link: String,
}

/// Policy used for connecting and schema setup.
pub fn default_init_policy() -> RetryPolicy {
    RetryPolicy::with_backoff(
        5,
        Backoff {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            jitter: true,
        },
    )
}

pub struct SqliteVideoStore {
    pool: SqlitePool,
}

impl SqliteVideoStore {
    /// Open a pool for `database_url`, retrying transient connection failures.
    ///
    /// The pool holds a single connection that is never recycled, which keeps
    /// `sqlite::memory:` databases alive for the lifetime of the store.
    pub async fn connect(database_url: &str, policy: &RetryPolicy) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::Connect(format!("invalid database url: {e}")))?
            .create_if_missing(true);

        let pool = retry(policy, "database connect", |_| {
            let options = options.clone();
            async move {
                match SqlitePoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(options)
                    .await
                {
                    Ok(pool) => RetryAction::Success(pool),
                    Err(e) => RetryAction::Retry(e),
                }
            }
        })
        .await
        .map_err(|failure| match failure {
            RetryFailure::Exhausted {
                attempts,
                last_error,
            } => StoreError::Connect(format!("{last_error} (after {attempts} attempts)")),
            RetryFailure::Aborted { error, .. } => StoreError::Connect(error.to_string()),
        })?;

        info!("Database pool initialized");
        Ok(Self { pool })
    }

    /// Create the `videos` table if it does not exist.
    pub async fn init_schema(&self, policy: &RetryPolicy) -> Result<(), StoreError> {
        retry(policy, "database schema", |_| async move {
            match sqlx::query(CREATE_VIDEOS_TABLE).execute(&self.pool).await {
                Ok(_) => RetryAction::Success(()),
                Err(e) => RetryAction::Retry(e),
            }
        })
        .await
        .map_err(|failure| match failure {
            RetryFailure::Exhausted { last_error, .. } => {
                error!(error = %last_error, "Schema initialisation failed");
                StoreError::Query(last_error.to_string())
            }
            RetryFailure::Aborted { error, .. } => StoreError::Query(error.to_string()),
        })?;
        debug!("videos table ready");
        Ok(())
    }

    pub async fn count_videos(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM videos")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(count)
    }
}

#[async_trait]
impl VideoStore for SqliteVideoStore {
    async fn insert_video(&self, project_name: &str, url: &str) -> Result<i64, StoreError> {
        let result = sqlx::query("INSERT INTO videos (video_name, project_link) VALUES (?, ?)")
            .bind(project_name)
            .bind(url)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, project_name, "Failed to insert video record");
                StoreError::Query(e.to_string())
            })?;
        let id = result.last_insert_rowid();
        debug!(id, project_name, "Inserted video record");
        Ok(id)
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!("Database pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn find_video(store: &SqliteVideoStore, id: i64) -> Option<VideoRecord> {
        let row: Option<(i64, String, String)> =
            sqlx::query_as("SELECT id, video_name, project_link FROM videos WHERE id = ?")
                .bind(id)
                .fetch_optional(&store.pool)
                .await
                .unwrap();
        row.map(|(id, video_name, project_link)| VideoRecord {
            id,
            video_name,
            project_link,
        })
    }

    async fn memory_store() -> SqliteVideoStore {
        let policy = RetryPolicy::immediate(1);
        let store = SqliteVideoStore::connect("sqlite::memory:", &policy)
            .await
            .unwrap();
        store.init_schema(&policy).await.unwrap();
        store
    }

    #[tokio::test]
    async fn insert_then_find() {
        let store = memory_store().await;
        let id = store
            .insert_video("Demo-Title", "https://example/x.zip")
            .await
            .unwrap();
        let record = find_video(&store, id).await.unwrap();
        assert_eq!(
            record,
            VideoRecord {
                id,
                video_name: "Demo-Title".into(),
                project_link: "https://example/x.zip".into(),
            }
        );
        assert_eq!(store.count_videos().await.unwrap(), 1);
        store.close().await;
    }

    #[tokio::test]
    async fn ids_are_distinct() {
        let store = memory_store().await;
        let a = store.insert_video("a", "u1").await.unwrap();
        let b = store.insert_video("b", "u2").await.unwrap();
        assert_ne!(a, b);
        assert!(find_video(&store, b + 100).await.is_none());
    }

    #[tokio::test]
    async fn schema_init_is_idempotent() {
        let store = memory_store().await;
        store.init_schema(&RetryPolicy::immediate(1)).await.unwrap();
        assert_eq!(store.count_videos().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn insert_after_close_fails() {
        let store = memory_store().await;
        store.close().await;
        assert!(matches!(
            store.insert_video("a", "u").await,
            Err(StoreError::Query(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_file_is_a_connect_error() {
        let tmp = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/missing/dir/videos.db", tmp.path().display());
        let err = SqliteVideoStore::connect(&url, &RetryPolicy::immediate(2))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Connect(_)));
    }
}
