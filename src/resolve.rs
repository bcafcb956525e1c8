//! Source resolution: find the URL of the latest completed livestream of a channel.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::contract::{ResolveError, SourceLookup};
use crate::error::PipelineError;

pub const YOUTUBE_API_BASE: &str = "https://www.googleapis.com/youtube/v3";

/// Resolve the source URL, turning "not found" into a typed failure.
pub async fn resolve_source<L>(
    lookup: &L,
    channel_id: &str,
    event_type: &str,
) -> Result<String, PipelineError>
where
    L: SourceLookup + ?Sized,
{
    info!(channel_id, event_type, "[PIPELINE][RESOLVE] Looking up latest item");
    match lookup.find_latest(channel_id, event_type).await {
        Ok(Some(url)) => {
            info!(url = %url, "[PIPELINE][RESOLVE] Source resolved");
            Ok(url)
        }
        Ok(None) => {
            error!(channel_id, "[PIPELINE][RESOLVE] No matching item");
            Err(ResolveError::NoResults(channel_id.to_string()).into())
        }
        Err(e) => {
            error!(error = %e, "[PIPELINE][RESOLVE] Lookup failed");
            Err(e.into())
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    items: Option<Vec<SearchItem>>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: Option<SearchItemId>,
}

#[derive(Debug, Deserialize)]
struct SearchItemId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

/// Pull the first video id out of a search response body.
fn parse_search_response(body: &str) -> Result<Option<String>, ResolveError> {
    let response: SearchResponse = serde_json::from_str(body)
        .map_err(|e| ResolveError::MalformedResponse(format!("invalid JSON: {e}")))?;

    let items = response
        .items
        .ok_or_else(|| ResolveError::MalformedResponse("missing `items`".into()))?;

    let Some(first) = items.into_iter().next() else {
        return Ok(None);
    };

    let video_id = first
        .id
        .ok_or_else(|| ResolveError::MalformedResponse("item without `id`".into()))?
        .video_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ResolveError::MalformedResponse("item without `id.videoId`".into()))?;

    Ok(Some(format!("https://www.youtube.com/watch?v={video_id}")))
}

/// YouTube Data API search client.
pub struct YouTubeClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
}

impl YouTubeClient {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Result<Self, ResolveError> {
        Self::with_base_url(api_key, timeout, YOUTUBE_API_BASE)
    }

    pub fn with_base_url(
        api_key: Option<String>,
        timeout: Duration,
        base_url: &str,
    ) -> Result<Self, ResolveError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ResolveError::TransientNetwork(format!("client setup: {e}")))?;
        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn classify(&self, e: reqwest::Error) -> ResolveError {
        if e.is_timeout() {
            ResolveError::Timeout(self.timeout)
        } else {
            ResolveError::TransientNetwork(e.to_string())
        }
    }
}

#[async_trait]
impl SourceLookup for YouTubeClient {
    async fn find_latest(
        &self,
        channel_id: &str,
        event_type: &str,
    ) -> Result<Option<String>, ResolveError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(ResolveError::MissingCredential("YOUTUBE_API_KEY"))?;

        let url = format!("{}/search", self.base_url);
        debug!(url = %url, channel_id, event_type, "Calling search endpoint");

        let response = self
            .http
            .get(&url)
            .query(&[
                ("part", "snippet"),
                ("channelId", channel_id),
                ("eventType", event_type),
                ("type", "video"),
                ("order", "date"),
                ("maxResults", "1"),
                ("key", api_key),
            ])
            .send()
            .await
            .map_err(|e| self.classify(e))?
            .error_for_status()
            .map_err(|e| self.classify(e))?;

        let body = response.text().await.map_err(|e| self.classify(e))?;
        parse_search_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockSourceLookup;

    #[test]
    fn parses_first_video_id() {
        let body = r#"{"items":[{"id":{"kind":"youtube#video","videoId":"test_video_id"},"snippet":{"title":"Test Video"}}]}"#;
        assert_eq!(
            parse_search_response(body).unwrap(),
            Some("https://www.youtube.com/watch?v=test_video_id".to_string())
        );
    }

    #[test]
    fn empty_items_is_not_found() {
        assert_eq!(parse_search_response(r#"{"items":[]}"#).unwrap(), None);
    }

    #[test]
    fn missing_fields_are_malformed_not_none() {
        for body in [
            r#"{"kind":"youtube#searchListResponse"}"#,
            r#"{"items":[{"snippet":{}}]}"#,
            r#"{"items":[{"id":{"kind":"youtube#channel"}}]}"#,
            "not json",
        ] {
            let err = parse_search_response(body).unwrap_err();
            assert!(
                matches!(err, ResolveError::MalformedResponse(_)),
                "body {body:?} gave {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn missing_api_key_fails_without_network() {
        let client = YouTubeClient::with_base_url(None, Duration::from_secs(1), "http://127.0.0.1:9")
            .unwrap();
        let err = client.find_latest("chan", "completed").await.unwrap_err();
        assert_eq!(err, ResolveError::MissingCredential("YOUTUBE_API_KEY"));
        assert!(err.to_string().contains("YOUTUBE_API_KEY not found"));
    }

    #[tokio::test]
    async fn not_found_becomes_download_error() {
        let mut lookup = MockSourceLookup::new();
        lookup.expect_find_latest().returning(|_, _| Ok(None));
        let err = resolve_source(&lookup, "chan", "completed").await.unwrap_err();
        assert!(matches!(err, PipelineError::Download(ref m) if m.contains("chan")));
    }

    #[tokio::test]
    async fn timeout_becomes_download_error() {
        let mut lookup = MockSourceLookup::new();
        lookup
            .expect_find_latest()
            .returning(|_, _| Err(ResolveError::Timeout(Duration::from_secs(30))));
        let err = resolve_source(&lookup, "chan", "completed").await.unwrap_err();
        assert!(matches!(err, PipelineError::Download(ref m) if m.contains("timed out")));
    }
}
