//! YouTube Data API v3 클라이언트
//!
//! 영상 ID로 snippet을 조회합니다. 실패는 모두 `None`으로 처리되어
//! 호출 측이 HTML 스크래핑으로 폴백합니다.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use super::http::{HttpClient, HttpRequest};

const DEFAULT_ENDPOINT: &str = "https://www.googleapis.com/youtube/v3/videos";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// 영상 메타데이터
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub author: Option<String>,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    #[serde(default)]
    snippet: Option<Snippet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    title: Option<String>,
    description: Option<String>,
    channel_title: Option<String>,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    maxres: Option<Thumbnail>,
    standard: Option<Thumbnail>,
    high: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    default: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: Option<String>,
}

impl Thumbnails {
    /// 가장 큰 썸네일 (maxres > standard > high > medium > default)
    fn best(&self) -> Option<&str> {
        [
            &self.maxres,
            &self.standard,
            &self.high,
            &self.medium,
            &self.default,
        ]
        .into_iter()
        .flatten()
        .next()
        .and_then(|t| t.url.as_deref())
    }
}

// ============================================================================
// Client
// ============================================================================

pub struct YoutubeClient {
    http: Arc<dyn HttpClient>,
    api_key: String,
    endpoint: String,
}

impl YoutubeClient {
    pub fn new(http: Arc<dyn HttpClient>, api_key: String) -> Self {
        Self {
            http,
            api_key,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    /// 엔드포인트 변경 (테스트용)
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    /// 영상 메타데이터 조회
    pub async fn video(&self, video_id: &str) -> Option<VideoMetadata> {
        let request = HttpRequest::get(&self.endpoint, REQUEST_TIMEOUT)
            .query("part", "snippet")
            .query("id", video_id)
            .query("key", &self.api_key);

        let response = match self.http.get(request).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("YouTube API request error for {}: {:#}", video_id, e);
                return None;
            }
        };

        if !response.is_success() {
            tracing::warn!(
                "YouTube API request failed for {}: status {}",
                video_id,
                response.status
            );
            return None;
        }

        let parsed: VideosResponse = match serde_json::from_str(&response.body) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("YouTube API response parse error for {}: {}", video_id, e);
                return None;
            }
        };

        let Some(item) = parsed.items.into_iter().next() else {
            tracing::warn!("YouTube API returned no items for video {}", video_id);
            return None;
        };

        let snippet = item.snippet?;
        let image = snippet.thumbnails.best().map(str::to_string);

        tracing::info!(
            "YouTube metadata fetched: {} ({:?})",
            video_id,
            snippet.title
        );

        Some(VideoMetadata {
            title: snippet.title,
            description: snippet.description,
            image,
            author: snippet.channel_title,
        })
    }
}
