//! 링크 메타데이터 수집 모듈
//!
//! URL을 받아 소스 타입을 분류하고 제목, 설명, 이미지, 작성자를 가져옵니다.
//! YouTube 영상은 Data API를 먼저 시도하고, 그 외에는 HTML의 Open Graph 태그를 읽습니다.
//!
//! `fetch`는 실패하지 않습니다. 모든 실패 경로는 빈 필드로 대체되며
//! 소스 타입과 이미 추출한 식별자는 유지됩니다.

pub mod guard;
pub mod html;
pub mod http;
pub mod source;
pub mod youtube;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::config::Settings;
use crate::content::{Link, Written};

pub use guard::{is_public_ip, is_safe_url, DnsResolver, SystemResolver};
pub use html::{extract_author, parse_og_tags};
pub use http::{HttpClient, HttpRequest, HttpResponse, ReqwestClient};
pub use source::{detect_source_type, extract_embed_data, EmbedData, SourceType};
pub use youtube::{VideoMetadata, YoutubeClient};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; PortfolioBot/1.0)";

// ============================================================================
// LinkMetadata
// ============================================================================

/// 수집된 링크 메타데이터
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkMetadata {
    pub url: String,
    pub source_type: SourceType,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub site_name: Option<String>,
    pub author: Option<String>,
    pub embed_data: Option<EmbedData>,
    pub og_raw: Option<BTreeMap<String, String>>,
}

fn non_empty(value: &Option<String>) -> Option<&String> {
    value.as_ref().filter(|v| !v.is_empty())
}

impl LinkMetadata {
    /// 빈 결과 (소스 타입과 식별자만 유지)
    pub fn empty(url: &str, source_type: SourceType, embed_data: Option<EmbedData>) -> Self {
        Self {
            url: url.to_string(),
            source_type,
            title: None,
            description: None,
            image: None,
            site_name: None,
            author: None,
            embed_data,
            og_raw: None,
        }
    }

    /// 설명 필드가 하나라도 있는지
    pub fn has_content(&self) -> bool {
        [
            &self.title,
            &self.description,
            &self.image,
            &self.site_name,
            &self.author,
        ]
        .into_iter()
        .any(|v| non_empty(v).is_some())
    }

    /// 저장된 링크에 병합
    ///
    /// 비어 있지 않은 값만 덮어쓰고, 소스 타입은 항상 갱신합니다.
    /// 반환값은 변경된 필드 이름입니다.
    pub fn merge_into(&self, link: &mut Link) -> Vec<&'static str> {
        let mut updated = Vec::new();

        let text_fields: [(&'static str, &Option<String>, &mut Option<String>); 5] = [
            ("title", &self.title, &mut link.title),
            ("description", &self.description, &mut link.description),
            ("image_url", &self.image, &mut link.image_url),
            ("site_name", &self.site_name, &mut link.site_name),
            ("author", &self.author, &mut link.author),
        ];

        for (name, incoming, current) in text_fields {
            if let Some(value) = non_empty(incoming) {
                *current = Some(value.clone());
                updated.push(name);
            }
        }

        if let Some(og_raw) = self.og_raw.as_ref().filter(|m| !m.is_empty()) {
            link.og_raw = Some(og_raw.clone());
            updated.push("og_raw");
        }

        link.source_type = self.source_type;
        updated.push("source_type");

        if let Some(embed_data) = &self.embed_data {
            link.embed_data = Some(embed_data.clone());
            updated.push("embed_data");
        }

        updated
    }
}

// ============================================================================
// LinkRepository
// ============================================================================

/// 메타데이터 갱신 대상 저장소
#[async_trait]
pub trait LinkRepository: Send + Sync {
    async fn find_link(&self, id: i64) -> Result<Option<Link>>;

    /// 메타데이터 병합 후 저장
    async fn apply_link_metadata(&self, id: i64, metadata: &LinkMetadata) -> Result<Written<Link>>;
}

// ============================================================================
// MetadataFetcher
// ============================================================================

pub struct MetadataFetcher {
    http: Arc<dyn HttpClient>,
    resolver: Arc<dyn DnsResolver>,
    youtube: Option<YoutubeClient>,
    timeout: Duration,
}

impl MetadataFetcher {
    pub fn new(http: Arc<dyn HttpClient>, resolver: Arc<dyn DnsResolver>) -> Self {
        Self {
            http,
            resolver,
            youtube: None,
            timeout: Duration::from_secs(crate::config::DEFAULT_FETCH_TIMEOUT_SECS),
        }
    }

    pub fn with_youtube(mut self, youtube: YoutubeClient) -> Self {
        self.youtube = Some(youtube);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 설정으로 생성 (reqwest + 시스템 DNS)
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestClient::new(settings.fetch_max_redirects)?);
        let mut fetcher = Self::new(Arc::clone(&http), Arc::new(SystemResolver))
            .with_timeout(settings.fetch_timeout);

        if let Some(key) = &settings.youtube_api_key {
            fetcher = fetcher.with_youtube(YoutubeClient::new(http, key.clone()));
        }

        Ok(fetcher)
    }

    /// URL 메타데이터 수집
    pub async fn fetch(&self, url: &str) -> LinkMetadata {
        let source_type = detect_source_type(url);
        let embed_data = extract_embed_data(url, source_type);

        if let Some(video_id) = embed_data.as_ref().and_then(EmbedData::video_id) {
            match &self.youtube {
                Some(youtube) => {
                    if let Some(video) = youtube.video(video_id).await {
                        return LinkMetadata {
                            url: url.to_string(),
                            source_type,
                            title: video.title,
                            description: video.description,
                            image: video.image,
                            site_name: Some("YouTube".to_string()),
                            author: video.author,
                            embed_data,
                            og_raw: None,
                        };
                    }
                    tracing::info!("YouTube API unavailable for {}, falling back to scraping", url);
                }
                None => tracing::debug!("No YouTube API key, scraping {}", url),
            }
        }

        self.scrape(url, source_type, embed_data).await
    }

    /// HTML Open Graph 태그 스크래핑
    async fn scrape(&self, url: &str, source_type: SourceType, embed_data: Option<EmbedData>) -> LinkMetadata {
        // 안전성 검사가 끝나기 전에는 요청하지 않음
        if !is_safe_url(url, self.resolver.as_ref()).await {
            return LinkMetadata::empty(url, source_type, embed_data);
        }

        let request = HttpRequest::get(url, self.timeout)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "text/html")
            .header("Accept-Language", "en-US,en;q=0.9");

        let response = match self.http.get(request).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("OpenGraph fetch error for {}: {:#}", url, e);
                return LinkMetadata::empty(url, source_type, embed_data);
            }
        };

        if !response.is_success() {
            tracing::warn!(
                "OpenGraph fetch failed for {}: status {}",
                url,
                response.status
            );
            return LinkMetadata::empty(url, source_type, embed_data);
        }

        let tags = parse_og_tags(&response.body);
        if tags.is_empty() {
            tracing::warn!(
                "OpenGraph fetch returned no tags for {} ({} bytes)",
                url,
                response.body.len()
            );
        }

        let author = extract_author(url, source_type, &tags);

        LinkMetadata {
            url: url.to_string(),
            source_type,
            title: tags.get("og:title").cloned(),
            description: tags.get("og:description").cloned(),
            image: tags.get("og:image").cloned(),
            site_name: tags.get("og:site_name").cloned(),
            author,
            embed_data,
            og_raw: (!tags.is_empty()).then_some(tags),
        }
    }

    /// 저장된 링크의 메타데이터 재수집 후 저장
    pub async fn refresh(&self, repo: &dyn LinkRepository, id: i64) -> Result<Written<Link>> {
        let link = repo
            .find_link(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Link {} not found", id))?;

        let metadata = self.fetch(&link.url).await;
        if !metadata.has_content() {
            tracing::warn!("No metadata found while refreshing link {} ({})", id, link.url);
        }

        repo.apply_link_metadata(id, &metadata).await
    }
}

// ============================================================================
// Tests
// ============================================================================
