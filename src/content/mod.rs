//! Content 모듈 - 검색 대상 컬렉션 (글, 프로젝트, 링크)
//!
//! - 레코드 타입과 공개용 요약(summary) 프로젝션
//! - 컬렉션별 키워드 검색 필드 테이블 (런타임 리플렉션 없이 enum으로 고정)
//! - 임베딩 입력 텍스트 생성
//! - 쓰기 경로의 명시적 post-commit 훅 (`Written`)
//! - SQLite 저장소 (벡터 검색 지원) / 인메모리 저장소 (부분 문자열 검색만)

mod memory;
mod store;

pub use memory::MemoryStore;
pub use store::{CollectionStats, SqliteStore};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use scraper::Html;
use serde::{Deserialize, Serialize};

use crate::indexing::{EmbeddingJob, EmbeddingQueue};
use crate::opengraph::{EmbedData, SourceType};

// ============================================================================
// Collection
// ============================================================================

/// 검색 대상 컬렉션
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    /// 블로그 글
    Articles,
    /// 프로젝트
    Projects,
    /// 큐레이션 링크 (shares)
    Links,
}

/// 키워드 검색 대상 필드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Excerpt,
    Content,
    Description,
    LongDescription,
    Commentary,
    Url,
}

impl Field {
    /// SQLite 컬럼 이름
    pub fn column(self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Excerpt => "excerpt",
            Field::Content => "content",
            Field::Description => "description",
            Field::LongDescription => "long_description",
            Field::Commentary => "commentary",
            Field::Url => "url",
        }
    }
}

const ARTICLE_FIELDS: &[Field] = &[Field::Title, Field::Excerpt, Field::Content];
const PROJECT_FIELDS: &[Field] = &[Field::Title, Field::Description, Field::LongDescription];
const LINK_FIELDS: &[Field] = &[Field::Title, Field::Description, Field::Commentary, Field::Url];

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Articles, Collection::Projects, Collection::Links];

    /// 결과 맵 키 겸 테이블 이름
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Articles => "articles",
            Collection::Projects => "projects",
            Collection::Links => "links",
        }
    }

    /// 키워드 검색 필드 (순서 고정)
    pub fn keyword_fields(self) -> &'static [Field] {
        match self {
            Collection::Articles => ARTICLE_FIELDS,
            Collection::Projects => PROJECT_FIELDS,
            Collection::Links => LINK_FIELDS,
        }
    }

    /// 기술 스택 이름도 키워드 매칭 대상인지
    pub fn matches_technologies(self) -> bool {
        matches!(self, Collection::Projects)
    }

    /// 공개 상태 필터 적용 여부 (링크는 항상 노출)
    pub fn has_visibility_gate(self) -> bool {
        !matches!(self, Collection::Links)
    }

    /// CLI/API 모델 이름 파싱 (`blog`, `share` 별칭 허용)
    pub fn from_model_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "article" | "articles" | "blog" | "blogs" => Some(Collection::Articles),
            "project" | "projects" => Some(Collection::Projects),
            "link" | "links" | "share" | "shares" => Some(Collection::Links),
            _ => None,
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Publish Status
// ============================================================================

/// 공개 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishStatus {
    Draft,
    Published,
}

impl PublishStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PublishStatus::Draft => "draft",
            PublishStatus::Published => "published",
        }
    }

    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("published") {
            PublishStatus::Published
        } else {
            PublishStatus::Draft
        }
    }
}

/// 상태 변경 시 `published_at` 결정
///
/// 상태가 바뀌지 않았으면 입력값을 그대로 유지합니다.
/// `previous`가 `None`이면 신규 생성으로 간주합니다.
pub fn resolve_published_at(
    previous: Option<PublishStatus>,
    status: PublishStatus,
    published_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if previous == Some(status) {
        return published_at;
    }
    match status {
        PublishStatus::Published => published_at.or(Some(now)),
        PublishStatus::Draft => None,
    }
}

// ============================================================================
// Records
// ============================================================================

/// 저장된 임베딩 (벡터와 생성 시각은 항상 함께 존재)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEmbedding {
    pub vector: Vec<f32>,
    pub generated_at: DateTime<Utc>,
}

/// 블로그 글
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub excerpt: Option<String>,
    /// HTML 본문
    pub content: String,
    pub featured_image: Option<String>,
    pub status: PublishStatus,
    pub published_at: Option<DateTime<Utc>>,
    pub embedding: Option<StoredEmbedding>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 글 작성/수정 입력
#[derive(Debug, Clone, Default)]
pub struct NewArticle {
    pub title: String,
    pub excerpt: Option<String>,
    pub content: String,
    pub featured_image: Option<String>,
    pub status: Option<PublishStatus>,
    pub published_at: Option<DateTime<Utc>>,
}

/// 프로젝트
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub long_description: Option<String>,
    pub featured_image: Option<String>,
    pub project_url: Option<String>,
    pub github_url: Option<String>,
    pub is_featured: bool,
    pub status: PublishStatus,
    pub published_at: Option<DateTime<Utc>>,
    /// 기술 스택 이름
    pub technologies: Vec<String>,
    pub embedding: Option<StoredEmbedding>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 프로젝트 작성/수정 입력
#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub title: String,
    pub description: Option<String>,
    pub long_description: Option<String>,
    pub featured_image: Option<String>,
    pub project_url: Option<String>,
    pub github_url: Option<String>,
    pub is_featured: bool,
    pub status: Option<PublishStatus>,
    pub published_at: Option<DateTime<Utc>>,
    pub technologies: Vec<String>,
}

/// 큐레이션 링크
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub id: i64,
    pub url: String,
    pub source_type: SourceType,
    pub title: Option<String>,
    pub slug: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub site_name: Option<String>,
    pub author: Option<String>,
    /// 작성자 코멘트
    pub commentary: Option<String>,
    pub embed_data: Option<EmbedData>,
    pub og_raw: Option<BTreeMap<String, String>>,
    pub embedding: Option<StoredEmbedding>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 링크 작성/수정 입력
#[derive(Debug, Clone)]
pub struct NewLink {
    pub url: String,
    pub source_type: SourceType,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub site_name: Option<String>,
    pub author: Option<String>,
    pub commentary: Option<String>,
    pub embed_data: Option<EmbedData>,
    pub og_raw: Option<BTreeMap<String, String>>,
}

impl NewLink {
    /// URL만으로 생성 (소스 타입/식별자는 URL에서 계산)
    pub fn new(url: &str) -> Self {
        let source_type = crate::opengraph::detect_source_type(url);
        Self {
            url: url.to_string(),
            source_type,
            title: None,
            description: None,
            image_url: None,
            site_name: None,
            author: None,
            commentary: None,
            embed_data: crate::opengraph::extract_embed_data(url, source_type),
            og_raw: None,
        }
    }

    /// 가져온 메타데이터로 생성
    pub fn from_metadata(meta: crate::opengraph::LinkMetadata, commentary: Option<String>) -> Self {
        Self {
            url: meta.url,
            source_type: meta.source_type,
            title: meta.title,
            description: meta.description,
            image_url: meta.image,
            site_name: meta.site_name,
            author: meta.author,
            commentary,
            embed_data: meta.embed_data,
            og_raw: meta.og_raw,
        }
    }
}

// ============================================================================
// Searchable
// ============================================================================

/// 키워드 매칭용 필드 접근
pub trait Searchable {
    fn field(&self, field: Field) -> Option<&str>;

    /// 필드 외 추가 매칭 대상 (프로젝트의 기술 스택)
    fn extra_terms(&self) -> &[String] {
        &[]
    }
}

impl Searchable for Article {
    fn field(&self, field: Field) -> Option<&str> {
        match field {
            Field::Title => Some(&self.title),
            Field::Excerpt => self.excerpt.as_deref(),
            Field::Content => Some(&self.content),
            _ => None,
        }
    }
}

impl Searchable for Project {
    fn field(&self, field: Field) -> Option<&str> {
        match field {
            Field::Title => Some(&self.title),
            Field::Description => self.description.as_deref(),
            Field::LongDescription => self.long_description.as_deref(),
            _ => None,
        }
    }

    fn extra_terms(&self) -> &[String] {
        &self.technologies
    }
}

impl Searchable for Link {
    fn field(&self, field: Field) -> Option<&str> {
        match field {
            Field::Title => self.title.as_deref(),
            Field::Description => self.description.as_deref(),
            Field::Commentary => self.commentary.as_deref(),
            Field::Url => Some(&self.url),
            _ => None,
        }
    }
}

/// 검색어를 공백 기준으로 분리
pub fn split_terms(query: &str) -> Vec<String> {
    query.split_whitespace().map(str::to_string).collect()
}

/// 모든 검색어가 (필드 중 하나 또는 추가 항목에) 부분 문자열로 포함되는지
///
/// 검색어끼리는 AND, 필드끼리는 OR. 대소문자 무시.
pub fn matches_all_terms<T: Searchable>(record: &T, fields: &[Field], terms: &[String]) -> bool {
    if terms.is_empty() {
        return false;
    }

    terms.iter().all(|term| {
        let needle = term.to_lowercase();
        fields
            .iter()
            .filter_map(|f| record.field(*f))
            .chain(record.extra_terms().iter().map(String::as_str))
            .any(|value| value.to_lowercase().contains(&needle))
    })
}

// ============================================================================
// Embeddable Text
// ============================================================================

impl Article {
    /// 공개 여부 (published 상태 + 공개 시각 존재)
    pub fn is_visible(&self) -> bool {
        self.status == PublishStatus::Published && self.published_at.is_some()
    }

    pub fn embeddable_text(&self) -> String {
        join_lines([
            Some(self.title.clone()),
            self.excerpt.clone(),
            Some(strip_tags(&self.content)),
        ])
    }

    /// 임베딩 재생성이 필요한 필드가 바뀌었는지
    pub fn tracked_fields_differ(&self, input: &NewArticle) -> bool {
        self.title != input.title || self.excerpt != input.excerpt || self.content != input.content
    }

    pub fn summary(&self) -> ArticleSummary {
        ArticleSummary {
            id: self.id,
            title: self.title.clone(),
            slug: self.slug.clone(),
            excerpt: self.excerpt.clone(),
            featured_image: self.featured_image.clone(),
            published_at: self.published_at,
            read_time: read_time(&self.content),
        }
    }
}

impl Project {
    pub fn is_visible(&self) -> bool {
        self.status == PublishStatus::Published
    }

    pub fn embeddable_text(&self) -> String {
        let tech = if self.technologies.is_empty() {
            None
        } else {
            Some(format!("Technologies: {}", self.technologies.join(", ")))
        };
        join_lines([
            Some(self.title.clone()),
            self.description.clone(),
            self.long_description.clone(),
            tech,
        ])
    }

    pub fn tracked_fields_differ(&self, input: &NewProject) -> bool {
        self.title != input.title
            || self.description != input.description
            || self.long_description != input.long_description
            || technology_keys(&self.technologies) != technology_keys(&input.technologies)
    }

    pub fn summary(&self) -> ProjectSummary {
        ProjectSummary {
            id: self.id,
            title: self.title.clone(),
            slug: self.slug.clone(),
            description: self.description.clone(),
            featured_image: self.featured_image.clone(),
            project_url: self.project_url.clone(),
            github_url: self.github_url.clone(),
            is_featured: self.is_featured,
            published_at: self.published_at,
            technologies: self.technologies.clone(),
        }
    }
}

impl Link {
    pub fn embeddable_text(&self) -> String {
        join_lines([
            self.title.clone(),
            self.description.clone(),
            self.commentary.as_ref().map(|c| format!("My thoughts: {}", c)),
        ])
    }

    pub fn tracked_fields_differ(&self, input: &NewLink) -> bool {
        self.title != input.title
            || self.description != input.description
            || self.commentary != input.commentary
    }

    pub fn summary(&self) -> LinkSummary {
        LinkSummary {
            id: self.id,
            url: self.url.clone(),
            source_type: self.source_type,
            title: self.title.clone(),
            slug: self.slug.clone(),
            description: self.description.clone(),
            image_url: self.image_url.clone(),
            site_name: self.site_name.clone(),
            created_at: self.created_at,
        }
    }
}

/// 비어있지 않은 줄만 개행으로 연결
fn join_lines<const N: usize>(parts: [Option<String>; N]) -> String {
    parts
        .into_iter()
        .flatten()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// 기술 스택 이름 정규화 (중복 제거, 정렬)
pub fn normalize_technologies(names: &[String]) -> Vec<String> {
    let mut out: Vec<String> = names
        .iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect();
    out.sort_by_key(|n| n.to_lowercase());
    out.dedup_by(|a, b| a.eq_ignore_ascii_case(b));
    out
}

fn technology_keys(names: &[String]) -> Vec<String> {
    normalize_technologies(names)
        .into_iter()
        .map(|n| n.to_lowercase())
        .collect()
}

/// HTML 태그 제거 후 공백 정리
pub fn strip_tags(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 읽기 시간 (분, 분당 200단어)
pub fn read_time(html: &str) -> u32 {
    let words = strip_tags(html).split_whitespace().count() as u32;
    words.div_ceil(200)
}

/// 제목으로 slug 생성
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}

// ============================================================================
// Summaries (public projection)
// ============================================================================

/// 글 요약 (본문 제외)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleSummary {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub excerpt: Option<String>,
    pub featured_image: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    /// 분 단위
    pub read_time: u32,
}

/// 프로젝트 요약
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub featured_image: Option<String>,
    pub project_url: Option<String>,
    pub github_url: Option<String>,
    pub is_featured: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub technologies: Vec<String>,
}

/// 링크 요약 (og_raw, commentary, embed_data 제외)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSummary {
    pub id: i64,
    pub url: String,
    pub source_type: SourceType,
    pub title: Option<String>,
    pub slug: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub site_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 검색 결과 레코드
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ContentSummary {
    Article(ArticleSummary),
    Project(ProjectSummary),
    Link(LinkSummary),
}

impl ContentSummary {
    pub fn id(&self) -> i64 {
        match self {
            ContentSummary::Article(a) => a.id,
            ContentSummary::Project(p) => p.id,
            ContentSummary::Link(l) => l.id,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            ContentSummary::Article(a) => Some(&a.title),
            ContentSummary::Project(p) => Some(&p.title),
            ContentSummary::Link(l) => l.title.as_deref(),
        }
    }
}

// ============================================================================
// Post-commit hook
// ============================================================================

/// 쓰기 결과
///
/// 임베딩 재생성이 필요한 쓰기는 `dispatch`를 거쳐야 레코드를 꺼낼 수 있습니다.
#[must_use = "call `dispatch` so the embedding refresh is enqueued"]
#[derive(Debug)]
pub struct Written<T> {
    record: T,
    reindex: Option<EmbeddingJob>,
}

impl<T> Written<T> {
    pub(crate) fn new(record: T, reindex: Option<EmbeddingJob>) -> Self {
        Self { record, reindex }
    }

    /// 임베딩 재생성 대상인지
    pub fn needs_reindex(&self) -> bool {
        self.reindex.is_some()
    }

    /// 저장된 레코드 (dispatch 전 확인용)
    pub fn record(&self) -> &T {
        &self.record
    }

    /// 필요 시 임베딩 작업을 큐에 넣고 레코드 반환
    pub fn dispatch(self, queue: &EmbeddingQueue) -> T {
        if let Some(job) = self.reindex {
            queue.enqueue(job);
        }
        self.record
    }
}

// ============================================================================
// Tests
// ============================================================================
