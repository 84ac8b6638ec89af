//! Search 모듈 - 포트폴리오 콘텐츠 하이브리드 검색
//!
//! - 벡터 검색 가능 저장소: 벡터 + 키워드 검색을 RRF로 통합
//! - 벡터 검색 불가 저장소: 부분 문자열 검색
//! - 컬렉션별 검색은 저장소 능력에 따라 병렬 또는 순차 실행
//!
//! 검색은 실패하지 않습니다. 협력자(임베딩, 저장소) 오류는 로그 후 빈 결과로 대체되고,
//! 입력 검증 오류(`SearchError`)만 호출자에게 반환됩니다.

mod fanout;
mod hybrid;
mod index;
mod vector;

pub use fanout::{select_strategy, FanOut, ParallelFanOut, SearchResults, SequentialFanOut};
pub use hybrid::{rrf_fuse, CollectionSearch, SearchMode, RRF_K};
pub use index::{IndexCapabilities, SearchIndex, MIN_SIMILARITY, RESULTS_PER_TYPE};
pub use vector::{blob_to_embedding, cosine_similarity, embedding_to_blob};

use std::str::FromStr;
use std::sync::Arc;

use crate::content::{split_terms, Collection};
use crate::embedding::EmbeddingProvider;

/// 최소 검색어 길이 (문자 수)
pub const MIN_QUERY_CHARS: usize = 2;

/// 최대 검색어 길이 (문자 수)
pub const MAX_QUERY_CHARS: usize = 200;

// ============================================================================
// Errors
// ============================================================================

/// 검색 요청 검증 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchError {
    #[error("query must be at least 2 characters")]
    QueryTooShort,

    #[error("query must not exceed 200 characters")]
    QueryTooLong,

    #[error("invalid type filter '{0}' (expected all, article, project, link)")]
    InvalidType(String),
}

// ============================================================================
// Request
// ============================================================================

/// 검색 대상 필터
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeFilter {
    #[default]
    All,
    Only(Collection),
}

impl TypeFilter {
    /// 검색할 컬렉션 목록
    pub fn collections(self) -> Vec<Collection> {
        match self {
            TypeFilter::All => Collection::ALL.to_vec(),
            TypeFilter::Only(collection) => vec![collection],
        }
    }
}

impl FromStr for TypeFilter {
    type Err = SearchError;

    /// `all`, `article`/`blog`, `project`, `link`/`share`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "all" => Ok(TypeFilter::All),
            "article" | "blog" => Ok(TypeFilter::Only(Collection::Articles)),
            "project" => Ok(TypeFilter::Only(Collection::Projects)),
            "link" | "share" => Ok(TypeFilter::Only(Collection::Links)),
            other => Err(SearchError::InvalidType(other.to_string())),
        }
    }
}

/// 검증된 검색 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub filter: TypeFilter,
}

impl SearchRequest {
    /// 공개 검색 API 입력 검증
    pub fn new(query: &str, type_name: Option<&str>) -> Result<Self, SearchError> {
        let query = query.trim();
        let chars = query.chars().count();

        if chars < MIN_QUERY_CHARS {
            return Err(SearchError::QueryTooShort);
        }
        if chars > MAX_QUERY_CHARS {
            return Err(SearchError::QueryTooLong);
        }

        let filter = match type_name {
            Some(name) => name.parse()?,
            None => TypeFilter::All,
        };

        Ok(Self {
            query: query.to_string(),
            filter,
        })
    }
}

// ============================================================================
// RetrievalEngine
// ============================================================================

/// 검색 엔진
pub struct RetrievalEngine {
    index: Arc<dyn SearchIndex>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    strategy: Arc<dyn FanOut>,
}

impl RetrievalEngine {
    /// 저장소 능력으로 팬아웃 전략을 골라 생성
    ///
    /// `embedder`가 없으면 벡터 검색 가능 저장소에서도 키워드 결과만 RRF에 들어갑니다.
    pub fn new(index: Arc<dyn SearchIndex>, embedder: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        let strategy = select_strategy(index.capabilities());
        Self {
            index,
            embedder,
            strategy,
        }
    }

    /// 팬아웃 전략 지정
    pub fn with_strategy(mut self, strategy: Arc<dyn FanOut>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// 검증된 요청 실행
    pub async fn execute(&self, request: &SearchRequest) -> SearchResults {
        self.search(&request.query, request.filter).await
    }

    /// 검색
    ///
    /// 필터에 포함된 컬렉션만 키로 존재합니다.
    /// 공백뿐이거나 2자 미만인 검색어는 협력자 호출 없이 빈 목록을 반환합니다.
    pub async fn search(&self, query: &str, filter: TypeFilter) -> SearchResults {
        let collections = filter.collections();
        let trimmed = query.trim();

        if trimmed.chars().count() < MIN_QUERY_CHARS {
            return collections.into_iter().map(|c| (c, vec![])).collect();
        }

        let mode = if self.index.capabilities().vector_search {
            SearchMode::Hybrid
        } else {
            SearchMode::Substring
        };

        let query_vector = match mode {
            SearchMode::Hybrid => self.embed_query(trimmed).await,
            SearchMode::Substring => None,
        };

        let search = Arc::new(CollectionSearch::new(
            Arc::clone(&self.index),
            split_terms(trimmed),
            query_vector,
            mode,
        ));

        tracing::debug!(
            "Searching {:?} for '{}' ({:?}, {})",
            collections,
            trimmed,
            mode,
            self.strategy.name()
        );

        self.strategy.run(&collections, search).await
    }

    /// 쿼리 임베딩 (실패 시 벡터 검색 없이 진행)
    async fn embed_query(&self, query: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed_query(query).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::error!("Query embedding failed for '{}': {:#}", query, e);
                None
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{
        ContentSummary, MemoryStore, NewArticle, NewLink, NewProject, PublishStatus, SqliteStore,
    };
    use crate::indexing::{EmbeddingJob, EmbeddingStore};
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 텍스트와 무관하게 고정 벡터를 반환하는 임베더
    struct FixedEmbedder {
        vector: Vec<f32>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl FixedEmbedder {
        fn new(vector: Vec<f32>) -> Self {
            Self {
                vector,
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                vector: vec![],
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("provider unavailable");
            }
            Ok(self.vector.clone())
        }

        fn dimension(&self) -> usize {
            self.vector.len()
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    /// 모든 호출을 세는 인덱스
    struct CountingIndex {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SearchIndex for CountingIndex {
        fn capabilities(&self) -> IndexCapabilities {
            IndexCapabilities {
                vector_search: true,
                concurrent_queries: true,
            }
        }

        async fn nearest(
            &self,
            _collection: Collection,
            _query_vector: &[f32],
            _min_similarity: f32,
            _limit: usize,
        ) -> Result<Vec<ContentSummary>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }

        async fn matching(
            &self,
            _collection: Collection,
            _terms: &[String],
            _limit: usize,
        ) -> Result<Vec<ContentSummary>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }
    }

    fn published_article(title: &str) -> NewArticle {
        NewArticle {
            title: title.to_string(),
            content: "<p>body</p>".to_string(),
            status: Some(PublishStatus::Published),
            ..Default::default()
        }
    }

    #[test]
    fn test_request_validation() {
        assert_eq!(SearchRequest::new("a", None), Err(SearchError::QueryTooShort));
        assert_eq!(SearchRequest::new("   ", None), Err(SearchError::QueryTooShort));
        assert_eq!(
            SearchRequest::new(&"x".repeat(201), None),
            Err(SearchError::QueryTooLong)
        );
        assert_eq!(
            SearchRequest::new("rust", Some("video")),
            Err(SearchError::InvalidType("video".to_string()))
        );

        let request = SearchRequest::new("  rust  ", Some("blog")).unwrap();
        assert_eq!(request.query, "rust");
        assert_eq!(request.filter, TypeFilter::Only(Collection::Articles));
    }

    #[test]
    fn test_type_filter_aliases() {
        assert_eq!("all".parse::<TypeFilter>(), Ok(TypeFilter::All));
        assert_eq!(
            "share".parse::<TypeFilter>(),
            Ok(TypeFilter::Only(Collection::Links))
        );
        assert_eq!(
            "Project".parse::<TypeFilter>(),
            Ok(TypeFilter::Only(Collection::Projects))
        );
    }

    #[tokio::test]
    async fn test_short_query_calls_no_collaborator() {
        let index = Arc::new(CountingIndex {
            calls: AtomicUsize::new(0),
        });
        let embedder = Arc::new(FixedEmbedder::new(vec![1.0]));
        let engine = RetrievalEngine::new(index.clone(), Some(embedder.clone() as Arc<dyn EmbeddingProvider>));

        for query in ["", "   ", "a", " b "] {
            let results = engine.search(query, TypeFilter::All).await;
            assert_eq!(results.len(), 3);
            assert!(results.values().all(|v| v.is_empty()));
        }

        assert_eq!(index.calls.load(Ordering::SeqCst), 0);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_type_filter_omits_other_keys() {
        let store = Arc::new(MemoryStore::new());
        let engine = RetrievalEngine::new(store, None);

        let results = engine
            .search("rust", TypeFilter::Only(Collection::Projects))
            .await;
        assert_eq!(results.len(), 1);
        assert!(results.contains_key(&Collection::Projects));
    }

    #[tokio::test]
    async fn test_substring_fallback_without_vector_support() {
        let store = Arc::new(MemoryStore::new());
        let _ = store.insert_article(published_article("Async Rust")).unwrap();
        let _ = store
            .insert_project(NewProject {
                title: "Dashboard".to_string(),
                technologies: vec!["React".to_string()],
                status: Some(PublishStatus::Published),
                ..Default::default()
            })
            .unwrap();
        let _ = store
            .insert_project(NewProject {
                title: "Hidden React App".to_string(),
                ..Default::default()
            })
            .unwrap();

        let embedder = Arc::new(FixedEmbedder::new(vec![1.0]));
        let engine = RetrievalEngine::new(store, Some(embedder.clone() as Arc<dyn EmbeddingProvider>));
        assert_eq!(engine.strategy_name(), "sequential");

        let results = engine.search("react", TypeFilter::All).await;
        let projects: Vec<_> = results[&Collection::Projects]
            .iter()
            .filter_map(|p| p.title())
            .collect();
        assert_eq!(projects, vec!["Dashboard"]);
        assert!(results[&Collection::Articles].is_empty());
        assert!(results[&Collection::Links].is_empty());

        // 벡터 미지원 저장소에서는 임베딩을 호출하지 않음
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hybrid_fuses_vector_and_keyword() {
        let store = SqliteStore::open_in_memory().unwrap();
        let semantic = store
            .create_article(published_article("Ownership explained"))
            .unwrap()
            .record()
            .id;
        let both = store
            .create_article(published_article("Rust borrow checker"))
            .unwrap()
            .record()
            .id;
        let _keyword_only = store
            .create_article(published_article("Rust release notes"))
            .unwrap();
        let _draft = store
            .create_article(NewArticle {
                title: "Rust draft".to_string(),
                ..Default::default()
            })
            .unwrap();

        let now = Utc::now();
        store
            .save_embedding(EmbeddingJob::new(Collection::Articles, semantic), &[1.0, 0.0], now)
            .await
            .unwrap();
        store
            .save_embedding(EmbeddingJob::new(Collection::Articles, both), &[0.9, 0.1], now)
            .await
            .unwrap();

        let engine = RetrievalEngine::new(
            Arc::new(store),
            Some(Arc::new(FixedEmbedder::new(vec![1.0, 0.0])) as Arc<dyn EmbeddingProvider>),
        );
        let results = engine
            .search("rust", TypeFilter::Only(Collection::Articles))
            .await;

        let titles: Vec<_> = results[&Collection::Articles]
            .iter()
            .filter_map(|a| a.title())
            .collect();

        // 두 검색 모두에 등장한 글이 최상위, 초안은 제외
        assert_eq!(titles[0], "Rust borrow checker");
        assert!(titles.contains(&"Ownership explained"));
        assert!(titles.contains(&"Rust release notes"));
        assert!(!titles.contains(&"Rust draft"));
    }

    #[tokio::test]
    async fn test_stores_agree_on_non_ascii_case() {
        let sqlite = SqliteStore::open_in_memory().unwrap();
        let _ = sqlite.create_article(published_article("Über Rust")).unwrap();
        let memory = MemoryStore::new();
        let _ = memory.insert_article(published_article("Über Rust")).unwrap();

        let filter = TypeFilter::Only(Collection::Articles);
        let from_sqlite = RetrievalEngine::new(Arc::new(sqlite), None)
            .search("über", filter)
            .await;
        let from_memory = RetrievalEngine::new(Arc::new(memory), None)
            .search("über", filter)
            .await;

        assert_eq!(from_sqlite[&Collection::Articles].len(), 1);
        assert_eq!(from_memory[&Collection::Articles].len(), 1);
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_to_keyword() {
        let store = SqliteStore::open_in_memory().unwrap();
        let _ = store
            .create_link(NewLink {
                title: Some("Tokio tutorial".to_string()),
                ..NewLink::new("https://tokio.rs/tokio/tutorial")
            })
            .unwrap();

        let engine = RetrievalEngine::new(
            Arc::new(store),
            Some(Arc::new(FixedEmbedder::failing()) as Arc<dyn EmbeddingProvider>),
        );
        let results = engine.search("tokio", TypeFilter::All).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[&Collection::Links].len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_parallel_fanout_on_file_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join("search.db")).unwrap();

        for i in 0..7 {
            let _ = store
                .create_article(published_article(&format!("Rust article {}", i)))
                .unwrap();
        }
        let _ = store
            .create_project(NewProject {
                title: "Rust CLI".to_string(),
                status: Some(PublishStatus::Published),
                ..Default::default()
            })
            .unwrap();

        let engine = RetrievalEngine::new(Arc::new(store), None);
        assert_eq!(engine.strategy_name(), "parallel");

        let results = engine.search("rust", TypeFilter::All).await;
        assert_eq!(results[&Collection::Articles].len(), RESULTS_PER_TYPE);
        assert_eq!(results[&Collection::Projects].len(), 1);
        assert!(results[&Collection::Links].is_empty());
    }
}
