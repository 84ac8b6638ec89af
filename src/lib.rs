//! portfolio-retrieval - 포트폴리오 콘텐츠 검색 코어
//!
//! 벡터 유사도 + 키워드 매칭을 RRF로 결합한 하이브리드 검색과
//! SSRF 방어가 적용된 링크 메타데이터 수집기입니다.

pub mod cli;
pub mod config;
pub mod content;
pub mod embedding;
pub mod indexing;
pub mod opengraph;
pub mod search;

// Re-exports
pub use config::Settings;
pub use content::{
    Article, Collection, ContentSummary, Link, MemoryStore, NewArticle, NewLink, NewProject,
    Project, PublishStatus, SqliteStore, Written,
};
pub use embedding::{CachedEmbedding, EmbeddingProvider, GeminiEmbedding};
pub use indexing::{backfill, EmbeddingJob, EmbeddingQueue, EmbeddingStore, EmbeddingWorker, RetryPolicy};
pub use opengraph::{LinkMetadata, LinkRepository, MetadataFetcher, SourceType};
pub use search::{RetrievalEngine, SearchError, SearchRequest, SearchResults, TypeFilter};
