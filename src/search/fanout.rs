//! 컬렉션 팬아웃 전략
//!
//! 여러 컬렉션을 검색할 때 병렬(tokio 태스크) 또는 순차 실행을 선택합니다.
//! 전략은 저장소 능력(`IndexCapabilities`)으로 결정됩니다.
//! 어느 전략이든 한 컬렉션의 실패는 빈 결과로 대체되고 나머지에 영향을 주지 않습니다.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use crate::content::{Collection, ContentSummary};

use super::hybrid::CollectionSearch;
use super::index::IndexCapabilities;

/// 컬렉션별 검색 결과
pub type SearchResults = BTreeMap<Collection, Vec<ContentSummary>>;

/// 팬아웃 전략
#[async_trait]
pub trait FanOut: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, collections: &[Collection], search: Arc<CollectionSearch>) -> SearchResults;
}

/// 저장소 능력에 맞는 전략 선택
pub fn select_strategy(capabilities: IndexCapabilities) -> Arc<dyn FanOut> {
    if capabilities.concurrent_queries {
        Arc::new(ParallelFanOut)
    } else {
        Arc::new(SequentialFanOut)
    }
}

/// 실패를 빈 목록으로 변환
fn settle(collection: Collection, outcome: anyhow::Result<Vec<ContentSummary>>) -> Vec<ContentSummary> {
    outcome.unwrap_or_else(|e| {
        tracing::error!("Search failed for {}: {:#}", collection, e);
        vec![]
    })
}

// ============================================================================
// Sequential
// ============================================================================

/// 순차 실행
pub struct SequentialFanOut;

#[async_trait]
impl FanOut for SequentialFanOut {
    fn name(&self) -> &'static str {
        "sequential"
    }

    async fn run(&self, collections: &[Collection], search: Arc<CollectionSearch>) -> SearchResults {
        let mut results = SearchResults::new();
        for &collection in collections {
            let outcome = search.run(collection).await;
            results.insert(collection, settle(collection, outcome));
        }
        results
    }
}

// ============================================================================
// Parallel
// ============================================================================

/// 컬렉션마다 tokio 태스크로 동시 실행
pub struct ParallelFanOut;

#[async_trait]
impl FanOut for ParallelFanOut {
    fn name(&self) -> &'static str {
        "parallel"
    }

    async fn run(&self, collections: &[Collection], search: Arc<CollectionSearch>) -> SearchResults {
        // 단일 컬렉션은 태스크 생성 없이 실행
        if collections.len() < 2 {
            return SequentialFanOut.run(collections, search).await;
        }

        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!("No tokio runtime for parallel search, running sequentially");
            return SequentialFanOut.run(collections, search).await;
        }

        let handles: Vec<_> = collections
            .iter()
            .map(|&collection| {
                let search = Arc::clone(&search);
                tokio::spawn(async move { search.run(collection).await })
            })
            .collect();

        let outcomes = join_all(handles).await;

        collections
            .iter()
            .zip(outcomes)
            .map(|(&collection, joined)| {
                let outcome = joined.unwrap_or_else(|e| {
                    Err(anyhow::anyhow!("search task aborted: {}", e))
                });
                (collection, settle(collection, outcome))
            })
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::LinkSummary;
    use crate::opengraph::SourceType;
    use crate::search::hybrid::SearchMode;
    use crate::search::index::SearchIndex;
    use anyhow::Result;
    use chrono::Utc;

    /// 프로젝트 조회만 실패하는 인덱스
    struct FlakyIndex {
        concurrent: bool,
    }

    #[async_trait]
    impl SearchIndex for FlakyIndex {
        fn capabilities(&self) -> IndexCapabilities {
            IndexCapabilities {
                vector_search: false,
                concurrent_queries: self.concurrent,
            }
        }

        async fn matching(
            &self,
            collection: Collection,
            _terms: &[String],
            limit: usize,
        ) -> Result<Vec<ContentSummary>> {
            match collection {
                Collection::Projects => anyhow::bail!("connection reset"),
                Collection::Articles => Ok(vec![]),
                Collection::Links => Ok((1..=limit as i64 + 3)
                    .map(|id| {
                        ContentSummary::Link(LinkSummary {
                            id,
                            url: format!("https://example.com/{}", id),
                            source_type: SourceType::Webpage,
                            title: None,
                            slug: format!("link-{}", id),
                            description: None,
                            image_url: None,
                            site_name: None,
                            created_at: Utc::now(),
                        })
                    })
                    .take(limit)
                    .collect()),
            }
        }
    }

    fn search_for(concurrent: bool) -> Arc<CollectionSearch> {
        Arc::new(CollectionSearch::new(
            Arc::new(FlakyIndex { concurrent }),
            vec!["rust".to_string()],
            None,
            SearchMode::Substring,
        ))
    }

    #[test]
    fn test_strategy_follows_capabilities() {
        let parallel = select_strategy(IndexCapabilities {
            vector_search: true,
            concurrent_queries: true,
        });
        assert_eq!(parallel.name(), "parallel");

        let sequential = select_strategy(IndexCapabilities {
            vector_search: true,
            concurrent_queries: false,
        });
        assert_eq!(sequential.name(), "sequential");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_parallel_isolates_failure() {
        let results = ParallelFanOut
            .run(&Collection::ALL, search_for(true))
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[&Collection::Projects].is_empty());
        assert!(results[&Collection::Articles].is_empty());
        assert_eq!(results[&Collection::Links].len(), 5);
    }

    #[tokio::test]
    async fn test_sequential_isolates_failure() {
        let results = SequentialFanOut
            .run(&Collection::ALL, search_for(false))
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[&Collection::Projects].is_empty());
        assert_eq!(results[&Collection::Links].len(), 5);
    }

    #[tokio::test]
    async fn test_only_requested_keys_present() {
        let results = ParallelFanOut
            .run(&[Collection::Links], search_for(true))
            .await;
        assert_eq!(results.len(), 1);
        assert!(results.contains_key(&Collection::Links));
        assert!(!results.contains_key(&Collection::Projects));
    }
}
