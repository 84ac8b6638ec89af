//! 하이브리드 검색 - 벡터 + 키워드 RRF 통합
//!
//! RRF (Reciprocal Rank Fusion) 알고리즘으로
//! 벡터 검색과 키워드 검색 결과를 통합합니다.
//!
//! ref: https://www.elastic.co/blog/hybrid-search-rrf

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use anyhow::Result;

use crate::content::{Collection, ContentSummary};

use super::index::{SearchIndex, MIN_SIMILARITY, RESULTS_PER_TYPE};

/// RRF 상수 (높을수록 순위 차이의 영향이 작아짐)
pub const RRF_K: f32 = 60.0;

/// 컬렉션 검색 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// 벡터 + 키워드 (RRF)
    Hybrid,
    /// 부분 문자열 매칭만
    Substring,
}

// ============================================================================
// RRF
// ============================================================================

/// RRF (Reciprocal Rank Fusion)
///
/// RRF Score = sum(1 / (k + rank + 1)), rank는 각 목록 내 0-based 순위.
/// 점수가 같으면 처음 등장한 순서를 유지합니다.
pub fn rrf_fuse<T, K, F>(branches: Vec<Vec<T>>, key: F, limit: usize) -> Vec<(T, f32)>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut positions: HashMap<K, usize> = HashMap::new();
    let mut fused: Vec<(T, f32)> = Vec::new();

    for branch in branches {
        for (rank, item) in branch.into_iter().enumerate() {
            let score = 1.0 / (RRF_K + rank as f32 + 1.0);
            match positions.entry(key(&item)) {
                Entry::Occupied(entry) => fused[*entry.get()].1 += score,
                Entry::Vacant(entry) => {
                    entry.insert(fused.len());
                    fused.push((item, score));
                }
            }
        }
    }

    // 안정 정렬이므로 동점은 첫 등장 순서 유지
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused.truncate(limit);
    fused
}

// ============================================================================
// CollectionSearch
// ============================================================================

/// 한 번의 검색 요청에서 컬렉션마다 공유하는 검색 작업
pub struct CollectionSearch {
    index: Arc<dyn SearchIndex>,
    terms: Vec<String>,
    /// 요청 시작 시 한 번만 계산한 쿼리 임베딩
    query_vector: Option<Vec<f32>>,
    mode: SearchMode,
}

impl CollectionSearch {
    pub fn new(
        index: Arc<dyn SearchIndex>,
        terms: Vec<String>,
        query_vector: Option<Vec<f32>>,
        mode: SearchMode,
    ) -> Self {
        Self {
            index,
            terms,
            query_vector,
            mode,
        }
    }

    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    /// 단일 컬렉션 검색
    pub async fn run(&self, collection: Collection) -> Result<Vec<ContentSummary>> {
        if self.terms.is_empty() {
            return Ok(vec![]);
        }

        match self.mode {
            SearchMode::Substring => {
                self.index
                    .matching(collection, &self.terms, RESULTS_PER_TYPE)
                    .await
            }
            SearchMode::Hybrid => self.hybrid(collection).await,
        }
    }

    async fn hybrid(&self, collection: Collection) -> Result<Vec<ContentSummary>> {
        // 벡터 검색 실패는 키워드 결과만으로 진행
        let vector_results = match self.query_vector {
            Some(ref vector) => self
                .index
                .nearest(collection, vector, MIN_SIMILARITY, RESULTS_PER_TYPE)
                .await
                .unwrap_or_else(|e| {
                    tracing::error!("Vector search failed for {}: {:#}", collection, e);
                    vec![]
                }),
            None => vec![],
        };

        let keyword_results = self
            .index
            .matching(collection, &self.terms, RESULTS_PER_TYPE)
            .await?;

        tracing::debug!(
            "{}: vector={} keyword={}",
            collection,
            vector_results.len(),
            keyword_results.len()
        );

        let fused = rrf_fuse(
            vec![vector_results, keyword_results],
            ContentSummary::id,
            RESULTS_PER_TYPE,
        );
        Ok(fused.into_iter().map(|(summary, _)| summary).collect())
    }
}

// ============================================================================
// Tests
// ============================================================================
