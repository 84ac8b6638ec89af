//! 검색 인덱스 트레이트
//!
//! 저장소가 제공하는 두 가지 조회(벡터 최근접, 키워드 매칭)와
//! 능력 정보(벡터 지원 여부, 동시 조회 가능 여부)를 정의합니다.

use anyhow::Result;
use async_trait::async_trait;

use crate::content::{Collection, ContentSummary};

/// 벡터 검색 최소 코사인 유사도
pub const MIN_SIMILARITY: f32 = 0.3;

/// 컬렉션별 최대 결과 수
pub const RESULTS_PER_TYPE: usize = 5;

/// 저장소 능력
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexCapabilities {
    /// 벡터 최근접 조회 지원 (없으면 부분 문자열 검색만)
    pub vector_search: bool,
    /// 컬렉션별 조회를 동시에 실행해도 되는지
    pub concurrent_queries: bool,
}

/// 검색 인덱스
///
/// 두 조회 모두 공개 조건(published 상태)을 먼저 적용한 결과만 반환해야 합니다.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    fn capabilities(&self) -> IndexCapabilities;

    /// 임베딩이 있는 레코드 중 유사도 `min_similarity` 이상, 유사도 내림차순
    async fn nearest(
        &self,
        collection: Collection,
        query_vector: &[f32],
        min_similarity: f32,
        limit: usize,
    ) -> Result<Vec<ContentSummary>> {
        let _ = (query_vector, min_similarity, limit);
        anyhow::bail!("Vector search is not supported for {}", collection)
    }

    /// 모든 검색어가 필드 중 하나에 포함되는 레코드 (대소문자 무시)
    async fn matching(
        &self,
        collection: Collection,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<ContentSummary>>;
}
