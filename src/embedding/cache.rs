//! 쿼리 임베딩 캐시
//!
//! 같은 검색어가 짧은 시간 안에 반복되면 프로바이더 호출을 생략합니다.
//! 성능 최적화일 뿐이며 검색 결과의 정확성에는 영향이 없습니다.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::EmbeddingProvider;

/// 캐시 최대 엔트리 수
const MAX_ENTRIES: usize = 256;

/// TTL 기반 쿼리 임베딩 캐시 래퍼
///
/// `embed_query`만 캐시하고, 문서 임베딩(`embed`)은 그대로 위임합니다.
pub struct CachedEmbedding {
    inner: Arc<dyn EmbeddingProvider>,
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, Arc<Vec<f32>>)>>,
}

impl CachedEmbedding {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn cache_key(query: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(query.trim().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.inner.embed(text).await
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        if self.ttl.is_zero() {
            return self.inner.embed_query(query).await;
        }

        let key = Self::cache_key(query);
        {
            let entries = self.entries.lock().await;
            if let Some((stored_at, vector)) = entries.get(&key) {
                if stored_at.elapsed() < self.ttl {
                    tracing::debug!("Query embedding cache hit");
                    return Ok(vector.as_ref().clone());
                }
            }
        }

        // 락을 잡은 채로 네트워크 호출하지 않음
        let vector = self.inner.embed_query(query).await?;

        let mut entries = self.entries.lock().await;
        let ttl = self.ttl;
        entries.retain(|_, (stored_at, _)| stored_at.elapsed() < ttl);
        if entries.len() >= MAX_ENTRIES {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, (stored_at, _))| *stored_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(key, (Instant::now(), Arc::new(vector.clone())));

        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1.0, 0.0])
        }

        fn dimension(&self) -> usize {
            2
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn test_repeated_query_hits_cache() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedEmbedding::new(inner.clone(), Duration::from_secs(60));

        cached.embed_query("rust").await.unwrap();
        cached.embed_query("rust").await.unwrap();
        cached.embed_query("  rust  ").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        cached.embed_query("go").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_cache() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedEmbedding::new(inner.clone(), Duration::ZERO);

        cached.embed_query("rust").await.unwrap();
        cached.embed_query("rust").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_document_embeddings_not_cached() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedEmbedding::new(inner.clone(), Duration::from_secs(60));

        cached.embed("same text").await.unwrap();
        cached.embed("same text").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
