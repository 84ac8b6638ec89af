//! Indexing 모듈 - 콘텐츠 임베딩 생성 큐
//!
//! 쓰기 경로(`Written::dispatch`)가 넣은 작업을 백그라운드 워커가 처리합니다.
//! 검색 경로는 임베딩 생성을 기다리지 않고 현재 저장된 상태만 읽습니다.
//!
//! - 작업당 최대 3회 시도, 재시도 간격 30/60/120초
//! - 임베딩 텍스트가 비어있으면 경고 후 건너뜀 (재시도 없음)
//! - 차원이 맞지 않는 벡터는 저장하지 않음
//! - 벡터와 생성 시각은 저장소에서 한 번에 기록

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::content::Collection;
use crate::embedding::EmbeddingProvider;

/// 동시에 처리할 최대 작업 수
const MAX_CONCURRENT_JOBS: usize = 4;

// ============================================================================
// Types
// ============================================================================

/// 임베딩 생성 작업
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EmbeddingJob {
    pub collection: Collection,
    pub id: i64,
}

impl EmbeddingJob {
    pub fn new(collection: Collection, id: i64) -> Self {
        Self { collection, id }
    }
}

impl std::fmt::Display for EmbeddingJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.collection, self.id)
    }
}

/// 작업 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// 임베딩 저장 완료
    Stored,
    /// 임베딩 텍스트가 비어있어 건너뜀
    Skipped,
    /// 레코드가 삭제됨
    Missing,
}

/// 재시도 정책
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 최대 시도 횟수
    pub max_attempts: u32,
    /// n번째 실패 후 대기 시간 (목록보다 많이 실패하면 마지막 값 사용)
    pub backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: vec![
                Duration::from_secs(30),
                Duration::from_secs(60),
                Duration::from_secs(120),
            ],
        }
    }
}

impl RetryPolicy {
    /// 대기 없이 재시도 (테스트, 일괄 처리용)
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: vec![Duration::ZERO],
        }
    }

    /// `attempt`번째(1부터) 실패 후 대기 시간
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let idx = (attempt.saturating_sub(1) as usize).min(self.backoff.len().saturating_sub(1));
        self.backoff.get(idx).copied().unwrap_or(Duration::ZERO)
    }
}

// ============================================================================
// EmbeddingStore Trait
// ============================================================================

/// 임베딩 저장소 트레이트
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// 레코드의 임베딩 입력 텍스트 (레코드가 없으면 `None`)
    async fn embeddable_text(&self, job: EmbeddingJob) -> Result<Option<String>>;

    /// 벡터와 생성 시각을 함께 기록
    async fn save_embedding(
        &self,
        job: EmbeddingJob,
        vector: &[f32],
        generated_at: DateTime<Utc>,
    ) -> Result<()>;

    /// 임베딩이 없는 레코드 ID (`force`면 전체)
    async fn missing_embeddings(&self, collection: Collection, force: bool) -> Result<Vec<i64>>;
}

// ============================================================================
// EmbeddingWorker
// ============================================================================

/// 임베딩 생성 워커
pub struct EmbeddingWorker {
    store: Arc<dyn EmbeddingStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    policy: RetryPolicy,
}

impl EmbeddingWorker {
    pub fn new(store: Arc<dyn EmbeddingStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            embedder,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// 단일 시도
    pub async fn generate_for(&self, job: EmbeddingJob) -> Result<JobOutcome> {
        let text = match self.store.embeddable_text(job).await? {
            Some(text) => text.trim().to_string(),
            None => {
                tracing::warn!("Embedding target {} no longer exists", job);
                return Ok(JobOutcome::Missing);
            }
        };

        if text.is_empty() {
            tracing::warn!("Empty embeddable text for {}, skipping", job);
            return Ok(JobOutcome::Skipped);
        }

        let vector = self
            .embedder
            .embed(&text)
            .await
            .with_context(|| format!("Embedding generation failed for {}", job))?;

        let expected = self.embedder.dimension();
        if vector.len() != expected {
            anyhow::bail!(
                "Embedding dimension mismatch for {}: expected {}, got {}",
                job,
                expected,
                vector.len()
            );
        }

        self.store.save_embedding(job, &vector, Utc::now()).await?;

        tracing::info!(
            "Embedding generated: {} (dimensions={}, provider={})",
            job,
            vector.len(),
            self.embedder.name()
        );
        Ok(JobOutcome::Stored)
    }

    /// 재시도 포함 처리 (최종 실패 시 `None`)
    pub async fn process(&self, job: EmbeddingJob) -> Option<JobOutcome> {
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.generate_for(job).await {
                Ok(outcome) => return Some(outcome),
                Err(e) if attempt < max_attempts => {
                    let delay = self.policy.delay_after(attempt);
                    tracing::warn!(
                        "Embedding attempt {}/{} failed for {}: {:#}. Retrying in {:?}",
                        attempt,
                        max_attempts,
                        job,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        "Embedding permanently failed for {} after {} attempts: {:#}",
                        job,
                        max_attempts,
                        e
                    );
                }
            }
        }

        None
    }
}

// ============================================================================
// EmbeddingQueue
// ============================================================================

/// 임베딩 작업 큐
///
/// 작업은 요청 경로를 막지 않고 백그라운드 태스크에서 처리됩니다.
pub struct EmbeddingQueue {
    sender: Option<mpsc::UnboundedSender<EmbeddingJob>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl EmbeddingQueue {
    /// 워커 태스크 시작 (tokio 런타임 안에서 호출)
    pub fn spawn(worker: EmbeddingWorker) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<EmbeddingJob>();
        let worker = Arc::new(worker);
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_JOBS));

        let handle = tokio::spawn(async move {
            let mut tasks = JoinSet::new();

            loop {
                tokio::select! {
                    received = receiver.recv() => {
                        let Some(job) = received else { break };
                        let worker = Arc::clone(&worker);
                        let semaphore = Arc::clone(&semaphore);
                        // 재시도 대기가 다른 작업을 막지 않도록 작업마다 태스크 생성
                        tasks.spawn(async move {
                            let _permit = semaphore.acquire_owned().await;
                            worker.process(job).await;
                        });
                    }
                    Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                }
            }

            while tasks.join_next().await.is_some() {}
            tracing::debug!("Embedding queue drained");
        });

        Self {
            sender: Some(sender),
            handle: Some(handle),
        }
    }

    /// 임베딩 프로바이더가 없을 때 사용 (작업을 로그 후 버림)
    pub fn disabled() -> Self {
        Self {
            sender: None,
            handle: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// 작업 추가 (실패해도 호출자에게 전파하지 않음)
    pub fn enqueue(&self, job: EmbeddingJob) {
        match self.sender {
            Some(ref sender) => {
                if sender.send(job).is_err() {
                    tracing::error!("Embedding queue closed, dropping {}", job);
                } else {
                    tracing::debug!("Embedding job queued: {}", job);
                }
            }
            None => {
                tracing::info!("Embedding provider not configured, skipping {}", job);
            }
        }
    }

    /// 새 작업을 막고 남은 작업을 모두 처리할 때까지 대기
    pub async fn shutdown(mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!("Embedding worker panicked: {}", e);
            }
        }
    }
}

/// 임베딩이 없는 레코드를 큐에 추가 (`force`면 전체 재생성)
///
/// 컬렉션별 추가 개수를 반환합니다.
pub async fn backfill(
    store: &dyn EmbeddingStore,
    queue: &EmbeddingQueue,
    collections: &[Collection],
    force: bool,
) -> Result<Vec<(Collection, usize)>> {
    let mut counts = Vec::with_capacity(collections.len());

    for &collection in collections {
        let ids = store
            .missing_embeddings(collection, force)
            .await
            .with_context(|| format!("Failed to list {} for backfill", collection))?;

        for &id in &ids {
            queue.enqueue(EmbeddingJob::new(collection, id));
        }

        tracing::info!("{}: {} job(s) dispatched", collection, ids.len());
        counts.push((collection, ids.len()));
    }

    Ok(counts)
}

// ============================================================================
// Tests
// ============================================================================
