//! Embedder Pool - 재시도, 타임아웃, 동시성 제한
//!
//! 모든 프로바이더 호출은 이 풀을 거칩니다.
//! - 시도마다 타임아웃 적용 (초과 시 일시적 실패로 취급)
//! - 일시적 실패는 지수 백오프로 `max_retries`회까지 재시도
//! - 세마포어로 동시 호출 수 제한

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, TryStreamExt};
use tokio::sync::Semaphore;

use super::EmbeddingProvider;
use crate::error::EmbedError;

/// 풀 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// 배치당 최대 텍스트 수
    pub batch_size: usize,
    /// 동시 호출 수
    pub concurrency: usize,
    /// 재시도 횟수 (첫 시도 제외)
    pub max_retries: u32,
    /// 첫 재시도 대기 시간 (이후 2배씩 증가)
    pub initial_backoff: Duration,
    /// 시도당 타임아웃
    pub timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            concurrency: 4,
            max_retries: 3,
            initial_backoff: Duration::from_millis(2000),
            timeout: Duration::from_secs(30),
        }
    }
}

/// 임베더 풀
pub struct EmbedderPool {
    provider: Arc<dyn EmbeddingProvider>,
    semaphore: Semaphore,
    config: PoolConfig,
}

impl EmbedderPool {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: PoolConfig) -> Self {
        let config = PoolConfig {
            batch_size: config.batch_size.max(1),
            concurrency: config.concurrency.max(1),
            ..config
        };

        Self {
            provider,
            semaphore: Semaphore::new(config.concurrency),
            config,
        }
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// 재시도 루프 (429/5xx/네트워크/타임아웃 시 지수 백오프)
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, EmbedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EmbedError>>,
    {
        let max_retries = self.config.max_retries;
        let mut attempt: u32 = 0;

        loop {
            let result = {
                let _permit = self
                    .semaphore
                    .acquire()
                    .await
                    .map_err(|e| EmbedError::Fatal(format!("semaphore error: {}", e)))?;

                match tokio::time::timeout(self.config.timeout, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(EmbedError::Transient(format!(
                        "{} timed out after {:?}",
                        what, self.config.timeout
                    ))),
                }
            };

            match result {
                Ok(value) => return Ok(value),
                Err(EmbedError::Transient(message)) => {
                    if attempt >= max_retries {
                        return Err(EmbedError::RetriesExhausted {
                            attempts: attempt + 1,
                            last: message,
                        });
                    }

                    let backoff = self
                        .config
                        .initial_backoff
                        .saturating_mul(2u32.saturating_pow(attempt));
                    tracing::warn!(
                        "{} failed ({}), retrying in {:?} (attempt {}/{})",
                        what,
                        message,
                        backoff,
                        attempt + 1,
                        max_retries
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 배치 임베딩 (한 번의 프로바이더 호출)
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let vectors = self
            .with_retry("embedding batch", || self.provider.embed_batch(texts))
            .await?;

        if vectors.len() != texts.len() {
            return Err(EmbedError::Fatal(format!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        for vector in &vectors {
            super::check_dimension(self.dimension(), vector)?;
        }

        Ok(vectors)
    }

    /// 질의 임베딩
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let vector = self
            .with_retry("query embedding", || self.provider.embed_query(text))
            .await?;
        super::check_dimension(self.dimension(), &vector)?;
        Ok(vector)
    }

    /// 문서 청크 전체 임베딩
    ///
    /// 배치로 나눠 병렬 처리한 뒤 원래 청크 순서로 다시 합칩니다.
    /// 한 배치라도 실패하면 문서 전체가 실패합니다.
    pub async fn embed_chunks(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let jobs: Vec<(usize, Vec<String>)> = texts
            .chunks(self.config.batch_size)
            .map(|batch| batch.to_vec())
            .enumerate()
            .collect();

        let mut batches: Vec<(usize, Vec<Vec<f32>>)> = futures::stream::iter(jobs)
            .map(|(i, batch)| async move { self.embed_batch(&batch).await.map(|v| (i, v)) })
            .buffer_unordered(self.config.concurrency)
            .try_collect()
            .await?;

        batches.sort_by_key(|(i, _)| *i);
        Ok(batches.into_iter().flat_map(|(_, v)| v).collect())
    }
}

// ============================================================================
// Tests
// ============================================================================
