//! Engine - 구성 요소 조립
//!
//! 설정으로부터 레지스트리, 지문 저장소, 벡터 인덱스, 임베더 풀을 열고
//! Scanner와 QueryService를 묶습니다. CLI와 HTTP API가 공유합니다.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::Mutex;

use super::fingerprint::FingerprintStore;
use super::lance::LanceVectorIndex;
use super::memory::MemoryVectorIndex;
use super::query::{QueryHit, QueryService};
use super::registry::{DocumentRegistry, RegistryStats};
use super::scanner::{ScanConfig, ScanSummary, Scanner};
use super::vector::{SearchFilter, VectorIndex};
use crate::collector::{CollectedFile, FileCollector};
use crate::config::{Config, IndexBackend};
use crate::embedding::{create_embedder, EmbedderPool, EmbeddingProvider};
use crate::error::{IndexError, QueryError, ScanError};

/// 엔진 상태 요약
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub documents: RegistryStats,
    pub fingerprints: usize,
    pub vectors: usize,
    pub backend: String,
    pub embedder: String,
    pub dimension: usize,
}

/// `add` 결과
#[derive(Debug, Clone, Default, Serialize)]
pub struct AddReport {
    pub added: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

/// 인덱싱/검색 엔진
pub struct Engine {
    config: Config,
    registry: Arc<DocumentRegistry>,
    fingerprints: Arc<FingerprintStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<EmbedderPool>,
    scanner: Scanner,
    query: QueryService,
    /// 같은 프로세스 안의 스캔 직렬화
    scan_lock: Mutex<()>,
}

impl Engine {
    /// 설정의 임베더로 엔진 열기
    pub async fn open(config: Config) -> Result<Self> {
        let provider = create_embedder(&config)?;
        Self::with_provider(config, provider).await
    }

    /// 임베딩 프로바이더를 지정하여 엔진 열기
    ///
    /// 임베더 차원과 인덱스 차원이 다르면 시작을 거부합니다.
    pub async fn with_provider(config: Config, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        if provider.dimension() != config.embed_dimension {
            return Err(IndexError::DimensionMismatch {
                expected: config.embed_dimension,
                actual: provider.dimension(),
            })
            .context("Embedder dimension does not match configuration");
        }

        for dir in [&config.data_dir, &config.pending_dir, &config.indexed_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {:?}", dir))?;
        }

        let registry_path = config.registry_path();
        let registry = Arc::new(
            DocumentRegistry::open(&registry_path).context("Failed to open document registry")?,
        );
        let fingerprints = Arc::new(
            FingerprintStore::open(&registry_path).context("Failed to open fingerprint store")?,
        );

        let index: Arc<dyn VectorIndex> = match config.index_backend {
            IndexBackend::Lance => Arc::new(
                LanceVectorIndex::open(
                    &config.vector_index_path(),
                    config.embed_dimension,
                    config.index_timeout,
                )
                .await
                .with_context(|| {
                    format!(
                        "Failed to open vector index at {:?} (delete it to re-index with a new dimension)",
                        config.vector_index_path()
                    )
                })?,
            ),
            IndexBackend::Memory => Arc::new(MemoryVectorIndex::new(config.embed_dimension)),
        };

        let dropped = forget_unindexed(&fingerprints, index.as_ref()).await?;
        if dropped > 0 {
            tracing::warn!(
                "{} recorded fingerprints have no vectors in the {} index, they will be re-indexed",
                dropped,
                index.name()
            );
        }

        let embedder = Arc::new(EmbedderPool::new(provider, config.pool_config()));

        let scanner = Scanner::new(
            registry.clone(),
            fingerprints.clone(),
            embedder.clone(),
            index.clone(),
            config.indexed_dir.clone(),
            ScanConfig {
                chunk: config.chunk_config(),
                extract_timeout: config.extract_timeout,
                claim_ttl: config.claim_ttl,
                retry_failed: config.retry_failed,
            },
        )?;
        let query = QueryService::new(embedder.clone(), index.clone(), config.max_top_k);

        tracing::info!(
            "Engine ready (backend: {}, embedder: {}, dimension: {})",
            index.name(),
            embedder.provider_name(),
            config.embed_dimension
        );

        Ok(Self {
            config,
            registry,
            fingerprints,
            index,
            embedder,
            scanner,
            query,
            scan_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &DocumentRegistry {
        &self.registry
    }

    pub fn fingerprints(&self) -> &FingerprintStore {
        &self.fingerprints
    }

    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    /// 설정된 대기 폴더 스캔
    pub async fn scan(&self) -> Result<ScanSummary, ScanError> {
        self.scan_dir(&self.config.pending_dir).await
    }

    /// 지정 폴더 스캔
    pub async fn scan_dir(&self, pending_dir: &Path) -> Result<ScanSummary, ScanError> {
        let _guard = self.scan_lock.lock().await;
        self.scanner.scan(pending_dir).await
    }

    /// 유사도 검색
    pub async fn query(
        &self,
        text: &str,
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<QueryHit>, QueryError> {
        self.query.query(text, top_k, filter).await
    }

    /// 파일/폴더를 대기 폴더로 복사
    ///
    /// 지원하지 않는 형식은 건너뜁니다. 폴더는 상대 경로를 유지합니다.
    pub async fn add_documents(&self, paths: &[PathBuf]) -> Result<AddReport> {
        let mut report = AddReport::default();

        for path in paths {
            let files: Vec<CollectedFile> = if path.is_dir() {
                FileCollector::default()
                    .collect_directory(path)
                    .with_context(|| format!("Failed to read directory {:?}", path))?
            } else {
                let parent = path.parent().unwrap_or_else(|| Path::new(""));
                CollectedFile::from_path(parent, path.clone())?
                    .into_iter()
                    .collect()
            };

            for file in files {
                if file.format.is_none() {
                    tracing::warn!("Unsupported format, not added: {:?}", file.path);
                    report.skipped.push(file.path);
                    continue;
                }

                let destination = file
                    .relative_path
                    .split('/')
                    .fold(self.config.pending_dir.clone(), |p, part| p.join(part));
                if let Some(parent) = destination.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::copy(&file.path, &destination)
                    .await
                    .with_context(|| format!("Failed to copy {:?}", file.path))?;

                tracing::info!("Added {:?} -> {:?}", file.path, destination);
                report.added.push(destination);
            }
        }

        Ok(report)
    }

    /// 상태 요약
    pub async fn stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            documents: self.registry.stats()?,
            fingerprints: self.fingerprints.len(),
            vectors: self.index.count().await?,
            backend: self.index.name().to_string(),
            embedder: self.embedder.provider_name().to_string(),
            dimension: self.index.dimension(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 인덱스에 벡터가 없는 지문 삭제 (메모리 백엔드 재시작, 인덱스 디렉토리 삭제 등)
async fn forget_unindexed(fingerprints: &FingerprintStore, index: &dyn VectorIndex) -> Result<usize> {
    let mut dropped = 0;
    for fingerprint in fingerprints.fingerprints() {
        if index.has_fingerprint(&fingerprint).await? {
            continue;
        }
        fingerprints.forget(&fingerprint)?;
        dropped += 1;
    }
    Ok(dropped)
}

// ============================================================================
// Tests
// ============================================================================
