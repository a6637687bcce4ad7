//! Scanner - 대기 폴더 인덱싱
//!
//! 대기 폴더의 각 파일을 추출 -> 청킹 -> 임베딩 -> 벡터 저장한 뒤
//! 인덱싱 완료 폴더로 옮깁니다.
//!
//! 파일 단위 실패(추출, 임베딩)는 레코드에 기록하고 다음 파일로 넘어갑니다.
//! 벡터 인덱스 장애는 남은 배치 전체를 중단합니다.
//!
//! 처리 순서:
//! 1. 빠른 경로: Indexed 레코드와 mtime/크기가 같으면 이동만 마무리
//! 2. 지문 계산, 이미 인덱싱된 지문이면 건너뜀
//! 3. 레지스트리 점유 (동시 스캐너 배제)
//! 4. 추출 -> 청킹 -> 임베딩 -> 이전 지문 삭제 -> upsert -> 지문 기록 -> Indexed -> 이동

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::Instrument;

use super::chunker::{ChunkConfig, Chunker, TokenChunker};
use super::fingerprint::{fingerprint_file, FingerprintMeta, FingerprintStore};
use super::registry::{DocumentRecord, DocumentRegistry, DocumentState};
use super::vector::{ChunkMetadata, EmbeddingEntry, VectorIndex};
use crate::collector::{CollectedFile, FileCollector};
use crate::embedding::EmbedderPool;
use crate::error::{ChunkError, ExtractError, IndexError, ScanError};
use crate::extractor::ContentExtractor;

// ============================================================================
// Types
// ============================================================================

/// 스캐너 설정
#[derive(Debug, Clone, Copy)]
pub struct ScanConfig {
    pub chunk: ChunkConfig,
    pub extract_timeout: Duration,
    pub claim_ttl: Duration,
    pub retry_failed: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            chunk: ChunkConfig::default(),
            extract_timeout: Duration::from_secs(120),
            claim_ttl: Duration::from_secs(3600),
            retry_failed: false,
        }
    }
}

/// 파일 단위 실패
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanFailure {
    pub relative_path: String,
    pub error: String,
    pub retryable: bool,
}

/// 스캔 결과 요약
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    pub scan_id: String,
    pub indexed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub removed: usize,
    pub failures: Vec<ScanFailure>,
}

/// 파일 처리 결과
enum Outcome {
    Indexed,
    Skipped,
    Failed(ScanFailure),
}

/// 문서 파이프라인 에러
enum DocumentError {
    /// 파일 단위 실패 (레코드에 기록 후 계속)
    Soft { message: String, retryable: bool },
    /// 배치 중단
    Index(IndexError),
}

impl From<ExtractError> for DocumentError {
    fn from(e: ExtractError) -> Self {
        let retryable = matches!(e, ExtractError::Timeout { .. } | ExtractError::Io(_));
        Self::Soft {
            message: e.to_string(),
            retryable,
        }
    }
}

impl From<IndexError> for DocumentError {
    fn from(e: IndexError) -> Self {
        Self::Index(e)
    }
}

// ============================================================================
// Scanner
// ============================================================================

/// 대기 폴더 스캐너
pub struct Scanner {
    registry: Arc<DocumentRegistry>,
    fingerprints: Arc<FingerprintStore>,
    embedder: Arc<EmbedderPool>,
    index: Arc<dyn VectorIndex>,
    extractor: ContentExtractor,
    chunker: TokenChunker,
    collector: FileCollector,
    indexed_dir: PathBuf,
    config: ScanConfig,
}

impl Scanner {
    pub fn new(
        registry: Arc<DocumentRegistry>,
        fingerprints: Arc<FingerprintStore>,
        embedder: Arc<EmbedderPool>,
        index: Arc<dyn VectorIndex>,
        indexed_dir: PathBuf,
        config: ScanConfig,
    ) -> Result<Self, ChunkError> {
        Ok(Self {
            registry,
            fingerprints,
            embedder,
            index,
            extractor: ContentExtractor::new(config.extract_timeout),
            chunker: TokenChunker::new(config.chunk)?,
            collector: FileCollector::default(),
            indexed_dir,
            config,
        })
    }

    pub fn indexed_dir(&self) -> &Path {
        &self.indexed_dir
    }

    /// 대기 폴더 스캔
    pub async fn scan(&self, pending_dir: &Path) -> Result<ScanSummary, ScanError> {
        let scan_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("scan", scan_id = %scan_id);

        self.scan_inner(pending_dir, scan_id).instrument(span).await
    }

    async fn scan_inner(&self, pending_dir: &Path, scan_id: String) -> Result<ScanSummary, ScanError> {
        let pending_error = |source| ScanError::PendingDir {
            path: pending_dir.to_path_buf(),
            source,
        };

        tokio::fs::create_dir_all(pending_dir)
            .await
            .map_err(pending_error)?;
        let files = self
            .collector
            .collect_directory(pending_dir)
            .map_err(pending_error)?;

        tracing::info!("Scanning {} files in {:?}", files.len(), pending_dir);

        let mut summary = ScanSummary {
            scan_id: scan_id.clone(),
            ..Default::default()
        };

        for file in &files {
            match self.process(file, &scan_id).await? {
                Outcome::Indexed => summary.indexed += 1,
                Outcome::Skipped => summary.skipped += 1,
                Outcome::Failed(failure) => {
                    summary.failed += 1;
                    summary.failures.push(failure);
                }
            }
        }

        summary.removed = self.reconcile().await?;

        tracing::info!(
            "Scan complete: {} indexed, {} skipped, {} failed, {} removed",
            summary.indexed,
            summary.skipped,
            summary.failed,
            summary.removed
        );
        Ok(summary)
    }

    /// 파일 1개 처리
    async fn process(&self, file: &CollectedFile, scan_id: &str) -> Result<Outcome, ScanError> {
        let rel = file.relative_path.as_str();
        let record = self.registry.get(rel)?;

        // 1. 빠른 경로: 벡터는 이미 저장됨, 이동만 마무리
        if let Some(ref r) = record {
            let recorded = r
                .fingerprint
                .as_deref()
                .map(|fp| self.fingerprints.has_been_indexed(fp))
                .unwrap_or(false);
            if r.state == DocumentState::Indexed && r.same_stat(file) && recorded {
                tracing::debug!("Already indexed, completing relocation: {}", rel);
                return Ok(self.finish_relocation(file).await);
            }
        }

        // 2. 지문
        let fingerprint = match compute_fingerprint(&file.path).await {
            Ok(fp) => fp,
            Err(e) => {
                tracing::warn!("Failed to fingerprint {}: {}", rel, e);
                return Ok(Outcome::Failed(ScanFailure {
                    relative_path: rel.to_string(),
                    error: e.to_string(),
                    retryable: true,
                }));
            }
        };

        if self.fingerprints.has_been_indexed(&fingerprint) {
            let same_document = record
                .as_ref()
                .map(|r| r.state == DocumentState::Indexed && r.fingerprint.as_deref() == Some(fingerprint.as_str()))
                .unwrap_or(false);

            if same_document {
                return Ok(self.finish_relocation(file).await);
            }

            // 이 경로의 이전 버전은 더 이상 유효하지 않음
            if let Some(old) = record.as_ref().and_then(|r| r.fingerprint.as_deref()) {
                if old != fingerprint {
                    let removed = self.index.delete_by_fingerprint(old).await?;
                    self.forget(old);
                    self.registry.remove(rel)?;
                    tracing::info!(
                        "Dropped previous version of {} ({} entries), new content duplicates {}",
                        rel,
                        removed,
                        short(&fingerprint)
                    );
                }
            }

            tracing::info!("Duplicate content, skipping: {} ({})", rel, short(&fingerprint));
            return Ok(Outcome::Skipped);
        }

        if let Some(ref r) = record {
            if r.state == DocumentState::Failed
                && r.same_stat(file)
                && !r.retryable
                && !self.config.retry_failed
            {
                tracing::debug!("Skipping unchanged failed document: {}", rel);
                return Ok(Outcome::Skipped);
            }
        }

        // 3. 점유
        if !self.registry.claim(file, scan_id, self.config.claim_ttl)? {
            tracing::info!("Document claimed by another scan, skipping: {}", rel);
            return Ok(Outcome::Skipped);
        }

        // 4. 파이프라인
        let previous = record
            .as_ref()
            .and_then(|r| r.fingerprint.clone())
            .filter(|fp| *fp != fingerprint);

        match self.index_document(file, &fingerprint, previous.as_deref()).await {
            Ok(chunk_count) => {
                let destination = self.destination(rel);
                self.registry
                    .mark_indexed(rel, &fingerprint, chunk_count, &destination)?;
                tracing::info!("Indexed {} ({} chunks)", rel, chunk_count);

                match relocate(&file.path, &destination).await {
                    Ok(()) => Ok(Outcome::Indexed),
                    Err(e) => {
                        // 레코드는 Indexed 상태이므로 다음 스캔의 빠른 경로가 이동을 마무리
                        tracing::warn!("Indexed but failed to move {}: {}", rel, e);
                        Ok(Outcome::Indexed)
                    }
                }
            }
            Err(DocumentError::Soft { message, retryable }) => {
                tracing::warn!("Failed to index {}: {}", rel, message);
                self.registry.mark_failed(rel, &message, retryable)?;
                Ok(Outcome::Failed(ScanFailure {
                    relative_path: rel.to_string(),
                    error: message,
                    retryable,
                }))
            }
            Err(DocumentError::Index(e)) => {
                tracing::warn!("Vector index failure while indexing {}, aborting scan: {}", rel, e);
                if let Err(release_err) = self.registry.release(rel) {
                    tracing::warn!("Failed to release claim on {}: {}", rel, release_err);
                }
                Err(ScanError::VectorIndex(e))
            }
        }
    }

    /// 추출 -> 청킹 -> 임베딩 -> 저장 (청크 수 반환)
    async fn index_document(
        &self,
        file: &CollectedFile,
        fingerprint: &str,
        previous: Option<&str>,
    ) -> Result<usize, DocumentError> {
        let format = file
            .format
            .ok_or_else(|| ExtractError::UnsupportedFormat(extension_of(&file.path)))?;
        let text = self.extractor.extract_as(&file.path, format).await?;

        let chunks = self.chunker.chunk(&text);
        if chunks.is_empty() {
            return Err(ExtractError::malformed(&file.path, "no text content").into());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .embedder
            .embed_chunks(&texts)
            .await
            .map_err(|e| DocumentError::Soft {
                retryable: e.is_retryable_later(),
                message: e.to_string(),
            })?;

        let source = file.file_name();
        let chunk_count = chunks.len();
        let entries: Vec<EmbeddingEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddingEntry {
                vector,
                metadata: ChunkMetadata {
                    source: source.clone(),
                    relative_path: file.relative_path.clone(),
                    fingerprint: fingerprint.to_string(),
                    chunk_index: chunk.index as u32,
                    chunk_count: chunk_count as u32,
                    format,
                    token_count: chunk.token_count as u32,
                },
                text: chunk.text,
            })
            .collect();

        // 이전 버전 삭제
        if let Some(old) = previous {
            let removed = self.index.delete_by_fingerprint(old).await?;
            self.forget(old);
            tracing::info!("Replaced previous version of {} ({} entries removed)", file.relative_path, removed);
        }
        // 중단된 이전 시도의 잔여 엔트리 정리
        self.index.delete_by_fingerprint(fingerprint).await?;

        self.index.upsert(&entries).await?;

        self.fingerprints
            .record(
                fingerprint,
                &FingerprintMeta {
                    relative_path: file.relative_path.clone(),
                    source,
                    chunk_count,
                },
            )
            .map_err(|e| DocumentError::Soft {
                message: format!("failed to record fingerprint: {}", e),
                retryable: true,
            })?;

        Ok(chunk_count)
    }

    fn forget(&self, fingerprint: &str) {
        if let Err(e) = self.fingerprints.forget(fingerprint) {
            tracing::warn!("Failed to forget fingerprint {}: {}", short(fingerprint), e);
        }
    }

    /// 이미 인덱싱된 문서의 이동 마무리
    async fn finish_relocation(&self, file: &CollectedFile) -> Outcome {
        let destination = self.destination(&file.relative_path);
        match relocate(&file.path, &destination).await {
            Ok(()) => Outcome::Skipped,
            Err(e) => {
                tracing::warn!("Failed to move {}: {}", file.relative_path, e);
                Outcome::Failed(ScanFailure {
                    relative_path: file.relative_path.clone(),
                    error: format!("relocation failed: {}", e),
                    retryable: true,
                })
            }
        }
    }

    /// 인덱싱 완료 폴더의 대상 경로 (상대 경로 유지)
    fn destination(&self, relative_path: &str) -> PathBuf {
        relative_path
            .split('/')
            .fold(self.indexed_dir.clone(), |path, part| path.join(part))
    }

    /// 외부에서 삭제된 파일의 레코드 정리
    async fn reconcile(&self) -> Result<usize, ScanError> {
        let mut removed = 0;

        for record in self.registry.all()? {
            if !self.is_orphaned(&record) {
                continue;
            }

            if let Some(ref fp) = record.fingerprint {
                let entries = self.index.delete_by_fingerprint(fp).await?;
                self.forget(fp);
                tracing::debug!("Dropped {} entries of {}", entries, record.relative_path);
            }

            self.registry.remove(&record.relative_path)?;
            tracing::info!("Removed record of deleted document: {}", record.relative_path);
            removed += 1;
        }

        Ok(removed)
    }

    fn is_orphaned(&self, record: &DocumentRecord) -> bool {
        match record.state {
            DocumentState::Indexing => false,
            DocumentState::Indexed => {
                let indexed_exists = record
                    .indexed_path
                    .as_ref()
                    .map(|p| p.exists())
                    .unwrap_or(false);
                !indexed_exists && !record.absolute_path.exists()
            }
            DocumentState::Pending | DocumentState::Failed => !record.absolute_path.exists(),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

async fn compute_fingerprint(path: &Path) -> std::io::Result<String> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || fingerprint_file(&owned))
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
}

/// 대기 -> 완료 폴더 이동 (멱등)
///
/// rename이 실패하면 (다른 파일시스템 등) 복사 후 삭제합니다.
/// 대상에 같은 이름의 파일이 있으면 교체합니다.
pub async fn relocate(source: &Path, destination: &Path) -> std::io::Result<()> {
    if !source.exists() {
        if destination.exists() {
            return Ok(());
        }
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("source vanished: {:?}", source),
        ));
    }

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if destination.exists() {
        tokio::fs::remove_file(destination).await?;
    }

    if tokio::fs::rename(source, destination).await.is_err() {
        tokio::fs::copy(source, destination).await?;
        tokio::fs::remove_file(source).await?;
    }

    Ok(())
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("<none>")
        .to_string()
}

fn short(fingerprint: &str) -> &str {
    &fingerprint[..fingerprint.len().min(12)]
}

// ============================================================================
// Tests
// ============================================================================
