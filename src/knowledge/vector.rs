//! Vector Index - 벡터 인덱스 트레이트 및 유틸리티
//!
//! 유사도는 코사인 유사도로 통일합니다 (1.0 = 동일 방향).
//! 메트릭을 바꾸면 기존 엔트리의 순위가 무의미해지므로 전체 재인덱싱이 필요합니다.

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::collector::DocumentFormat;
use crate::error::IndexError;

// ============================================================================
// Types
// ============================================================================

/// 청크 메타데이터 (검색 결과로 그대로 반환됨)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// 원본 파일 이름
    pub source: String,
    /// 대기 폴더 기준 상대 경로
    pub relative_path: String,
    /// 콘텐츠 지문 (SHA-256 hex)
    pub fingerprint: String,
    /// 청크 인덱스 (0-based)
    pub chunk_index: u32,
    /// 문서의 전체 청크 수
    pub chunk_count: u32,
    /// 문서 형식
    pub format: DocumentFormat,
    /// 근사 토큰 수
    pub token_count: u32,
}

/// 임베딩 엔트리 (저장 단위)
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingEntry {
    /// 임베딩 벡터
    pub vector: Vec<f32>,
    /// 청크 텍스트
    pub text: String,
    /// 메타데이터
    pub metadata: ChunkMetadata,
}

/// 검색 결과
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: EmbeddingEntry,
    /// 코사인 유사도 (-1.0 ~ 1.0)
    pub score: f32,
}

/// 검색 필터 (모든 조건 AND)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    /// 파일 이름 일치
    #[serde(default)]
    pub source: Option<String>,
    /// 지문 일치
    #[serde(default)]
    pub fingerprint: Option<String>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.source.is_none() && self.fingerprint.is_none()
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        self.source.as_ref().map_or(true, |s| *s == metadata.source)
            && self
                .fingerprint
                .as_ref()
                .map_or(true, |f| *f == metadata.fingerprint)
    }
}

// ============================================================================
// VectorIndex Trait
// ============================================================================

/// 벡터 인덱스 트레이트 (async)
///
/// 한 번의 `upsert` 호출에 담긴 엔트리는 검색에 한꺼번에 보이거나 전혀 보이지 않아야 합니다.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// 엔트리 배치 저장 (한 문서의 모든 청크를 한 번에)
    async fn upsert(&self, entries: &[EmbeddingEntry]) -> Result<usize, IndexError>;

    /// 지문에 속한 엔트리 삭제
    async fn delete_by_fingerprint(&self, fingerprint: &str) -> Result<usize, IndexError>;

    /// 유사도 내림차순 검색
    ///
    /// top_k가 엔트리 수보다 크면 전체를, 빈 인덱스면 빈 결과를 반환합니다.
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredEntry>, IndexError>;

    /// 엔트리 개수
    async fn count(&self) -> Result<usize, IndexError>;

    /// 특정 지문의 엔트리 존재 여부
    async fn has_fingerprint(&self, fingerprint: &str) -> Result<bool, IndexError>;

    /// 벡터 차원
    fn dimension(&self) -> usize;

    /// 백엔드 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다. 길이가 다르거나 영벡터면 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// 검색 결과 정렬 (점수 내림차순, 동점은 지문/청크 순)
///
/// 같은 인덱스 상태에서 반복 검색해도 순서가 흔들리지 않게 합니다.
pub fn sort_ranked(results: &mut [ScoredEntry]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.entry.metadata.fingerprint.cmp(&b.entry.metadata.fingerprint))
            .then_with(|| a.entry.metadata.chunk_index.cmp(&b.entry.metadata.chunk_index))
    });
}

/// 벡터 차원 검증
pub fn check_dimensions(expected: usize, entries: &[EmbeddingEntry]) -> Result<(), IndexError> {
    match entries.iter().find(|e| e.vector.len() != expected) {
        Some(bad) => Err(IndexError::DimensionMismatch {
            expected,
            actual: bad.vector.len(),
        }),
        None => Ok(()),
    }
}

// ============================================================================
// Tests
// ============================================================================
