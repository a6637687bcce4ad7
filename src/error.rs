//! 에러 타입 정의
//!
//! 파일 단위로 격리되는 소프트 에러(추출, 임베딩)와
//! 작업 전체를 중단시키는 에러(벡터 인덱스 장애)를 구분합니다.

use std::path::PathBuf;

use thiserror::Error;

// ============================================================================
// Extraction
// ============================================================================

/// 문서 추출 에러 (파일 단위 소프트 실패)
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("malformed document {path:?}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("extraction timed out after {secs}s: {path:?}")]
    Timeout { path: PathBuf, secs: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    pub(crate) fn malformed(path: &std::path::Path, reason: impl ToString) -> Self {
        Self::Malformed {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// Chunking
// ============================================================================

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ChunkError {
    #[error("invalid chunk configuration: {0}")]
    InvalidConfig(String),
}

// ============================================================================
// Embedding
// ============================================================================

/// 임베딩 서비스 에러
///
/// `Transient`만 재시도 대상입니다.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbedError {
    /// 일시적 실패 (429, 5xx, 네트워크, 타임아웃)
    #[error("transient embedding failure: {0}")]
    Transient(String),

    /// 재시도해도 소용없는 실패 (4xx, 잘못된 응답)
    #[error("embedding service error: {0}")]
    Fatal(String),

    #[error("embedding failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl EmbedError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// 다음 스캔에서 다시 시도할 가치가 있는지
    pub fn is_retryable_later(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RetriesExhausted { .. })
    }
}

// ============================================================================
// Vector Index
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    /// 백엔드 접근 불가 (I/O, 손상, 타임아웃)
    #[error("vector index unavailable: {0}")]
    Unavailable(String),

    #[error("vector dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

// ============================================================================
// Registry (Document Records + Fingerprints)
// ============================================================================

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("registry lock poisoned")]
    LockPoisoned,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Query
// ============================================================================

/// 검색 에러
///
/// "결과 없음"은 에러가 아니라 빈 결과입니다.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("invalid query: {0}")]
    Validation(String),

    #[error(transparent)]
    Embedding(#[from] EmbedError),

    #[error(transparent)]
    Backend(#[from] IndexError),
}

// ============================================================================
// Scan
// ============================================================================

/// 스캔 전체를 중단시키는 에러
#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    VectorIndex(#[from] IndexError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("failed to read pending directory {path:?}: {source}")]
    PendingDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ============================================================================
// Config
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

// ============================================================================
// Tests
// ============================================================================
