//! Knowledge 모듈 - 문서 인덱싱/검색 파이프라인
//!
//! - Fingerprint: 내용 해시(SHA-256)로 중복 인덱싱 방지
//! - Registry: 문서별 처리 상태 (SQLite)
//! - Chunker: 토큰 기준 텍스트 분할 (겹침 포함)
//! - Vector: LanceDB 또는 메모리 벡터 인덱스
//! - Scanner: 대기 폴더 → 추출 → 청크 → 임베딩 → 인덱스 → 이동
//! - Query: 질의 임베딩 + 유사도 검색
//! - Engine: 위 구성 요소 조립

mod chunker;
mod engine;
mod fingerprint;
mod lance;
mod memory;
mod query;
mod registry;
mod scanner;
mod vector;

// Re-exports
pub use chunker::{approx_token_count, split, ChunkConfig, Chunker, TextChunk, TokenChunker};
pub use engine::{AddReport, Engine, EngineStats};
pub use fingerprint::{
    fingerprint_bytes, fingerprint_file, FingerprintMeta, FingerprintRecord, FingerprintStore,
};
pub use lance::LanceVectorIndex;
pub use memory::MemoryVectorIndex;
pub use query::{QueryHit, QueryService};
pub use registry::{DocumentRecord, DocumentRegistry, DocumentState, RegistryStats};
pub use scanner::{relocate, ScanConfig, ScanFailure, ScanSummary, Scanner};
pub use vector::{
    check_dimensions, cosine_similarity, sort_ranked, ChunkMetadata, EmbeddingEntry, ScoredEntry,
    SearchFilter, VectorIndex,
};
