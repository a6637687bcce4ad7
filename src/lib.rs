//! palank-index - 폴더 기반 문서 인덱싱/검색 엔진
//!
//! 대기 폴더의 문서(txt, md, pdf, docx)를 추출, 청크 분할, 임베딩하여
//! LanceDB 벡터 인덱스에 저장하고, 처리된 파일은 인덱싱 완료 폴더로 옮깁니다.
//! 질의는 임베딩 유사도로 상위 k개 청크를 반환합니다.

pub mod api;
pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod knowledge;

// Re-exports
pub use config::{get_data_dir, Config, IndexBackend};
pub use embedding::{
    create_embedder, get_api_key, has_api_key, EmbedderKind, EmbedderPool, EmbeddingProvider,
    GeminiEmbedding, HashEmbedding, OpenAiEmbedding, PoolConfig,
};
pub use error::{
    ChunkError, ConfigError, EmbedError, ExtractError, IndexError, QueryError, RegistryError,
    ScanError,
};
pub use knowledge::{
    ChunkConfig, ChunkMetadata, Chunker, DocumentRecord, DocumentRegistry, DocumentState, Engine,
    EngineStats, FingerprintStore, LanceVectorIndex, MemoryVectorIndex, QueryHit, QueryService,
    ScanSummary, Scanner, SearchFilter, TokenChunker, VectorIndex,
};
