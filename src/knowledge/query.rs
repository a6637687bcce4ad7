//! Query Service - 유사도 검색
//!
//! 질의 텍스트를 임베딩해 벡터 인덱스에서 상위 k개 청크를 찾습니다.
//! 스캐너와 독립적으로 동작하며 인덱싱 중에도 커밋된 문서만 보입니다.

use std::sync::Arc;

use serde::Serialize;

use super::vector::{ChunkMetadata, SearchFilter, VectorIndex};
use crate::embedding::EmbedderPool;
use crate::error::QueryError;

/// 검색 결과 항목
#[derive(Debug, Clone, Serialize)]
pub struct QueryHit {
    pub text: String,
    pub metadata: ChunkMetadata,
    /// 코사인 유사도 (-1.0 ~ 1.0, 클수록 관련)
    pub score: f32,
}

/// 검색 서비스
pub struct QueryService {
    embedder: Arc<EmbedderPool>,
    index: Arc<dyn VectorIndex>,
    max_top_k: usize,
}

impl QueryService {
    pub fn new(embedder: Arc<EmbedderPool>, index: Arc<dyn VectorIndex>, max_top_k: usize) -> Self {
        Self {
            embedder,
            index,
            max_top_k,
        }
    }

    pub fn max_top_k(&self) -> usize {
        self.max_top_k
    }

    /// 질의 실행
    ///
    /// 빈 질의, top_k = 0, top_k > max_top_k는 Validation 에러입니다.
    /// 인덱스가 비어 있으면 빈 결과를 반환합니다.
    pub async fn query(
        &self,
        text: &str,
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<QueryHit>, QueryError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(QueryError::Validation("query must not be empty".to_string()));
        }
        if top_k == 0 {
            return Err(QueryError::Validation("top_k must be at least 1".to_string()));
        }
        if top_k > self.max_top_k {
            return Err(QueryError::Validation(format!(
                "top_k must not exceed {}",
                self.max_top_k
            )));
        }

        let vector = self.embedder.embed_query(text).await?;
        let results = self.index.search(&vector, top_k, filter).await?;

        tracing::debug!("Query returned {} results", results.len());

        Ok(results
            .into_iter()
            .map(|r| QueryHit {
                text: r.entry.text,
                metadata: r.entry.metadata,
                score: r.score,
            })
            .collect())
    }
}

// ============================================================================
// Tests
// ============================================================================
