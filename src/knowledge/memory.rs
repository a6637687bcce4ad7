//! In-memory Vector Index
//!
//! 무차별 코사인 검색을 하는 휘발성 인덱스입니다.
//! 테스트와 일회성 실행(`PALANK_INDEX_BACKEND=memory`)에 사용합니다.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::vector::{
    check_dimensions, cosine_similarity, sort_ranked, EmbeddingEntry, ScoredEntry, SearchFilter,
    VectorIndex,
};
use crate::error::IndexError;

/// 메모리 벡터 인덱스
///
/// 쓰기는 RwLock 쓰기 구간 안에서 한 번에 반영되므로
/// 검색이 문서의 일부 청크만 보는 일은 없습니다.
pub struct MemoryVectorIndex {
    dimension: usize,
    entries: RwLock<Vec<EmbeddingEntry>>,
}

impl MemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, entries: &[EmbeddingEntry]) -> Result<usize, IndexError> {
        if entries.is_empty() {
            return Ok(0);
        }
        check_dimensions(self.dimension, entries)?;

        let mut store = self.entries.write().await;
        // 같은 (지문, 청크) 키는 교체
        store.retain(|existing| {
            !entries.iter().any(|e| {
                e.metadata.fingerprint == existing.metadata.fingerprint
                    && e.metadata.chunk_index == existing.metadata.chunk_index
            })
        });
        store.extend_from_slice(entries);

        tracing::debug!("Upserted {} entries (total {})", entries.len(), store.len());
        Ok(entries.len())
    }

    async fn delete_by_fingerprint(&self, fingerprint: &str) -> Result<usize, IndexError> {
        let mut store = self.entries.write().await;
        let before = store.len();
        store.retain(|e| e.metadata.fingerprint != fingerprint);
        Ok(before - store.len())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredEntry>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let store = self.entries.read().await;
        let mut results: Vec<ScoredEntry> = store
            .iter()
            .filter(|e| filter.matches(&e.metadata))
            .map(|e| ScoredEntry {
                score: cosine_similarity(query, &e.vector),
                entry: e.clone(),
            })
            .collect();

        sort_ranked(&mut results);
        results.truncate(top_k);
        Ok(results)
    }

    async fn count(&self) -> Result<usize, IndexError> {
        Ok(self.entries.read().await.len())
    }

    async fn has_fingerprint(&self, fingerprint: &str) -> Result<bool, IndexError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .any(|e| e.metadata.fingerprint == fingerprint))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::DocumentFormat;
    use crate::knowledge::vector::ChunkMetadata;

    fn entry(fingerprint: &str, chunk_index: u32, vector: Vec<f32>) -> EmbeddingEntry {
        EmbeddingEntry {
            vector,
            text: format!("chunk {} of {}", chunk_index, fingerprint),
            metadata: ChunkMetadata {
                source: format!("{}.txt", fingerprint),
                relative_path: format!("{}.txt", fingerprint),
                fingerprint: fingerprint.to_string(),
                chunk_index,
                chunk_count: 1,
                format: DocumentFormat::Text,
                token_count: 3,
            },
        }
    }

    #[tokio::test]
    async fn test_empty_index_search() {
        let index = MemoryVectorIndex::new(3);
        let results = index.search(&[1.0, 0.0, 0.0], 5, &SearchFilter::default()).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_top_k_exceeds_corpus() {
        let index = MemoryVectorIndex::new(3);
        index
            .upsert(&[entry("a", 0, vec![1.0, 0.0, 0.0]), entry("b", 0, vec![0.0, 1.0, 0.0])])
            .await
            .unwrap();

        let results = index.search(&[1.0, 0.1, 0.0], 10, &SearchFilter::default()).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].entry.metadata.fingerprint, "a");
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn test_ranking_stable() {
        let index = MemoryVectorIndex::new(2);
        index
            .upsert(&[
                entry("a", 0, vec![1.0, 1.0]),
                entry("b", 0, vec![1.0, 1.0]),
                entry("c", 0, vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let first = index.search(&[1.0, 0.5], 3, &SearchFilter::default()).await.unwrap();
        for _ in 0..5 {
            let again = index.search(&[1.0, 0.5], 3, &SearchFilter::default()).await.unwrap();
            let a: Vec<_> = first.iter().map(|r| r.entry.metadata.fingerprint.clone()).collect();
            let b: Vec<_> = again.iter().map(|r| r.entry.metadata.fingerprint.clone()).collect();
            assert_eq!(a, b);
        }
    }

    #[tokio::test]
    async fn test_delete_by_fingerprint() {
        let index = MemoryVectorIndex::new(2);
        index
            .upsert(&[entry("a", 0, vec![1.0, 0.0]), entry("a", 1, vec![0.0, 1.0]), entry("b", 0, vec![1.0, 1.0])])
            .await
            .unwrap();

        assert_eq!(index.delete_by_fingerprint("a").await.unwrap(), 2);
        assert_eq!(index.count().await.unwrap(), 1);
        assert!(!index.has_fingerprint("a").await.unwrap());
        assert!(index.has_fingerprint("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_replaces_same_chunk() {
        let index = MemoryVectorIndex::new(2);
        index.upsert(&[entry("a", 0, vec![1.0, 0.0])]).await.unwrap();
        index.upsert(&[entry("a", 0, vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let index = MemoryVectorIndex::new(3);
        let err = index.upsert(&[entry("a", 0, vec![1.0, 0.0])]).await.unwrap_err();
        assert_eq!(err, IndexError::DimensionMismatch { expected: 3, actual: 2 });
    }

    #[tokio::test]
    async fn test_search_filter_source() {
        let index = MemoryVectorIndex::new(2);
        index
            .upsert(&[entry("a", 0, vec![1.0, 0.0]), entry("b", 0, vec![1.0, 0.0])])
            .await
            .unwrap();

        let filter = SearchFilter {
            source: Some("b.txt".to_string()),
            fingerprint: None,
        };
        let results = index.search(&[1.0, 0.0], 10, &filter).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entry.metadata.source, "b.txt");
    }
}
