//! 로컬 해시 임베딩 (feature hashing)
//!
//! 단어와 문자 3-gram을 FNV-1a로 해시해 고정 차원 벡터에 누적한 뒤 L2 정규화합니다.
//! 의미를 이해하지는 못하지만 표면 형태가 비슷한 텍스트끼리 가깝게 놓이며,
//! 네트워크 없이 결정적으로 동작합니다.

use async_trait::async_trait;

use super::EmbeddingProvider;
use crate::error::EmbedError;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 해시 임베딩 구현체
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimension: usize,
}

impl HashEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// 동기 벡터화
    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();

        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            vector[self.bucket(word.as_bytes())] += 1.0;

            let padded: Vec<char> = std::iter::once(' ')
                .chain(word.chars())
                .chain(std::iter::once(' '))
                .collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                vector[self.bucket(gram.as_bytes())] += 1.0;
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }

    fn bucket(&self, bytes: &[u8]) -> usize {
        let hash = bytes.iter().fold(FNV_OFFSET, |acc, b| {
            (acc ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
        });
        (hash % self.dimension as u64) as usize
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(self.vectorize(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash-trigram"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::cosine_similarity;

    #[test]
    fn test_deterministic_and_normalized() {
        let embedder = HashEmbedding::new(256);
        let a = embedder.vectorize("Company X transferred funds");
        let b = embedder.vectorize("Company X transferred funds");
        assert_eq!(a, b);
        assert_eq!(a.len(), 256);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_empty_text_zero_vector() {
        let embedder = HashEmbedding::new(16);
        assert!(embedder.vectorize("  ...  ").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_related_text_scores_higher() {
        let embedder = HashEmbedding::new(768);
        let doc = embedder.vectorize("Company X transferred $50,000 to Company Y on 2024-01-01.");
        let other = embedder.vectorize("The recipe calls for three eggs and a cup of milk.");
        let query = embedder.vectorize("transfer of funds");

        let related = cosine_similarity(&query, &doc);
        let unrelated = cosine_similarity(&query, &other);
        assert!(related > 0.1, "related score {}", related);
        assert!(related > unrelated);
    }

    #[tokio::test]
    async fn test_embed_batch_preserves_order() {
        let embedder = HashEmbedding::new(64);
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch[0], embedder.vectorize("alpha"));
        assert_eq!(batch[1], embedder.vectorize("beta"));
    }
}
