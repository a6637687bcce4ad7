//! Text Chunking Module
//!
//! 추출된 텍스트를 토큰 수 기준의 겹치는 청크로 분할합니다.
//! 토큰은 공백으로 구분된 단어로 근사합니다.
//!
//! 청크는 원문의 연속 구간을 그대로 잘라낸 것이므로
//! byte_range로 원문을 복원할 수 있습니다.

use std::ops::Range;

use crate::error::ChunkError;

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// 청크 당 최대 토큰 수
    pub target_size: usize,
    /// 인접 청크 간 반복되는 토큰 수
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            target_size: 500,
            overlap: 50,
        }
    }
}

impl ChunkConfig {
    /// 설정 검증
    ///
    /// overlap >= target_size 이면 다음 청크가 앞으로 나아가지 못합니다.
    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.target_size == 0 {
            return Err(ChunkError::InvalidConfig(
                "target_size must be greater than 0".to_string(),
            ));
        }
        if self.overlap >= self.target_size {
            return Err(ChunkError::InvalidConfig(format!(
                "overlap ({}) must be smaller than target_size ({})",
                self.overlap, self.target_size
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Chunk
// ============================================================================

/// 문서 텍스트의 한 조각
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// 문서 내 순번 (0-based)
    pub index: usize,
    /// 청크 텍스트 (원문 슬라이스)
    pub text: String,
    /// 근사 토큰 수
    pub token_count: usize,
    /// 원문 내 바이트 범위
    pub byte_range: Range<usize>,
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<TextChunk>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// TokenChunker
// ============================================================================

/// 토큰 윈도우 청커
///
/// target_size 토큰씩 묶고, 다음 청크는 overlap 토큰만큼 뒤로 물러나 시작합니다.
#[derive(Debug, Clone)]
pub struct TokenChunker {
    config: ChunkConfig,
}

impl TokenChunker {
    /// 검증된 설정으로 생성
    pub fn new(config: ChunkConfig) -> Result<Self, ChunkError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> ChunkConfig {
        self.config
    }
}

impl Chunker for TokenChunker {
    fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let spans = token_spans(text);
        if spans.is_empty() {
            return vec![];
        }

        let ChunkConfig {
            target_size,
            overlap,
        } = self.config;
        let step = target_size - overlap;

        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let end = (start + target_size).min(spans.len());
            let byte_range = spans[start].start..spans[end - 1].end;

            chunks.push(TextChunk {
                index: chunks.len(),
                text: text[byte_range.clone()].to_string(),
                token_count: end - start,
                byte_range,
            });

            if end >= spans.len() {
                break;
            }
            start += step;
        }

        chunks
    }

    fn name(&self) -> &'static str {
        "TokenChunker"
    }
}

/// 문자열 청크만 필요한 경우의 편의 함수
pub fn split(text: &str, target_size: usize, overlap: usize) -> Result<Vec<String>, ChunkError> {
    let chunker = TokenChunker::new(ChunkConfig {
        target_size,
        overlap,
    })?;
    Ok(chunker.chunk(text).into_iter().map(|c| c.text).collect())
}

/// 근사 토큰 수
pub fn approx_token_count(text: &str) -> usize {
    text.split_whitespace().count()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 공백으로 구분된 토큰의 바이트 범위
fn token_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut current: Option<usize> = None;

    for (i, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(start) = current.take() {
                spans.push(start..i);
            }
        } else if current.is_none() {
            current = Some(i);
        }
    }

    if let Some(start) = current {
        spans.push(start..text.len());
    }

    spans
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(target_size: usize, overlap: usize) -> TokenChunker {
        TokenChunker::new(ChunkConfig {
            target_size,
            overlap,
        })
        .unwrap()
    }

    #[test]
    fn test_chunker_empty() {
        assert!(chunker(4, 1).chunk("").is_empty());
        assert!(chunker(4, 1).chunk(" \n\t ").is_empty());
    }

    #[test]
    fn test_short_text_single_chunk_verbatim() {
        let text = "Company X transferred $50,000 to Company Y on 2024-01-01.";
        let chunks = chunker(500, 50).chunk(text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].byte_range, 0..text.len());
    }

    #[test]
    fn test_overlap_windows() {
        let text = "a b c d e f g h i j";
        let chunks = split(text, 4, 1).unwrap();

        assert_eq!(chunks, vec!["a b c d", "d e f g", "g h i j"]);
    }

    #[test]
    fn test_no_overlap() {
        let chunks = split("a b c d e f g h", 4, 0).unwrap();
        assert_eq!(chunks, vec!["a b c d", "e f g h"]);
    }

    #[test]
    fn test_chunks_keep_original_whitespace() {
        let text = "one two\nthree\n\nfour five";
        let chunks = split(text, 3, 1).unwrap();
        assert_eq!(chunks, vec!["one two\nthree", "three\n\nfour five"]);
    }

    #[test]
    fn test_coverage_reconstructs_text() {
        let text = "Lorem ipsum dolor sit amet,\nconsectetur adipiscing elit.\n\n\
                    Sed do eiusmod tempor incididunt ut labore et dolore magna aliqua.";
        let chunks = chunker(5, 2).chunk(text);

        // 겹치는 부분을 제외하고 이어 붙이면 원문이 복원되어야 함
        let mut rebuilt = String::new();
        let mut covered = 0;
        for chunk in &chunks {
            assert!(chunk.byte_range.start <= covered, "gap before chunk {}", chunk.index);
            if chunk.byte_range.end > covered {
                rebuilt.push_str(&text[covered..chunk.byte_range.end]);
                covered = chunk.byte_range.end;
            }
        }
        assert_eq!(rebuilt, text);

        // 마지막을 제외한 모든 청크는 target_size 토큰
        for chunk in &chunks[..chunks.len() - 1] {
            assert_eq!(chunk.token_count, 5);
        }
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
    }

    #[test]
    fn test_adjacent_chunks_share_overlap_tokens() {
        let text = (0..23).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let chunks = chunker(6, 2).chunk(&text);

        for pair in chunks.windows(2) {
            let prev: Vec<&str> = pair[0].text.split_whitespace().collect();
            let next: Vec<&str> = pair[1].text.split_whitespace().collect();
            assert_eq!(&prev[prev.len() - 2..], &next[..2]);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "the quick brown fox jumps over the lazy dog again and again";
        assert_eq!(chunker(4, 1).chunk(text), chunker(4, 1).chunk(text));
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            TokenChunker::new(ChunkConfig { target_size: 10, overlap: 10 }),
            Err(ChunkError::InvalidConfig(_))
        ));
        assert!(ChunkConfig { target_size: 10, overlap: 20 }.validate().is_err());
        assert!(ChunkConfig { target_size: 0, overlap: 0 }.validate().is_err());
        assert!(ChunkConfig::default().validate().is_ok());
    }

    #[test]
    fn test_unicode_tokens() {
        let text = "안녕하세요 세계 반갑습니다 여러분";
        let chunks = split(text, 2, 1).unwrap();
        assert_eq!(chunks, vec!["안녕하세요 세계", "세계 반갑습니다", "반갑습니다 여러분"]);
    }

    #[test]
    fn test_approx_token_count() {
        assert_eq!(approx_token_count("a  b\nc"), 3);
        assert_eq!(approx_token_count(""), 0);
    }
}
