//! 임베딩 모듈 - 텍스트 벡터화
//!
//! 프로바이더는 설정(`PALANK_EMBEDDER`)으로 선택합니다.
//! - `gemini`: Google Gemini API (기본)
//! - `openai`: OpenAI 호환 `/embeddings` 엔드포인트
//! - `hash`: 네트워크 없이 동작하는 결정적 로컬 임베더
//!
//! 프로바이더는 한 번만 호출하고 에러를 분류해 돌려줍니다.
//! 재시도, 타임아웃, 동시성 제한은 [`EmbedderPool`]이 담당합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let provider = create_embedder(&config)?;
//! let pool = EmbedderPool::new(provider, PoolConfig::default());
//! let vectors = pool.embed_chunks(&texts).await?;
//! ```

pub mod gemini;
pub mod hash;
pub mod openai;
pub mod pool;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::Config;
use crate::error::EmbedError;

pub use gemini::GeminiEmbedding;
pub use hash::HashEmbedding;
pub use openai::OpenAiEmbedding;
pub use pool::{EmbedderPool, PoolConfig};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩 (문서용)
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// 배치 임베딩 (입력 순서 유지, 같은 길이)
    ///
    /// 기본 구현은 순차 호출입니다.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 검색 질의 임베딩
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.embed(text).await
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Provider Selection
// ============================================================================

/// 임베딩 프로바이더 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    Gemini,
    OpenAi,
    Hash,
}

impl EmbedderKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Some(Self::Gemini),
            "openai" => Some(Self::OpenAi),
            "hash" => Some(Self::Hash),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
            Self::Hash => "hash",
        }
    }
}

/// 설정에 따라 임베딩 프로바이더 생성
pub fn create_embedder(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match config.embedder {
        EmbedderKind::Gemini => {
            if !has_api_key() {
                anyhow::bail!(
                    "GEMINI_API_KEY or GOOGLE_AI_API_KEY not set.\n\
                     Set: export GEMINI_API_KEY=your-api-key\n\
                     Get your API key at: https://aistudio.google.com/app/apikey\n\
                     (or use PALANK_EMBEDDER=hash for offline indexing)"
                );
            }
            Arc::new(GeminiEmbedding::with_dimension(
                get_api_key()?,
                config.embed_dimension,
                config.embed_timeout,
            )?)
        }
        EmbedderKind::OpenAi => Arc::new(OpenAiEmbedding::new(
            get_openai_api_key()?,
            config.openai_base_url.clone(),
            config.openai_model.clone(),
            config.embed_dimension,
            config.embed_timeout,
        )?),
        EmbedderKind::Hash => Arc::new(HashEmbedding::new(config.embed_dimension)),
    };

    tracing::info!(
        "Using {} embedding (dimension: {})",
        provider.name(),
        provider.dimension()
    );
    Ok(provider)
}

// ============================================================================
// API Key Management
// ============================================================================

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Gemini API 키 로드 (환경변수에서)
///
/// 우선순위:
/// 1. `GEMINI_API_KEY` 환경변수
/// 2. `GOOGLE_AI_API_KEY` 환경변수
pub fn get_api_key() -> Result<String> {
    if let Some(key) = non_empty_env("GEMINI_API_KEY") {
        tracing::debug!("Using API key from GEMINI_API_KEY");
        return Ok(key);
    }

    if let Some(key) = non_empty_env("GOOGLE_AI_API_KEY") {
        tracing::debug!("Using API key from GOOGLE_AI_API_KEY");
        return Ok(key);
    }

    anyhow::bail!(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
    )
}

/// Gemini API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    non_empty_env("GEMINI_API_KEY").is_some() || non_empty_env("GOOGLE_AI_API_KEY").is_some()
}

/// OpenAI API 키 로드 (`OPENAI_API_KEY`)
pub fn get_openai_api_key() -> Result<String> {
    non_empty_env("OPENAI_API_KEY")
        .ok_or_else(|| anyhow::anyhow!("API key not found. Set OPENAI_API_KEY environment variable."))
}

// ============================================================================
// Error Classification
// ============================================================================

/// HTTP 상태 코드 분류
///
/// 429와 5xx는 일시적 실패, 그 외 4xx는 재시도해도 소용없는 실패입니다.
pub(crate) fn classify_status(provider: &str, status: u16, detail: &str) -> EmbedError {
    let message = format!("{} API error ({}): {}", provider, status, detail);
    if status == 429 || (500..600).contains(&status) {
        EmbedError::Transient(message)
    } else {
        EmbedError::Fatal(message)
    }
}

/// 전송 에러 분류 (연결, 타임아웃 등은 모두 일시적)
pub(crate) fn classify_transport(provider: &str, err: &reqwest::Error) -> EmbedError {
    if err.is_builder() {
        EmbedError::Fatal(format!("{} request build error: {}", provider, err))
    } else {
        EmbedError::Transient(format!("{} request failed: {}", provider, err))
    }
}

/// 응답 벡터 차원 검증
pub(crate) fn check_dimension(expected: usize, vector: &[f32]) -> Result<(), EmbedError> {
    if vector.len() != expected {
        return Err(EmbedError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
