//! OpenAI 호환 임베딩 프로바이더
//!
//! `{base_url}/embeddings` 엔드포인트를 사용합니다.
//! 응답의 `data`는 `index` 기준으로 정렬해 입력 순서를 보장합니다.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{check_dimension, classify_status, classify_transport, EmbeddingProvider};
use crate::error::EmbedError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "text-embedding-3-small";

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
}

/// OpenAI 임베딩 구현체
#[derive(Debug, Clone)]
pub struct OpenAiEmbedding {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedding {
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing OpenAI API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing OpenAI model name");

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
                .context("invalid OpenAI API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model,
            dimension,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// 응답을 입력 순서의 벡터로 변환
fn into_ordered_vectors(
    mut response: EmbeddingResponse,
    expected_len: usize,
    dimension: usize,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    response.data.sort_by_key(|entry| entry.index);
    if response.data.len() != expected_len {
        return Err(EmbedError::Fatal(format!(
            "OpenAI returned {} embeddings for {} inputs",
            response.data.len(),
            expected_len
        )));
    }

    response
        .data
        .into_iter()
        .map(|entry| {
            check_dimension(dimension, &entry.embedding)?;
            Ok(entry.embedding)
        })
        .collect()
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::Fatal("OpenAI returned no embedding".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimension,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_transport("OpenAI", &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport("OpenAI", &e))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<OpenAiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(classify_status("OpenAI", status.as_u16(), &detail));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| EmbedError::Fatal(format!("Failed to parse OpenAI response: {}", e)))?;
        into_ordered_vectors(parsed, texts.len(), self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trailing_slash() {
        let embedder = OpenAiEmbedding::new(
            "sk-test".to_string(),
            "http://localhost:8080/v1/".to_string(),
            DEFAULT_MODEL.to_string(),
            8,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(embedder.endpoint(), "http://localhost:8080/v1/embeddings");
        assert_eq!(embedder.name(), DEFAULT_MODEL);
    }

    #[test]
    fn test_missing_key_rejected() {
        let result = OpenAiEmbedding::new(
            "  ".to_string(),
            DEFAULT_BASE_URL.to_string(),
            DEFAULT_MODEL.to_string(),
            8,
            Duration::from_secs(5),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_response_reordered_by_index() {
        let body = r#"{"data":[
            {"embedding":[0.0,1.0],"index":1},
            {"embedding":[1.0,0.0],"index":0}
        ]}"#;
        let response: EmbeddingResponse = serde_json::from_str(body).unwrap();
        let vectors = into_ordered_vectors(response, 2, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_response_count_and_dimension_checked() {
        let body = r#"{"data":[{"embedding":[1.0,0.0,0.0],"index":0}]}"#;

        let response: EmbeddingResponse = serde_json::from_str(body).unwrap();
        assert!(matches!(into_ordered_vectors(response, 2, 3), Err(EmbedError::Fatal(_))));

        let response: EmbeddingResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            into_ordered_vectors(response, 1, 2),
            Err(EmbedError::DimensionMismatch { expected: 2, actual: 3 })
        );
    }
}
