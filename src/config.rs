//! 설정 - 환경변수 기반
//!
//! `.env` 파일이 있으면 먼저 읽습니다 (dotenvy).
//! 모든 값에는 기본값이 있으며, 잘못된 값은 시작 시점에 거부됩니다.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::embedding::openai::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::embedding::{EmbedderKind, PoolConfig};
use crate::error::ConfigError;
use crate::knowledge::ChunkConfig;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.palank-index/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".palank-index")
}

// ============================================================================
// Types
// ============================================================================

/// 벡터 인덱스 백엔드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// LanceDB (영속)
    Lance,
    /// 메모리 (휘발성)
    Memory,
}

impl IndexBackend {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "lance" | "lancedb" => Some(Self::Lance),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

/// 전체 설정
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub data_dir: PathBuf,
    pub pending_dir: PathBuf,
    pub indexed_dir: PathBuf,

    pub chunk_size: usize,
    pub chunk_overlap: usize,

    pub embedder: EmbedderKind,
    pub embed_dimension: usize,
    pub embed_batch_size: usize,
    pub embed_concurrency: usize,
    pub embed_max_retries: u32,
    pub embed_backoff: Duration,
    pub embed_timeout: Duration,
    pub openai_base_url: String,
    pub openai_model: String,

    pub index_backend: IndexBackend,
    pub index_timeout: Duration,
    pub extract_timeout: Duration,

    pub default_top_k: usize,
    pub max_top_k: usize,

    /// 이보다 오래된 Indexing 점유는 중단된 것으로 간주
    pub claim_ttl: Duration,
    /// 재시도 불가 실패도 다시 시도할지
    pub retry_failed: bool,

    pub bind: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_data_dir(get_data_dir())
    }
}

impl Config {
    /// 데이터 디렉토리 기준 기본 설정
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            pending_dir: data_dir.join("pending"),
            indexed_dir: data_dir.join("indexed"),
            data_dir,
            chunk_size: 500,
            chunk_overlap: 50,
            embedder: EmbedderKind::Gemini,
            embed_dimension: 768,
            embed_batch_size: 16,
            embed_concurrency: 4,
            embed_max_retries: 3,
            embed_backoff: Duration::from_millis(2000),
            embed_timeout: Duration::from_secs(30),
            openai_base_url: DEFAULT_BASE_URL.to_string(),
            openai_model: DEFAULT_MODEL.to_string(),
            index_backend: IndexBackend::Lance,
            index_timeout: Duration::from_secs(30),
            extract_timeout: Duration::from_secs(120),
            default_top_k: 5,
            max_top_k: 50,
            claim_ttl: Duration::from_secs(3600),
            retry_failed: false,
            bind: "127.0.0.1:8000".to_string(),
        }
    }

    /// 환경변수에서 설정 로드 (`.env` 포함)
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {:?}", path);
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 임의의 키 조회 함수로 설정 구성
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let data_dir = get("PALANK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(get_data_dir);
        let mut config = Self::with_data_dir(data_dir);

        if let Some(dir) = get("PALANK_PENDING_DIR") {
            config.pending_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("PALANK_INDEXED_DIR") {
            config.indexed_dir = PathBuf::from(dir);
        }

        config.chunk_size = parse_or(&get, "PALANK_CHUNK_SIZE", config.chunk_size)?;
        config.chunk_overlap = parse_or(&get, "PALANK_CHUNK_OVERLAP", config.chunk_overlap)?;

        if let Some(value) = get("PALANK_EMBEDDER") {
            config.embedder = EmbedderKind::parse(&value).ok_or_else(|| invalid("PALANK_EMBEDDER", &value))?;
        }
        config.embed_dimension = parse_or(&get, "PALANK_EMBED_DIMENSION", config.embed_dimension)?;
        config.embed_batch_size = parse_or(&get, "PALANK_EMBED_BATCH_SIZE", config.embed_batch_size)?;
        config.embed_concurrency = parse_or(&get, "PALANK_EMBED_CONCURRENCY", config.embed_concurrency)?;
        config.embed_max_retries = parse_or(&get, "PALANK_EMBED_MAX_RETRIES", config.embed_max_retries)?;
        config.embed_backoff = Duration::from_millis(parse_or(&get, "PALANK_EMBED_BACKOFF_MS", 2000u64)?);
        config.embed_timeout = Duration::from_secs(parse_or(&get, "PALANK_EMBED_TIMEOUT_SECS", 30u64)?);
        if let Some(url) = get("PALANK_OPENAI_BASE_URL") {
            url::Url::parse(&url).map_err(|_| invalid("PALANK_OPENAI_BASE_URL", &url))?;
            config.openai_base_url = url;
        }
        if let Some(model) = get("PALANK_OPENAI_MODEL") {
            config.openai_model = model;
        }

        if let Some(value) = get("PALANK_INDEX_BACKEND") {
            config.index_backend = IndexBackend::parse(&value).ok_or_else(|| invalid("PALANK_INDEX_BACKEND", &value))?;
        }
        config.index_timeout = Duration::from_secs(parse_or(&get, "PALANK_INDEX_TIMEOUT_SECS", 30u64)?);
        config.extract_timeout = Duration::from_secs(parse_or(&get, "PALANK_EXTRACT_TIMEOUT_SECS", 120u64)?);

        config.default_top_k = parse_or(&get, "PALANK_DEFAULT_TOP_K", config.default_top_k)?;
        config.max_top_k = parse_or(&get, "PALANK_MAX_TOP_K", config.max_top_k)?;

        config.claim_ttl = Duration::from_secs(parse_or(&get, "PALANK_CLAIM_TTL_SECS", 3600u64)?);
        if let Some(value) = get("PALANK_RETRY_FAILED") {
            config.retry_failed = parse_bool(&value).ok_or_else(|| invalid("PALANK_RETRY_FAILED", &value))?;
        }

        if let Some(bind) = get("PALANK_BIND") {
            config.bind = bind;
        }

        config.validate()?;
        Ok(config)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunk_config().validate()?;

        if self.embed_dimension == 0 {
            return Err(ConfigError::Invalid("embed_dimension must be greater than 0".into()));
        }
        if self.embed_batch_size == 0 {
            return Err(ConfigError::Invalid("embed_batch_size must be greater than 0".into()));
        }
        if self.embed_concurrency == 0 {
            return Err(ConfigError::Invalid("embed_concurrency must be greater than 0".into()));
        }
        if self.max_top_k == 0 {
            return Err(ConfigError::Invalid("max_top_k must be greater than 0".into()));
        }
        if self.default_top_k == 0 || self.default_top_k > self.max_top_k {
            return Err(ConfigError::Invalid(format!(
                "default_top_k ({}) must be between 1 and max_top_k ({})",
                self.default_top_k, self.max_top_k
            )));
        }
        Ok(())
    }

    pub fn chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            target_size: self.chunk_size,
            overlap: self.chunk_overlap,
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            batch_size: self.embed_batch_size,
            concurrency: self.embed_concurrency,
            max_retries: self.embed_max_retries,
            initial_backoff: self.embed_backoff,
            timeout: self.embed_timeout,
        }
    }

    /// 레지스트리 DB 경로 (문서 레코드 + 지문)
    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("registry.db")
    }

    /// LanceDB 경로
    pub fn vector_index_path(&self) -> PathBuf {
        self.data_dir.join("vectors.lance")
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value.trim().parse().map_err(|_| invalid(key, &value)),
        None => Ok(default),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChunkError;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("PALANK_DATA_DIR", "/tmp/palank")])).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/palank"));
        assert_eq!(config.pending_dir, PathBuf::from("/tmp/palank/pending"));
        assert_eq!(config.indexed_dir, PathBuf::from("/tmp/palank/indexed"));
        assert_eq!(config.chunk_config(), ChunkConfig { target_size: 500, overlap: 50 });
        assert_eq!(config.embedder, EmbedderKind::Gemini);
        assert_eq!(config.index_backend, IndexBackend::Lance);
        assert_eq!(config.default_top_k, 5);
        assert_eq!(config.max_top_k, 50);
        assert_eq!(config.bind, "127.0.0.1:8000");
        assert_eq!(config.registry_path(), PathBuf::from("/tmp/palank/registry.db"));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PALANK_CHUNK_SIZE", "200"),
            ("PALANK_CHUNK_OVERLAP", "20"),
            ("PALANK_EMBEDDER", "hash"),
            ("PALANK_EMBED_BACKOFF_MS", "10"),
            ("PALANK_INDEX_BACKEND", "memory"),
            ("PALANK_RETRY_FAILED", "yes"),
            ("PALANK_PENDING_DIR", "/data/inbox"),
        ]))
        .unwrap();

        assert_eq!(config.chunk_size, 200);
        assert_eq!(config.chunk_overlap, 20);
        assert_eq!(config.embedder, EmbedderKind::Hash);
        assert_eq!(config.pool_config().initial_backoff, Duration::from_millis(10));
        assert_eq!(config.index_backend, IndexBackend::Memory);
        assert!(config.retry_failed);
        assert_eq!(config.pending_dir, PathBuf::from("/data/inbox"));
    }

    #[test]
    fn test_overlap_not_smaller_than_size_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("PALANK_CHUNK_SIZE", "100"),
            ("PALANK_CHUNK_OVERLAP", "100"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Chunk(ChunkError::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("PALANK_CHUNK_SIZE", "lots")])),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("PALANK_EMBEDDER", "word2vec")])),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("PALANK_DEFAULT_TOP_K", "60")])),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("PALANK_OPENAI_BASE_URL", "not a url")])),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
