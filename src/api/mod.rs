//! HTTP API (axum)
//!
//! - `POST /query`  유사도 검색
//! - `POST /scan`   대기 폴더 스캔
//! - `GET  /health` 상태 확인
//! - `GET  /status` 문서/벡터 통계

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::{EmbedError, IndexError, QueryError, ScanError};
use crate::knowledge::{Engine, EngineStats, QueryHit, ScanSummary, SearchFilter};

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    /// 원본 파일 이름으로 결과 제한
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub results: Vec<QueryHit>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub vectors: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);

// ============================================================================
// Router
// ============================================================================

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/query", post(query_handler))
        .route("/scan", post(scan_handler))
        .with_state(engine)
}

/// 서버 실행 (Ctrl-C로 종료)
///
/// `scan_interval`이 있으면 백그라운드에서 주기적으로 스캔합니다.
pub async fn serve(engine: Arc<Engine>, bind: &str, scan_interval: Option<Duration>) -> Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", bind))?;

    let scan_task = scan_interval.map(|interval| {
        let engine = engine.clone();
        tokio::spawn(async move { scan_loop(engine, interval).await })
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    if let Some(task) = scan_task {
        task.abort();
    }
    Ok(())
}

/// 주기적 스캔 루프 (스캔 실패는 기록만 하고 계속)
pub async fn scan_loop(engine: Arc<Engine>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match engine.scan().await {
            Ok(summary) => tracing::info!(
                "Scheduled scan done: {} indexed, {} skipped, {} failed, {} removed",
                summary.indexed,
                summary.skipped,
                summary.failed,
                summary.removed
            ),
            Err(e) => tracing::error!("Scheduled scan aborted: {}", e),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler(State(engine): State<Arc<Engine>>) -> Result<Json<HealthResponse>, ApiError> {
    let vectors = engine.index().count().await.map_err(index_error)?;
    Ok(Json(HealthResponse {
        status: "ok",
        vectors,
    }))
}

async fn status_handler(State(engine): State<Arc<Engine>>) -> Result<Json<EngineStats>, ApiError> {
    engine
        .stats()
        .await
        .map(Json)
        .map_err(|e| error(StatusCode::INTERNAL_SERVER_ERROR, "internal", format!("{:#}", e)))
}

async fn query_handler(
    State(engine): State<Arc<Engine>>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(request) =
        payload.map_err(|e| error(StatusCode::BAD_REQUEST, "bad_request", e.body_text()))?;

    let top_k = request.top_k.unwrap_or(engine.config().default_top_k);
    let filter = SearchFilter {
        source: request.source,
        ..SearchFilter::default()
    };

    let results = engine
        .query(&request.query, top_k, &filter)
        .await
        .map_err(query_error)?;
    Ok(Json(QueryResponse { results }))
}

async fn scan_handler(State(engine): State<Arc<Engine>>) -> Result<Json<ScanSummary>, ApiError> {
    engine.scan().await.map(Json).map_err(|e| match e {
        ScanError::VectorIndex(e) => index_error(e),
        other => error(StatusCode::INTERNAL_SERVER_ERROR, "internal", other.to_string()),
    })
}

// ============================================================================
// Error Mapping
// ============================================================================

fn error(status: StatusCode, kind: &'static str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
            kind,
        }),
    )
}

fn query_error(err: QueryError) -> ApiError {
    match err {
        QueryError::Validation(message) => error(StatusCode::BAD_REQUEST, "validation", message),
        QueryError::Embedding(e) => embed_error(e),
        QueryError::Backend(e) => index_error(e),
    }
}

fn embed_error(err: EmbedError) -> ApiError {
    error(StatusCode::BAD_GATEWAY, "embedding", err.to_string())
}

fn index_error(err: IndexError) -> ApiError {
    match err {
        IndexError::Unavailable(_) => {
            error(StatusCode::SERVICE_UNAVAILABLE, "backend_unavailable", err.to_string())
        }
        IndexError::DimensionMismatch { .. } => {
            error(StatusCode::INTERNAL_SERVER_ERROR, "backend", err.to_string())
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
