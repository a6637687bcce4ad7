//! CLI 모듈
//!
//! palank-index CLI 명령어 정의 및 구현

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::api;
use crate::config::Config;
use crate::embedding::{has_api_key, EmbedderKind};
use crate::knowledge::{DocumentState, Engine, ScanSummary, SearchFilter};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "palank-index")]
#[command(version, about = "폴더 기반 문서 인덱싱/검색 엔진", long_about = None)]
pub struct Cli {
    /// 데이터 디렉토리 (PALANK_DATA_DIR 대신)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// 로그 상세도 (-v: debug, -vv: trace, RUST_LOG가 있으면 무시)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 대기 폴더를 한 번 스캔하여 인덱싱
    Scan {
        /// 스캔할 폴더 (기본: 설정된 대기 폴더)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// 인덱싱된 문서 검색
    Query {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 (기본: PALANK_DEFAULT_TOP_K)
        #[arg(short, long)]
        limit: Option<usize>,

        /// 파일 이름 필터
        #[arg(short, long)]
        source: Option<String>,
    },

    /// 파일 또는 폴더를 대기 폴더로 복사
    Add {
        /// 추가할 파일/폴더 경로
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// 주기적으로 스캔 (Ctrl-C로 종료)
    Schedule {
        /// 스캔 간격 (초)
        #[arg(short, long, default_value = "300")]
        interval: u64,
    },

    /// HTTP API 서버 실행
    Serve {
        /// 바인드 주소 (기본: PALANK_BIND)
        #[arg(short, long)]
        bind: Option<String>,

        /// 백그라운드 스캔 간격 (초)
        #[arg(long)]
        scan_interval: Option<u64>,
    },

    /// 문서 레코드 목록
    List {
        /// 상태 필터 (pending, indexing, indexed, failed)
        #[arg(short, long)]
        state: Option<String>,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// Logging
// ============================================================================

/// `-v` 횟수에 따른 기본 로그 지시어
pub fn default_log_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "info,palank_index=debug",
        _ => "debug,palank_index=trace",
    }
}

/// 로그 필터 (`RUST_LOG`가 설정되어 있으면 우선)
pub fn log_filter(verbose: u8) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_log_directive(verbose)))
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.data_dir)?;

    match cli.command {
        Commands::Scan { dir } => cmd_scan(config, dir).await,
        Commands::Query {
            query,
            limit,
            source,
        } => cmd_query(config, &query, limit, source).await,
        Commands::Add { paths } => cmd_add(config, paths).await,
        Commands::Schedule { interval } => cmd_schedule(config, interval).await,
        Commands::Serve {
            bind,
            scan_interval,
        } => cmd_serve(config, bind, scan_interval).await,
        Commands::List { state, limit } => cmd_list(config, state, limit).await,
        Commands::Status => cmd_status(config).await,
    }
}

/// 환경변수 + `.env`에서 설정 로드 (`--data-dir`가 우선)
fn load_config(data_dir: Option<PathBuf>) -> Result<Config> {
    let config = match data_dir {
        None => Config::from_env(),
        Some(dir) => {
            let _ = dotenvy::dotenv();
            let dir = dir.to_string_lossy().into_owned();
            Config::from_lookup(|key| {
                if key == "PALANK_DATA_DIR" {
                    Some(dir.clone())
                } else {
                    std::env::var(key).ok()
                }
            })
        }
    };
    config.context("설정 로드 실패")
}

/// 엔진 열기 (Gemini 키가 없으면 안내 메시지)
async fn open_engine(config: Config) -> Result<Engine> {
    if config.embedder == EmbedderKind::Gemini && !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey\n\
             (오프라인 인덱싱: PALANK_EMBEDDER=hash)"
        );
    }

    Engine::open(config).await.context("엔진 초기화 실패")
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 스캔 명령어 (scan)
async fn cmd_scan(config: Config, dir: Option<PathBuf>) -> Result<()> {
    let engine = open_engine(config).await?;
    let dir = dir.unwrap_or_else(|| engine.config().pending_dir.clone());

    println!("[*] 스캔 중: {}", dir.display());
    let summary = engine.scan_dir(&dir).await.context("스캔 중단")?;
    print_summary(&summary);

    Ok(())
}

/// 검색 명령어 (query)
async fn cmd_query(
    config: Config,
    query: &str,
    limit: Option<usize>,
    source: Option<String>,
) -> Result<()> {
    let engine = open_engine(config).await?;
    let top_k = limit.unwrap_or(engine.config().default_top_k);
    let filter = SearchFilter {
        source,
        ..SearchFilter::default()
    };

    println!("[*] 검색 중: \"{}\"", query);
    let hits = engine.query(query, top_k, &filter).await.context("검색 실패")?;

    if hits.is_empty() {
        println!("[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("[OK] 검색 결과 ({} 건):\n", hits.len());
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "  {}. {} [chunk {}/{}] (score: {:.4})",
            i + 1,
            hit.metadata.relative_path,
            hit.metadata.chunk_index + 1,
            hit.metadata.chunk_count,
            hit.score
        );
        println!("     {}", truncate_text(&hit.text, 120));
        println!();
    }

    Ok(())
}

/// 추가 명령어 (add)
async fn cmd_add(config: Config, paths: Vec<PathBuf>) -> Result<()> {
    let engine = open_engine(config).await?;

    for path in &paths {
        if !path.exists() {
            bail!("경로를 찾을 수 없습니다: {}", path.display());
        }
    }

    let report = engine.add_documents(&paths).await.context("파일 추가 실패")?;

    for path in &report.skipped {
        println!("[!] 지원하지 않는 형식, 건너뜀: {}", path.display());
    }
    println!(
        "[OK] {} 개 파일을 대기 폴더에 추가했습니다: {}",
        report.added.len(),
        engine.config().pending_dir.display()
    );
    println!("     다음 스캔에서 인덱싱됩니다 (palank-index scan)");

    Ok(())
}

/// 주기 스캔 명령어 (schedule)
async fn cmd_schedule(config: Config, interval: u64) -> Result<()> {
    if interval == 0 {
        bail!("--interval은 1초 이상이어야 합니다");
    }

    let engine = Arc::new(open_engine(config).await?);
    println!(
        "[*] {}초 간격으로 스캔합니다: {} (Ctrl-C로 종료)",
        interval,
        engine.config().pending_dir.display()
    );

    tokio::select! {
        _ = api::scan_loop(engine, Duration::from_secs(interval)) => {}
        _ = tokio::signal::ctrl_c() => {
            println!("\n[OK] 종료합니다");
        }
    }

    Ok(())
}

/// 서버 명령어 (serve)
async fn cmd_serve(config: Config, bind: Option<String>, scan_interval: Option<u64>) -> Result<()> {
    let bind = bind.unwrap_or_else(|| config.bind.clone());
    let scan_interval = scan_interval.filter(|s| *s > 0).map(Duration::from_secs);

    let engine = Arc::new(open_engine(config).await?);
    println!("[*] HTTP 서버 시작: http://{}", bind);
    if let Some(interval) = scan_interval {
        println!("[*] 백그라운드 스캔 간격: {:?}", interval);
    }

    api::serve(engine, &bind, scan_interval).await
}

/// 목록 명령어 (list)
async fn cmd_list(config: Config, state: Option<String>, limit: usize) -> Result<()> {
    let state = match state {
        Some(s) => Some(
            DocumentState::parse(&s)
                .with_context(|| format!("알 수 없는 상태: {} (pending, indexing, indexed, failed)", s))?,
        ),
        None => None,
    };

    let engine = open_engine(config).await?;
    let records = engine.registry().list(state).context("문서 목록 조회 실패")?;

    if records.is_empty() {
        println!("[!] 문서 레코드가 없습니다.");
        return Ok(());
    }

    println!("[OK] 문서 레코드 ({} 건):\n", records.len());

    for record in records.iter().take(limit) {
        println!("  [{:<8}] {}", record.state, record.relative_path);
        println!(
            "        {} | {} | {} chunks",
            record.updated_at.format("%Y-%m-%d %H:%M"),
            format_bytes(record.size),
            record.chunk_count
        );
        if let Some(ref error) = record.error {
            let hint = if record.retryable { " (재시도 예정)" } else { "" };
            println!("        error: {}{}", truncate_text(error, 100), hint);
        }
        println!();
    }

    if records.len() > limit {
        println!("  ... 외 {} 건", records.len() - limit);
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: Config) -> Result<()> {
    println!("palank-index v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!("[*] 대기 폴더: {}", config.pending_dir.display());
    println!("[*] 인덱싱 완료 폴더: {}", config.indexed_dir.display());
    println!(
        "[*] 임베더: {} (dimension {})",
        config.embedder.as_str(),
        config.embed_dimension
    );

    if config.embedder == EmbedderKind::Gemini {
        if has_api_key() {
            println!("[OK] API 키: 설정됨");
        } else {
            println!("[!] API 키: 미설정");
            println!("    설정: export GEMINI_API_KEY=your-key");
            return Ok(());
        }
    }

    match Engine::open(config).await {
        Ok(engine) => match engine.stats().await {
            Ok(stats) => {
                println!(
                    "[OK] 문서: {} 건 (indexed {}, pending {}, indexing {}, failed {})",
                    stats.documents.total(),
                    stats.documents.indexed,
                    stats.documents.pending,
                    stats.documents.indexing,
                    stats.documents.failed
                );
                println!("[OK] 지문: {} 건", stats.fingerprints);
                println!("[OK] 벡터 인덱스 ({}): {} 청크", stats.backend, stats.vectors);
            }
            Err(e) => println!("[!] 통계 조회 실패: {:#}", e),
        },
        Err(e) => println!("[!] 엔진 초기화 실패: {:#}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn print_summary(summary: &ScanSummary) {
    println!(
        "[OK] 스캔 완료: {} 인덱싱, {} 건너뜀, {} 실패, {} 정리",
        summary.indexed, summary.skipped, summary.failed, summary.removed
    );
    for failure in &summary.failures {
        println!(
            "[!] {}: {}",
            failure.relative_path,
            truncate_text(&failure.error, 100)
        );
    }
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_commands() {
        let cli = Cli::parse_from(["palank-index", "--data-dir", "/tmp/x", "scan", "--dir", "in"]);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/x")));
        assert!(matches!(cli.command, Commands::Scan { dir: Some(_) }));

        let cli = Cli::parse_from(["palank-index", "serve", "--scan-interval", "60"]);
        assert!(matches!(
            cli.command,
            Commands::Serve {
                bind: None,
                scan_interval: Some(60)
            }
        ));

        assert!(Cli::try_parse_from(["palank-index", "add"]).is_err());
    }

    #[test]
    fn test_verbose_flag_selects_log_level() {
        let cli = Cli::parse_from(["palank-index", "status"]);
        assert_eq!(cli.verbose, 0);
        assert_eq!(default_log_directive(cli.verbose), "info");

        let cli = Cli::parse_from(["palank-index", "query", "-vv", "launch"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(default_log_directive(cli.verbose), "debug,palank_index=trace");
        assert_eq!(default_log_directive(1), "info,palank_index=debug");

        for verbose in 0..3 {
            assert!(default_log_directive(verbose)
                .parse::<tracing_subscriber::EnvFilter>()
                .is_ok());
        }
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_truncate_unicode() {
        let korean = "안녕하세요 세계";
        let truncated = truncate_text(korean, 5);
        assert_eq!(truncated, "안녕하세요...");
    }
}
