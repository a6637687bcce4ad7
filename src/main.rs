//! palank-index CLI 진입점

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = palank_index::cli::Cli::parse();

    // 로그는 stderr로 (stdout은 검색 결과 출력용)
    tracing_subscriber::fmt()
        .with_env_filter(palank_index::cli::log_filter(cli.verbose))
        .with_writer(std::io::stderr)
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("palank-index")
        .build()?
        .block_on(palank_index::cli::run(cli))
}
