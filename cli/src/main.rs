//! Entry point for `tensorset`, a thin `clap`-derive CLI over
//! `tensorset-lib`. Exit code 0 on success, 1 on user error, with a single
//! human-readable line printed for the error.

mod commands;
mod error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("TENSORSET_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    let cli = commands::Cli::parse();
    if let Err(err) = commands::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
