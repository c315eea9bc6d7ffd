//! deckterm: diagnostic CLI for the deckterm session backend.

use clap::Parser;

use deckterm_runtime::{BackendFacade, RuntimeConfig};

mod cli;
mod commands;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let config = RuntimeConfig::load(args.config.as_deref())?;

    let filter = std::env::var("DECKTERM_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .or_else(|| config.log_filter.clone())
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let (facade, _events) = BackendFacade::initialize(config).await?;

    match args.command {
        cli::Command::Detect => commands::cmd_detect(&facade),
        cli::Command::Ls(opts) => commands::cmd_ls(&facade, &opts).await?,
        cli::Command::Open(opts) => commands::cmd_open(&facade, opts).await?,
        cli::Command::Recover(opts) => commands::cmd_recover(&facade, &opts).await?,
        cli::Command::Kill(opts) => commands::cmd_kill(&facade, &opts).await?,
    }

    facade.shutdown().await;
    Ok(())
}
