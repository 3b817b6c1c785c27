mod cli;
mod commands;
mod output;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, warn};
use vulngraph_core::config::AppConfig;
use vulngraph_sdk::{CancellationToken, Vulngraph};

use crate::cli::{Cli, Commands};
use crate::output::OutputWriter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    vulngraph_core::init_tracing_with(cli.log_level.as_deref());

    match run(cli).await {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            error!(error = %format!("{err:#}"), "command failed");
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => AppConfig::load().context("loading configuration")?,
    };
    let vulngraph = Vulngraph::open(config)
        .await
        .context("opening the graph store")?;
    let writer = OutputWriter::new(cli.output);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Collect(args) => {
            commands::collect::execute(args, &vulngraph, &writer, &cancel).await
        }
        Commands::Impact(args) => {
            commands::impact::execute(args, &vulngraph, &writer, &cancel).await
        }
        Commands::Path(args) => commands::path::execute(args, &vulngraph, &writer, &cancel).await,
        Commands::Stats => commands::stats::execute(&vulngraph, &writer).await,
    }
}
