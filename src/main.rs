use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};

mod cli;
mod config;
mod core;
mod error;

use cli::Cli;
use config::Config;
use core::Engine;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting wikidigest v{}", env!("CARGO_PKG_VERSION"));

    // Configuration is assembled once and injected; the environment is only read
    let overrides = Config::collect_overrides(&cli.secrets)?;
    let config = Config::load_or_default(cli.config.as_deref())?.with_overrides(&overrides);

    let engine = Engine::new(config)?;

    // Execute the requested command
    cli.execute(engine).await
}
