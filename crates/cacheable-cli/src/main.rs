mod cli;
mod output;
mod scenarios;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use cacheable::config::loader;
use cacheable::{build_cache_layer, init_tracing_with_level};
use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = loader::load_settings(cli.config.as_deref())?;
    if let Some(backend) = cli.backend {
        settings.backend = backend.into();
    }
    if let Some(level) = &cli.log_level {
        settings.logging.level = level.clone();
    }
    settings.validate()?;
    init_tracing_with_level(&settings.logging.level);
    tracing::debug!(backend = ?settings.backend, config = ?cli.config, "settings loaded");

    match &cli.command {
        Commands::Demo => {
            let layer = build_cache_layer(&settings).await?;
            scenarios::demo(layer).await?;
        }
        Commands::Ttl(args) => {
            let layer = build_cache_layer(&settings).await?;
            scenarios::ttl(layer, Duration::from_millis(args.ttl_ms)).await?;
        }
        Commands::Tier => scenarios::tier(&settings).await?,
        Commands::Ping => scenarios::ping(&settings).await?,
        Commands::Config => {
            let mut shown = settings.clone();
            if shown.redis.password.is_some() {
                shown.redis.password = Some("***".to_string());
            }
            println!("{}", "Effective configuration".cyan());
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
    }
    Ok(())
}
