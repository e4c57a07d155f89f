//! priceflow server - headless price ingestion service
//!
//! Runs the ingestion scheduler until Ctrl+C. Status is pushed as structured JSON logs to
//! stdout; there is no listening socket.
//!
//! # Usage
//! ```sh
//! cargo run --bin server            # full service
//! cargo run --bin server -- once    # one ingestion cycle, prints its stats
//! cargo run --bin server -- add NVDA
//! cargo run --bin server -- health
//! ```
//!
//! # Environment Variables
//! - `RUST_LOG` - log filter (default: info)
//! - `LOG_FORMAT` - `json` for JSON logs, pretty otherwise
//! - `OBSERVABILITY_ENABLED` - enable status reporting (default: true)
//! - `OBSERVABILITY_INTERVAL` - seconds between status outputs (default: 60)

use anyhow::Result;
use clap::{Parser, Subcommand};
use priceflow::application::system::Application;
use priceflow::config::{Config, LogFormat};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(author, version, about = "Multi-source price ingestion service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full service until interrupted
    Run,
    /// Run a single ingestion cycle over the tracked symbols and exit
    Once,
    /// Track a new symbol and backfill its history
    Add {
        /// Symbol to add (e.g. NVDA, ETH/USD)
        symbol: String,
    },
    /// Check every configured price source and print the health report
    Health,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(false).pretty())
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(config.observability.log_format);

    info!("priceflow {} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: Env={:?}, Symbols={:?}, Interval={}min",
        config.environment,
        config.ingestion.tracked_symbols,
        config.ingestion.realtime_interval_minutes
    );

    let app = Application::build(config).await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let handle = app.start().await?;
            info!("Server running. Press Ctrl+C to shutdown.");
            handle.run_until_signal().await?;
        }
        Commands::Once => {
            let stats = app.run_once().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Add { symbol } => {
            let added = app.service.add_instrument(&symbol).await;
            println!("{}", serde_json::json!({ "symbol": symbol, "added": added }));
            if !added {
                std::process::exit(1);
            }
        }
        Commands::Health => {
            app.monitor.check_sources().await;
            let health = app.monitor.health().await;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
    }

    Ok(())
}
