//! fpgate server binary

use std::path::PathBuf;

use clap::{ArgAction, Parser};
use tracing::info;
use tracing_subscriber::EnvFilter;

use fpgate::{AppConfig, AppState, Overrides, server};
use fpgate_core::Reader;

/// Fingerprint reader gateway
#[derive(Parser)]
#[command(name = "fpgate", version)]
#[command(about = "Serve a fingerprint reader over HTTP and WebSocket")]
struct Cli {
    /// Config file (defaults to ./fpgate.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:8000
    #[arg(long)]
    bind: Option<String>,

    /// Identify attempts per session
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Who paces interactive attempts: "server" or "client"
    #[arg(long)]
    pacing: Option<String>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_filter = match cli.verbose {
        0 => None,
        1 => Some("debug".to_string()),
        _ => Some("trace".to_string()),
    };

    let config = AppConfig::load_with_overrides(
        cli.config.as_deref(),
        Overrides {
            bind: cli.bind,
            max_attempts: cli.max_attempts,
            pacing: cli.pacing,
            log_filter,
        },
    )?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let addr = config.bind_addr()?;
    let reader = Reader::new(config.simulator(), config.reader_config());

    info!(
        workers = config.device.workers,
        max_attempts = config.identify.max_attempts,
        pacing = ?config.identify.pacing,
        "Starting fpgate with the simulated reader"
    );

    let state = AppState::new(reader, config.identify_options(), config.identify.pacing);
    server::run(addr, state).await?;

    Ok(())
}
