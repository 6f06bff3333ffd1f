//! OSBridge daemon entry point.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use osbridge::config::Settings;
use osbridge::OsBridge;

#[derive(Parser, Debug)]
#[command(name = "osbridged", about = "OSBridge plan-execution daemon")]
struct Args {
    /// Path to the YAML config file.
    #[arg(short, long, env = "OSBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the state directory.
    #[arg(long, env = "OSBRIDGE_STATE_DIR")]
    state_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(state_dir) = args.state_dir {
        settings.daemon.state_dir = state_dir;
    }

    let bridge = OsBridge::new(settings)?;
    bridge.start().await?;
    tracing::info!("osbridged running; waiting for shutdown signal");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    bridge.shutdown().await;
    Ok(())
}
