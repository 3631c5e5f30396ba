//! ccugw - bridges controller notifications onto an embedded MQTT broker.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod serve;

use serve::ServeCommand;

/// ccugw - controller to MQTT gateway.
///
/// Runs an embedded MQTT broker with a plain and an optional TLS listener
/// and publishes controller value changes as
/// `device/status/{serial}/{channel}/{parameter}`.
#[derive(Parser)]
#[command(name = "ccugw")]
#[command(about = "Controller to MQTT gateway")]
#[command(version)]
pub struct Cli {
    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the gateway until interrupted
    Serve(ServeCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match &cli.command {
        Commands::Serve(cmd) => cmd.run(&cli).await,
    }
}
