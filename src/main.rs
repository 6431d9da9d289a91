use anyhow::Result;
use clap::Parser;
use comunicado_sync::cli::{Cli, CliHandler};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Log to stderr so replay output stays machine readable
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if cli.debug {
        tracing::info!("🐛 Debug mode enabled - verbose logging active");
    }

    let handler = CliHandler::new(cli.config)?;
    handler.handle_command(cli.command).await
}
