use anyhow::Result;
use clap::Parser;
use studycafe_sync::cli::{Cli, CliHandler};
use tracing::Level;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing for logging
    let level = if cli.debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let handler = CliHandler::new(cli.config).await?;
    handler.handle_command(cli.command, cli.dry_run).await
}
