use anyhow::Context;
use clap::Parser;
use tracing::debug;

use ipgeo::cli::{self, Cli};
use ipgeo::config::{get_config, init_config};
use ipgeo::system::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    init_config(cli.config.as_deref());
    let config = get_config();

    let _log_guard = init_logging(&config.logging).context("Failed to initialize logging")?;
    debug!("Configuration loaded, log level: {}", config.logging.level);

    cli::run(cli.command, &config).await
}
