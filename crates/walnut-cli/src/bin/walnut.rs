use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use walnut_cli::{cli, Cli, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    cli::run(cli, settings).await
}
