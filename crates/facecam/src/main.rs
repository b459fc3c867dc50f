use anyhow::Result;
use clap::Parser;
use facecam::cli::{execute, Cli, Commands};
use facecam::config::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    cli.apply_overrides(&mut config);

    tracing::debug!(?config, "configuration loaded");
    execute(cli.command.unwrap_or(Commands::Run), config).await
}
