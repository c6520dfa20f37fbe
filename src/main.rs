use anyhow::Context;
use attune::cli::Cli;
use attune::config::Config;
use attune::server;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?
        .with_env_overrides();

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ws_port) = cli.ws_port {
        config.server.ws_port = ws_port;
    }
    config.validate().context("invalid configuration")?;

    if !cli.quiet {
        eprintln!("attune {}", env!("CARGO_PKG_VERSION"));
        if config.stt.api_key.is_empty() {
            eprintln!("warning: no transcription API key configured (DEEPGRAM_API_KEY)");
        }
    }

    server::run(config, Some(config_path), cli.quiet)
        .await
        .context("server failed")?;
    Ok(())
}
