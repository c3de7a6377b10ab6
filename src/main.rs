use anyhow::{Context, Result};
use clap::Parser;
use ivecd::cli::ServerCli;
use ivecd::config::Config;
use ivecd::daemon::{ModelPaths, run_daemon};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ServerCli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_directive().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("ivecd {}", ivecd::version_string());

    let mut config = load_config(cli.config.as_deref())?;
    cli.apply_to(&mut config);
    config.validate().context("Invalid configuration")?;

    let paths = ModelPaths {
        diag_gmm: cli.diag_gmm,
        full_gmm: cli.full_gmm,
        extractor: cli.extractor,
    };
    run_daemon(config, paths, cli.vector_wspecifier).await?;
    Ok(())
}

/// Load configuration from file, then apply environment overrides.
fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        // Load from custom path
        Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?
    } else {
        // Try default path, fall back to defaults
        Config::load_or_default(&Config::default_path())?
    };

    Ok(config.with_env_overrides())
}
