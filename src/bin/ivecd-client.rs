use anyhow::Result;
use clap::Parser;
use ivecd::cli::ClientCli;
use ivecd::defaults;
use ivecd::ipc::client::send_payload;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ivecd=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = ClientCli::parse();

    if let Some(reply) = send_payload(&cli.addr(), &cli.payload, defaults::MAX_REQUEST_BYTES).await? {
        println!("{}", reply);
    }
    Ok(())
}
