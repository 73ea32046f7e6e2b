use chat_server::{Config, Server};
use clap::Parser;
use tokio::signal::ctrl_c;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("chat_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("chat server v{} starting", env!("CARGO_PKG_VERSION"));

    let server = Server::bind(config).await?;
    server
        .run(async {
            let _ = ctrl_c().await;
            tracing::info!("Ctrl+C received");
        })
        .await?;
    Ok(())
}
