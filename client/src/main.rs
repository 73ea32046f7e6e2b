use anyhow::Context;
use clap::Parser;
use client::Client;
use rand::Rng;
use tokio::{signal::ctrl_c, sync::watch};
use tracing_subscriber::EnvFilter;

mod client;
mod input_sender;
mod output_receiver;

/// Terminal client for the line chat relay
#[derive(Parser, Debug)]
#[command(name = "chat-client", version, about = "Terminal client for the line chat relay")]
struct Args {
    /// Server host
    #[arg(long, env = "CHAT_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(long, env = "CHAT_PORT", default_value_t = 3000)]
    port: u16,

    /// Display name sent when the server asks for one
    #[arg(long, env = "CHAT_USERNAME")]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let user_name = args
        .name
        .unwrap_or_else(|| format!("User_{}", rand::rng().random_range(0..1000)));

    let (shutdown_tx, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        let _ = ctrl_c().await;
        eprintln!("Ctrl+C received");
        let _ = shutdown_tx.send(true);
    });

    let addr = format!("{}:{}", args.host, args.port);
    let client = Client::connect(addr.as_str(), shutdown, user_name.clone())
        .await
        .with_context(|| format!("Failed to connect to {addr}"))?;
    eprintln!("Connected to {addr} as {user_name}");

    client.wait_for_shutdown().await;
    eprintln!("Disconnected from server");
    // The stdin reader may still be parked on a blocking read, don't wait for it
    std::process::exit(0)
}
