use anyhow::Result;
use clap::Parser;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "A lightweight SOCKS5 proxy", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0")]
    listen_address: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 1080)]
    port: u16,

    /// Connection timeout in seconds
    #[arg(short, long, default_value_t = 5)]
    timeout: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse args
    let args = Args::parse();

    // Initialize tracing subscriber
    let level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    socksrelay::start(
        &args.listen_address,
        args.port,
        Duration::from_secs(args.timeout),
    )
    .await
}
