//! Server binary entry point.

use clap::Parser;
use log::info;
use server::network::Server;
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Tick interval in milliseconds
    #[clap(short, long, default_value = "100")]
    tick_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);

    let mut server = Server::new(&address, Duration::from_millis(args.tick_ms)).await?;

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
