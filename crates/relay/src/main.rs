//! relay - interactive line chat client.
//!
//! Connects to a relay server, sends each stdin line, and prints
//! incoming lines as they arrive. Typing `shutdown` sends the line like
//! any other message and then closes this client's own connection - a
//! local convenience, not a server command.
//!
//! # Usage
//!
//! ```bash
//! # Connect to a local relay on the default port (4789)
//! relay
//!
//! # Custom server
//! relay --host chat.example.net --port 5000
//! ```

use std::env;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use relay::{IncomingLines, RelayClient, LOCAL_SHUTDOWN_COMMAND};
use relay_core::DEFAULT_PORT;

/// Line chat relay client
#[derive(Parser, Debug)]
#[command(name = "relay", version, about)]
struct Args {
    /// Server host to connect to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port (falls back to RELAY_PORT, then 4789)
    #[arg(long)]
    port: Option<u16>,
}

/// Resolves the server port: CLI flag, then RELAY_PORT, then default.
fn resolve_port(cli_port: Option<u16>) -> u16 {
    cli_port
        .or_else(|| env::var("RELAY_PORT").ok().and_then(|v| v.parse().ok()))
        .unwrap_or(DEFAULT_PORT)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("relay=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let port = resolve_port(args.port);

    // One attempt; a failed connection is reported once, not retried.
    let (client, incoming) = RelayClient::connect(&args.host, port)
        .await
        .context("Could not connect to server")?;

    println!("Connected to {}", client.peer_addr());

    let mut printer = tokio::spawn(print_incoming(incoming));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            // Server side of the connection ended.
            _ = &mut printer => break,

            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let message = line.trim();
                if message.is_empty() {
                    continue;
                }

                if let Err(e) = client.send(message).await {
                    warn!(error = %e, "Send failed");
                    break;
                }

                // Local cue only; the server sees an ordinary line.
                if message.eq_ignore_ascii_case(LOCAL_SHUTDOWN_COMMAND) {
                    debug!("Local shutdown requested");
                    break;
                }
            }
        }
    }

    client.close().await;
    printer.abort();
    Ok(())
}

/// Prints incoming server lines until the stream terminates.
async fn print_incoming(mut incoming: IncomingLines) {
    loop {
        match incoming.next_line().await {
            Ok(Some(line)) => println!("Server: {line}"),
            Ok(None) => {
                println!("Disconnected from server.");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Receive failed");
                println!("Disconnected from server.");
                break;
            }
        }
    }
}
