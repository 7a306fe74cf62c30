//! relayd - line chat relay server.
//!
//! Runs the relay in the foreground: accepts TCP clients, answers each
//! inbound line with an automatic reply, and broadcasts operator-typed
//! stdin lines to every connected client.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default port (4789)
//! relayd
//!
//! # Custom bind address and port
//! relayd --bind 127.0.0.1 --port 5000
//!
//! # Port via environment
//! RELAY_PORT=5000 relayd
//!
//! # Enable debug logging
//! RUST_LOG=relayd=debug relayd
//! ```
//!
//! # Signal Handling
//!
//! SIGTERM/SIGINT trigger a graceful shutdown: the listener closes and
//! every connected session is disconnected.

use std::env;
use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use relay_core::DEFAULT_PORT;
use relayd::server::{RelayServer, ServerConfig};

/// Line chat relay server
#[derive(Parser, Debug)]
#[command(name = "relayd", version, about)]
struct Args {
    /// Address to bind the listener on
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// TCP port to listen on (falls back to RELAY_PORT, then 4789)
    #[arg(long)]
    port: Option<u16>,

    /// Show operator lines locally without broadcasting them
    #[arg(long)]
    no_broadcast: bool,
}

/// Resolves the listen port: CLI flag, then RELAY_PORT, then default.
fn resolve_port(cli_port: Option<u16>) -> u16 {
    cli_port
        .or_else(|| env::var("RELAY_PORT").ok().and_then(|v| v.parse().ok()))
        .unwrap_or(DEFAULT_PORT)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("relayd=info".parse()?)
                .add_directive("relay_core=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = ServerConfig {
        bind_addr: args.bind,
        port: resolve_port(args.port),
    };

    let server = Arc::new(RelayServer::new());
    let events = server.subscribe();

    let addr = server
        .start(&config)
        .await
        .context("Failed to start relay server")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %addr,
        "Relay server running, operator stdin lines are broadcast to clients"
    );

    spawn_event_printer(events);

    // Setup shutdown signal handling
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    operator_loop(&server, args.no_broadcast, &shutdown).await;

    server.stop().await;
    Ok(())
}

/// Prints subscribed server events to stdout for the operator.
fn spawn_event_printer(mut events: broadcast::Receiver<relayd::event::ServerEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("{event}"),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Event stream lagged, skipped notices");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Reads operator stdin lines and broadcasts each non-empty one until
/// shutdown is requested.
async fn operator_loop(server: &RelayServer, no_broadcast: bool, shutdown: &CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let message = line.trim();
                        if message.is_empty() {
                            continue;
                        }

                        println!("Server: {message}");
                        if no_broadcast {
                            continue;
                        }

                        match server.operator_broadcast(message).await {
                            Ok(delivered) => {
                                debug!(delivered, "Operator broadcast delivered");
                            }
                            Err(e) => warn!(error = %e, "Operator broadcast failed"),
                        }
                    }
                    Ok(None) => {
                        // stdin closed (e.g. running under a service
                        // manager); keep serving until signalled.
                        debug!("stdin closed, waiting for shutdown signal");
                        shutdown.cancelled().await;
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read operator input");
                        shutdown.cancelled().await;
                        break;
                    }
                }
            }
        }
    }
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
