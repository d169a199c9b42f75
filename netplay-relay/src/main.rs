//! Netplay relay server: pairs browser players by room code and relays their
//! input and state messages.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:5000
//! cargo run --bin netplay-relay
//!
//! # Run on custom address, serving ROMs from ./roms
//! cargo run --bin netplay-relay -- --bind 127.0.0.1:8080 --games-dir roms
//!
//! # Or via environment variable
//! NETPLAY_ADDR=127.0.0.1:8080 cargo run --bin netplay-relay
//! ```

use std::sync::Arc;

use clap::Parser;
use netplay_relay::config::{RelayCliArgs, RelayConfig};
use netplay_relay::relay::{self, RelayState};

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        games_dir = %config.games_dir.display(),
        room_idle_timeout_secs = config.room_idle_timeout_secs,
        outbound_queue_size = config.outbound_queue_size,
        "starting netplay relay server"
    );

    let state = Arc::new(RelayState::with_config(&config));

    match relay::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}
