//! # agito-node
//!
//! Headless profile aggregator for the agito network.
//!
//! This binary:
//! - connects to every configured relay over WebSocket and keeps the
//!   standing metadata query open on each
//! - reconciles incoming profile metadata into an in-memory cache
//!   (newest `created_at` wins)
//! - fetches the profiles listed in `WATCH_KEYS` on startup
//! - logs every accepted profile update and a periodic endpoint summary
//!
//! `agito-node keygen` prints a fresh identity instead.

mod config;

use agito_relay::{spawn_aggregator, ConnectionState};
use agito_shared::identity::{encode_npub, encode_nsec};
use agito_shared::{Identity, ProfileRecord};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::NodeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::args().nth(1).as_deref() == Some("keygen") {
        let identity = Identity::generate();
        println!("npub: {}", encode_npub(&identity.identity_key()));
        println!("nsec: {}", encode_nsec(&identity));
        return Ok(());
    }

    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,agito_relay=debug,agito_node=debug")),
        )
        .init();

    info!("Starting agito node v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = NodeConfig::from_env();
    info!(
        relays = config.aggregator.relays.len(),
        init_limit = config.aggregator.init_limit,
        reconnect = ?config.aggregator.reconnect,
        verify_signatures = config.aggregator.verify_signatures,
        watch_keys = config.watch_keys.len(),
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Start the aggregator and relay connections
    // -----------------------------------------------------------------------
    let handle = spawn_aggregator(config.aggregator.clone());

    let feed = handle
        .subscribe_global(|profile: &ProfileRecord| -> anyhow::Result<()> {
            info!(
                key = %profile.identity_key.short(),
                name = %profile.display_name,
                last_updated = profile.last_updated,
                "Profile updated"
            );
            Ok(())
        })
        .await?;
    info!(subscriber = %feed.id(), "Profile feed subscribed");

    for key in &config.watch_keys {
        handle.fetch_profile(*key).await?;
        info!(key = %key.short(), "Watching profile");
    }

    // -----------------------------------------------------------------------
    // 4. Periodic endpoint summary
    // -----------------------------------------------------------------------
    let status_handle = handle.clone();
    let status_interval = config.status_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(status_interval);
        // The first tick fires immediately, before any relay had a chance to open.
        interval.tick().await;
        loop {
            interval.tick().await;
            let Ok(endpoints) = status_handle.endpoints().await else {
                break;
            };
            let open = endpoints
                .iter()
                .filter(|e| e.state == ConnectionState::Open)
                .count();
            let cached = status_handle.snapshot().await.map(|s| s.len()).unwrap_or(0);
            if open == 0 {
                warn!(endpoints = endpoints.len(), "No relays reachable");
            } else {
                info!(open, endpoints = endpoints.len(), cached, "Relay status");
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run until Ctrl+C
    // -----------------------------------------------------------------------
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down");

    if let Err(e) = feed.dispose().await {
        warn!(error = %e, "Failed to release profile feed");
    }
    handle.stop().await?;

    Ok(())
}
