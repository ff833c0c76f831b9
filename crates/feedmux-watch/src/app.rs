//! Application wiring.
//!
//! Builds the multiplexer service, registers the configured channel
//! subscriptions, and logs inbound payloads until interrupted.

use crate::config::AppConfig;
use crate::error::AppResult;
use feedmux::{ConnectionState, FeedMux};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Main application.
pub struct Application {
    config: AppConfig,
}

impl Application {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Run until ctrl-c.
    pub async fn run(self) -> AppResult<()> {
        if self.config.channels.is_empty() {
            warn!("No channels configured, nothing will be subscribed");
        }

        let mux = Arc::new(FeedMux::new(self.config.connection_config()));

        let runner = {
            let mux = mux.clone();
            tokio::spawn(async move { mux.run().await })
        };

        // Register all configured subscriptions up front. Anything sent
        // before the connection opens is replayed on open.
        for spec in &self.config.channels {
            let channel = spec.channel.clone();
            let handler = move |data: &Value| {
                info!(channel = %channel, %data, "Inbound");
            };

            if spec.single {
                mux.subscribe_single(&spec.channel, spec.payload.clone(), handler);
            } else {
                mux.subscribe(&spec.channel, spec.payload.clone(), handler);
            }
        }
        info!(
            url = %self.config.ws_url,
            subscriptions = mux.subscription_count(),
            "Watcher started"
        );

        // Surface reconnection attempts the way a UI status bar would.
        let mut reconnecting = mux.watch_reconnecting();
        let indicator = tokio::spawn(async move {
            while reconnecting.changed().await.is_ok() {
                if *reconnecting.borrow() {
                    info!("Reconnecting...");
                }
            }
        });

        tokio::signal::ctrl_c().await?;
        info!("Interrupt received, shutting down");

        mux.shutdown();
        let _ = runner.await;
        indicator.abort();

        if mux.state() != ConnectionState::Closed {
            warn!(state = ?mux.state(), "Service did not settle closed");
        }
        Ok(())
    }
}
