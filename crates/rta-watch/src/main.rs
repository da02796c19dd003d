//! # rta-watch
//!
//! Subscribe to real-time activity resources and log every event.
//!
//! ## Usage
//!
//! ```bash
//! # Subscriptions and connection settings from ./rta.toml
//! rta-watch
//!
//! # Explicit config file and token
//! RTA_CONFIG=~/watch.toml RTA_TOKEN="XBL3.0 x=...;..." rta-watch
//! ```

mod config;
mod metrics;

use anyhow::{Context, Result};
use rta_core::{Conn, Operation, Subscription};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rta=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    metrics::init_metrics();
    if config.metrics.enabled {
        metrics::start_metrics_server(config.metrics.port)?;
    }

    info!(url = %config.connection.url, "Connecting");
    let conn = config
        .dialer()
        .dial()
        .await
        .context("Failed to connect")?;

    let mut subscriptions = Vec::new();
    for uri in &config.subscriptions {
        match subscribe(&conn, uri).await {
            Ok(subscription) => subscriptions.push(subscription),
            Err(e) => warn!(resource = %uri, error = %e, "Subscribe failed"),
        }
    }
    metrics::set_active_subscriptions(conn.subscription_count());

    if subscriptions.is_empty() {
        warn!("No active subscriptions; waiting for the connection to close");
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutting down");
        }
        _ = conn.closed() => warn!("Connection closed by service"),
    }

    for subscription in &subscriptions {
        let started = Instant::now();
        let result = conn.unsubscribe(subscription).await;
        metrics::record_handshake(Operation::Unsubscribe, &result, started.elapsed().as_secs_f64());
        if let Err(e) = result {
            if e.is_closed() {
                break;
            }
            warn!(subscription = subscription.id(), error = %e, "Unsubscribe failed");
        }
    }

    conn.close().await.context("Failed to close connection")?;
    Ok(())
}

async fn subscribe(conn: &Conn, uri: &str) -> rta_core::Result<Arc<Subscription>> {
    let started = Instant::now();
    let result = conn.subscribe(uri).await;
    metrics::record_handshake(Operation::Subscribe, &result, started.elapsed().as_secs_f64());

    let subscription = result?;
    info!(
        subscription = subscription.id(),
        resource = %uri,
        custom = %subscription.custom(),
        "Watching"
    );

    let id = subscription.id();
    let resource = uri.to_string();
    subscription.handle(move |custom: rta_core::Value| {
        metrics::record_event(&resource);
        info!(subscription = id, %custom, "Event");
    });
    Ok(subscription)
}
