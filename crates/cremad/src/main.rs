//! cremad: watches the league's running games and probes which of their
//! advertised addresses are reachable from the outside.

use std::sync::Arc;

use anyhow::{Context, Result};

use crema_api::ApiState;
use crema_core::config::CremaConfig;
use crema_services::{Prober, SessionCache};

mod league;
mod monitor;

use league::LeagueClient;
use monitor::Monitor;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = CremaConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = CremaConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        let mut config = CremaConfig::default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    });
    if std::env::var_os("ADDRESS").is_none() {
        tracing::warn!(
            listen = %config.api.listen,
            "environment variable ADDRESS not set, using configured listen address"
        );
    }

    let filter = config
        .address_filter()
        .context("invalid probe.private_ranges")?;
    tracing::info!(
        skip_private = config.probe.skip_private,
        blocks = filter.blocks().len(),
        timeout_ms = config.probe.timeout_ms,
        "prober configured"
    );

    let prober = Arc::new(Prober::from_config(&config.probe));
    let cache = SessionCache::spawn(prober, filter);

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let monitor_task = tokio::spawn(
        Monitor::new(
            cache.clone(),
            LeagueClient::new(config.league.query_url.clone()),
            config.feed.events_url.clone(),
        )
        .run(shutdown_tx.subscribe()),
    );

    let api_task = {
        let state = ApiState {
            cache: cache.clone(),
            client_address: config.league.client_address.clone(),
        };
        let listen = config.api.listen.clone();
        tokio::spawn(async move {
            if let Err(e) = crema_api::serve(state, &listen).await {
                tracing::error!(error = %e, "API server failed");
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = monitor_task       => tracing::error!("game monitor exited: {:?}", r),
        r = api_task           => tracing::error!("API server exited: {:?}", r),
    }

    Ok(())
}
