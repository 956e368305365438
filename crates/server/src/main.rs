use std::sync::Arc;

use anyhow::Context as _;
use waystone_engine::world::WorldRegistry;
use waystone_server::broker::{Broker, MemoryBroker, RedisBroker, TimedBroker};
use waystone_server::config::Config;
use waystone_server::context::Context;
use waystone_server::handoff::NoopTransfer;
use waystone_server::notify::LogNotifier;
use waystone_server::router::Router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .init();

    let config = Config::from_env();
    tracing::info!("Waystone -- teleport and presence coordinator for '{}'", config.server_name);

    // ── Broker ───────────────────────────────────────────────────────────
    let broker: Arc<dyn Broker> = match &config.broker_url {
        Some(url) => {
            let redis = RedisBroker::connect(url)
                .await
                .with_context(|| format!("could not reach broker at {url}"))?;
            tracing::info!("connected to broker at {url}");
            Arc::new(TimedBroker::new(redis, config.broker_timeout))
        }
        None => {
            tracing::warn!(
                "WAYSTONE_BROKER_URL unset -- running on the in-memory loopback (single-server mode)"
            );
            Arc::new(MemoryBroker::new())
        }
    };

    // ── Worlds ───────────────────────────────────────────────────────────
    let worlds = Arc::new(WorldRegistry::new());
    let world_list = std::env::var("WAYSTONE_WORLDS").unwrap_or_else(|_| "world".into());
    for name in world_list.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        worlds.create_world(name);
        tracing::info!("world '{name}' ready");
    }

    // ── Wiring ───────────────────────────────────────────────────────────
    let ctx = Context::new(config, broker, worlds, Arc::new(LogNotifier), Arc::new(NoopTransfer));
    ctx.spawn_session_mirror();
    ctx.spawn_heartbeat();
    ctx.spawn_sweeper();

    let router = Router::new(Arc::clone(&ctx));
    let router_task = tokio::spawn(router.run());

    tokio::select! {
        result = router_task => {
            match result {
                Ok(Ok(())) => tracing::warn!("router finished; broker subscription is gone"),
                Ok(Err(e)) => tracing::error!("router failed: {e}"),
                Err(e) => tracing::error!("router task panicked: {e}"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl+C received, shutting down...");
        }
    }

    // ── Drain on shutdown: announce our players' quits before exiting ────
    for session in ctx.sessions.snapshot() {
        ctx.handle_disconnect(session.id).await;
    }
    tracing::info!("shutdown complete");
    Ok(())
}
