//! Shared helpers: a full context on the in-memory broker standing in for one
//! process, a notifier that records deliveries, and settling utilities for
//! paused-time tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use uuid::Uuid;
use waystone_engine::transform::Transform;
use waystone_engine::world::WorldRegistry;
use waystone_server::broker::MemoryBroker;
use waystone_server::config::Config;
use waystone_server::context::Context;
use waystone_server::handoff::NoopTransfer;
use waystone_server::location::ServerLocation;
use waystone_server::notify::{Notification, Notifier};
use waystone_server::router::Router;
use waystone_server::session::{GameMode, PlayerSession};
use waystone_server::warmup::TeleportOutcome;

/// Notifier that records every delivery for assertions.
#[derive(Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<(Uuid, Notification)>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn for_player(&self, player: Uuid) -> Vec<Notification> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == player)
            .map(|(_, notification)| notification.clone())
            .collect()
    }

    pub fn count_for(&self, player: Uuid, wanted: &Notification) -> usize {
        self.for_player(player).iter().filter(|n| *n == wanted).count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, player: Uuid, notification: Notification) {
        self.delivered.lock().unwrap().push((player, notification));
    }
}

/// One simulated process: a context on a (possibly shared) memory broker with
/// its session mirror and router running.
pub struct Proc {
    pub ctx: Arc<Context>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Proc {
    pub async fn start(server_name: &str, worlds: &[&str], broker: MemoryBroker) -> Self {
        Self::start_with(config(server_name), worlds, broker).await
    }

    pub async fn start_with(config: Config, worlds: &[&str], broker: MemoryBroker) -> Self {
        let registry = Arc::new(WorldRegistry::new());
        for world in worlds {
            registry.create_world(world);
        }
        let notifier = RecordingNotifier::new();
        let ctx = Context::new(
            config,
            Arc::new(broker),
            registry,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            Arc::new(NoopTransfer),
        );
        ctx.spawn_session_mirror();
        let router = Router::new(Arc::clone(&ctx));
        tokio::spawn(router.run());
        // Let the router subscribe before anyone publishes.
        settle().await;
        Self { ctx, notifier }
    }

    /// Connect a survival-mode player standing at `transform` in `world`.
    pub async fn join(&self, name: &str, world: &str, transform: Transform) -> Uuid {
        let id = Uuid::new_v4();
        let session =
            PlayerSession::new(id, name, world, transform).with_game_mode(GameMode::Survival);
        self.join_session(session).await
    }

    pub async fn join_session(&self, session: PlayerSession) -> Uuid {
        let id = session.id;
        self.ctx.handle_connect(session).await;
        settle().await;
        id
    }
}

pub fn config(server_name: &str) -> Config {
    Config { server_name: server_name.into(), ..Config::default() }
}

pub fn dest(server: &str, world: &str, x: f64, y: f64, z: f64) -> ServerLocation {
    ServerLocation::new(server, world, x, y, z, 0.0, 0.0)
}

/// Let every ready task run without advancing time.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// A oneshot-backed completion callback plus the receiver for its outcome.
pub fn completion() -> (
    impl FnOnce(TeleportOutcome) + Send + 'static,
    oneshot::Receiver<TeleportOutcome>,
) {
    let (tx, rx) = oneshot::channel();
    (
        move |outcome| {
            let _ = tx.send(outcome);
        },
        rx,
    )
}
