//! Process-wide wiring.
//!
//! Everything the subsystem needs is constructed here once at startup and
//! handed around by `Arc`; there are no global singletons to reach for. The
//! context also owns the player lifecycle entry points the host engine calls.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;
use waystone_engine::world::{PlayerBody, WorldRegistry};

use crate::broker::Broker;
use crate::config::Config;
use crate::handoff::{ArrivalLedger, ConnectionTransfer, Handoff};
use crate::location::{LocationMemory, ServerLocation};
use crate::messaging::Messaging;
use crate::notify::Notifier;
use crate::presence::{self, PresenceProjector};
use crate::protocol::ChannelMessage;
use crate::session::{PlayerSession, SessionRegistry};
use crate::store::{BrokerPlayerStore, PlayerStore};
use crate::warmup::{FailureReason, TeleportOutcome, WarmupEngine};

pub struct Context {
    pub config: Arc<Config>,
    pub broker: Arc<dyn Broker>,
    pub worlds: Arc<WorldRegistry>,
    pub sessions: Arc<SessionRegistry>,
    pub locations: Arc<LocationMemory>,
    pub presence: Arc<PresenceProjector>,
    pub arrivals: Arc<ArrivalLedger>,
    pub handoff: Arc<Handoff>,
    pub messaging: Arc<Messaging>,
    pub warmup: Arc<WarmupEngine>,
    pub notifier: Arc<dyn Notifier>,
    pub store: Arc<dyn PlayerStore>,
}

impl Context {
    pub fn new(
        config: Config,
        broker: Arc<dyn Broker>,
        worlds: Arc<WorldRegistry>,
        notifier: Arc<dyn Notifier>,
        transfer: Arc<dyn ConnectionTransfer>,
    ) -> Arc<Self> {
        let config = Arc::new(config);
        let sessions = Arc::new(SessionRegistry::new());
        let locations = Arc::new(LocationMemory::new());
        let presence = Arc::new(PresenceProjector::new(Arc::clone(&broker)));
        let arrivals = Arc::new(ArrivalLedger::new());
        let store: Arc<dyn PlayerStore> = Arc::new(BrokerPlayerStore::new(Arc::clone(&broker)));
        let handoff = Arc::new(Handoff::new(
            config.server_name.clone(),
            Arc::clone(&worlds),
            Arc::clone(&sessions),
            Arc::clone(&locations),
            Arc::clone(&broker),
            transfer,
        ));
        let messaging = Arc::new(Messaging::new(
            config.server_name.clone(),
            Arc::clone(&broker),
            Arc::clone(&sessions),
            Arc::clone(&presence),
            Arc::clone(&notifier),
        ));
        let warmup = Arc::new(WarmupEngine::new(
            Arc::clone(&config),
            Arc::clone(&sessions),
            Arc::clone(&handoff),
            Arc::clone(&notifier),
        ));
        Arc::new(Self {
            config,
            broker,
            worlds,
            sessions,
            locations,
            presence,
            arrivals,
            handoff,
            messaging,
            warmup,
            notifier,
            store,
        })
    }

    /// Keep the session mirror fed from world lifecycle events. Spawn once.
    pub fn spawn_session_mirror(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.worlds.subscribe();
        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => sessions.apply_world_event(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("session mirror lagged by {n} world events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Start the liveness lease heartbeat for this process.
    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        presence::spawn_heartbeat(
            Arc::clone(&self.broker),
            self.config.server_name.clone(),
            self.config.heartbeat_interval,
            self.config.lease_ttl,
        )
    }

    /// Start the sweep of presence left behind by dead processes.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        presence::spawn_sweeper(
            Arc::clone(&self.presence),
            self.config.server_name.clone(),
            self.config.lease_ttl,
        )
    }

    // ── Player lifecycle ────────────────────────────────────────────────────

    /// Admit a player whose connection the host engine has accepted.
    ///
    /// Attaches the body to the session's world, completes any cross-server
    /// teleport waiting on this arrival, and announces the join network-wide.
    pub async fn handle_connect(&self, session: PlayerSession) {
        let id = session.id;
        let name = session.name.clone();
        let world_name = session.world.clone();
        let body = PlayerBody { id, transform: session.transform };
        self.sessions.connect(session);

        match self.worlds.world(&world_name) {
            Some(world) => {
                if let Err(e) = world.attach(body).await {
                    tracing::warn!("attach of {id} to '{world_name}' on connect failed: {e}");
                }
            }
            None => tracing::warn!("connect for {id} names unknown world '{world_name}'"),
        }

        if let Some(destination) = self.arrivals.claim(id) {
            if let Err(e) = self.handoff.deliver_arrival(id, &destination).await {
                tracing::warn!("arrival teleport for {id} failed: {e}");
            }
        }

        let message = ChannelMessage::PlayerJoin {
            player_id: id,
            name,
            server: self.config.server_name.clone(),
        };
        if let Err(e) = self.broker.publish(message.topic(), &message.encode()).await {
            tracing::warn!("join publish for {id} failed: {e}");
        }
    }

    /// Tear down a disconnecting player's local state and tell the network.
    pub async fn handle_disconnect(&self, id: Uuid) {
        self.warmup.cancel(id);
        if self.sessions.disconnect(id).is_none() {
            return; // never fully connected
        }

        if let Some(world) = self.worlds.world_of(id) {
            let world_name = world.name().to_string();
            match world.detach(id).await {
                Ok(body) => {
                    // Persist off the hot path; a slow store must not hold up
                    // the disconnect.
                    let store = Arc::clone(&self.store);
                    let location = ServerLocation::from_transform(
                        &self.config.server_name,
                        &world_name,
                        body.transform,
                    );
                    tokio::spawn(async move {
                        if let Err(e) = store.save_location(id, &location).await {
                            tracing::warn!("persisting last location for {id} failed: {e}");
                        }
                    });
                }
                Err(e) => tracing::warn!("detach of {id} on disconnect failed: {e}"),
            }
        }

        let message = ChannelMessage::PlayerQuit {
            player_id: id,
            server: self.config.server_name.clone(),
        };
        if let Err(e) = self.broker.publish(message.topic(), &message.encode()).await {
            tracing::warn!("quit publish for {id} failed: {e}");
        }
    }

    /// Return a player to their pre-teleport position, with the usual warmup.
    pub fn request_return(
        self: &Arc<Self>,
        player: Uuid,
        on_complete: impl FnOnce(TeleportOutcome) + Send + 'static,
    ) {
        match self.locations.previous(player) {
            Some(location) => self.warmup.request(player, location, on_complete),
            None => on_complete(TeleportOutcome::Failed(FailureReason::NoPreviousLocation)),
        }
    }
}
