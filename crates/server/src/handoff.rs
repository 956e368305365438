//! Cross-world and cross-server handoff.
//!
//! By the time this runs the teleport is authorized; what is left is the
//! store-to-store transfer. Same-world moves are one transform write on the
//! owning queue; cross-world moves detach on the source queue and attach on
//! the destination queue; cross-server moves publish an intent and let the
//! target process finish when the player's connection arrives there.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;
use waystone_engine::transform::Transform;
use waystone_engine::world::{WorldHandle, WorldRegistry};

use crate::broker::Broker;
use crate::location::{LocationMemory, ServerLocation};
use crate::protocol::ChannelMessage;
use crate::session::SessionRegistry;

#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    #[error("player {0} has no current position")]
    NoCurrentPosition(Uuid),
    #[error("unknown destination world '{0}'")]
    UnknownDestinationWorld(String),
    #[error("no loaded world owns player {0}")]
    UnknownCurrentWorld(Uuid),
    #[error("transfer rejected: {0}")]
    TransferRejected(String),
    #[error("cross-server publish failed: {0}")]
    PublishFailed(#[from] crate::broker::BrokerError),
}

/// Port for moving a player's network connection to another process. The
/// capability itself belongs to the host's proxy layer.
pub trait ConnectionTransfer: Send + Sync {
    fn transfer(&self, player: Uuid, target_server: &str);
}

/// Transfer port for hosts without a proxy: log and rely on the player
/// reconnecting to the target on their own.
pub struct NoopTransfer;

impl ConnectionTransfer for NoopTransfer {
    fn transfer(&self, player: Uuid, target_server: &str) {
        tracing::info!("no proxy attached; {player} must join '{target_server}' themselves");
    }
}

/// Cross-server teleports announced over the broker whose player has not
/// arrived here yet. The connect flow claims each at most once.
pub struct ArrivalLedger {
    waiting: DashMap<Uuid, ServerLocation>,
}

impl ArrivalLedger {
    pub fn new() -> Self {
        Self { waiting: DashMap::new() }
    }

    /// Record an inbound intent; a newer intent for the same player wins.
    pub fn record(&self, player: Uuid, destination: ServerLocation) {
        self.waiting.insert(player, destination);
    }

    /// Take the recorded destination for an arriving player, if any.
    pub fn claim(&self, player: Uuid) -> Option<ServerLocation> {
        self.waiting.remove(&player).map(|(_, destination)| destination)
    }

    pub fn is_waiting(&self, player: Uuid) -> bool {
        self.waiting.contains_key(&player)
    }
}

impl Default for ArrivalLedger {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Handoff {
    server_name: String,
    worlds: Arc<WorldRegistry>,
    sessions: Arc<SessionRegistry>,
    locations: Arc<LocationMemory>,
    broker: Arc<dyn Broker>,
    transfer_port: Arc<dyn ConnectionTransfer>,
}

impl Handoff {
    pub fn new(
        server_name: String,
        worlds: Arc<WorldRegistry>,
        sessions: Arc<SessionRegistry>,
        locations: Arc<LocationMemory>,
        broker: Arc<dyn Broker>,
        transfer_port: Arc<dyn ConnectionTransfer>,
    ) -> Self {
        Self { server_name, worlds, sessions, locations, broker, transfer_port }
    }

    /// Move an authorized player to `destination`.
    pub async fn transfer(&self, player: Uuid, destination: &ServerLocation) -> Result<(), HandoffError> {
        // Remember where they were first, before anything mutates; this is
        // what the "return" action replays.
        let Some((world, at)) = self.sessions.position_of(player) else {
            tracing::warn!("handoff for {player} aborted: no current position");
            return Err(HandoffError::NoCurrentPosition(player));
        };
        self.locations
            .remember(player, ServerLocation::from_transform(&self.server_name, &world, at));

        if destination.server != self.server_name {
            return self.cross_server(player, destination).await;
        }
        self.local(player, destination).await
    }

    /// Complete a previously announced cross-server teleport for a player
    /// whose connection just arrived on this process.
    pub async fn deliver_arrival(&self, player: Uuid, destination: &ServerLocation) -> Result<(), HandoffError> {
        self.local(player, destination).await
    }

    /// Same-process move: a transform write, or a two-phase store transfer.
    async fn local(&self, player: Uuid, destination: &ServerLocation) -> Result<(), HandoffError> {
        let Some(dest_world) = self.worlds.world(&destination.world) else {
            tracing::warn!(
                "teleport for {player} aborted: destination world '{}' not loaded",
                destination.world
            );
            return Err(HandoffError::UnknownDestinationWorld(destination.world.clone()));
        };
        let Some(src_world) = self.worlds.world_of(player) else {
            tracing::warn!("teleport for {player} aborted: no loaded world owns them");
            return Err(HandoffError::UnknownCurrentWorld(player));
        };
        let target = destination.transform();

        if src_world.name() == dest_world.name() {
            let applied = src_world
                .apply_transform(player, target)
                .await
                .map_err(|e| HandoffError::TransferRejected(e.to_string()))?;
            if !applied {
                return Err(HandoffError::UnknownCurrentWorld(player));
            }
            return Ok(());
        }
        self.cross_world(player, &src_world, &dest_world, target).await
    }

    async fn cross_world(
        &self,
        player: Uuid,
        src: &WorldHandle,
        dst: &WorldHandle,
        target: Transform,
    ) -> Result<(), HandoffError> {
        // Phase 1: pull the body off the source world's queue.
        let body = src
            .detach(player)
            .await
            .map_err(|e| HandoffError::TransferRejected(e.to_string()))?;

        // Phase 2: attach on the destination queue, then apply the final
        // transform there. A rejected attach re-attaches to the origin rather
        // than leaving the player worldless.
        match dst.attach(body).await {
            Ok(()) => {
                let applied = dst
                    .apply_transform(player, target)
                    .await
                    .map_err(|e| HandoffError::TransferRejected(e.to_string()))?;
                if !applied {
                    return Err(HandoffError::TransferRejected(format!(
                        "player {player} missing from '{}' right after attach",
                        dst.name()
                    )));
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    "attach of {player} to '{}' rejected: {e}; restoring to '{}'",
                    dst.name(),
                    src.name()
                );
                if let Err(restore_err) = src.attach(body).await {
                    tracing::error!(
                        "could not restore {player} to '{}': {restore_err}; player is detached",
                        src.name()
                    );
                }
                Err(HandoffError::TransferRejected(e.to_string()))
            }
        }
    }

    /// Publish the cross-server intent, then hand the connection to the proxy.
    /// The target process finishes the move when the player arrives there.
    async fn cross_server(&self, player: Uuid, destination: &ServerLocation) -> Result<(), HandoffError> {
        let message = ChannelMessage::Teleport {
            player_id: player,
            target_server: destination.server.clone(),
            location: destination.to_string(),
        };
        self.broker.publish(message.topic(), &message.encode()).await?;
        self.transfer_port.transfer(player, &destination.server);
        Ok(())
    }
}
