//! Worlds, the player bodies they own, and the registry tracking both.
//!
//! `WorldState` is only ever touched from its queue's driver task. The
//! registry and the player→world index are the concurrent edges: they say
//! which queue to submit to, never what the world contains.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::queue::{QueueClosed, WorldQueue};
use crate::transform::Transform;

/// Capacity of the world-event channel. Movement events dominate; 256 gives
/// slow mirrors room to catch up before they lag.
pub const EVENT_CAPACITY: usize = 256;

/// Authoritative per-player record. Owned by exactly one world at a time and
/// moved by value during a cross-world transfer.
#[derive(Clone, Copy, Debug)]
pub struct PlayerBody {
    pub id: Uuid,
    pub transform: Transform,
}

/// Lifecycle events emitted by every world, consumed by mirrors and interest
/// tracking outside the queues.
#[derive(Clone, Debug)]
pub enum WorldEvent {
    Attached { world: String, id: Uuid, transform: Transform },
    Detached { world: String, id: Uuid },
    Moved { world: String, id: Uuid, transform: Transform },
}

#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    #[error("player {0} is already attached to this world")]
    AlreadyAttached(Uuid),
    #[error("world '{0}' is not accepting players")]
    NotAccepting(String),
    #[error(transparent)]
    QueueClosed(#[from] QueueClosed),
}

#[derive(Debug, thiserror::Error)]
pub enum DetachError {
    #[error("player {0} is not attached to this world")]
    NotAttached(Uuid),
    #[error(transparent)]
    QueueClosed(#[from] QueueClosed),
}

/// State shared between the registry and every world: the player→world index
/// and the event channel. Worlds write it from inside their queue jobs.
struct RegistryShared {
    player_index: DashMap<Uuid, String>,
    events: broadcast::Sender<WorldEvent>,
}

/// One world's mutable state. Constructed by the registry, owned by the
/// queue's driver task; see [`WorldQueue`].
pub struct WorldState {
    name: String,
    players: HashMap<Uuid, PlayerBody>,
    /// A world being unloaded stops accepting attaches but still serves
    /// detaches and reads until its queue drains.
    accepting: bool,
    shared: Arc<RegistryShared>,
}

impl WorldState {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn transform_of(&self, id: Uuid) -> Option<Transform> {
        self.players.get(&id).map(|body| body.transform)
    }

    pub fn set_accepting(&mut self, accepting: bool) {
        self.accepting = accepting;
    }

    /// Insert a body into this world's store and index it.
    pub fn attach(&mut self, body: PlayerBody) -> Result<(), AttachError> {
        if !self.accepting {
            return Err(AttachError::NotAccepting(self.name.clone()));
        }
        if self.players.contains_key(&body.id) {
            return Err(AttachError::AlreadyAttached(body.id));
        }
        self.shared.player_index.insert(body.id, self.name.clone());
        let event = WorldEvent::Attached {
            world: self.name.clone(),
            id: body.id,
            transform: body.transform,
        };
        self.players.insert(body.id, body);
        // Best-effort: no subscribers means nobody is mirroring yet.
        let _ = self.shared.events.send(event);
        Ok(())
    }

    /// Remove a body from this world's store, returning it for transfer.
    pub fn detach(&mut self, id: Uuid) -> Result<PlayerBody, DetachError> {
        let body = self.players.remove(&id).ok_or(DetachError::NotAttached(id))?;
        // Only clear the index if it still points here; a concurrent attach
        // elsewhere must not be erased.
        self.shared.player_index.remove_if(&id, |_, world| world == &self.name);
        let _ = self.shared.events.send(WorldEvent::Detached {
            world: self.name.clone(),
            id,
        });
        Ok(body)
    }

    /// Overwrite a player's transform. Returns false if the player is not here.
    pub fn apply_transform(&mut self, id: Uuid, transform: Transform) -> bool {
        let Some(body) = self.players.get_mut(&id) else {
            return false;
        };
        body.transform = transform;
        let _ = self.shared.events.send(WorldEvent::Moved {
            world: self.name.clone(),
            id,
            transform,
        });
        true
    }
}

/// Clonable handle to one world: its name and its queue.
#[derive(Clone)]
pub struct WorldHandle {
    name: Arc<str>,
    queue: WorldQueue,
}

impl WorldHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Submit raw work to this world's queue.
    pub fn submit(
        &self,
        job: impl FnOnce(&mut WorldState) + Send + 'static,
    ) -> Result<(), QueueClosed> {
        self.queue.submit(job)
    }

    /// Run work on this world's queue and await its result.
    pub async fn run<R, F>(&self, job: F) -> Result<R, QueueClosed>
    where
        R: Send + 'static,
        F: FnOnce(&mut WorldState) -> R + Send + 'static,
    {
        self.queue.run(job).await
    }

    /// Attach `body` to this world. Completes once the store mutation ran.
    pub async fn attach(&self, body: PlayerBody) -> Result<(), AttachError> {
        self.run(move |state| state.attach(body)).await?
    }

    /// Detach a player from this world, yielding the body for transfer.
    pub async fn detach(&self, id: Uuid) -> Result<PlayerBody, DetachError> {
        self.run(move |state| state.detach(id)).await?
    }

    /// Apply a transform on the world's thread. `Ok(false)` means the player
    /// is not attached here.
    pub async fn apply_transform(
        &self,
        id: Uuid,
        transform: Transform,
    ) -> Result<bool, QueueClosed> {
        self.run(move |state| state.apply_transform(id, transform)).await
    }

    pub async fn transform_of(&self, id: Uuid) -> Result<Option<Transform>, QueueClosed> {
        self.run(move |state| state.transform_of(id)).await
    }

    pub async fn player_count(&self) -> Result<usize, QueueClosed> {
        self.run(|state| state.player_count()).await
    }

    /// Stop (or resume) accepting attaches, e.g. while unloading.
    pub async fn set_accepting(&self, accepting: bool) -> Result<(), QueueClosed> {
        self.run(move |state| state.set_accepting(accepting)).await
    }
}

/// All loaded worlds of this process, plus the index saying which world owns
/// which player right now.
pub struct WorldRegistry {
    worlds: DashMap<String, WorldHandle>,
    shared: Arc<RegistryShared>,
}

impl WorldRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            worlds: DashMap::new(),
            shared: Arc::new(RegistryShared {
                player_index: DashMap::new(),
                events,
            }),
        }
    }

    /// Create a world and spawn its queue. Replaces any world with the same
    /// name; the old queue drains and shuts down once its handles drop.
    pub fn create_world(&self, name: &str) -> WorldHandle {
        let state = WorldState {
            name: name.to_string(),
            players: HashMap::new(),
            accepting: true,
            shared: Arc::clone(&self.shared),
        };
        let handle = WorldHandle {
            name: name.into(),
            queue: WorldQueue::spawn(state),
        };
        if self.worlds.insert(name.to_string(), handle.clone()).is_some() {
            tracing::warn!("world '{}' replaced an already-loaded world", name);
        }
        handle
    }

    /// Look up a loaded world by name.
    pub fn world(&self, name: &str) -> Option<WorldHandle> {
        self.worlds.get(name).map(|entry| entry.clone())
    }

    /// The world that currently owns `player`, if any loaded world does.
    pub fn world_of(&self, player: Uuid) -> Option<WorldHandle> {
        let name = self.world_name_of(player)?;
        self.world(&name)
    }

    pub fn world_name_of(&self, player: Uuid) -> Option<String> {
        self.shared.player_index.get(&player).map(|entry| entry.clone())
    }

    pub fn world_names(&self) -> Vec<String> {
        self.worlds.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Subscribe to lifecycle events from every world.
    pub fn subscribe(&self) -> broadcast::Receiver<WorldEvent> {
        self.shared.events.subscribe()
    }
}

impl Default for WorldRegistry {
    fn default() -> Self {
        Self::new()
    }
}
