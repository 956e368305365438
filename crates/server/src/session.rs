//! Local session registry: this process's live view of its own players.
//!
//! Authoritative transforms live in the worlds (`waystone-engine`); the
//! registry mirrors them so timer and broker callbacks can ask "where is this
//! player right now" without touching a world queue. Entries are last-writer-
//! wins per key; every key has exactly one logical writer, the player's own
//! session flow.

use std::collections::HashSet;

use dashmap::DashMap;
use uuid::Uuid;
use waystone_engine::transform::Transform;
use waystone_engine::world::WorldEvent;

/// Game mode as reported by the host engine. `None` when the engine could not
/// provide one (mid-login, stale handle); warmup bypass then falls back to the
/// configured permission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GameMode {
    Survival,
    Creative,
    Adventure,
    Spectator,
}

/// One connected player's session, owned by this process while connected.
#[derive(Clone, Debug)]
pub struct PlayerSession {
    pub id: Uuid,
    pub name: String,
    pub world: String,
    pub transform: Transform,
    pub game_mode: Option<GameMode>,
    pub permissions: HashSet<String>,
    /// Who messaged this player last, for reply semantics.
    pub last_message_from: Option<Uuid>,
}

impl PlayerSession {
    pub fn new(id: Uuid, name: impl Into<String>, world: impl Into<String>, transform: Transform) -> Self {
        Self {
            id,
            name: name.into(),
            world: world.into(),
            transform,
            game_mode: None,
            permissions: HashSet::new(),
            last_message_from: None,
        }
    }

    pub fn with_game_mode(mut self, mode: GameMode) -> Self {
        self.game_mode = Some(mode);
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }
}

/// Thread-safe registry of this process's connected players.
pub struct SessionRegistry {
    sessions: DashMap<Uuid, PlayerSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self { sessions: DashMap::new() }
    }

    /// Insert a session at connect-accept. Replaces any stale previous entry.
    pub fn connect(&self, session: PlayerSession) {
        if self.sessions.insert(session.id, session).is_some() {
            tracing::warn!("session replaced a stale entry; previous disconnect was lost");
        }
    }

    /// Remove a session at disconnect, returning its final state.
    pub fn disconnect(&self, id: Uuid) -> Option<PlayerSession> {
        self.sessions.remove(&id).map(|(_, session)| session)
    }

    pub fn is_connected(&self, id: Uuid) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn get(&self, id: Uuid) -> Option<PlayerSession> {
        self.sessions.get(&id).map(|entry| entry.clone())
    }

    pub fn name_of(&self, id: Uuid) -> Option<String> {
        self.sessions.get(&id).map(|entry| entry.name.clone())
    }

    /// The player's live world and position, while connected.
    pub fn position_of(&self, id: Uuid) -> Option<(String, Transform)> {
        self.sessions.get(&id).map(|entry| (entry.world.clone(), entry.transform))
    }

    pub fn update_position(&self, id: Uuid, world: &str, transform: Transform) {
        if let Some(mut entry) = self.sessions.get_mut(&id) {
            entry.world = world.to_string();
            entry.transform = transform;
        }
    }

    pub fn set_last_sender(&self, id: Uuid, from: Uuid) {
        if let Some(mut entry) = self.sessions.get_mut(&id) {
            entry.last_message_from = Some(from);
        }
    }

    pub fn reply_target(&self, id: Uuid) -> Option<Uuid> {
        self.sessions.get(&id).and_then(|entry| entry.last_message_from)
    }

    pub fn has_permission(&self, id: Uuid, permission: &str) -> bool {
        self.sessions
            .get(&id)
            .map(|entry| entry.permissions.contains(permission))
            .unwrap_or(false)
    }

    /// Snapshot of all connected sessions.
    pub fn snapshot(&self) -> Vec<PlayerSession> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Fold one world lifecycle event into the mirror. Events for players this
    /// process does not host are ignored.
    pub fn apply_world_event(&self, event: &WorldEvent) {
        match event {
            WorldEvent::Attached { world, id, transform } | WorldEvent::Moved { world, id, transform } => {
                self.update_position(*id, world, *transform);
            }
            // A detach mid-transfer says nothing about the destination yet;
            // the matching attach will update the mirror.
            WorldEvent::Detached { .. } => {}
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
