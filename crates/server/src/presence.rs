//! Presence projector: turns join/quit traffic into shared set membership and
//! a local mirror of who is online anywhere on the network.
//!
//! Broker-held presence is derived purely from received protocol events. A
//! process's own join goes out over the broker and is applied when it comes
//! back, the same as everyone else's; local state never writes the shared
//! sets directly.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::broker::{Broker, BrokerError};

// ── Broker key layout ───────────────────────────────────────────────────────

/// Global set of online player ids, across all servers.
pub const KEY_GLOBAL_ONLINE: &str = "players:online";

/// Set of server names that have ever registered. Swept against their leases.
pub const KEY_SERVERS: &str = "servers";

pub fn server_players_key(server: &str) -> String {
    format!("server:{server}:players")
}

pub fn server_alive_key(server: &str) -> String {
    format!("server:{server}:alive")
}

pub fn player_server_key(player: Uuid) -> String {
    format!("player:{player}:server")
}

/// What the mirror knows about one online player.
#[derive(Clone, Debug)]
pub struct OnlineEntry {
    pub name: String,
    pub server: String,
}

/// Projects presence events into the broker sets and the local mirror.
pub struct PresenceProjector {
    broker: Arc<dyn Broker>,
    mirror: DashMap<Uuid, OnlineEntry>,
}

impl PresenceProjector {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker, mirror: DashMap::new() }
    }

    /// Apply a `player-join` event.
    pub async fn apply_join(&self, player: Uuid, name: &str, server: &str) {
        self.mirror.insert(player, OnlineEntry { name: name.to_string(), server: server.to_string() });
        // Broker mutations are best-effort: a dead broker degrades presence,
        // it must not stall message handling.
        if let Err(e) = self.project_join(player, server).await {
            tracing::warn!("presence projection of join({player}) failed: {e}");
        }
    }

    async fn project_join(&self, player: Uuid, server: &str) -> Result<(), BrokerError> {
        let id = player.to_string();
        self.broker.set_add(KEY_GLOBAL_ONLINE, &id).await?;
        self.broker.set_add(&server_players_key(server), &id).await?;
        self.broker.put(&player_server_key(player), server).await
    }

    /// Apply a `player-quit` event. Only a quit from the server currently on
    /// record tears the entry down; a quit racing a newer join elsewhere must
    /// not erase that join.
    pub async fn apply_quit(&self, player: Uuid, server: &str) {
        let mirror_matches = self
            .mirror
            .get(&player)
            .map(|entry| entry.server == server)
            .unwrap_or(true);
        if mirror_matches {
            self.mirror.remove(&player);
        }
        if let Err(e) = self.project_quit(player, server).await {
            tracing::warn!("presence projection of quit({player}) failed: {e}");
        }
    }

    async fn project_quit(&self, player: Uuid, server: &str) -> Result<(), BrokerError> {
        let id = player.to_string();
        // The per-server set is scoped to the quitting server by construction.
        self.broker.set_remove(&server_players_key(server), &id).await?;
        // The global entry only goes if the player is still recorded on the
        // quitting server.
        match self.broker.get(&player_server_key(player)).await? {
            Some(recorded) if recorded == server => {
                self.broker.set_remove(KEY_GLOBAL_ONLINE, &id).await?;
                self.broker.delete(&player_server_key(player)).await
            }
            _ => Ok(()),
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    /// Whether the mirror has seen `player` come online anywhere.
    pub fn is_online(&self, player: Uuid) -> bool {
        self.mirror.contains_key(&player)
    }

    pub fn entry(&self, player: Uuid) -> Option<OnlineEntry> {
        self.mirror.get(&player).map(|entry| entry.clone())
    }

    pub fn online_count(&self) -> usize {
        self.mirror.len()
    }

    /// Authoritative (broker-held) set of everyone online.
    pub async fn globally_online(&self) -> Result<Vec<Uuid>, BrokerError> {
        let members = self.broker.set_members(KEY_GLOBAL_ONLINE).await?;
        Ok(parse_ids(members))
    }

    /// Authoritative population of one server.
    pub async fn server_population(&self, server: &str) -> Result<Vec<Uuid>, BrokerError> {
        let members = self.broker.set_members(&server_players_key(server)).await?;
        Ok(parse_ids(members))
    }

    /// Which server last recorded `player`, per the broker.
    pub async fn locate(&self, player: Uuid) -> Result<Option<String>, BrokerError> {
        self.broker.get(&player_server_key(player)).await
    }

    // ── Liveness sweep ──────────────────────────────────────────────────────

    /// Prune presence left behind by processes whose lease lapsed. Returns
    /// how many player entries were dropped.
    ///
    /// A crashed process never publishes its quits; without this, its players
    /// stay "online" network-wide forever.
    pub async fn sweep_stale(&self, own_server: &str) -> Result<usize, BrokerError> {
        let mut pruned = 0;
        for server in self.broker.set_members(KEY_SERVERS).await? {
            if server == own_server {
                continue;
            }
            if self.broker.get(&server_alive_key(&server)).await?.is_some() {
                continue; // lease still held
            }
            pruned += self.prune_server(&server).await?;
            self.broker.set_remove(KEY_SERVERS, &server).await?;
        }
        Ok(pruned)
    }

    async fn prune_server(&self, server: &str) -> Result<usize, BrokerError> {
        let key = server_players_key(server);
        let members = self.broker.set_members(&key).await?;
        let mut pruned = 0;
        for member in &members {
            self.broker.set_remove(KEY_GLOBAL_ONLINE, member).await?;
            if let Ok(player) = member.parse::<Uuid>() {
                let stale_entry = self
                    .mirror
                    .get(&player)
                    .map(|entry| entry.server == server)
                    .unwrap_or(false);
                if stale_entry {
                    self.mirror.remove(&player);
                }
                match self.broker.get(&player_server_key(player)).await? {
                    Some(recorded) if recorded == server => {
                        self.broker.delete(&player_server_key(player)).await?;
                    }
                    _ => {}
                }
            }
            pruned += 1;
        }
        self.broker.delete(&key).await?;
        if pruned > 0 {
            tracing::info!("swept {pruned} stale presence entries from dead server '{server}'");
        }
        Ok(pruned)
    }
}

fn parse_ids(members: Vec<String>) -> Vec<Uuid> {
    members
        .into_iter()
        .filter_map(|member| match member.parse() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!("non-uuid member '{member}' in presence set");
                None
            }
        })
        .collect()
}

// ── Liveness lease ──────────────────────────────────────────────────────────

/// Register `server` on the network and refresh its lease once.
pub async fn register_alive(
    broker: &dyn Broker,
    server: &str,
    ttl: Duration,
) -> Result<(), BrokerError> {
    broker.set_add(KEY_SERVERS, server).await?;
    broker.put_with_ttl(&server_alive_key(server), "1", ttl).await
}

/// Refresh this process's lease forever. Spawn once at startup.
pub fn spawn_heartbeat(
    broker: Arc<dyn Broker>,
    server: String,
    interval: Duration,
    ttl: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = register_alive(broker.as_ref(), &server, ttl).await {
                tracing::warn!("liveness heartbeat failed: {e}");
            }
            tokio::time::sleep(interval).await;
        }
    })
}

/// Periodically sweep dead servers' presence. Spawn once at startup.
pub fn spawn_sweeper(
    projector: Arc<PresenceProjector>,
    own_server: String,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(every).await;
            if let Err(e) = projector.sweep_stale(&own_server).await {
                tracing::warn!("presence sweep failed: {e}");
            }
        }
    })
}
