//! Wire contract between processes: fixed topics carrying flat JSON payloads.
//!
//! Every payload is a flat JSON object with camelCase keys. A consumer that
//! does not recognize a topic ignores it, so other subsystems can put their
//! own topics on the broker without touching this enum; within the fixed set,
//! the enum keeps dispatch exhaustive at compile time.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::broker::InboundMessage;

pub const TOPIC_TELEPORT: &str = "teleport";
pub const TOPIC_PRIVATE_MESSAGE: &str = "private-message";
pub const TOPIC_PLAYER_JOIN: &str = "player-join";
pub const TOPIC_PLAYER_QUIT: &str = "player-quit";
pub const TOPIC_BROADCAST: &str = "broadcast";
pub const TOPIC_STAFF_BROADCAST: &str = "staff-broadcast";

/// Every topic the coordination subsystem subscribes to.
pub const TOPICS: [&str; 6] = [
    TOPIC_TELEPORT,
    TOPIC_PRIVATE_MESSAGE,
    TOPIC_PLAYER_JOIN,
    TOPIC_PLAYER_QUIT,
    TOPIC_BROADCAST,
    TOPIC_STAFF_BROADCAST,
];

#[derive(Debug, thiserror::Error)]
#[error("malformed payload on '{topic}': {source}")]
pub struct ProtocolError {
    pub topic: String,
    #[source]
    pub source: serde_json::Error,
}

/// One message on the wire, one variant per known topic.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelMessage {
    /// Cross-server teleport intent. Applied only by the process whose name
    /// equals `target_server`, once the player's connection arrives there.
    Teleport {
        player_id: Uuid,
        target_server: String,
        location: String,
    },
    PrivateMessage {
        from_id: Uuid,
        from_name: String,
        to_id: Uuid,
        message: String,
    },
    PlayerJoin {
        player_id: Uuid,
        name: String,
        server: String,
    },
    PlayerQuit {
        player_id: Uuid,
        server: String,
    },
    /// Network-wide broadcast, optionally gated by a permission. `origin`
    /// names the publishing server so it can skip its own round-trip copy;
    /// local players are delivered at send time, exactly once.
    Broadcast {
        message: String,
        permission: Option<String>,
        origin: String,
    },
}

// ── Payload shapes (the wire format, camelCase) ─────────────────────────────

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeleportPayload {
    player_id: Uuid,
    target_server: String,
    location: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrivateMessagePayload {
    from_id: Uuid,
    from_name: String,
    to_id: Uuid,
    message: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerJoinPayload {
    player_id: Uuid,
    name: String,
    server: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerQuitPayload {
    player_id: Uuid,
    server: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BroadcastPayload {
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    permission: Option<String>,
    #[serde(default)]
    origin: String,
}

impl ChannelMessage {
    /// The topic this message is published on.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Teleport { .. } => TOPIC_TELEPORT,
            Self::PrivateMessage { .. } => TOPIC_PRIVATE_MESSAGE,
            Self::PlayerJoin { .. } => TOPIC_PLAYER_JOIN,
            Self::PlayerQuit { .. } => TOPIC_PLAYER_QUIT,
            Self::Broadcast { permission: Some(_), .. } => TOPIC_STAFF_BROADCAST,
            Self::Broadcast { permission: None, .. } => TOPIC_BROADCAST,
        }
    }

    /// Serialize to the flat JSON payload for [`Self::topic`].
    pub fn encode(&self) -> String {
        let encoded = match self.clone() {
            Self::Teleport { player_id, target_server, location } => {
                serde_json::to_string(&TeleportPayload { player_id, target_server, location })
            }
            Self::PrivateMessage { from_id, from_name, to_id, message } => {
                serde_json::to_string(&PrivateMessagePayload { from_id, from_name, to_id, message })
            }
            Self::PlayerJoin { player_id, name, server } => {
                serde_json::to_string(&PlayerJoinPayload { player_id, name, server })
            }
            Self::PlayerQuit { player_id, server } => {
                serde_json::to_string(&PlayerQuitPayload { player_id, server })
            }
            Self::Broadcast { message, permission, origin } => {
                serde_json::to_string(&BroadcastPayload { message, permission, origin })
            }
        };
        encoded.expect("flat payload serializes")
    }

    /// Decode an inbound broker message. `Ok(None)` means the topic is not
    /// part of this protocol and belongs to whoever registered it.
    pub fn decode(message: &InboundMessage) -> Result<Option<Self>, ProtocolError> {
        let malformed = |source| ProtocolError { topic: message.topic.clone(), source };
        let decoded = match message.topic.as_str() {
            TOPIC_TELEPORT => {
                let p: TeleportPayload = serde_json::from_str(&message.payload).map_err(malformed)?;
                Self::Teleport {
                    player_id: p.player_id,
                    target_server: p.target_server,
                    location: p.location,
                }
            }
            TOPIC_PRIVATE_MESSAGE => {
                let p: PrivateMessagePayload =
                    serde_json::from_str(&message.payload).map_err(malformed)?;
                Self::PrivateMessage {
                    from_id: p.from_id,
                    from_name: p.from_name,
                    to_id: p.to_id,
                    message: p.message,
                }
            }
            TOPIC_PLAYER_JOIN => {
                let p: PlayerJoinPayload =
                    serde_json::from_str(&message.payload).map_err(malformed)?;
                Self::PlayerJoin { player_id: p.player_id, name: p.name, server: p.server }
            }
            TOPIC_PLAYER_QUIT => {
                let p: PlayerQuitPayload =
                    serde_json::from_str(&message.payload).map_err(malformed)?;
                Self::PlayerQuit { player_id: p.player_id, server: p.server }
            }
            TOPIC_BROADCAST | TOPIC_STAFF_BROADCAST => {
                let p: BroadcastPayload =
                    serde_json::from_str(&message.payload).map_err(malformed)?;
                Self::Broadcast { message: p.message, permission: p.permission, origin: p.origin }
            }
            _ => return Ok(None),
        };
        Ok(Some(decoded))
    }
}
