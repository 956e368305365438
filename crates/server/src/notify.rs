//! Outbound player notifications.
//!
//! Rendering chat is the host engine's business; this subsystem only decides
//! that a notification happens and what it says.

use uuid::Uuid;

/// What a player is told.
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    WarmupStarted { seconds: u64 },
    TeleportCancelled,
    TeleportComplete,
    MessageFailed,
    PrivateMessage { from_name: String, body: String },
    Broadcast { body: String },
}

/// Delivery port for notifications to locally connected players. Deliveries
/// to players who are not connected here are silently dropped.
pub trait Notifier: Send + Sync {
    fn notify(&self, player: Uuid, notification: Notification);
}

/// Default notifier: writes notifications to the log. Hosts replace this with
/// real chat delivery.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, player: Uuid, notification: Notification) {
        tracing::info!("notify {player}: {notification:?}");
    }
}
