//! Player-to-player messages and network-wide broadcasts.

use std::sync::Arc;

use uuid::Uuid;

use crate::broker::Broker;
use crate::notify::{Notification, Notifier};
use crate::presence::PresenceProjector;
use crate::protocol::ChannelMessage;
use crate::session::SessionRegistry;

pub struct Messaging {
    server_name: String,
    broker: Arc<dyn Broker>,
    sessions: Arc<SessionRegistry>,
    presence: Arc<PresenceProjector>,
    notifier: Arc<dyn Notifier>,
}

impl Messaging {
    pub fn new(
        server_name: String,
        broker: Arc<dyn Broker>,
        sessions: Arc<SessionRegistry>,
        presence: Arc<PresenceProjector>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { server_name, broker, sessions, presence, notifier }
    }

    /// Send a private message. Failure is reported to the sender as a single
    /// "message failed" notification, whether the target is offline or the
    /// broker is down.
    pub async fn send_private(&self, from: Uuid, to: Uuid, body: &str) {
        let from_name = self.sessions.name_of(from).unwrap_or_else(|| from.to_string());

        // Local fast path: both players on this process, no broker involved.
        if self.sessions.is_connected(to) {
            self.deliver_private(from, &from_name, to, body);
            return;
        }
        if !self.presence.is_online(to) {
            self.notifier.notify(from, Notification::MessageFailed);
            return;
        }
        let message = ChannelMessage::PrivateMessage {
            from_id: from,
            from_name,
            to_id: to,
            message: body.to_string(),
        };
        if let Err(e) = self.broker.publish(message.topic(), &message.encode()).await {
            tracing::warn!("private message publish failed: {e}");
            self.notifier.notify(from, Notification::MessageFailed);
        }
    }

    /// Deliver an inbound private message if the target is connected here;
    /// otherwise it is someone else's (or a racing quit's) and is ignored.
    pub fn deliver_private(&self, from: Uuid, from_name: &str, to: Uuid, body: &str) {
        if !self.sessions.is_connected(to) {
            return;
        }
        self.sessions.set_last_sender(to, from);
        self.notifier.notify(
            to,
            Notification::PrivateMessage { from_name: from_name.to_string(), body: body.to_string() },
        );
    }

    /// Reply to whoever messaged `from` last.
    pub async fn reply(&self, from: Uuid, body: &str) {
        match self.sessions.reply_target(from) {
            Some(to) => self.send_private(from, to, body).await,
            None => self.notifier.notify(from, Notification::MessageFailed),
        }
    }

    /// Broadcast to the whole network, optionally gated by a permission.
    /// Local players are delivered here and now; the publish covers every
    /// other process, which delivers to its own players independently.
    pub async fn broadcast(&self, body: &str, permission: Option<&str>) {
        self.deliver_broadcast(body, permission);
        let message = ChannelMessage::Broadcast {
            message: body.to_string(),
            permission: permission.map(Into::into),
            origin: self.server_name.clone(),
        };
        if let Err(e) = self.broker.publish(message.topic(), &message.encode()).await {
            tracing::warn!("broadcast publish failed: {e}; delivered locally only");
        }
    }

    /// Deliver a broadcast to locally connected holders of `permission`
    /// (everyone, if no permission is required).
    pub fn deliver_broadcast(&self, body: &str, permission: Option<&str>) {
        for session in self.sessions.snapshot() {
            let allowed = permission
                .map(|required| session.permissions.contains(required))
                .unwrap_or(true);
            if allowed {
                self.notifier
                    .notify(session.id, Notification::Broadcast { body: body.to_string() });
            }
        }
    }
}
