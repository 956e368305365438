//! Broker subscription loop and topic dispatch.
//!
//! One task per process consumes the subscription and routes each message:
//! known topics go to presence, messaging, and the arrival ledger; unknown
//! topics go to whatever handlers other subsystems registered at startup.
//! Delivery is unordered and at-most-once, and a referenced player may
//! already be gone -- every branch tolerates both.

use std::collections::HashMap;
use std::sync::Arc;

use crate::broker::{BrokerError, InboundMessage};
use crate::context::Context;
use crate::location::ServerLocation;
use crate::protocol::{self, ChannelMessage};

/// Handler for a topic outside the fixed protocol. Runs on the router task;
/// must not block.
pub trait TopicHandler: Send + Sync {
    fn handle(&self, message: &InboundMessage);
}

impl<F> TopicHandler for F
where
    F: Fn(&InboundMessage) + Send + Sync,
{
    fn handle(&self, message: &InboundMessage) {
        self(message)
    }
}

pub struct Router {
    ctx: Arc<Context>,
    extra: HashMap<String, Box<dyn TopicHandler>>,
}

impl Router {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx, extra: HashMap::new() }
    }

    /// Register a handler for a topic outside the fixed set. Call before
    /// [`Self::run`]; the registration set is fixed once the loop starts.
    pub fn register(&mut self, topic: impl Into<String>, handler: Box<dyn TopicHandler>) {
        let topic = topic.into();
        if protocol::TOPICS.contains(&topic.as_str()) {
            tracing::warn!("handler for protocol topic '{topic}' ignored; it is routed internally");
            return;
        }
        self.extra.insert(topic, handler);
    }

    /// Subscribe and dispatch until the broker subscription closes.
    pub async fn run(self) -> Result<(), BrokerError> {
        let mut topics: Vec<&str> = protocol::TOPICS.to_vec();
        topics.extend(self.extra.keys().map(String::as_str));

        let mut inbound = self.ctx.broker.subscribe(&topics).await?;
        tracing::info!("router subscribed to {} topics", topics.len());

        while let Some(message) = inbound.recv().await {
            self.dispatch(&message).await;
        }
        tracing::warn!("broker subscription closed; router stopping");
        Ok(())
    }

    async fn dispatch(&self, message: &InboundMessage) {
        match ChannelMessage::decode(message) {
            Ok(Some(known)) => self.apply(known).await,
            Ok(None) => match self.extra.get(&message.topic) {
                Some(handler) => handler.handle(message),
                None => tracing::debug!("ignoring message on unhandled topic '{}'", message.topic),
            },
            Err(e) => tracing::warn!("dropping malformed message: {e}"),
        }
    }

    async fn apply(&self, message: ChannelMessage) {
        let ctx = &self.ctx;
        match message {
            ChannelMessage::PlayerJoin { player_id, name, server } => {
                ctx.presence.apply_join(player_id, &name, &server).await;
            }
            ChannelMessage::PlayerQuit { player_id, server } => {
                ctx.presence.apply_quit(player_id, &server).await;
            }
            ChannelMessage::Teleport { player_id, target_server, location } => {
                if target_server != ctx.config.server_name {
                    return; // someone else's handoff
                }
                let destination = match location.parse::<ServerLocation>() {
                    Ok(destination) => destination,
                    Err(e) => {
                        tracing::warn!("unusable teleport intent for {player_id}: {e}");
                        return;
                    }
                };
                // The connection transfer races the broker: the player may
                // already be here, or still in flight.
                if ctx.sessions.is_connected(player_id) {
                    if let Err(e) = ctx.handoff.deliver_arrival(player_id, &destination).await {
                        tracing::warn!("inbound teleport for {player_id} failed: {e}");
                    }
                } else {
                    ctx.arrivals.record(player_id, destination);
                }
            }
            ChannelMessage::PrivateMessage { from_id, from_name, to_id, message } => {
                ctx.messaging.deliver_private(from_id, &from_name, to_id, &message);
            }
            ChannelMessage::Broadcast { message, permission, origin } => {
                if origin == ctx.config.server_name {
                    return; // our own publish; local players were already delivered
                }
                ctx.messaging.deliver_broadcast(&message, permission.as_deref());
            }
        }
    }
}
