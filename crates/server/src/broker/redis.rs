//! Redis-backed broker: pub/sub channels for messages, sets and plain keys
//! for shared presence state.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::mpsc;

use super::{Broker, BrokerError, InboundMessage};

/// Capacity of each subscription channel.
const SUBSCRIPTION_CAPACITY: usize = 256;

pub struct RedisBroker {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisBroker {
    /// Connect to `url` (`redis://host:port`). Commands share one managed
    /// connection that reconnects on its own; each subscription opens a
    /// dedicated pub/sub connection.
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(url)
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        Ok(Self { client, conn })
    }
}

fn command_error(e: redis::RedisError) -> BrokerError {
    BrokerError::Command(e.to_string())
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(topic, payload).await.map_err(command_error)
    }

    async fn subscribe(&self, topics: &[&str]) -> Result<mpsc::Receiver<InboundMessage>, BrokerError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        for topic in topics {
            pubsub.subscribe(*topic).await.map_err(command_error)?;
        }

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(message) = stream.next().await {
                let topic = message.get_channel_name().to_string();
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!("dropping non-text payload on '{topic}': {e}");
                        continue;
                    }
                };
                if tx.send(InboundMessage { topic, payload }).await.is_err() {
                    break; // subscriber went away
                }
            }
            tracing::warn!("redis subscription stream ended");
        });
        Ok(rx)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(key, member).await.map_err(command_error)
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(key, member).await.map_err(command_error)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, BrokerError> {
        let mut conn = self.conn.clone();
        conn.smembers::<_, Vec<String>>(key).await.map_err(command_error)
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, BrokerError> {
        let mut conn = self.conn.clone();
        conn.sismember::<_, _, bool>(key, member).await.map_err(command_error)
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await.map_err(command_error)
    }

    async fn put_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        // SETEX truncates to whole seconds; sub-second leases are not a thing here.
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, seconds).await.map_err(command_error)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<String>>(key).await.map_err(command_error)
    }

    async fn delete(&self, key: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(command_error)
    }
}
