//! Broker port: publish/subscribe plus shared sets and keys.
//!
//! The network's shared state (who is online, where, and in-flight teleports)
//! lives behind this trait. Delivery is at-most-once and unordered across
//! topics; nothing here is transactional. Implementations must deliver a
//! process's own publishes back to its own subscriptions -- presence is
//! derived from received events, our own included.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod memory;
pub mod redis;

pub use memory::MemoryBroker;
pub use redis::RedisBroker;

/// A message delivered from a subscription.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    Connection(String),
    #[error("broker command failed: {0}")]
    Command(String),
    #[error("broker call timed out")]
    TimedOut,
}

/// Publish/subscribe plus the set and key/value primitives presence needs.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError>;

    /// Subscribe to `topics`. Messages arrive on the returned channel until
    /// the receiver is dropped.
    async fn subscribe(&self, topics: &[&str]) -> Result<mpsc::Receiver<InboundMessage>, BrokerError>;

    async fn set_add(&self, key: &str, member: &str) -> Result<(), BrokerError>;
    async fn set_remove(&self, key: &str, member: &str) -> Result<(), BrokerError>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>, BrokerError>;
    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, BrokerError>;

    async fn put(&self, key: &str, value: &str) -> Result<(), BrokerError>;
    async fn put_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BrokerError>;
    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError>;
    async fn delete(&self, key: &str) -> Result<(), BrokerError>;
}

/// Wraps another broker so no call can outlive `limit`. A hung broker turns
/// into `TimedOut` errors and the process keeps running local-only.
pub struct TimedBroker<B> {
    inner: B,
    limit: Duration,
}

impl<B: Broker> TimedBroker<B> {
    pub fn new(inner: B, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

async fn timed<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, BrokerError>> + Send,
) -> Result<T, BrokerError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(BrokerError::TimedOut),
    }
}

#[async_trait]
impl<B: Broker> Broker for TimedBroker<B> {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        timed(self.limit, self.inner.publish(topic, payload)).await
    }

    async fn subscribe(&self, topics: &[&str]) -> Result<mpsc::Receiver<InboundMessage>, BrokerError> {
        // Only the handshake is bounded; an open subscription is meant to
        // idle indefinitely.
        timed(self.limit, self.inner.subscribe(topics)).await
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), BrokerError> {
        timed(self.limit, self.inner.set_add(key, member)).await
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), BrokerError> {
        timed(self.limit, self.inner.set_remove(key, member)).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, BrokerError> {
        timed(self.limit, self.inner.set_members(key)).await
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, BrokerError> {
        timed(self.limit, self.inner.set_contains(key, member)).await
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), BrokerError> {
        timed(self.limit, self.inner.put(key, value)).await
    }

    async fn put_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BrokerError> {
        timed(self.limit, self.inner.put_with_ttl(key, value, ttl)).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError> {
        timed(self.limit, self.inner.get(key)).await
    }

    async fn delete(&self, key: &str) -> Result<(), BrokerError> {
        timed(self.limit, self.inner.delete(key)).await
    }
}
