//! In-process loopback broker.
//!
//! Backs tests and broker-less single-server deployments. Clones share state,
//! so two contexts handed clones of one `MemoryBroker` behave like two
//! processes talking through one Redis.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use super::{Broker, BrokerError, InboundMessage};

/// Capacity of the internal fan-out channel and of each subscription.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

struct Inner {
    sets: Mutex<HashMap<String, HashSet<String>>>,
    values: Mutex<HashMap<String, StoredValue>>,
    bus: broadcast::Sender<InboundMessage>,
}

struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn live(&self) -> bool {
        self.expires_at.map(|at| Instant::now() < at).unwrap_or(true)
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                sets: Mutex::new(HashMap::new()),
                values: Mutex::new(HashMap::new()),
                bus,
            }),
        }
    }

    fn sets(&self) -> std::sync::MutexGuard<'_, HashMap<String, HashSet<String>>> {
        self.inner.sets.lock().expect("memory broker sets poisoned")
    }

    fn values(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredValue>> {
        self.inner.values.lock().expect("memory broker values poisoned")
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        // No subscribers is not an error; at-most-once means lost is legal.
        let _ = self.inner.bus.send(InboundMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    async fn subscribe(&self, topics: &[&str]) -> Result<mpsc::Receiver<InboundMessage>, BrokerError> {
        let wanted: HashSet<String> = topics.iter().map(|t| t.to_string()).collect();
        let mut bus = self.inner.bus.subscribe();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            loop {
                match bus.recv().await {
                    Ok(message) => {
                        if !wanted.contains(&message.topic) {
                            continue;
                        }
                        if tx.send(message).await.is_err() {
                            break; // subscriber went away
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("memory broker subscription dropped {n} messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(rx)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), BrokerError> {
        self.sets().entry(key.to_string()).or_default().insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), BrokerError> {
        if let Some(set) = self.sets().get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, BrokerError> {
        Ok(self
            .sets()
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, BrokerError> {
        Ok(self.sets().get(key).map(|set| set.contains(member)).unwrap_or(false))
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), BrokerError> {
        self.values().insert(
            key.to_string(),
            StoredValue { value: value.to_string(), expires_at: None },
        );
        Ok(())
    }

    async fn put_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BrokerError> {
        self.values().insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError> {
        let mut values = self.values();
        match values.get(key) {
            Some(stored) if stored.live() => Ok(Some(stored.value.clone())),
            Some(_) => {
                // Lazy expiry, the way Redis does it on read.
                values.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), BrokerError> {
        self.values().remove(key);
        self.sets().remove(key);
        Ok(())
    }
}
