//! Last-location persistence port.
//!
//! A player's final position is saved when they disconnect and outlives the
//! session, so a later connect (or an operator query) can find it.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::broker::{Broker, BrokerError};
use crate::location::{LocationParseError, ServerLocation};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error("stored location is malformed: {0}")]
    Corrupt(#[from] LocationParseError),
}

/// Async store for a player's last known location.
#[async_trait]
pub trait PlayerStore: Send + Sync {
    async fn save_location(&self, player: Uuid, location: &ServerLocation) -> Result<(), StoreError>;
    async fn load_location(&self, player: Uuid) -> Result<Option<ServerLocation>, StoreError>;
    async fn clear(&self, player: Uuid) -> Result<(), StoreError>;
}

fn last_location_key(player: Uuid) -> String {
    format!("player:{player}:last-location")
}

/// Store over the broker's key/value surface, using the delimited
/// [`ServerLocation`] serialization both ways.
pub struct BrokerPlayerStore {
    broker: Arc<dyn Broker>,
}

impl BrokerPlayerStore {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl PlayerStore for BrokerPlayerStore {
    async fn save_location(&self, player: Uuid, location: &ServerLocation) -> Result<(), StoreError> {
        self.broker
            .put(&last_location_key(player), &location.to_string())
            .await
            .map_err(StoreError::from)
    }

    async fn load_location(&self, player: Uuid) -> Result<Option<ServerLocation>, StoreError> {
        match self.broker.get(&last_location_key(player)).await? {
            Some(raw) => Ok(Some(raw.parse()?)),
            None => Ok(None),
        }
    }

    async fn clear(&self, player: Uuid) -> Result<(), StoreError> {
        self.broker.delete(&last_location_key(player)).await.map_err(StoreError::from)
    }
}
