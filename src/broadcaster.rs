use crate::domain::{ActiveLocationRecord, GeoLocation};
use crate::identity::IdentityProvider;
use crate::store::{LocationStore, StoreError};
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Publishes the position of the signed-in agent to the shared store.
#[derive(Debug)]
pub struct Broadcaster {
    store: Arc<dyn LocationStore>,
    identity: Arc<dyn IdentityProvider>,
    last_timestamp: AtomicI64,
}

impl Broadcaster {
    pub fn new(store: Arc<dyn LocationStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Broadcaster {
            store,
            identity,
            last_timestamp: AtomicI64::new(i64::MIN),
        }
    }

    /// Publishes the first fix of a tracking session.
    #[instrument(skip(self, location))]
    pub async fn start_broadcast(&self, showing_id: &str, location: GeoLocation) -> Result<ActiveLocationRecord, BroadcastError> {
        let record = self.publish(showing_id, location).await?;
        info!(agent_id = record.agent_id, "📍 Started broadcasting for showing '{}'", showing_id);
        Ok(record)
    }

    /// Publishes a subsequent fix, the write is the same as [`Broadcaster::start_broadcast`].
    #[instrument(skip(self, location))]
    pub async fn update_position(&self, showing_id: &str, location: GeoLocation) -> Result<ActiveLocationRecord, BroadcastError> {
        let record = self.publish(showing_id, location).await?;
        debug!(agent_id = record.agent_id, "📍 Updated position to ({}, {})", record.latitude, record.longitude);
        Ok(record)
    }

    #[instrument(skip(self))]
    pub async fn stop_broadcast(&self) -> Result<(), BroadcastError> {
        let agent_id = self.agent_id()?;
        self.store.remove(&agent_id).await?;
        info!(agent_id, "📍 Stopped broadcasting");
        Ok(())
    }

    async fn publish(&self, showing_id: &str, location: GeoLocation) -> Result<ActiveLocationRecord, BroadcastError> {
        let agent_id = self.agent_id()?;
        if showing_id.trim().is_empty() {
            return Err(BroadcastError::InvalidShowing);
        }

        let record = ActiveLocationRecord::new(agent_id, showing_id, location, self.next_timestamp());
        self.store.set(record.clone()).await?;
        Ok(record)
    }

    fn agent_id(&self) -> Result<String, BroadcastError> {
        self.identity.current_agent_id().ok_or(BroadcastError::Unauthenticated)
    }

    // Never lower than a timestamp handed out before, even if the wall clock steps back
    fn next_timestamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let previous = self.last_timestamp.fetch_max(now, Ordering::SeqCst);
        previous.max(now)
    }
}

#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("agent is not authenticated")]
    Unauthenticated,
    #[error("a showing id is required to broadcast a location")]
    InvalidShowing,
    #[error(transparent)]
    Store(#[from] StoreError),
}
