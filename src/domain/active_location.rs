use crate::domain::GeoLocation;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Live set of broadcasting agents, keyed by agent id.
pub type LiveMap = HashMap<String, ActiveLocationRecord>;

/// What a store publishes to its watchers. `None` until the store has synchronised with its backend.
pub type LiveSnapshot = Option<Arc<LiveMap>>;

/// Position of an agent that is currently in showing mode.
///
/// The agent id doubles as the key of the record, an agent never has more than one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveLocationRecord {
    pub agent_id: String,
    pub showing_id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Sample time in milliseconds since the epoch
    pub timestamp: i64,
}

impl ActiveLocationRecord {
    pub fn new(agent_id: impl Into<String>, showing_id: impl Into<String>, location: GeoLocation, timestamp: i64) -> Self {
        ActiveLocationRecord {
            agent_id: agent_id.into(),
            showing_id: showing_id.into(),
            latitude: location.latitude,
            longitude: location.longitude,
            timestamp,
        }
    }

    pub fn location(&self) -> GeoLocation {
        GeoLocation {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    /// Time elapsed since the sample was taken, zero for samples from the future.
    pub fn age(&self, now_ms: i64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.timestamp).max(0) as u64)
    }

    pub fn is_stale(&self, now_ms: i64, max_age: Duration) -> bool {
        self.age(now_ms) > max_age
    }
}
