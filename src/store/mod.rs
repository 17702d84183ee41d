mod memory;

use crate::domain::{ActiveLocationRecord, LiveSnapshot};
use async_trait::async_trait;
use std::fmt::Debug;
use thiserror::Error;
use tokio::sync::watch::Receiver;

pub use memory::InMemoryStore;

/// Path under which the live records are kept, one child per agent.
pub const ACTIVE_SHOWINGS_PATH: &str = "active_showings";

#[async_trait]
pub trait LocationStore: Debug + Send + Sync {
    /// Overwrites the whole record stored under the record's agent id.
    async fn set(&self, record: ActiveLocationRecord) -> Result<(), StoreError>;

    /// Deletes the record of an agent, a missing record is not an error.
    async fn remove(&self, agent_id: &str) -> Result<(), StoreError>;

    fn watch(&self) -> Receiver<LiveSnapshot>;
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("'{0}' is not a valid key")]
    InvalidKey(String),
    #[error("invalid database url '{0}'")]
    InvalidUrl(String),
}
