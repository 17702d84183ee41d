use crate::domain::{ActiveLocationRecord, LiveMap, LiveSnapshot};
use crate::store::{LocationStore, StoreError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, instrument};

#[derive(Debug)]
pub struct InMemoryStore {
    notifier_tx: watch::Sender<LiveSnapshot>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (notifier_tx, _) = watch::channel::<LiveSnapshot>(Some(Arc::new(LiveMap::new())));
        InMemoryStore { notifier_tx }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocationStore for InMemoryStore {
    #[instrument(skip_all, fields(agent_id = %record.agent_id))]
    async fn set(&self, record: ActiveLocationRecord) -> Result<(), StoreError> {
        self.notifier_tx.send_modify(|snapshot| {
            let mut live = snapshot.as_deref().cloned().unwrap_or_default();
            live.insert(record.agent_id.clone(), record);
            *snapshot = Some(Arc::new(live));
        });
        debug!("🔵 Stored record");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, agent_id: &str) -> Result<(), StoreError> {
        let removed = self.notifier_tx.send_if_modified(|snapshot| {
            let Some(live) = snapshot.as_deref() else {
                return false;
            };
            if !live.contains_key(agent_id) {
                return false;
            }

            let mut live = live.clone();
            live.remove(agent_id);
            *snapshot = Some(Arc::new(live));
            true
        });
        debug!(removed, "🔵 Removed record");
        Ok(())
    }

    fn watch(&self) -> watch::Receiver<LiveSnapshot> {
        self.notifier_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GeoLocation;
    use pretty_assertions::assert_eq;
    use test_log::test;

    fn record(agent_id: &str, latitude: f64) -> ActiveLocationRecord {
        ActiveLocationRecord::new(agent_id, "showing-42", GeoLocation::new(latitude, 4.35).unwrap(), 1_000)
    }

    fn live(store: &InMemoryStore) -> LiveMap {
        store.watch().borrow().as_deref().cloned().unwrap_or_default()
    }

    #[test(tokio::test)]
    async fn starts_synchronised_with_an_empty_set() {
        let store = InMemoryStore::new();

        assert_eq!(*store.watch().borrow(), Some(Arc::new(LiveMap::new())));
    }

    #[test(tokio::test)]
    async fn set_overwrites_the_record_of_the_same_agent() -> Result<(), StoreError> {
        let store = InMemoryStore::new();

        store.set(record("agent-1", 51.0)).await?;
        store.set(record("agent-1", 52.0)).await?;

        let live = live(&store);
        assert_eq!(live.len(), 1);
        assert_eq!(live["agent-1"], record("agent-1", 52.0));
        Ok(())
    }

    #[test(tokio::test)]
    async fn remove_of_an_absent_agent_does_not_notify() -> Result<(), StoreError> {
        let store = InMemoryStore::new();
        store.set(record("agent-1", 51.0)).await?;
        let mut rx = store.watch();
        rx.borrow_and_update();

        store.remove("agent-2").await?;

        assert!(!rx.has_changed().unwrap());
        assert_eq!(live(&store).len(), 1);
        Ok(())
    }

    #[test(tokio::test)]
    async fn remove_deletes_only_the_given_agent() -> Result<(), StoreError> {
        let store = InMemoryStore::new();
        store.set(record("agent-1", 51.0)).await?;
        store.set(record("agent-2", 52.0)).await?;
        let mut rx = store.watch();
        rx.borrow_and_update();

        store.remove("agent-1").await?;

        assert!(rx.has_changed().unwrap());
        let live = live(&store);
        assert!(!live.contains_key("agent-1"));
        assert!(live.contains_key("agent-2"));
        Ok(())
    }
}
