use crate::domain::{ActiveLocationRecord, LiveMap};
use crate::store::LocationStore;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span};

/// Push-based read side of the live set.
///
/// Subscriptions run as tasks on the current tokio runtime, every method must be called from within it.
#[derive(Debug, Clone)]
pub struct Subscriber {
    store: Arc<dyn LocationStore>,
}

impl Subscriber {
    pub fn new(store: Arc<dyn LocationStore>) -> Self {
        Subscriber { store }
    }

    /// Delivers the complete live set once on attach and again after every change.
    pub fn subscribe_all<F>(&self, mut callback: F) -> Subscription
    where
        F: FnMut(&LiveMap) + Send + 'static,
    {
        let mut rx = self.store.watch();
        let handle = tokio::spawn(
            async move {
                loop {
                    let snapshot = rx.borrow_and_update().clone();
                    if let Some(live) = snapshot {
                        callback(live.as_ref());
                    }

                    if rx.changed().await.is_err() {
                        debug!("Store closed, ending subscription");
                        break;
                    }
                }
            }
            .instrument(info_span!("subscribe_all")),
        );

        Subscription { handle }
    }

    /// Delivers the record of a single agent, or `None` while that agent is not live.
    ///
    /// Fires once on attach and then only when the agent's record changes.
    pub fn subscribe_one<F>(&self, agent_id: impl Into<String>, mut callback: F) -> Subscription
    where
        F: FnMut(Option<&ActiveLocationRecord>) + Send + 'static,
    {
        let agent_id = agent_id.into();
        let mut rx = self.store.watch();
        let span = info_span!("subscribe_one", agent_id = %agent_id);
        let handle = tokio::spawn(
            async move {
                let mut delivered: Option<Option<ActiveLocationRecord>> = None;
                loop {
                    let snapshot = rx.borrow_and_update().clone();
                    if let Some(live) = snapshot {
                        let current = live.get(&agent_id).cloned();
                        if delivered.as_ref() != Some(&current) {
                            callback(current.as_ref());
                            delivered = Some(current);
                        }
                    }

                    if rx.changed().await.is_err() {
                        debug!("Store closed, ending subscription");
                        break;
                    }
                }
            }
            .instrument(span),
        );

        Subscription { handle }
    }
}

/// Handle to a running subscription. Dropping it unsubscribes as well.
#[derive(Debug)]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    /// Stops further deliveries and releases the store watch. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        self.handle.abort();
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::{BroadcastError, Broadcaster};
    use crate::domain::GeoLocation;
    use crate::identity::StaticIdentity;
    use crate::store::InMemoryStore;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use test_log::test;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(1);

    fn location(latitude: f64, longitude: f64) -> GeoLocation {
        GeoLocation::new(latitude, longitude).unwrap()
    }

    fn broadcaster(store: &Arc<InMemoryStore>, agent_id: &str) -> Broadcaster {
        Broadcaster::new(store.clone(), Arc::new(StaticIdentity::signed_in(agent_id)))
    }

    fn collect_all(subscriber: &Subscriber) -> (Subscription, mpsc::UnboundedReceiver<LiveMap>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = subscriber.subscribe_all(move |live| {
            let _ = tx.send(live.clone());
        });
        (subscription, rx)
    }

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        timeout(WAIT, rx.recv()).await.expect("timed out waiting for a delivery").expect("subscription ended")
    }

    /// Waits until a delivery satisfies `predicate`, the watch channel may coalesce intermediate values.
    async fn next_matching<T>(rx: &mut mpsc::UnboundedReceiver<T>, predicate: impl Fn(&T) -> bool) -> T {
        loop {
            let value = next(rx).await;
            if predicate(&value) {
                return value;
            }
        }
    }

    #[test(tokio::test)]
    async fn subscribe_all_delivers_an_empty_set_when_nobody_is_live() {
        let subscriber = Subscriber::new(Arc::new(InMemoryStore::new()));

        let (_subscription, mut rx) = collect_all(&subscriber);

        assert_eq!(next(&mut rx).await, LiveMap::new());
    }

    #[test(tokio::test)]
    async fn subscribe_all_delivers_every_live_agent_on_attach() -> Result<(), BroadcastError> {
        let store = Arc::new(InMemoryStore::new());
        broadcaster(&store, "a1").start_broadcast("showing-1", location(1.0, 1.0)).await?;
        broadcaster(&store, "a2").start_broadcast("showing-2", location(2.0, 2.0)).await?;
        let subscriber = Subscriber::new(store);

        let (_subscription, mut rx) = collect_all(&subscriber);

        let live = next(&mut rx).await;
        assert_eq!(live.len(), 2);
        assert_eq!(live["a1"].showing_id, "showing-1");
        assert_eq!(live["a2"].showing_id, "showing-2");
        Ok(())
    }

    #[test(tokio::test)]
    async fn subscribe_all_reflects_deletes() -> Result<(), BroadcastError> {
        let store = Arc::new(InMemoryStore::new());
        let a1 = broadcaster(&store, "a1");
        a1.start_broadcast("showing-1", location(1.0, 1.0)).await?;
        broadcaster(&store, "a2").start_broadcast("showing-2", location(2.0, 2.0)).await?;
        let subscriber = Subscriber::new(store);
        let (_subscription, mut rx) = collect_all(&subscriber);
        assert_eq!(next(&mut rx).await.len(), 2);

        a1.stop_broadcast().await?;

        let live = next_matching(&mut rx, |live| !live.contains_key("a1")).await;
        assert!(live.contains_key("a2"));
        Ok(())
    }

    #[test(tokio::test)]
    async fn subscriber_follows_a_whole_showing_session() -> Result<(), BroadcastError> {
        let store = Arc::new(InMemoryStore::new());
        let agent = broadcaster(&store, "agent-1");
        let subscriber = Subscriber::new(store);
        let (_subscription, mut rx) = collect_all(&subscriber);
        assert_eq!(next(&mut rx).await, LiveMap::new());

        let before = Utc::now().timestamp_millis();
        agent.start_broadcast("showing-42", location(37.77, -122.41)).await?;
        let after = Utc::now().timestamp_millis();

        let live = next_matching(&mut rx, |live| live.contains_key("agent-1")).await;
        let started = live["agent-1"].clone();
        assert_eq!(live.len(), 1);
        assert_eq!(started.agent_id, "agent-1");
        assert_eq!(started.showing_id, "showing-42");
        assert_eq!(started.location(), location(37.77, -122.41));
        assert!(started.timestamp >= before && started.timestamp <= after);

        agent.update_position("showing-42", location(37.78, -122.42)).await?;

        let live = next_matching(&mut rx, |live| live.get("agent-1").is_some_and(|r| r.latitude == 37.78)).await;
        let updated = &live["agent-1"];
        assert_eq!(updated.location(), location(37.78, -122.42));
        assert!(updated.timestamp >= started.timestamp);

        agent.stop_broadcast().await?;

        let live = next_matching(&mut rx, |live| !live.contains_key("agent-1")).await;
        assert!(live.is_empty());
        Ok(())
    }

    #[test(tokio::test)]
    async fn subscribe_one_delivers_none_then_the_record_then_none() -> Result<(), BroadcastError> {
        let store = Arc::new(InMemoryStore::new());
        let agent = broadcaster(&store, "agent-1");
        let subscriber = Subscriber::new(store);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = subscriber.subscribe_one("agent-1", move |record| {
            let _ = tx.send(record.cloned());
        });

        assert_eq!(next(&mut rx).await, None);

        let record = agent.start_broadcast("showing-42", location(37.77, -122.41)).await?;
        assert_eq!(next(&mut rx).await, Some(record));

        agent.stop_broadcast().await?;
        assert_eq!(next(&mut rx).await, None);
        Ok(())
    }

    #[test(tokio::test)]
    async fn subscribe_one_ignores_changes_of_other_agents() -> Result<(), BroadcastError> {
        let store = Arc::new(InMemoryStore::new());
        let other = broadcaster(&store, "agent-2");
        let subscriber = Subscriber::new(store);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = subscriber.subscribe_one("agent-1", move |record| {
            let _ = tx.send(record.cloned());
        });
        assert_eq!(next(&mut rx).await, None);

        other.start_broadcast("showing-2", location(2.0, 2.0)).await?;
        other.update_position("showing-2", location(2.5, 2.5)).await?;

        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
        Ok(())
    }

    #[test(tokio::test)]
    async fn unsubscribe_stops_deliveries_and_is_idempotent() -> Result<(), BroadcastError> {
        let store = Arc::new(InMemoryStore::new());
        let agent = broadcaster(&store, "agent-1");
        let subscriber = Subscriber::new(store);
        let (subscription, mut rx) = collect_all(&subscriber);
        next(&mut rx).await;

        subscription.unsubscribe();
        subscription.unsubscribe();
        agent.start_broadcast("showing-1", location(1.0, 1.0)).await?;

        // The sender lives in the aborted task, so the channel closes once the task is gone
        assert_eq!(timeout(WAIT, rx.recv()).await.expect("channel was not closed"), None);
        assert!(!subscription.is_active());
        Ok(())
    }

    #[test(tokio::test)]
    async fn unsubscribe_before_the_first_delivery_releases_the_watch() {
        let store = Arc::new(InMemoryStore::new());
        let subscriber = Subscriber::new(store.clone());

        let (subscription, mut rx) = collect_all(&subscriber);
        subscription.unsubscribe();

        // At most the attach snapshot slips through before the abort lands
        while let Ok(Some(_)) = timeout(WAIT, rx.recv()).await {}
        assert!(!subscription.is_active());
    }

    #[test(tokio::test)]
    async fn dropping_a_subscription_unsubscribes() {
        let store = Arc::new(InMemoryStore::new());
        let subscriber = Subscriber::new(store);
        let (subscription, mut rx) = collect_all(&subscriber);
        next(&mut rx).await;

        drop(subscription);

        assert_eq!(timeout(WAIT, rx.recv()).await.expect("channel was not closed"), None);
    }
}
