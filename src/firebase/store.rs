use crate::app_config::Firebase;
use crate::domain::{ActiveLocationRecord, LiveSnapshot};
use crate::firebase::tree::{LiveTree, TreeError};
use crate::sse;
use crate::sse::ServerSentEvent;
use crate::store::{ACTIVE_SHOWINGS_PATH, LocationStore, StoreError};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

/// Realtime Database backend speaking the REST API: writes with `PUT`/`DELETE`, reads through the streaming endpoint.
#[derive(Debug)]
pub struct FirebaseStore {
    client: Client,
    config: Firebase,
    notifier_tx: watch::Sender<LiveSnapshot>,
    tasks: Vec<JoinHandle<()>>,
}

impl FirebaseStore {
    /// Opens the live stream in the background. Watchers see nothing until the initial state arrives.
    pub fn connect(client: Client, config: Firebase, buffer_size: usize) -> Self {
        let (notifier_tx, _) = watch::channel::<LiveSnapshot>(None);
        let (event_tx, event_rx) = mpsc::channel::<ServerSentEvent<Value>>(buffer_size.max(1));

        let stream_config = sse::Config {
            url: collection_url(config.url()),
            query: auth_query(&config),
            retry_ms: config.retry_ms(),
            retry_max_delay: config.retry_max_delay(),
            stale_connection_timeout: config.stale_connection_timeout(),
            closing_events: vec!["cancel".to_string(), "auth_revoked".to_string()],
        };
        let stream_client = client.clone();
        let listener = tokio::spawn(
            async move {
                if let Err(e) = sse::listen(event_tx, &stream_client, &stream_config).await {
                    debug!("🔥 Live stream stopped: {}", e);
                }
            }
            .instrument(info_span!("firebase_stream")),
        );

        let applier = tokio::spawn(apply_events(event_rx, notifier_tx.clone()).instrument(info_span!("firebase_tree")));

        FirebaseStore {
            client,
            config,
            notifier_tx,
            tasks: vec![listener, applier],
        }
    }
}

impl Drop for FirebaseStore {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl LocationStore for FirebaseStore {
    #[instrument(skip_all, fields(agent_id = %record.agent_id))]
    async fn set(&self, record: ActiveLocationRecord) -> Result<(), StoreError> {
        let url = record_url(self.config.url(), &record.agent_id)?;
        self.client
            .put(url)
            .query(&auth_query(&self.config))
            .json(&record)
            .send()
            .await?
            .error_for_status()?;

        debug!("🔥 Stored record");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, agent_id: &str) -> Result<(), StoreError> {
        let url = record_url(self.config.url(), agent_id)?;
        self.client
            .delete(url)
            .query(&auth_query(&self.config))
            .send()
            .await?
            .error_for_status()?;

        debug!("🔥 Removed record");
        Ok(())
    }

    fn watch(&self) -> watch::Receiver<LiveSnapshot> {
        self.notifier_tx.subscribe()
    }
}

async fn apply_events(mut rx: mpsc::Receiver<ServerSentEvent<Value>>, notifier_tx: watch::Sender<LiveSnapshot>) {
    let mut tree = LiveTree::default();

    while let Some(event) = rx.recv().await {
        match tree.apply(&event) {
            Ok(true) if tree.is_synced() => {
                let live = tree.live_map();
                debug!("🔥 Live set now holds {} agent(s)", live.len());
                notifier_tx.send_replace(Some(Arc::new(live)));
            }
            Ok(_) => {}
            Err(e @ (TreeError::Cancelled(_) | TreeError::AuthRevoked)) => {
                // The listener reconnects, the next initial `put` rebuilds the set from scratch
                warn!("⚠️ Live stream ended by the server, waiting for a fresh copy: {}", e);
                tree = LiveTree::default();
                notifier_tx.send_replace(None);
            }
            Err(e) => warn!("⚠️ Unable to apply live stream event: {}", e),
        }
    }
    info!("🔥 Live stream closed");
}

fn collection_url(base_url: &str) -> String {
    format!("{}/{}.json", base_url.trim_end_matches('/'), ACTIVE_SHOWINGS_PATH)
}

// Each key becomes a single percent-encoded path segment, so '?', '%' or spaces cannot leak into the query
fn record_url(base_url: &str, agent_id: &str) -> Result<Url, StoreError> {
    validate_key(agent_id)?;

    let mut url = Url::parse(base_url).map_err(|_| StoreError::InvalidUrl(base_url.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| StoreError::InvalidUrl(base_url.to_string()))?
        .pop_if_empty()
        .push(ACTIVE_SHOWINGS_PATH)
        .push(&format!("{agent_id}.json"));
    Ok(url)
}

fn auth_query(config: &Firebase) -> Vec<(String, String)> {
    config
        .auth_token()
        .map(|token| vec![("auth".to_string(), token.to_string())])
        .unwrap_or_default()
}

// Keys may not be empty nor contain '.', '$', '#', '[', ']', '/' or ASCII control characters
fn validate_key(key: &str) -> Result<(), StoreError> {
    let forbidden = |c: char| matches!(c, '.' | '$' | '#' | '[' | ']' | '/') || c.is_ascii_control();
    if key.is_empty() || key.chars().any(forbidden) {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}
