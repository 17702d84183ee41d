use crate::sse::server_sent_event::{EventBuffer, ServerSentEvent};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::Sender;
use tokio::time::timeout;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub retry_ms: u64,
    pub retry_max_delay: Duration,
    pub stale_connection_timeout: Duration,
    /// Events after which the server keeps nothing worth reading on the connection. They are still forwarded.
    pub closing_events: Vec<String>,
}

/// Keeps an SSE connection open, reconnecting with backoff until the receiving side goes away.
#[instrument(skip_all, fields(url = %config.url))]
pub async fn listen<T>(tx: Sender<ServerSentEvent<T>>, client: &Client, config: &Config) -> Result<(), SseError>
where
    T: DeserializeOwned + Debug + 'static,
{
    let strategy = ExponentialBackoff::from_millis(config.retry_ms)
        .factor(2)
        .max_delay(config.retry_max_delay)
        .map(jitter);

    info!("Connecting to SSE stream {}...", config.url);
    RetryIf::spawn(
        strategy,
        || async {
            match connect_sse_stream::<T>(&tx, client, config).await {
                Ok(_) => {
                    info!("✅ SSE stream ended gracefully. Restarting...");
                    Err(SseError::Closed)
                }
                Err(SseError::ReceiverDropped) => Err(SseError::ReceiverDropped),
                Err(e) => {
                    warn!("⚠️ SSE error: {}. Retrying...", e);
                    Err(e)
                }
            }
        },
        |e: &SseError| !matches!(e, SseError::ReceiverDropped),
    )
    .await
}

async fn connect_sse_stream<T>(tx: &Sender<ServerSentEvent<T>>, client: &Client, config: &Config) -> Result<(), SseError>
where
    T: DeserializeOwned + Debug + 'static,
{
    let response = client
        .get(&config.url)
        .query(&config.query)
        .header("Accept", "text/event-stream")
        .send()
        .await?
        .error_for_status()?;

    if response.status() == StatusCode::OK {
        info!(status = %response.status(), "Connecting to SSE stream {}... OK", config.url);
    }

    let mut stream = response.bytes_stream();
    let mut buffer = EventBuffer::default();
    loop {
        let event = timeout(config.stale_connection_timeout, stream.next()).await;
        match event {
            Ok(Some(Ok(chunk))) => {
                for block in buffer.push(&chunk) {
                    let event = ServerSentEvent::<T>::from_str(&block)?;
                    debug!(event = block.trim(), "🔸 Received event: {:?}", event.event);
                    let closing = event.event.clone().filter(|name| config.closing_events.contains(name));
                    tx.send(event).await.map_err(|_| SseError::ReceiverDropped)?;

                    if let Some(name) = closing {
                        warn!("🔴 SSE stream closed by a '{}' event", name);
                        return Err(SseError::ClosedBy(name));
                    }
                }
            }
            Ok(Some(Err(e))) => {
                error!("❌ SSE stream error: {}", e);
                return Err(e.into());
            }
            Ok(None) => {
                warn!("🔴 SSE stream ended");
                return Err(SseError::Closed);
            }
            Err(_) => {
                warn!("⏳ No data for {} seconds. Reconnecting...", config.stale_connection_timeout.as_secs());
                return Err(SseError::Stale(config.stale_connection_timeout));
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum SseError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid event data: {0}")]
    InvalidEvent(#[from] serde_json::Error),
    #[error("stream closed")]
    Closed,
    #[error("stream closed by a '{0}' event")]
    ClosedBy(String),
    #[error("no data received for {0:?}")]
    Stale(Duration),
    #[error("event receiver dropped")]
    ReceiverDropped,
}
