use crate::app_config::{AppConfig, Backend};
use crate::broadcaster::Broadcaster;
use crate::identity::StaticIdentity;
use crate::sensor::ReplaySensor;
use crate::store::{InMemoryStore, LocationStore};
use crate::subscriber::Subscriber;
use crate::tracker::{ShowingTracker, TrackingError, TrackingState};
use crate::viewer::AgentLabels;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::{signal, task};
use tracing::{info, warn};

mod app_config;
mod broadcaster;
mod domain;
mod firebase;
mod geo_location_deserializer;
mod identity;
mod sensor;
mod sse;
mod store;
mod subscriber;
mod tracker;
mod viewer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    info!("🪵 Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load()?;
    info!("✅  Loaded configuration");

    let store: Arc<dyn LocationStore> = match config.store().backend() {
        Backend::Memory => Arc::new(InMemoryStore::new()),
        Backend::Firebase => {
            let firebase_config = config.firebase().ok_or("the firebase backend requires a [firebase] section")?;
            let client = firebase::client::new_client(firebase_config.connect_timeout())?;
            Arc::new(firebase::FirebaseStore::connect(client, firebase_config.clone(), config.core().channel_buffer_size()))
        }
    };
    info!(backend = ?config.store().backend(), "✅  Initialized store");

    let subscriber = Subscriber::new(store.clone());
    let labels = AgentLabels::new(config.agent().map(|agent| agent.id()), config.viewer().agent_names().clone());
    let viewer_subscription = config.viewer().enabled().then(|| match config.viewer().agent_id() {
        Some(agent_id) => viewer::watch_agent(&subscriber, agent_id, labels, config.viewer().stale_after()),
        None => viewer::watch_all(&subscriber, labels, config.viewer().stale_after()),
    });
    if viewer_subscription.is_some() {
        info!("✅  Initialized viewer");
    }

    let mut tracker = match config.agent() {
        Some(agent) => {
            let broadcaster = Arc::new(Broadcaster::new(store.clone(), Arc::new(StaticIdentity::signed_in(agent.id()))));
            let mut sensor = ReplaySensor::load(agent.fixes(), agent.interval()).await?.with_first_fix_delay(agent.first_fix_delay());
            if agent.deny_permission() {
                sensor = sensor.deny_permission();
            }
            let (error_tx, error_rx) = mpsc::channel::<TrackingError>(config.core().channel_buffer_size().max(1));
            task::spawn(report_tracking_errors(error_rx));

            let mut tracker = ShowingTracker::new(broadcaster, Arc::new(sensor), config.tracking().clone(), error_tx);
            task::spawn(log_tracking_states(tracker.states()));
            // Clear whatever an earlier, interrupted session left behind
            tracker.stop().await?;
            tracker.start(agent.showing_id()).await?;
            info!(agent_id = agent.id(), "✅  Started showing mode");
            Some(tracker)
        }
        None => None,
    };

    info!("🔥 {} is up and running", env!("CARGO_PKG_NAME"));
    signal::ctrl_c().await?;
    info!("🛑 Shutting down...");

    if let Some(tracker) = tracker.as_mut() {
        if let Err(e) = tracker.stop().await {
            warn!("⚠️ Unable to stop showing mode, the record may linger: {}", e);
        }
    }
    if let Some(subscription) = viewer_subscription {
        subscription.unsubscribe();
    }

    info!("🛑 Shutting down... OK");
    Ok(())
}

async fn report_tracking_errors(mut rx: mpsc::Receiver<TrackingError>) {
    while let Some(error) = rx.recv().await {
        warn!("⚠️ Location sharing problem: {}", error);
    }
}

async fn log_tracking_states(mut states: watch::Receiver<TrackingState>) {
    while states.changed().await.is_ok() {
        let state = states.borrow_and_update().clone();
        info!("🛰️ Showing mode is now {:?}", state);
    }
}
