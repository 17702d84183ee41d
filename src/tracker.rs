use crate::broadcaster::{BroadcastError, Broadcaster};
use crate::sensor::{FixOptions, FixWatch, GeolocationSensor, SensorError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

#[derive(Clone, Debug, PartialEq)]
pub enum TrackingState {
    Idle,
    RequestingPermission { showing_id: String },
    Tracking { showing_id: String },
}

/// Drives the sensor and the broadcaster through a showing session.
///
/// Errors raised while tracking are pushed on the error channel handed to [`ShowingTracker::new`],
/// they never change the state. Only [`ShowingTracker::stop`] leaves `Tracking`.
#[derive(Debug)]
pub struct ShowingTracker {
    broadcaster: Arc<Broadcaster>,
    sensor: Arc<dyn GeolocationSensor>,
    options: FixOptions,
    error_tx: mpsc::Sender<TrackingError>,
    state_tx: watch::Sender<TrackingState>,
    watch_task: Option<JoinHandle<()>>,
}

impl ShowingTracker {
    pub fn new(broadcaster: Arc<Broadcaster>, sensor: Arc<dyn GeolocationSensor>, options: FixOptions, error_tx: mpsc::Sender<TrackingError>) -> Self {
        let (state_tx, _) = watch::channel(TrackingState::Idle);

        ShowingTracker {
            broadcaster,
            sensor,
            options,
            error_tx,
            state_tx,
            watch_task: None,
        }
    }

    pub fn state(&self) -> TrackingState {
        self.state_tx.borrow().clone()
    }

    pub fn states(&self) -> watch::Receiver<TrackingState> {
        self.state_tx.subscribe()
    }

    #[instrument(skip(self))]
    pub async fn start(&mut self, showing_id: Option<&str>) -> Result<(), TrackingError> {
        let Some(showing_id) = showing_id.map(str::trim).filter(|id| !id.is_empty()) else {
            return Err(TrackingError::NoShowingSelected);
        };

        let state = self.state();
        if state != TrackingState::Idle {
            return Err(TrackingError::NotIdle(state));
        }

        let showing_id = showing_id.to_string();
        info!("🛰️ Requesting location fix for showing '{}'...", showing_id);
        self.state_tx.send_replace(TrackingState::RequestingPermission {
            showing_id: showing_id.clone(),
        });
        // Falls back to Idle on every early return, including when this future is dropped mid-request
        let mut pending = PendingStart {
            state_tx: &self.state_tx,
            armed: true,
        };

        let fix = match timeout(self.options.timeout, self.sensor.current_fix(&self.options)).await {
            Ok(Ok(fix)) => fix,
            Ok(Err(e)) => {
                warn!("🛰️ Requesting location fix for showing '{}'... failed, {}", showing_id, e);
                return Err(e.into());
            }
            Err(_) => {
                warn!("🛰️ Requesting location fix for showing '{}'... timed out after {:?}", showing_id, self.options.timeout);
                return Err(SensorError::Timeout.into());
            }
        };

        if let Err(e) = self.broadcaster.start_broadcast(&showing_id, fix).await {
            warn!("🛰️ Unable to start broadcasting for showing '{}': {}", showing_id, e);
            return Err(e.into());
        }

        let fixes = self.sensor.watch_fix(&self.options);
        let span = info_span!("track", showing_id = %showing_id);
        self.watch_task = Some(tokio::spawn(
            track(self.broadcaster.clone(), showing_id.clone(), fixes, self.error_tx.clone()).instrument(span),
        ));

        pending.armed = false;
        info!("🛰️ Requesting location fix for showing '{}'... OK, tracking", showing_id);
        self.state_tx.send_replace(TrackingState::Tracking { showing_id });
        Ok(())
    }

    /// Ends showing mode. From `Idle` this clears a record left behind by an earlier session.
    ///
    /// The state only returns to `Idle` once the record is gone. When the removal fails the previous
    /// state is kept and `stop` can be retried.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> Result<(), TrackingError> {
        if let Some(task) = self.watch_task.take() {
            task.abort();
            // Wait for the in-flight update to be dropped so it cannot land after the removal
            let _ = task.await;
            debug!("🛰️ Cleared location watch");
        }

        self.broadcaster.stop_broadcast().await?;
        self.state_tx.send_replace(TrackingState::Idle);
        Ok(())
    }
}

struct PendingStart<'a> {
    state_tx: &'a watch::Sender<TrackingState>,
    armed: bool,
}

impl Drop for PendingStart<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state_tx.send_replace(TrackingState::Idle);
        }
    }
}

impl Drop for ShowingTracker {
    fn drop(&mut self) {
        if let Some(task) = self.watch_task.take() {
            task.abort();
        }
    }
}

async fn track(broadcaster: Arc<Broadcaster>, showing_id: String, mut fixes: FixWatch, error_tx: mpsc::Sender<TrackingError>) {
    while let Some(fix) = fixes.recv().await {
        let result = match fix {
            Ok(location) => broadcaster.update_position(&showing_id, location).await.map(|_| ()).map_err(TrackingError::from),
            Err(e) => Err(TrackingError::from(e)),
        };

        if let Err(e) = result {
            warn!("⚠️ Tracking error: {}", e);
            if let Err(e) = error_tx.try_send(e) {
                debug!("Unable to report tracking error: {}", e);
            }
        }
    }
    debug!("🛰️ Location feed ended");
}

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("select a showing before starting showing mode")]
    NoShowingSelected,
    #[error("showing mode can only be started when idle, currently {0:?}")]
    NotIdle(TrackingState),
    #[error(transparent)]
    Sensor(#[from] SensorError),
    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
}
