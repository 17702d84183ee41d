use crate::domain::GeoLocation;
use crate::sensor::{FixOptions, FixWatch, GeolocationSensor, SensorError};
use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tracing::{debug, info, instrument};

/// Plays back a recorded route, the first fix answers the one-shot request and the rest feed the watch.
///
/// The first fix arrives after `first_fix_delay` and is bounded by [`FixOptions::timeout`]. Recorded fixes
/// carry no accuracy nor age, `high_accuracy` and `maximum_age` are not consulted.
#[derive(Debug, Clone)]
pub struct ReplaySensor {
    fixes: Vec<GeoLocation>,
    interval: Duration,
    first_fix_delay: Duration,
    permission_granted: bool,
}

impl ReplaySensor {
    pub fn new(fixes: Vec<GeoLocation>, interval: Duration) -> Self {
        ReplaySensor {
            fixes,
            interval,
            first_fix_delay: Duration::ZERO,
            permission_granted: true,
        }
    }

    pub fn with_first_fix_delay(mut self, delay: Duration) -> Self {
        self.first_fix_delay = delay;
        self
    }

    /// Behaves like a device on which the agent refused location access.
    pub fn deny_permission(mut self) -> Self {
        self.permission_granted = false;
        self
    }

    #[instrument]
    pub async fn load(path: &Path, interval: Duration) -> Result<Self, ReplayError> {
        info!("🛰️ Loading fixes from '{}'...", path.display());
        let content = fs::read_to_string(path).await?;
        let fixes: Vec<GeoLocation> = serde_json::from_str(&content)?;
        info!("🛰️ Loading fixes from '{}'... OK, {} loaded", path.display(), fixes.len());

        Ok(ReplaySensor::new(fixes, interval))
    }
}

#[async_trait]
impl GeolocationSensor for ReplaySensor {
    async fn current_fix(&self, options: &FixOptions) -> Result<GeoLocation, SensorError> {
        if !self.permission_granted {
            return Err(SensorError::PermissionDenied);
        }

        let first = async {
            sleep(self.first_fix_delay).await;
            self.fixes.first().copied()
        };
        match timeout(options.timeout, first).await {
            Ok(Some(fix)) => Ok(fix),
            Ok(None) => Err(SensorError::PositionUnavailable("no recorded fixes".to_string())),
            Err(_) => Err(SensorError::Timeout),
        }
    }

    fn watch_fix(&self, _options: &FixOptions) -> FixWatch {
        let (tx, rx) = mpsc::channel(1);
        let fixes = self.fixes.iter().skip(1).copied().collect::<Vec<_>>();
        let period = self.interval.max(Duration::from_millis(1));
        let permission_granted = self.permission_granted;

        tokio::spawn(async move {
            if !permission_granted {
                let _ = tx.send(Err(SensorError::PermissionDenied)).await;
                return;
            }

            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            for fix in fixes {
                ticker.tick().await;
                if tx.send(Ok(fix)).await.is_err() {
                    debug!("🛰️ Watch cleared, stopping replay");
                    return;
                }
            }
            debug!("🛰️ Replay finished");
        });

        rx
    }
}

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("invalid fixes file: {0}")]
    Parse(#[from] serde_json::Error),
}
