mod replay;

use crate::domain::GeoLocation;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::Receiver;

pub use replay::ReplaySensor;

/// Continuous feed of fixes. Dropping the receiver clears the watch.
pub type FixWatch = Receiver<Result<GeoLocation, SensorError>>;

#[async_trait]
pub trait GeolocationSensor: Debug + Send + Sync {
    async fn current_fix(&self, options: &FixOptions) -> Result<GeoLocation, SensorError>;

    fn watch_fix(&self, options: &FixOptions) -> FixWatch;
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct FixOptions {
    pub high_accuracy: bool,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Oldest cached fix the sensor may hand out, zero demands a fresh one
    #[serde(with = "humantime_serde")]
    pub maximum_age: Duration,
}

impl Default for FixOptions {
    fn default() -> Self {
        FixOptions {
            high_accuracy: true,
            timeout: Duration::from_secs(5),
            maximum_age: Duration::ZERO,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorError {
    #[error("location permission was denied")]
    PermissionDenied,
    #[error("timed out waiting for a location fix")]
    Timeout,
    #[error("location unavailable: {0}")]
    PositionUnavailable(String),
}
