use core::fmt;

use serde::{Deserialize, Serialize};
use sonar_timing::DistanceSample;

use crate::error::SensorError;

/// Maximum number of devices per driver variant.
pub const MAX_INSTANCES: usize = 8;

/// Sensor channels a caller may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorChannel {
    /// Every channel the sensor provides.
    All,
    /// Distance to the nearest target.
    Distance,
    /// Proximity flag.
    Proximity,
    /// Ambient temperature.
    AmbientTemperature,
}

impl SensorChannel {
    /// Accepts the channels a fetch can serve.
    pub fn ensure_fetchable(self) -> Result<(), SensorError> {
        match self {
            SensorChannel::All | SensorChannel::Distance => Ok(()),
            other => Err(SensorError::Unsupported(other)),
        }
    }
}

impl fmt::Display for SensorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorChannel::All => write!(f, "all"),
            SensorChannel::Distance => write!(f, "distance"),
            SensorChannel::Proximity => write!(f, "proximity"),
            SensorChannel::AmbientTemperature => write!(f, "ambient_temperature"),
        }
    }
}

/// Two-step distance sensor interface.
///
/// `fetch` triggers one measurement and blocks until it completes or times
/// out; `get` copies out the last sample without touching the hardware.
pub trait DistanceSensor: Send + Sync {
    /// Device name used in logs.
    fn name(&self) -> &str;

    /// Trigger a measurement and wait for it.
    fn fetch(&self, channel: SensorChannel) -> Result<(), SensorError>;

    /// Return the last computed sample.
    fn get(&self, channel: SensorChannel) -> Result<DistanceSample, SensorError>;
}
