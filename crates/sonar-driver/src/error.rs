//! Error types returned by the rangefinder drivers.

use embedded_hal::digital::ErrorKind;
use thiserror::Error;

use crate::pipeline::fabric::FabricError;
use crate::sensor::SensorChannel;

/// Errors returned by [`DistanceSensor`](crate::DistanceSensor) operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SensorError {
    /// The requested channel is neither `All` nor `Distance`.
    #[error("channel {0} is not supported")]
    Unsupported(SensorChannel),
    /// The shared timing resource has not completed its one-time initialization.
    #[error("driver is not initialized yet")]
    NotReady,
    /// The measurement failed at run time.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),
    /// The device could not be brought up.
    #[error("initialization failed: {0}")]
    Init(#[from] InitError),
}

impl SensorError {
    /// Returns `true` when the sensor did not answer within the maximum wait.
    pub fn is_no_response(&self) -> bool {
        matches!(self, SensorError::Io(IoError::NoResponse))
    }
}

/// Run-time failures of a measurement cycle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IoError {
    /// No completion signal arrived within the maximum wait.
    #[error("no response from sensor")]
    NoResponse,
    /// A pin operation failed while setting up or tearing down a cycle.
    #[error("pin {pin}: {kind:?}")]
    Pin {
        /// Pin number.
        pin: u8,
        /// Failure reported by the pin driver.
        kind: ErrorKind,
    },
    /// The event fabric rejected a per-fetch configuration step.
    #[error("event fabric: {0}")]
    Fabric(#[from] FabricError),
}

/// Startup failures; the instance is unusable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InitError {
    /// A channel, group or instance slot could not be allocated.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),
    /// A pin could not be configured.
    #[error("pin {pin} configuration failed: {kind:?}")]
    Pin {
        /// Pin number.
        pin: u8,
        /// Failure reported by the pin driver.
        kind: ErrorKind,
    },
    /// A peripheral rejected its configuration.
    #[error("peripheral configuration failed: {0}")]
    Fabric(#[from] FabricError),
    /// The device configuration does not match the shared resource.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<FabricError> for SensorError {
    fn from(err: FabricError) -> Self {
        SensorError::Io(IoError::Fabric(err))
    }
}
