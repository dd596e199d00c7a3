//! Ultrasonic time-of-flight rangefinder drivers.
//!
//! Two interchangeable measurement engines share one session, timing policy
//! and error taxonomy:
//!
//! - [`edge`]: edge notifications timestamped against a free-running tick
//!   clock by a small state machine.
//! - [`pipeline`]: trigger pulse, edge capture and completion chained through
//!   an event router, so the CPU only sees the final notification.
//!
//! All devices of one variant share a single lock and completion signal,
//! because the timing hardware behind them exists once. Devices are built
//! from a [`DeviceTable`]; [`sim`] provides host-side hardware for both
//! variants.

pub mod config;
pub mod edge;
pub mod error;
pub mod hal;
pub mod pipeline;
pub mod sensor;
pub mod session;
pub mod shared;
pub mod signal;
pub mod sim;

pub use config::{ConfigError, DeviceConfiguration, DeviceTable, PeripheralSelection, SimulationConfig, Variant};
pub use edge::{EdgeSensor, EdgeShared};
pub use error::{InitError, IoError, SensorError};
pub use hal::{Edge, EdgeInput, EdgeSink, EdgeSubscription, PinFlags, Pull, SpinDelay, TickClock};
pub use pipeline::{PipelineSensor, PipelineShared};
pub use sensor::{DistanceSensor, MAX_INSTANCES, SensorChannel};
pub use shared::SharedTimingResource;
pub use signal::CompletionSignal;
pub use sonar_timing::{DistanceSample, Reading, TickRate, TimingWindow};
