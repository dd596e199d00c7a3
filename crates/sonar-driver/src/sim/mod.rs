//! Host-side stand-ins for the sensor hardware.
//!
//! [`gpio`] simulates the trigger pin and echo line of the edge variant,
//! [`chip`] the timer, event router, pin tasks and software event of the
//! pipeline variant. Both answer triggers through an [`EchoModel`] and
//! record pin activity in an [`EventLog`].

use std::sync::Arc;

use parking_lot::Mutex;

pub mod bench;
pub mod chip;
pub mod clock;
pub mod gpio;
pub mod target;

pub use bench::{SimBench, SimEdgeSensor, SimPipelineSensor, SimPipelineShared};
pub use chip::{SimChip, SimEgu, SimGpiote, SimRouter, SimTimer};
pub use clock::SimClock;
pub use gpio::{EchoLineHandle, SimEchoLine, SimPinError, SimTriggerPin};
pub use target::{EchoModel, EchoPulse, Target};

/// Pin-level activity visible to tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// Edge notifications attached to an echo line.
    Attach,
    /// Edge notifications removed from an echo line.
    Detach,
    /// Pin bound to a pipeline endpoint.
    Bind,
    /// Pin released by the pipeline.
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogEntry {
    pub activity: Activity,
    pub pin: u8,
}

/// Append-only record of pin activity, in the order it happened.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl EventLog {
    pub fn new() -> Self {
        EventLog::default()
    }

    pub fn record(&self, activity: Activity, pin: u8) {
        self.entries.lock().push(LogEntry { activity, pin });
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
