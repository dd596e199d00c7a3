//! Hardware seams used by the edge-timed driver.
//!
//! Trigger pins are plain `embedded-hal` output pins. The echo input and the
//! tick clock are described by the small traits below so that the same
//! driver runs against real GPIO or against [`crate::sim`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use serde::{Deserialize, Serialize};
use sonar_timing::TickRate;
use spin_sleep::SpinSleeper;

/// A free-running, wrapping 32-bit tick counter.
pub trait TickClock: Send + Sync {
    /// Current counter value.
    fn now(&self) -> u32;

    /// Nominal counter rate.
    fn rate(&self) -> TickRate;
}

/// Direction of an echo-line transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    /// Low to high.
    Rising,
    /// High to low.
    Falling,
}

/// Bias applied to an input pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pull {
    /// Floating input.
    #[default]
    None,
    /// Pull-up resistor.
    Up,
    /// Pull-down resistor.
    Down,
}

/// Electrical flags of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PinFlags {
    /// The pin is asserted when driven low.
    #[serde(default)]
    pub active_low: bool,
    /// Input bias.
    #[serde(default)]
    pub pull: Pull,
}

/// Receiver of echo-line notifications.
///
/// Called from the notifying context; implementations must not block.
pub trait EdgeSink: Send + Sync {
    /// Handle one transition of the echo line.
    fn on_edge(&self, edge: Edge, subscription: &EdgeSubscription);
}

struct SubscriptionInner {
    active: AtomicBool,
    sink: Arc<dyn EdgeSink>,
}

/// A live callback registration on an echo line.
///
/// The sink may cancel the subscription from inside its own callback; an
/// [`EdgeInput`] stops delivering as soon as it is cancelled.
#[derive(Clone)]
pub struct EdgeSubscription {
    inner: Arc<SubscriptionInner>,
}

impl EdgeSubscription {
    /// Create an active subscription for `sink`.
    pub fn new(sink: Arc<dyn EdgeSink>) -> Self {
        EdgeSubscription {
            inner: Arc::new(SubscriptionInner {
                active: AtomicBool::new(true),
                sink,
            }),
        }
    }

    /// Forward `edge` to the sink if still active.
    pub fn deliver(&self, edge: Edge) {
        if self.is_active() {
            self.inner.sink.on_edge(edge, self);
        }
    }

    /// Stop further deliveries.
    pub fn cancel(&self) {
        self.inner.active.store(false, Ordering::Release);
    }

    /// Returns `true` until cancelled.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }
}

/// An input pin that reports both edges through a subscription.
pub trait EdgeInput: Send {
    /// Driver error type.
    type Error: embedded_hal::digital::Error;

    /// Configure the pin as an input sensing both edges.
    fn configure(&mut self, flags: PinFlags) -> Result<(), Self::Error>;

    /// Register `subscription` for edge notifications.
    fn attach(&mut self, subscription: EdgeSubscription) -> Result<(), Self::Error>;

    /// Remove the current subscription, if any.
    fn detach(&mut self) -> Result<(), Self::Error>;
}

/// Busy-wait delay for the trigger pulse.
///
/// A spin-sleeper whose native accuracy exceeds the requested delay never
/// yields, so short delays are pure spins.
#[derive(Debug, Clone, Copy)]
pub struct SpinDelay {
    sleeper: SpinSleeper,
}

impl SpinDelay {
    pub fn new() -> Self {
        SpinDelay {
            sleeper: SpinSleeper::new(100_000),
        }
    }
}

impl Default for SpinDelay {
    fn default() -> Self {
        SpinDelay::new()
    }
}

impl DelayNs for SpinDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.sleeper.sleep(Duration::from_nanos(ns as u64));
    }
}
