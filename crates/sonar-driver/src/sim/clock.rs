use std::sync::atomic::{AtomicU32, Ordering};

use sonar_timing::TickRate;

use crate::hal::TickClock;

/// A wrapping 32-bit tick counter that only moves when told to.
///
/// The simulated echo line sets it to the logical time of every edge it
/// delivers, so timestamps are exact regardless of host scheduling.
#[derive(Debug)]
pub struct SimClock {
    ticks: AtomicU32,
    rate: TickRate,
}

impl SimClock {
    pub fn new(rate: TickRate) -> Self {
        SimClock::starting_at(rate, 0)
    }

    /// A clock whose counter starts at `ticks`, e.g. just before a wrap.
    pub fn starting_at(rate: TickRate, ticks: u32) -> Self {
        SimClock {
            ticks: AtomicU32::new(ticks),
            rate,
        }
    }

    pub fn set(&self, ticks: u32) {
        self.ticks.store(ticks, Ordering::Release);
    }

    /// Move forward by `ticks`, wrapping. Returns the new value.
    pub fn advance(&self, ticks: u32) -> u32 {
        self.ticks
            .fetch_add(ticks, Ordering::AcqRel)
            .wrapping_add(ticks)
    }
}

impl Default for SimClock {
    fn default() -> Self {
        SimClock::new(TickRate::MHZ_1)
    }
}

impl TickClock for SimClock {
    fn now(&self) -> u32 {
        self.ticks.load(Ordering::Acquire)
    }

    fn rate(&self) -> TickRate {
        self.rate
    }
}
