#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![doc = "A `no_std` library holding the timing policy of HC-SR04 style ultrasonic rangefinders."]
#![doc = ""]
#![doc = "This crate provides the timing window, wraparound-safe tick arithmetic,"]
#![doc = "the validity window for echo pulses and the fixed-point distance sample."]

use core::fmt;
use core::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub mod error;
pub use error::TimingError;

/// Number of micrometers in one meter.
pub const MICROS_PER_METER: u32 = 1_000_000;

/// A fixed‑point distance: whole meters plus the remainder in millionths of
/// a meter.
///
/// The fractional part is always in `[0, 1_000_000)`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DistanceSample {
    meters: i32,
    micros: i32,
}

impl DistanceSample {
    /// The sample reported before any measurement and for invalid readings.
    pub const ZERO: DistanceSample = DistanceSample { meters: 0, micros: 0 };

    /// Construct a sample from its two components.
    ///
    /// # Arguments
    ///
    /// * `meters`: Whole meters.
    /// * `micros`: Remainder in millionths of a meter.
    ///
    /// # Errors
    ///
    /// Returns `Err(TimingError::FractionOutOfRange)` if `micros` is not in `[0, 1_000_000)`.
    pub const fn new(meters: i32, micros: i32) -> Result<Self, TimingError> {
        if micros < 0 || micros >= MICROS_PER_METER as i32 {
            return Err(TimingError::FractionOutOfRange(
                "must be in [0, 1_000_000)",
            ));
        }
        Ok(DistanceSample { meters, micros })
    }

    /// Split a distance in micrometers into meters and remainder.
    pub const fn from_micrometers(micrometers: u32) -> Self {
        DistanceSample {
            meters: (micrometers / MICROS_PER_METER) as i32,
            micros: (micrometers % MICROS_PER_METER) as i32,
        }
    }

    /// Whole meters.
    pub const fn meters(&self) -> i32 {
        self.meters
    }

    /// Remainder in millionths of a meter.
    pub const fn micros(&self) -> i32 {
        self.micros
    }

    /// Total distance in micrometers.
    pub const fn as_micrometers(&self) -> i64 {
        self.meters as i64 * MICROS_PER_METER as i64 + self.micros as i64
    }

    /// Returns `true` for the zero sample.
    pub const fn is_zero(&self) -> bool {
        self.meters == 0 && self.micros == 0
    }
}

impl fmt::Display for DistanceSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}M", self.meters, self.micros / 1000)
    }
}

/// Nominal rate of a free‑running tick counter.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickRate {
    hz: u32,
}

impl TickRate {
    /// One tick per microsecond.
    pub const MHZ_1: TickRate = TickRate { hz: 1_000_000 };

    /// Construct a tick rate.
    ///
    /// # Errors
    ///
    /// Returns `Err(TimingError::ZeroTickRate)` if `hz` is zero.
    pub const fn new(hz: u32) -> Result<Self, TimingError> {
        if hz == 0 {
            return Err(TimingError::ZeroTickRate("must be positive"));
        }
        Ok(TickRate { hz })
    }

    /// Returns the rate in Hz.
    pub const fn hz(&self) -> u32 {
        self.hz
    }

    /// Convert ticks to microseconds, rounding to the nearest microsecond.
    ///
    /// Saturates at `u32::MAX` for clocks slower than 1 MHz.
    pub const fn ticks_to_us_near(&self, ticks: u32) -> u32 {
        let hz = self.hz as u64;
        saturate((ticks as u64 * 1_000_000 + hz / 2) / hz)
    }

    /// Convert microseconds to ticks, truncating. Saturates at `u32::MAX`.
    pub const fn us_to_ticks(&self, us: u32) -> u32 {
        saturate(us as u64 * self.hz as u64 / 1_000_000)
    }
}

const fn saturate(value: u64) -> u32 {
    if value > u32::MAX as u64 {
        u32::MAX
    } else {
        value as u32
    }
}

/// Number of ticks between two samples of a wrapping 32‑bit counter.
///
/// `end` may have wrapped past `u32::MAX`; the result is the modular
/// difference, so `0xFFFF_FFF0 -> 0x0000_0010` is 32 ticks.
pub const fn elapsed_ticks(start: u32, end: u32) -> u32 {
    end.wrapping_sub(start)
}

/// Outcome of classifying an echo pulse against a [`TimingWindow`].
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    /// The pulse lies inside the validity window.
    Valid(DistanceSample),
    /// The pulse is too short or too long; the sensor reported no target.
    Invalid {
        /// Measured pulse width (µs).
        elapsed_us: u32,
    },
}

impl Reading {
    /// The sample to publish for this reading. Invalid readings publish
    /// [`DistanceSample::ZERO`].
    pub const fn sample(&self) -> DistanceSample {
        match self {
            Reading::Valid(sample) => *sample,
            Reading::Invalid { .. } => DistanceSample::ZERO,
        }
    }

    /// Returns `true` for a reading inside the validity window.
    pub const fn is_valid(&self) -> bool {
        matches!(self, Reading::Valid(_))
    }
}

/// Timing constants of an ultrasonic rangefinder.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingWindow {
    /// Width of the trigger pulse (µs).
    pub trigger_pulse_us: u32,
    /// Pulses at or above this width are invalid readings (µs).
    pub invalid_pulse_us: u32,
    /// Upper bound on the wait for the echo to complete (ms).
    pub max_wait_ms: u32,
    /// Hold time after an invalid reading that absorbs the sensor's spurious second pulse (µs).
    pub spurious_drain_us: u32,
    /// Speed of sound (m/s).
    pub speed_of_sound_m_s: u32,
}

impl TimingWindow {
    /// Timings of the HC-SR04.
    ///
    /// Invalid measurements show up as a ~128.6 ms pulse followed ~145 µs
    /// later by a ~6 µs pulse that cannot be suppressed.
    pub const HC_SR04: TimingWindow = TimingWindow {
        trigger_pulse_us: 11,
        invalid_pulse_us: 25_000,
        max_wait_ms: 130,
        spurious_drain_us: 145,
        speed_of_sound_m_s: 340,
    };

    /// Construct a custom timing window.
    ///
    /// # Errors
    ///
    /// Returns `Err(TimingError::InvalidWindow)` if the validity window is empty,
    /// or if the speed of sound or maximum wait is zero.
    pub const fn new(
        trigger_pulse_us: u32,
        invalid_pulse_us: u32,
        max_wait_ms: u32,
        spurious_drain_us: u32,
        speed_of_sound_m_s: u32,
    ) -> Result<Self, TimingError> {
        if invalid_pulse_us <= trigger_pulse_us + 1 {
            return Err(TimingError::InvalidWindow(
                "invalid-pulse threshold must exceed the trigger pulse",
            ));
        }
        if speed_of_sound_m_s == 0 {
            return Err(TimingError::InvalidWindow("speed of sound must be positive"));
        }
        if max_wait_ms == 0 {
            return Err(TimingError::InvalidWindow("maximum wait must be positive"));
        }
        Ok(TimingWindow {
            trigger_pulse_us,
            invalid_pulse_us,
            max_wait_ms,
            spurious_drain_us,
            speed_of_sound_m_s,
        })
    }

    /// The trigger pulse as a [`Duration`].
    pub const fn trigger_pulse(&self) -> Duration {
        Duration::from_micros(self.trigger_pulse_us as u64)
    }

    /// The maximum wait for a response as a [`Duration`].
    pub const fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms as u64)
    }

    /// The spurious-pulse drain delay as a [`Duration`].
    pub const fn spurious_drain(&self) -> Duration {
        Duration::from_micros(self.spurious_drain_us as u64)
    }

    /// Returns `true` if `elapsed_us` lies strictly between the trigger
    /// pulse width and the invalid-pulse threshold.
    pub const fn is_valid_pulse(&self, elapsed_us: u32) -> bool {
        elapsed_us > self.trigger_pulse_us && elapsed_us < self.invalid_pulse_us
    }

    /// One‑way distance in micrometers for a round-trip echo of `elapsed_us`.
    pub const fn micrometers(&self, elapsed_us: u32) -> u64 {
        elapsed_us as u64 * self.speed_of_sound_m_s as u64 / 2
    }

    /// Classify an echo pulse and convert it to a distance.
    ///
    /// # Arguments
    ///
    /// * `elapsed_us`: Width of the echo pulse in microseconds.
    ///
    /// # Returns
    ///
    /// `Reading::Valid` with the one-way distance, or `Reading::Invalid`.
    pub const fn classify(&self, elapsed_us: u32) -> Reading {
        if !self.is_valid_pulse(elapsed_us) {
            return Reading::Invalid { elapsed_us };
        }
        let um = self.micrometers(elapsed_us);
        Reading::Valid(DistanceSample {
            meters: (um / MICROS_PER_METER as u64) as i32,
            micros: (um % MICROS_PER_METER as u64) as i32,
        })
    }

    /// Round‑trip echo width in microseconds for a target at `micrometers`.
    ///
    /// Inverse of [`TimingWindow::micrometers`], rounded to the nearest µs.
    pub const fn echo_width_us(&self, micrometers: u32) -> u32 {
        let speed = self.speed_of_sound_m_s as u64;
        ((micrometers as u64 * 2 + speed / 2) / speed) as u32
    }
}

impl Default for TimingWindow {
    fn default() -> Self {
        TimingWindow::HC_SR04
    }
}

impl fmt::Display for TimingWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TimingWindow (trig: {} us, valid: ({}, {}) us, wait: {} ms, drain: {} us, c: {} m/s)",
            self.trigger_pulse_us,
            self.trigger_pulse_us,
            self.invalid_pulse_us,
            self.max_wait_ms,
            self.spurious_drain_us,
            self.speed_of_sound_m_s
        )
    }
}
