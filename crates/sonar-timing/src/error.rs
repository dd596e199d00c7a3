#![warn(missing_docs)]

//! Error types for the timing library.
//!
//! This module defines the errors that can occur when building timing
//! parameters or distance samples from raw values.

use core::fmt;

/// Errors that can occur in timing calculations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimingError {
    /// Error for a tick rate of zero.
    /// This variant is returned when a clock is described with a nominal rate of 0 Hz.
    ZeroTickRate(&'static str),
    /// Error for a fractional distance component outside `[0, 1_000_000)`.
    FractionOutOfRange(&'static str),
    /// Error for a timing window whose bounds do not describe a usable window.
    InvalidWindow(&'static str),
}

impl fmt::Display for TimingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimingError::ZeroTickRate(msg) => write!(f, "Invalid tick rate: {}", msg),
            TimingError::FractionOutOfRange(msg) => {
                write!(f, "Fractional distance out of range: {}", msg)
            }
            TimingError::InvalidWindow(msg) => write!(f, "Invalid timing window: {}", msg),
        }
    }
}

impl core::error::Error for TimingError {}
