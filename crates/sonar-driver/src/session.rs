//! The measurement cycle shared by both driver variants.
//!
//! A fetch locks the variant's [`SharedTimingResource`], arms the variant,
//! triggers the sensor, waits for the completion message, classifies the
//! echo width and publishes the sample. The variant-specific steps live
//! behind [`MeasurementCycle`].

use parking_lot::RwLock;
use sonar_timing::{DistanceSample, Reading};
use tracing::{debug, debug_span, error, info};

use crate::error::{IoError, SensorError};
use crate::sensor::SensorChannel;
use crate::shared::SharedTimingResource;

/// Variant-specific steps of one measurement.
///
/// Every method runs on the fetching thread while it holds the shared lock;
/// `res` is the lock-protected state `R` of the variant.
pub trait MeasurementCycle<R> {
    /// Message posted by the notification context on completion.
    type Completion;

    /// Attach notifications or build the pipeline.
    fn arm(&mut self, res: &mut R) -> Result<(), SensorError>;

    /// Emit the trigger pulse, if the CPU has to.
    fn trigger(&mut self, res: &mut R) -> Result<(), SensorError>;

    /// Release everything `arm` set up. Must be safe to call after a partial arm.
    fn disarm(&mut self, res: &mut R) -> Result<(), SensorError>;

    /// Echo width in microseconds for a completed cycle.
    fn elapsed_us(&mut self, res: &mut R, completion: &Self::Completion) -> Result<u32, SensorError>;
}

/// Run one fetch against `shared`, storing the result in `sample`.
///
/// Returns the classified reading; invalid readings store the zero sample
/// and hold the lock for the spurious-pulse drain before returning.
pub fn fetch<R, C>(
    name: &str,
    channel: SensorChannel,
    shared: &SharedTimingResource<R, C::Completion>,
    sample: &RwLock<DistanceSample>,
    cycle: &mut C,
) -> Result<Reading, SensorError>
where
    C: MeasurementCycle<R>,
{
    channel.ensure_fetchable()?;

    if !shared.is_ready() {
        error!(sensor = name, "Driver is not initialized yet");
        return Err(SensorError::NotReady);
    }

    let _span = debug_span!("fetch", sensor = name, variant = shared.variant()).entered();
    let window = *shared.window();
    let mut res = shared.lock()?;

    // A completion that raced a previous timeout must not satisfy this cycle.
    if shared.completion().reset().is_some() {
        debug!("discarded stale completion");
    }

    if let Err(e) = cycle.arm(&mut res) {
        error!(error = %e, "failed to arm measurement");
        let _ = cycle.disarm(&mut res);
        return Err(e);
    }

    if let Err(e) = cycle.trigger(&mut res) {
        error!(error = %e, "failed to send trigger pulse");
        let _ = cycle.disarm(&mut res);
        return Err(e);
    }

    let Some(completion) = shared.completion().wait_timeout(window.max_wait()) else {
        debug!("No response from sensor");
        cycle.disarm(&mut res)?;
        return Err(IoError::NoResponse.into());
    };

    cycle.disarm(&mut res)?;

    let elapsed_us = cycle.elapsed_us(&mut res, &completion)?;
    let reading = window.classify(elapsed_us);
    *sample.write() = reading.sample();

    match reading {
        Reading::Valid(distance) => {
            debug!(elapsed_us, %distance, "measurement complete");
        }
        Reading::Invalid { elapsed_us } => {
            info!(elapsed_us, "Invalid measurement");
            spin_sleep::sleep(window.spurious_drain());
        }
    }

    drop(res);
    Ok(reading)
}

/// Copy out the last sample for the distance channel.
pub fn get<R, M>(
    name: &str,
    channel: SensorChannel,
    shared: &SharedTimingResource<R, M>,
    sample: &RwLock<DistanceSample>,
) -> Result<DistanceSample, SensorError> {
    if !shared.is_ready() {
        tracing::warn!(sensor = name, "Device is not initialized yet");
        return Err(SensorError::NotReady);
    }
    match channel {
        SensorChannel::Distance => Ok(*sample.read()),
        other => Err(SensorError::Unsupported(other)),
    }
}
