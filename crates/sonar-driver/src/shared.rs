//! State shared by every device of one driver variant.
//!
//! The timing hardware behind a variant (the tick clock and edge state
//! machine, or the timer and event fabric) exists once, so all instances of
//! that variant go through one [`SharedTimingResource`]: one lock, one
//! completion signal, one set of resources. It is created once, handed to
//! each device as an `Arc`, and never torn down.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};
use sonar_timing::TimingWindow;
use tracing::debug;

use crate::error::{InitError, SensorError};
use crate::sensor::MAX_INSTANCES;
use crate::signal::CompletionSignal;

/// Lock, completion signal and resources of one driver variant.
///
/// `R` is the state only the lock holder may touch; `M` is the message the
/// notification context posts when a measurement completes.
pub struct SharedTimingResource<R, M> {
    variant: &'static str,
    window: TimingWindow,
    ready: AtomicBool,
    instances: AtomicUsize,
    state: Mutex<R>,
    completion: CompletionSignal<M>,
}

impl<R, M> SharedTimingResource<R, M> {
    pub fn new(variant: &'static str, window: TimingWindow, resources: R) -> Self {
        SharedTimingResource {
            variant,
            window,
            ready: AtomicBool::new(false),
            instances: AtomicUsize::new(0),
            state: Mutex::new(resources),
            completion: CompletionSignal::new(),
        }
    }

    /// Run `init` once, under the lock. Later calls are no-ops.
    ///
    /// Returns `Ok(true)` if this call performed the initialization.
    pub fn initialize<F>(&self, init: F) -> Result<bool, InitError>
    where
        F: FnOnce(&mut R) -> Result<(), InitError>,
    {
        let mut state = self.state.lock();
        if self.ready.load(Ordering::Acquire) {
            debug!(variant = self.variant, "shared resources already initialized");
            return Ok(false);
        }
        init(&mut state)?;
        self.ready.store(true, Ordering::Release);
        debug!(variant = self.variant, "shared resources initialized");
        Ok(true)
    }

    /// Claim one of the [`MAX_INSTANCES`] device slots.
    ///
    /// Returns the number of claimed slots, including this one.
    pub fn register_instance(&self) -> Result<usize, InitError> {
        self.instances
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < MAX_INSTANCES).then_some(n + 1)
            })
            .map(|previous| previous + 1)
            .map_err(|_| InitError::ResourceExhausted("too many device instances"))
    }

    /// Give back a slot claimed by a device whose initialization failed.
    pub fn release_instance(&self) {
        let _ = self
            .instances
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn instance_count(&self) -> usize {
        self.instances.load(Ordering::Acquire)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Acquire the exclusive measurement lock. Blocks without timeout.
    pub fn lock(&self) -> Result<MutexGuard<'_, R>, SensorError> {
        if !self.is_ready() {
            return Err(SensorError::NotReady);
        }
        Ok(self.state.lock())
    }

    /// Returns `true` while some fetch holds the lock.
    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }

    pub fn completion(&self) -> &CompletionSignal<M> {
        &self.completion
    }

    pub fn window(&self) -> &TimingWindow {
        &self.window
    }

    pub fn variant(&self) -> &'static str {
        self.variant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource() -> SharedTimingResource<u32, ()> {
        SharedTimingResource::new("test", TimingWindow::HC_SR04, 0)
    }

    #[test]
    fn test_lock_before_initialization_is_not_ready() {
        let shared = resource();
        assert!(!shared.is_ready());
        assert!(matches!(shared.lock(), Err(SensorError::NotReady)));
    }

    #[test]
    fn test_initialize_runs_once() {
        let shared = resource();
        assert_eq!(shared.initialize(|r| { *r += 1; Ok(()) }), Ok(true));
        assert_eq!(shared.initialize(|r| { *r += 1; Ok(()) }), Ok(false));
        assert!(shared.is_ready());
        assert_eq!(*shared.lock().unwrap(), 1);
    }

    #[test]
    fn test_failed_initialization_can_be_retried() {
        let shared = resource();
        let err = shared.initialize(|_| Err(InitError::ResourceExhausted("channels")));
        assert_eq!(err, Err(InitError::ResourceExhausted("channels")));
        assert!(!shared.is_ready());
        assert_eq!(shared.initialize(|_| Ok(())), Ok(true));
    }

    #[test]
    fn test_instance_limit() {
        let shared = resource();
        for i in 0..MAX_INSTANCES {
            assert_eq!(shared.register_instance(), Ok(i + 1));
        }
        assert!(matches!(
            shared.register_instance(),
            Err(InitError::ResourceExhausted(_))
        ));
        assert_eq!(shared.instance_count(), MAX_INSTANCES);
    }

    #[test]
    fn test_released_slot_can_be_claimed_again() {
        let shared = resource();
        for _ in 0..MAX_INSTANCES {
            shared.register_instance().unwrap();
        }
        shared.release_instance();
        assert_eq!(shared.instance_count(), MAX_INSTANCES - 1);
        assert_eq!(shared.register_instance(), Ok(MAX_INSTANCES));

        let empty = resource();
        empty.release_instance();
        assert_eq!(empty.instance_count(), 0);
    }

    #[test]
    fn test_is_locked_tracks_guard() {
        let shared = resource();
        shared.initialize(|_| Ok(())).unwrap();
        let guard = shared.lock().unwrap();
        assert!(shared.is_locked());
        drop(guard);
        assert!(!shared.is_locked());
    }
}
