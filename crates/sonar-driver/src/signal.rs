use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Binary completion signal carrying a small message.
///
/// Starts unsignaled. `post` never blocks beyond the internal slot lock and
/// overwrites an unconsumed message, so at most one is pending.
pub struct CompletionSignal<T> {
    slot: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T> CompletionSignal<T> {
    pub const fn new() -> Self {
        CompletionSignal {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Raise the signal with `msg`.
    pub fn post(&self, msg: T) {
        *self.slot.lock() = Some(msg);
        self.ready.notify_one();
    }

    /// Wait up to `timeout` for a message.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        loop {
            if let Some(msg) = slot.take() {
                return Some(msg);
            }
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                return slot.take();
            }
        }
    }

    /// Discard a message left over from an earlier cycle.
    pub fn reset(&self) -> Option<T> {
        self.slot.lock().take()
    }

    pub fn is_signaled(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl<T> Default for CompletionSignal<T> {
    fn default() -> Self {
        CompletionSignal::new()
    }
}
