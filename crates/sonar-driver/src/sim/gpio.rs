//! Simulated trigger pin and echo line for the edge variant.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use embedded_hal::digital::{ErrorKind, ErrorType, OutputPin};
use parking_lot::Mutex;

use super::clock::SimClock;
use super::target::EchoModel;
use super::{Activity, EventLog};
use crate::hal::{Edge, EdgeInput, EdgeSubscription, PinFlags, TickClock};

/// Failure injected into a simulated pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimPinError;

impl embedded_hal::digital::Error for SimPinError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

struct LineState {
    pin: u8,
    model: EchoModel,
    clock: Arc<SimClock>,
    flags: Mutex<PinFlags>,
    subscription: Mutex<Option<EdgeSubscription>>,
    fail_attach: AtomicBool,
    log: EventLog,
}

impl LineState {
    /// Play the model's answer to a trigger released now.
    fn respond(self: &Arc<Self>) {
        let pulses = self.model.respond();
        if pulses.is_empty() {
            return;
        }
        let line = Arc::clone(self);
        let released_at = line.clock.now();
        let released = Instant::now();
        thread::spawn(move || {
            for pulse in pulses {
                line.edge_at(released, released_at, pulse.offset_us, Edge::Rising);
                line.edge_at(released, released_at, pulse.offset_us + pulse.width_us, Edge::Falling);
            }
        });
    }

    fn edge_at(&self, released: Instant, released_at: u32, offset_us: u32, edge: Edge) {
        let due = released + Duration::from_micros(u64::from(offset_us));
        spin_sleep::sleep(due.saturating_duration_since(Instant::now()));
        let ticks = self.clock.rate().us_to_ticks(offset_us);
        self.clock.set(released_at.wrapping_add(ticks));

        let subscription = self.subscription.lock().clone();
        if let Some(subscription) = subscription {
            subscription.deliver(edge);
        }
    }
}

/// Echo input of one simulated sensor.
pub struct SimEchoLine {
    state: Arc<LineState>,
}

impl SimEchoLine {
    /// An echo line on `pin` answering triggers with `model`, timestamped on `clock`.
    pub fn new(pin: u8, model: EchoModel, clock: Arc<SimClock>, log: EventLog) -> Self {
        SimEchoLine {
            state: Arc::new(LineState {
                pin,
                model,
                clock,
                flags: Mutex::new(PinFlags::default()),
                subscription: Mutex::new(None),
                fail_attach: AtomicBool::new(false),
                log,
            }),
        }
    }

    /// The trigger pin wired to this sensor.
    pub fn trigger_pin(&self, pin: u8, flags: PinFlags) -> SimTriggerPin {
        SimTriggerPin {
            pin,
            active_low: flags.active_low,
            asserted: false,
            line: Arc::clone(&self.state),
        }
    }

    /// A handle that stays usable after the line is moved into a driver.
    pub fn handle(&self) -> EchoLineHandle {
        EchoLineHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl EdgeInput for SimEchoLine {
    type Error = SimPinError;

    fn configure(&mut self, flags: PinFlags) -> Result<(), SimPinError> {
        *self.state.flags.lock() = flags;
        Ok(())
    }

    fn attach(&mut self, subscription: EdgeSubscription) -> Result<(), SimPinError> {
        if self.state.fail_attach.load(Ordering::Acquire) {
            return Err(SimPinError);
        }
        *self.state.subscription.lock() = Some(subscription);
        self.state.log.record(Activity::Attach, self.state.pin);
        Ok(())
    }

    fn detach(&mut self) -> Result<(), SimPinError> {
        self.state.subscription.lock().take();
        self.state.log.record(Activity::Detach, self.state.pin);
        Ok(())
    }
}

/// Test access to an echo line owned by a driver.
#[derive(Clone)]
pub struct EchoLineHandle {
    state: Arc<LineState>,
}

impl EchoLineHandle {
    /// Make every following `attach` fail.
    pub fn set_attach_failure(&self, fail: bool) {
        self.state.fail_attach.store(fail, Ordering::Release);
    }

    pub fn is_attached(&self) -> bool {
        self.state.subscription.lock().is_some()
    }

    pub fn flags(&self) -> PinFlags {
        *self.state.flags.lock()
    }
}

/// Trigger output of one simulated sensor.
///
/// Releasing the trigger makes the sensor answer on its echo line.
pub struct SimTriggerPin {
    pin: u8,
    active_low: bool,
    asserted: bool,
    line: Arc<LineState>,
}

impl SimTriggerPin {
    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn is_asserted(&self) -> bool {
        self.asserted
    }

    fn drive(&mut self, high: bool) {
        let asserted = high != self.active_low;
        if self.asserted && !asserted {
            self.line.respond();
        }
        self.asserted = asserted;
    }
}

impl ErrorType for SimTriggerPin {
    type Error = Infallible;
}

impl OutputPin for SimTriggerPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.drive(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.drive(true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::EdgeSink;
    use sonar_timing::TickRate;

    struct Recorder {
        clock: Arc<SimClock>,
        edges: Mutex<Vec<(Edge, u32)>>,
    }

    impl EdgeSink for Recorder {
        fn on_edge(&self, edge: Edge, _subscription: &EdgeSubscription) {
            self.edges.lock().push((edge, self.clock.now()));
        }
    }

    #[test]
    fn test_release_plays_echo_with_exact_timestamps() {
        let clock = Arc::new(SimClock::starting_at(TickRate::MHZ_1, 1_000));
        let mut echo = SimEchoLine::new(2, EchoModel::fixed_pulse(300), Arc::clone(&clock), EventLog::new());
        let mut trigger = echo.trigger_pin(1, PinFlags::default());
        let recorder = Arc::new(Recorder { clock: Arc::clone(&clock), edges: Mutex::new(Vec::new()) });
        echo.attach(EdgeSubscription::new(recorder.clone())).unwrap();

        trigger.set_high().unwrap();
        trigger.set_low().unwrap();
        thread::sleep(Duration::from_millis(20));

        let edges = recorder.edges.lock().clone();
        assert_eq!(edges, vec![(Edge::Rising, 1_450), (Edge::Falling, 1_750)]);
    }

    #[test]
    fn test_active_low_trigger_answers_on_rising_level() {
        let clock = Arc::new(SimClock::default());
        let echo = SimEchoLine::new(2, EchoModel::fixed_pulse(100), clock, EventLog::new());
        let mut trigger = echo.trigger_pin(1, PinFlags { active_low: true, ..Default::default() });
        trigger.set_high().unwrap();
        assert!(!trigger.is_asserted());
        trigger.set_low().unwrap();
        assert!(trigger.is_asserted());
        trigger.set_high().unwrap();
        assert!(!trigger.is_asserted());
    }

    #[test]
    fn test_injected_attach_failure() {
        let mut echo = SimEchoLine::new(2, EchoModel::silent(), Arc::new(SimClock::default()), EventLog::new());
        let handle = echo.handle();
        handle.set_attach_failure(true);
        let recorder = Arc::new(Recorder { clock: Arc::new(SimClock::default()), edges: Mutex::new(Vec::new()) });
        assert_eq!(echo.attach(EdgeSubscription::new(recorder)), Err(SimPinError));
        assert!(!handle.is_attached());
    }
}
