use std::sync::Arc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{Error as _, OutputPin};
use parking_lot::{Mutex, RwLock};
use sonar_timing::{DistanceSample, TimingWindow};
use tracing::{debug, trace};

use super::fsm::{EdgeCompletion, EdgeOutcome, EdgeTimingStateMachine, FsmState};
use crate::config::{DeviceConfiguration, Variant};
use crate::error::{InitError, IoError, SensorError};
use crate::hal::{Edge, EdgeInput, EdgeSink, EdgeSubscription, PinFlags, TickClock};
use crate::sensor::{DistanceSensor, SensorChannel};
use crate::session::{self, MeasurementCycle};
use crate::shared::SharedTimingResource;

/// The singleton tick clock and state machine of the edge variant.
///
/// Also the sink of every echo notification: the handler timestamps the
/// edge, steps the state machine and posts the completion.
pub struct EdgeShared {
    session: SharedTimingResource<(), EdgeCompletion>,
    fsm: Mutex<EdgeTimingStateMachine>,
    clock: Arc<dyn TickClock>,
}

impl EdgeShared {
    pub fn new(window: TimingWindow, clock: Arc<dyn TickClock>) -> Arc<Self> {
        Arc::new(EdgeShared {
            session: SharedTimingResource::new("edge", window, ()),
            fsm: Mutex::new(EdgeTimingStateMachine::new()),
            clock,
        })
    }

    pub fn state(&self) -> FsmState {
        self.fsm.lock().state()
    }

    pub fn is_ready(&self) -> bool {
        self.session.is_ready()
    }

    pub fn instance_count(&self) -> usize {
        self.session.instance_count()
    }
}

impl EdgeSink for EdgeShared {
    fn on_edge(&self, edge: Edge, subscription: &EdgeSubscription) {
        let now = self.clock.now();
        let outcome = self.fsm.lock().on_edge(edge, now);
        match outcome {
            EdgeOutcome::EchoStarted => {}
            EdgeOutcome::EchoFinished(completion) => {
                subscription.cancel();
                self.session.completion().post(completion);
            }
            EdgeOutcome::Rejected => {
                subscription.cancel();
                trace!(?edge, "edge rejected, subscription cancelled");
            }
        }
    }
}

struct EdgeIo<P, E, D> {
    trigger: P,
    echo: E,
    delay: D,
}

/// One rangefinder timed by edge notifications.
pub struct EdgeSensor<P, E, D> {
    name: String,
    trigger_pin: u8,
    echo_pin: u8,
    trigger_flags: PinFlags,
    shared: Arc<EdgeShared>,
    io: Mutex<EdgeIo<P, E, D>>,
    sample: RwLock<DistanceSample>,
}

impl<P, E, D> EdgeSensor<P, E, D>
where
    P: OutputPin + Send,
    E: EdgeInput,
    D: DelayNs + Send,
{
    /// Configure the device pins and claim a slot in the shared resource.
    ///
    /// The trigger is driven to its inactive level and the echo input is
    /// set up for both edges. The first device also initializes the shared
    /// state machine.
    pub fn new(
        config: &DeviceConfiguration,
        shared: Arc<EdgeShared>,
        mut trigger: P,
        mut echo: E,
        delay: D,
    ) -> Result<Self, InitError> {
        if config.variant != Variant::Edge {
            return Err(InitError::Config(format!("{} is not an edge sensor", config.name)));
        }
        shared.session.register_instance()?;
        if let Err(e) = Self::prepare(config, &shared, &mut trigger, &mut echo) {
            shared.session.release_instance();
            return Err(e);
        }

        Ok(EdgeSensor {
            name: config.name.clone(),
            trigger_pin: config.trigger_pin,
            echo_pin: config.echo_pin,
            trigger_flags: config.trigger_flags,
            shared,
            io: Mutex::new(EdgeIo { trigger, echo, delay }),
            sample: RwLock::new(DistanceSample::ZERO),
        })
    }

    fn prepare(config: &DeviceConfiguration, shared: &EdgeShared, trigger: &mut P, echo: &mut E) -> Result<(), InitError> {
        set_trigger(trigger, config.trigger_flags, false).map_err(|kind| InitError::Pin {
            pin: config.trigger_pin,
            kind,
        })?;
        echo.configure(config.echo_flags).map_err(|e| InitError::Pin {
            pin: config.echo_pin,
            kind: e.kind(),
        })?;

        if shared.session.initialize(|_| {
            *shared.fsm.lock() = EdgeTimingStateMachine::new();
            Ok(())
        })? {
            debug!(sensor = %config.name, rate_hz = shared.clock.rate().hz(), "edge timing initialized");
        }
        Ok(())
    }
}

impl<P, E, D> DistanceSensor for EdgeSensor<P, E, D>
where
    P: OutputPin + Send,
    E: EdgeInput,
    D: DelayNs + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, channel: SensorChannel) -> Result<(), SensorError> {
        let mut io = self.io.lock();
        let mut cycle = EdgeCycle {
            shared: &self.shared,
            io: &mut io,
            trigger_pin: self.trigger_pin,
            echo_pin: self.echo_pin,
            trigger_flags: self.trigger_flags,
            subscription: None,
        };
        session::fetch(&self.name, channel, &self.shared.session, &self.sample, &mut cycle).map(|_| ())
    }

    fn get(&self, channel: SensorChannel) -> Result<DistanceSample, SensorError> {
        session::get(&self.name, channel, &self.shared.session, &self.sample)
    }
}

struct EdgeCycle<'a, P, E, D> {
    shared: &'a Arc<EdgeShared>,
    io: &'a mut EdgeIo<P, E, D>,
    trigger_pin: u8,
    echo_pin: u8,
    trigger_flags: PinFlags,
    subscription: Option<EdgeSubscription>,
}

impl<P, E, D> EdgeCycle<'_, P, E, D>
where
    P: OutputPin,
    E: EdgeInput,
{
    fn echo_error(&self, e: E::Error) -> SensorError {
        IoError::Pin { pin: self.echo_pin, kind: e.kind() }.into()
    }

    fn trigger_error(&self, kind: embedded_hal::digital::ErrorKind) -> SensorError {
        IoError::Pin { pin: self.trigger_pin, kind }.into()
    }
}

impl<P, E, D> MeasurementCycle<()> for EdgeCycle<'_, P, E, D>
where
    P: OutputPin,
    E: EdgeInput,
    D: DelayNs,
{
    type Completion = EdgeCompletion;

    fn arm(&mut self, _res: &mut ()) -> Result<(), SensorError> {
        self.shared.fsm.lock().arm();
        let sink: Arc<dyn EdgeSink> = Arc::clone(self.shared) as Arc<dyn EdgeSink>;
        let subscription = EdgeSubscription::new(sink);
        self.io
            .echo
            .attach(subscription.clone())
            .map_err(|e| self.echo_error(e))?;
        self.subscription = Some(subscription);
        Ok(())
    }

    fn trigger(&mut self, _res: &mut ()) -> Result<(), SensorError> {
        let pulse_us = self.shared.session.window().trigger_pulse_us;
        set_trigger(&mut self.io.trigger, self.trigger_flags, true).map_err(|k| self.trigger_error(k))?;
        self.io.delay.delay_us(pulse_us);
        set_trigger(&mut self.io.trigger, self.trigger_flags, false).map_err(|k| self.trigger_error(k))
    }

    fn disarm(&mut self, _res: &mut ()) -> Result<(), SensorError> {
        // Edges already queued by the input must not reach the next cycle.
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
        self.io.echo.detach().map_err(|e| self.echo_error(e))
    }

    fn elapsed_us(&mut self, _res: &mut (), completion: &EdgeCompletion) -> Result<u32, SensorError> {
        let state = self.shared.state();
        assert_eq!(
            state,
            FsmState::Finished,
            "completion posted while the edge state machine is {state:?}"
        );
        Ok(self.shared.clock.rate().ticks_to_us_near(completion.elapsed_ticks()))
    }
}

/// Drive the trigger to its asserted or inactive level.
fn set_trigger<P: OutputPin>(
    pin: &mut P,
    flags: PinFlags,
    asserted: bool,
) -> Result<(), embedded_hal::digital::ErrorKind> {
    let high = asserted != flags.active_low;
    let result = if high { pin.set_high() } else { pin.set_low() };
    result.map_err(|e| e.kind())
}
