use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use sonar_timing::{DistanceSample, TimingWindow};
use tracing::{info, trace};

use super::builder::{PipelineBuilder, PipelineHandle, Peripherals};
use super::fabric::{CaptureTimer, EventRouter, PinEvents, SoftwareEvent};
use super::graph::{ECHO_END_SLOT, ECHO_START_SLOT, InstalledGraph};
use crate::config::{DeviceConfiguration, PeripheralSelection, Variant};
use crate::error::{InitError, SensorError};
use crate::sensor::{DistanceSensor, SensorChannel};
use crate::session::{self, MeasurementCycle};
use crate::shared::SharedTimingResource;

/// Lock-protected state of the pipeline variant.
pub struct PipelineResources<R, T, P, S> {
    periph: Peripherals<R, T, P, S>,
    graph: Option<InstalledGraph>,
}

/// The singleton timer, router and completion event of the pipeline variant.
pub struct PipelineShared<R, T, P, S> {
    selection: PeripheralSelection,
    session: SharedTimingResource<PipelineResources<R, T, P, S>, u8>,
}

impl<R, T, P, S> PipelineShared<R, T, P, S>
where
    R: EventRouter + 'static,
    T: CaptureTimer + 'static,
    P: PinEvents + 'static,
    S: SoftwareEvent + 'static,
{
    /// Take ownership of the peripherals named by `selection`.
    ///
    /// The completion event is routed to the session's signal right away;
    /// the event graph is installed by the first device.
    pub fn new(
        selection: PeripheralSelection,
        window: TimingWindow,
        mut periph: Peripherals<R, T, P, S>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let software_event = selection.software_event;
            periph.event.listen(Arc::new(move |index: u8| {
                if index != software_event {
                    return;
                }
                if let Some(shared) = weak.upgrade() {
                    trace!(index, "completion event");
                    shared.session.completion().post(index);
                }
            }));
            PipelineShared {
                selection,
                session: SharedTimingResource::new("pipeline", window, PipelineResources { periph, graph: None }),
            }
        })
    }

    pub fn selection(&self) -> PeripheralSelection {
        self.selection
    }

    pub fn is_ready(&self) -> bool {
        self.session.is_ready()
    }

    pub fn instance_count(&self) -> usize {
        self.session.instance_count()
    }
}

/// One rangefinder driven by the event pipeline.
pub struct PipelineSensor<R, T, P, S> {
    name: String,
    trigger_pin: u8,
    echo_pin: u8,
    shared: Arc<PipelineShared<R, T, P, S>>,
    sample: RwLock<DistanceSample>,
}

impl<R, T, P, S> PipelineSensor<R, T, P, S>
where
    R: EventRouter,
    T: CaptureTimer,
    P: PinEvents,
    S: SoftwareEvent,
{
    /// Bring up one device.
    ///
    /// The first device installs the event graph using its own pins, which
    /// are released again afterwards; later devices only claim a slot.
    ///
    /// # Errors
    ///
    /// `InitError::Config` if the record is not a pipeline record or names
    /// other peripherals than the shared ones, `ResourceExhausted` past
    /// [`crate::MAX_INSTANCES`] devices, and any fabric failure while
    /// installing the graph.
    pub fn new(
        config: &DeviceConfiguration,
        shared: Arc<PipelineShared<R, T, P, S>>,
    ) -> Result<Self, InitError> {
        if config.variant != Variant::Pipeline {
            return Err(InitError::Config(format!("{} is not a pipeline sensor", config.name)));
        }
        if let Some(selection) = config.peripherals {
            if selection != shared.selection {
                return Err(InitError::Config(format!(
                    "{} selects {:?}, the pipeline is bound to {:?}",
                    config.name, selection, shared.selection
                )));
            }
        }

        shared.session.register_instance()?;

        let window = *shared.session.window();
        let builder = PipelineBuilder::new(shared.selection.software_event);
        let (trigger_pin, echo_pin) = (config.trigger_pin, config.echo_pin);
        let installed = shared
            .session
            .initialize(|res| {
                let trigger_ticks = res.periph.timer.rate().us_to_ticks(window.trigger_pulse_us);
                let graph = builder.install(&mut res.periph, trigger_pin, echo_pin, trigger_ticks)?;
                res.graph = Some(graph);
                Ok(())
            })
            .inspect_err(|_| shared.session.release_instance())?;
        if installed {
            info!(sensor = %config.name, selection = ?shared.selection, "event pipeline installed");
        }

        Ok(PipelineSensor {
            name: config.name.clone(),
            trigger_pin,
            echo_pin,
            shared,
            sample: RwLock::new(DistanceSample::ZERO),
        })
    }

    pub fn trigger_pin(&self) -> u8 {
        self.trigger_pin
    }

    pub fn echo_pin(&self) -> u8 {
        self.echo_pin
    }
}

impl<R, T, P, S> DistanceSensor for PipelineSensor<R, T, P, S>
where
    R: EventRouter,
    T: CaptureTimer,
    P: PinEvents,
    S: SoftwareEvent,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, channel: SensorChannel) -> Result<(), SensorError> {
        let mut cycle = PipelineCycle {
            builder: PipelineBuilder::new(self.shared.selection.software_event),
            trigger_pin: self.trigger_pin,
            echo_pin: self.echo_pin,
            handle: None,
        };
        session::fetch(&self.name, channel, &self.shared.session, &self.sample, &mut cycle).map(|_| ())
    }

    fn get(&self, channel: SensorChannel) -> Result<DistanceSample, SensorError> {
        session::get(&self.name, channel, &self.shared.session, &self.sample)
    }
}

struct PipelineCycle {
    builder: PipelineBuilder,
    trigger_pin: u8,
    echo_pin: u8,
    handle: Option<PipelineHandle>,
}

impl<R, T, P, S> MeasurementCycle<PipelineResources<R, T, P, S>> for PipelineCycle
where
    R: EventRouter,
    T: CaptureTimer,
    P: PinEvents,
    S: SoftwareEvent,
{
    type Completion = u8;

    fn arm(&mut self, res: &mut PipelineResources<R, T, P, S>) -> Result<(), SensorError> {
        let graph = res.graph.as_ref().ok_or(SensorError::NotReady)?;
        let handle = self.builder.build(&mut res.periph, graph, self.trigger_pin, self.echo_pin)?;
        self.handle = Some(handle);
        Ok(())
    }

    fn trigger(&mut self, _res: &mut PipelineResources<R, T, P, S>) -> Result<(), SensorError> {
        // The timer compares raise and lower the trigger.
        Ok(())
    }

    fn disarm(&mut self, res: &mut PipelineResources<R, T, P, S>) -> Result<(), SensorError> {
        let (Some(handle), Some(graph)) = (self.handle.take(), res.graph.as_ref()) else {
            return Ok(());
        };
        handle.teardown(&mut res.periph, graph)?;
        Ok(())
    }

    fn elapsed_us(
        &mut self,
        res: &mut PipelineResources<R, T, P, S>,
        _completion: &u8,
    ) -> Result<u32, SensorError> {
        let timer = &res.periph.timer;
        let start = timer.capture(ECHO_START_SLOT)?;
        let end = timer.capture(ECHO_END_SLOT)?;
        let ticks = end.wrapping_sub(start) & timer.max_count();
        Ok(timer.rate().ticks_to_us_near(ticks))
    }
}
