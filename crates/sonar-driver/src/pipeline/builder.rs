use tracing::trace;

use super::fabric::{CaptureTimer, EventRouter, FabricError, PinEvents, SoftwareEvent};
use super::graph::{Endpoints, InstalledGraph, TRIG_DOWN_SLOT, TRIG_UP_COUNT, TRIG_UP_SLOT};

/// The peripherals one pipeline variant owns.
pub struct Peripherals<R, T, P, S> {
    pub router: R,
    pub timer: T,
    pub pins: P,
    pub event: S,
}

/// Builds and tears down the per-fetch part of the pipeline.
pub struct PipelineBuilder {
    software_event: u8,
}

impl PipelineBuilder {
    pub fn new(software_event: u8) -> Self {
        PipelineBuilder { software_event }
    }

    /// Program the trigger compares and install the event graph.
    ///
    /// `trigger_ticks` is the trigger pulse width in timer ticks. The pins
    /// used for the initial wiring are released again before returning.
    pub fn install<R, T, P, S>(
        &self,
        periph: &mut Peripherals<R, T, P, S>,
        trigger_pin: u8,
        echo_pin: u8,
        trigger_ticks: u32,
    ) -> Result<InstalledGraph, FabricError>
    where
        R: EventRouter,
        T: CaptureTimer,
        P: PinEvents,
        S: SoftwareEvent,
    {
        periph.timer.set_compare(TRIG_UP_SLOT, TRIG_UP_COUNT)?;
        periph.timer.set_compare(TRIG_DOWN_SLOT, TRIG_UP_COUNT + trigger_ticks)?;

        let ends = self.bind(periph, trigger_pin, echo_pin)?;
        let installed = InstalledGraph::install(&mut periph.router, &ends);
        release_pins(&mut periph.pins, trigger_pin, echo_pin)?;
        installed
    }

    /// Bind the device pins, rebind the graph and start the timer.
    ///
    /// Both arming groups are disabled first, so a group left enabled by a
    /// measurement that timed out cannot capture this cycle's trigger.
    pub fn build<R, T, P, S>(
        &self,
        periph: &mut Peripherals<R, T, P, S>,
        graph: &InstalledGraph,
        trigger_pin: u8,
        echo_pin: u8,
    ) -> Result<PipelineHandle, FabricError>
    where
        R: EventRouter,
        T: CaptureTimer,
        P: PinEvents,
        S: SoftwareEvent,
    {
        graph.disarm(&mut periph.router)?;
        let ends = self.bind(periph, trigger_pin, echo_pin)?;
        if let Err(e) = graph.rebind(&mut periph.router, &ends) {
            let _ = release_pins(&mut periph.pins, trigger_pin, echo_pin);
            return Err(e);
        }
        periph.timer.enable();
        trace!(trigger_pin, echo_pin, "pipeline armed");
        Ok(PipelineHandle { trigger_pin, echo_pin })
    }

    fn bind<R, T, P, S>(
        &self,
        periph: &mut Peripherals<R, T, P, S>,
        trigger_pin: u8,
        echo_pin: u8,
    ) -> Result<Endpoints, FabricError>
    where
        P: PinEvents,
        S: SoftwareEvent,
    {
        let complete = periph.event.trigger_task(self.software_event)?;
        let echo = periph.pins.bind_input(echo_pin)?;
        let trigger = match periph.pins.bind_output(trigger_pin) {
            Ok(task) => task,
            Err(e) => {
                let _ = periph.pins.release(echo_pin);
                return Err(e);
            }
        };
        Ok(Endpoints { trigger, echo, complete })
    }
}

/// Resources a built pipeline holds until teardown.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a built pipeline keeps its pins bound until torn down"]
pub struct PipelineHandle {
    trigger_pin: u8,
    echo_pin: u8,
}

impl PipelineHandle {
    /// Stop the timer, disarm both groups and release the pins.
    ///
    /// Every step runs even if an earlier one fails; the first error wins.
    pub fn teardown<R, T, P, S>(
        self,
        periph: &mut Peripherals<R, T, P, S>,
        graph: &InstalledGraph,
    ) -> Result<(), FabricError>
    where
        R: EventRouter,
        T: CaptureTimer,
        P: PinEvents,
    {
        periph.timer.disable();
        let groups = graph.disarm(&mut periph.router);
        let pins = release_pins(&mut periph.pins, self.trigger_pin, self.echo_pin);
        trace!(trigger_pin = self.trigger_pin, echo_pin = self.echo_pin, "pipeline released");
        groups.and(pins)
    }
}

fn release_pins<P: PinEvents>(pins: &mut P, trigger_pin: u8, echo_pin: u8) -> Result<(), FabricError> {
    let trigger = pins.release(trigger_pin);
    let echo = pins.release(echo_pin);
    trigger.and(echo)
}
