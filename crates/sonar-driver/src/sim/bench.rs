//! Every configured sensor, wired to simulated hardware.

use std::sync::Arc;

use sonar_timing::{TickRate, TimingWindow};
use tracing::info;

use super::chip::{SimChip, SimEgu, SimGpiote, SimRouter, SimTimer};
use super::clock::SimClock;
use super::gpio::{SimEchoLine, SimTriggerPin};
use super::target::EchoModel;
use super::EventLog;
use crate::config::{DeviceTable, SimulationConfig, Variant};
use crate::edge::{EdgeSensor, EdgeShared};
use crate::error::InitError;
use crate::hal::SpinDelay;
use crate::pipeline::{Peripherals, PipelineSensor, PipelineShared};
use crate::sensor::DistanceSensor;

pub type SimEdgeSensor = EdgeSensor<SimTriggerPin, SimEchoLine, SpinDelay>;
pub type SimPipelineSensor = PipelineSensor<SimRouter, SimTimer, SimGpiote, SimEgu>;
pub type SimPipelineShared = PipelineShared<SimRouter, SimTimer, SimGpiote, SimEgu>;

/// The sensors of a [`DeviceTable`] on simulated hardware.
pub struct SimBench {
    sensors: Vec<Arc<dyn DistanceSensor>>,
    log: EventLog,
    clock: Arc<SimClock>,
    chip: SimChip,
    edge: Arc<EdgeShared>,
    pipeline: Arc<SimPipelineShared>,
}

impl SimBench {
    /// Build every sensor of `table`, in table order.
    ///
    /// Sensors without a `simulation` block face a target one meter away.
    pub fn from_table(table: &DeviceTable, window: TimingWindow) -> Result<Self, InitError> {
        let log = EventLog::new();
        let clock = Arc::new(SimClock::new(TickRate::MHZ_1));
        let edge = EdgeShared::new(window, clock.clone());

        let chip = SimChip::with_log(log.clone());
        let (router, timer, pins, event) = chip.split();
        let pipeline = PipelineShared::new(
            table.pipeline,
            window,
            Peripherals { router, timer, pins, event },
        );

        let mut sensors: Vec<Arc<dyn DistanceSensor>> = Vec::with_capacity(table.sensors.len());
        for config in &table.sensors {
            let sim = config.simulation.unwrap_or_default();
            let model = EchoModel::from_config(&sim, window);
            let sensor: Arc<dyn DistanceSensor> = match config.variant {
                Variant::Edge => {
                    let echo = SimEchoLine::new(config.echo_pin, model, clock.clone(), log.clone());
                    let trigger = echo.trigger_pin(config.trigger_pin, config.trigger_flags);
                    Arc::new(EdgeSensor::new(config, edge.clone(), trigger, echo, SpinDelay::new())?)
                }
                Variant::Pipeline => {
                    chip.attach_sensor(config.trigger_pin, config.echo_pin, model);
                    Arc::new(PipelineSensor::new(config, pipeline.clone())?)
                }
            };
            info!(sensor = %config.name, variant = %config.variant, target = %describe(&sim), "sensor ready");
            sensors.push(sensor);
        }

        Ok(SimBench {
            sensors,
            log,
            clock,
            chip,
            edge,
            pipeline,
        })
    }

    pub fn sensors(&self) -> &[Arc<dyn DistanceSensor>] {
        &self.sensors
    }

    /// Look a sensor up by name.
    pub fn sensor(&self, name: &str) -> Option<Arc<dyn DistanceSensor>> {
        self.sensors.iter().find(|s| s.name() == name).cloned()
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn clock(&self) -> &Arc<SimClock> {
        &self.clock
    }

    pub fn chip(&self) -> &SimChip {
        &self.chip
    }

    pub fn edge_shared(&self) -> &Arc<EdgeShared> {
        &self.edge
    }

    pub fn pipeline_shared(&self) -> &Arc<SimPipelineShared> {
        &self.pipeline
    }
}

fn describe(sim: &SimulationConfig) -> String {
    if sim.no_echo {
        "silent".to_string()
    } else {
        format!("{} mm ± {} mm", sim.distance_mm, sim.jitter_mm)
    }
}
