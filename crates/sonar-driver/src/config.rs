//! Data-driven device table.
//!
//! Every sensor is one [`DeviceConfiguration`] record; the table is read
//! from TOML and validated once at startup, then each record is handed to
//! the generic constructor of its variant.

use std::collections::HashSet;
use std::fmt;

use ::config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hal::PinFlags;
use crate::sensor::MAX_INSTANCES;

/// Which measurement engine drives a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Edge notifications timestamped against a free-running tick clock.
    Edge,
    /// Trigger, capture and completion chained through the event router.
    Pipeline,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Edge => write!(f, "edge"),
            Variant::Pipeline => write!(f, "pipeline"),
        }
    }
}

/// Timer, router and software-event instances used by the pipeline variant.
///
/// These are singletons, so every pipeline sensor must agree on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeripheralSelection {
    pub timer: u8,
    pub router: u8,
    pub software_event: u8,
}

impl Default for PeripheralSelection {
    fn default() -> Self {
        PeripheralSelection {
            timer: 1,
            router: 0,
            software_event: 0,
        }
    }
}

/// Simulated target in front of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Distance to the target.
    pub distance_mm: u32,
    /// Uniform noise added to every echo, plus or minus.
    pub jitter_mm: u32,
    /// The sensor never answers.
    pub no_echo: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            distance_mm: 1_000,
            jitter_mm: 0,
            no_echo: false,
        }
    }
}

/// Immutable per-instance record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfiguration {
    pub name: String,
    pub variant: Variant,
    pub trigger_pin: u8,
    pub echo_pin: u8,
    #[serde(default)]
    pub trigger_flags: PinFlags,
    #[serde(default)]
    pub echo_flags: PinFlags,
    /// Pipeline only; must match [`DeviceTable::pipeline`] when present.
    #[serde(default)]
    pub peripherals: Option<PeripheralSelection>,
    #[serde(default)]
    pub simulation: Option<SimulationConfig>,
}

impl DeviceConfiguration {
    /// An edge-variant record with default flags.
    pub fn edge(name: impl Into<String>, trigger_pin: u8, echo_pin: u8) -> Self {
        DeviceConfiguration {
            name: name.into(),
            variant: Variant::Edge,
            trigger_pin,
            echo_pin,
            trigger_flags: PinFlags::default(),
            echo_flags: PinFlags::default(),
            peripherals: None,
            simulation: None,
        }
    }

    /// A pipeline-variant record using the shared peripheral selection.
    pub fn pipeline(name: impl Into<String>, trigger_pin: u8, echo_pin: u8) -> Self {
        DeviceConfiguration {
            variant: Variant::Pipeline,
            ..DeviceConfiguration::edge(name, trigger_pin, echo_pin)
        }
    }

    pub fn with_simulation(mut self, simulation: SimulationConfig) -> Self {
        self.simulation = Some(simulation);
        self
    }
}

/// Errors found while loading or validating a [`DeviceTable`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read device table: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("duplicate sensor name {0:?}")]
    DuplicateName(String),
    #[error("sensor {name:?}: trigger and echo share pin {pin}")]
    SharedPin { name: String, pin: u8 },
    #[error("{count} {variant} sensors configured, at most {max} are supported", max = MAX_INSTANCES)]
    TooManyInstances { variant: Variant, count: usize },
    #[error("sensor {0:?}: peripheral selection differs from the shared [pipeline] selection")]
    InconsistentPeripherals(String),
    #[error("sensor {0:?}: peripheral selection is only meaningful for the pipeline variant")]
    UnexpectedPeripherals(String),
}

/// All sensors of the process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTable {
    #[serde(default)]
    pub pipeline: PeripheralSelection,
    #[serde(default)]
    pub sensors: Vec<DeviceConfiguration>,
}

impl DeviceTable {
    /// Parse and validate a table from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let table: DeviceTable = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        table.validate()?;
        Ok(table)
    }

    /// Check the cross-record rules a single record cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for sensor in &self.sensors {
            if !names.insert(sensor.name.as_str()) {
                return Err(ConfigError::DuplicateName(sensor.name.clone()));
            }
            if sensor.trigger_pin == sensor.echo_pin {
                return Err(ConfigError::SharedPin {
                    name: sensor.name.clone(),
                    pin: sensor.trigger_pin,
                });
            }
            match (sensor.variant, sensor.peripherals) {
                (Variant::Pipeline, Some(sel)) if sel != self.pipeline => {
                    return Err(ConfigError::InconsistentPeripherals(sensor.name.clone()));
                }
                (Variant::Edge, Some(_)) => {
                    return Err(ConfigError::UnexpectedPeripherals(sensor.name.clone()));
                }
                _ => {}
            }
        }

        for variant in [Variant::Edge, Variant::Pipeline] {
            let count = self.of_variant(variant).count();
            if count > MAX_INSTANCES {
                return Err(ConfigError::TooManyInstances { variant, count });
            }
        }
        Ok(())
    }

    /// Records of one variant, in table order.
    pub fn of_variant(&self, variant: Variant) -> impl Iterator<Item = &DeviceConfiguration> {
        self.sensors.iter().filter(move |s| s.variant == variant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::Pull;

    const TABLE: &str = r#"
        [pipeline]
        timer = 2

        [[sensors]]
        name = "front"
        variant = "edge"
        trigger_pin = 3
        echo_pin = 4
        trigger_flags = { active_low = true }
        echo_flags = { pull = "down" }

        [[sensors]]
        name = "rear"
        variant = "pipeline"
        trigger_pin = 5
        echo_pin = 6
        peripherals = { timer = 2 }

        [sensors.simulation]
        distance_mm = 1500
        jitter_mm = 3
    "#;

    #[test]
    fn test_parse_table() {
        let table = DeviceTable::from_toml_str(TABLE).unwrap();
        assert_eq!(table.pipeline, PeripheralSelection { timer: 2, router: 0, software_event: 0 });
        assert_eq!(table.sensors.len(), 2);

        let front = &table.sensors[0];
        assert_eq!(front.variant, Variant::Edge);
        assert!(front.trigger_flags.active_low);
        assert_eq!(front.echo_flags.pull, Pull::Down);
        assert_eq!(front.simulation, None);

        let rear = &table.sensors[1];
        assert_eq!(rear.variant, Variant::Pipeline);
        assert_eq!(
            rear.simulation,
            Some(SimulationConfig { distance_mm: 1500, jitter_mm: 3, no_echo: false })
        );
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let table = DeviceTable {
            pipeline: PeripheralSelection::default(),
            sensors: vec![DeviceConfiguration::edge("a", 1, 2), DeviceConfiguration::pipeline("a", 3, 4)],
        };
        assert!(matches!(table.validate(), Err(ConfigError::DuplicateName(n)) if n == "a"));
    }

    #[test]
    fn test_shared_pin_is_rejected() {
        let table = DeviceTable {
            sensors: vec![DeviceConfiguration::edge("a", 7, 7)],
            ..Default::default()
        };
        assert!(matches!(table.validate(), Err(ConfigError::SharedPin { pin: 7, .. })));
    }

    #[test]
    fn test_instance_limit_is_per_variant() {
        let mut sensors: Vec<_> = (0..MAX_INSTANCES as u8)
            .map(|i| DeviceConfiguration::edge(format!("e{i}"), 2 * i, 2 * i + 1))
            .collect();
        sensors.extend(
            (0..MAX_INSTANCES as u8).map(|i| DeviceConfiguration::pipeline(format!("p{i}"), 2 * i, 2 * i + 1)),
        );
        let mut table = DeviceTable { sensors, ..Default::default() };
        assert!(table.validate().is_ok());

        table.sensors.push(DeviceConfiguration::pipeline("one_more", 30, 31));
        assert!(matches!(
            table.validate(),
            Err(ConfigError::TooManyInstances { variant: Variant::Pipeline, count: 9 })
        ));
    }

    #[test]
    fn test_inconsistent_peripherals_are_rejected() {
        let mut rear = DeviceConfiguration::pipeline("rear", 1, 2);
        rear.peripherals = Some(PeripheralSelection { timer: 3, ..Default::default() });
        let table = DeviceTable { sensors: vec![rear], ..Default::default() };
        assert!(matches!(table.validate(), Err(ConfigError::InconsistentPeripherals(_))));
    }

    #[test]
    fn test_unknown_variant_fails_to_load() {
        let text = r#"
            [[sensors]]
            name = "x"
            variant = "laser"
            trigger_pin = 1
            echo_pin = 2
        "#;
        assert!(matches!(DeviceTable::from_toml_str(text), Err(ConfigError::Load(_))));
    }
}
