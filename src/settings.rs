use config::{Config, ConfigBuilder, Environment, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use sonar_driver::{ConfigError, DeviceTable};
use tracing::{error, info};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Polling schedule of the sample application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub interval_ms: u64,
    /// Number of rounds over all sensors; 0 polls forever.
    pub cycles: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        PollSettings {
            interval_ms: 25,
            cycles: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub poll: PollSettings,
    #[serde(flatten)]
    pub devices: DeviceTable,
}

impl Settings {
    /// Read `path`, then apply `SONAR__SECTION__KEY` environment overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        info!("Attempting to load configuration from {}", path);
        let builder = Config::builder()
            .add_source(File::new(path, FileFormat::Toml).required(true))
            .add_source(Environment::with_prefix("SONAR").separator("__").try_parsing(true));

        match Settings::build(builder) {
            Ok(settings) => {
                info!(sensors = settings.devices.sensors.len(), "Successfully loaded configuration");
                Ok(settings)
            }
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                Err(e)
            }
        }
    }

    #[cfg(test)]
    fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Settings::build(Config::builder().add_source(File::from_str(text, FileFormat::Toml)))
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.devices.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonar_driver::Variant;

    #[test]
    fn test_default_file_loads() {
        let settings = Settings::load(DEFAULT_CONFIG_PATH).unwrap();
        assert_eq!(settings.poll.interval_ms, 25);
        assert!(!settings.devices.sensors.is_empty());
        assert!(settings.devices.of_variant(Variant::Edge).count() > 0);
        assert!(settings.devices.of_variant(Variant::Pipeline).count() > 0);
    }

    #[test]
    fn test_poll_section_is_optional() {
        let settings = Settings::from_toml_str(
            r#"
            [[sensors]]
            name = "front"
            variant = "edge"
            trigger_pin = 1
            echo_pin = 2
            "#,
        )
        .unwrap();
        assert_eq!(settings.poll, PollSettings::default());
        assert_eq!(settings.devices.sensors.len(), 1);
    }

    #[test]
    fn test_invalid_table_is_rejected() {
        let result = Settings::from_toml_str(
            r#"
            [poll]
            cycles = 3

            [[sensors]]
            name = "front"
            variant = "edge"
            trigger_pin = 1
            echo_pin = 1
            "#,
        );
        assert!(matches!(result, Err(ConfigError::SharedPin { pin: 1, .. })));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(matches!(Settings::load("config/missing.toml"), Err(ConfigError::Load(_))));
    }
}
