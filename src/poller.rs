use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sonar_driver::{DistanceSample, DistanceSensor, SensorChannel, SensorError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::settings::PollSettings;

/// Outcome counts of a finished polling run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub readings: u64,
    /// Fetches that failed with an I/O error, including no response.
    pub misses: u64,
    /// Fetches that failed for any other reason.
    pub errors: u64,
}

/// Result of one fetch and get.
enum Measurement {
    Sample(DistanceSample),
    FetchFailed(SensorError),
    GetFailed(SensorError),
}

/// Fetches every sensor once per tick, in configuration order.
pub struct Poller {
    sensors: Vec<Arc<dyn DistanceSensor>>,
    interval: Duration,
    cycles: u64,
}

impl Poller {
    pub fn new(sensors: Vec<Arc<dyn DistanceSensor>>, settings: &PollSettings) -> Self {
        Poller {
            sensors,
            interval: Duration::from_millis(settings.interval_ms.max(1)),
            cycles: settings.cycles,
        }
    }

    /// Poll until the configured number of rounds is done.
    ///
    /// Failed fetches are logged and the sensor is tried again next round.
    /// Only a failing `get` after a successful fetch ends the run.
    pub async fn run(&self) -> anyhow::Result<PollSummary> {
        info!(sensors = self.sensors.len(), interval = ?self.interval, "Polling started.");
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut summary = PollSummary::default();
        let mut round = 0u64;

        while self.cycles == 0 || round < self.cycles {
            tick.tick().await;
            for sensor in &self.sensors {
                let name = sensor.name().to_string();
                match measure(Arc::clone(sensor)).await? {
                    Measurement::Sample(sample) => {
                        info!("{name}: {sample}");
                        summary.readings += 1;
                    }
                    Measurement::FetchFailed(SensorError::Io(e)) => {
                        warn!(sensor = %name, error = %e, "could not read device");
                        summary.misses += 1;
                    }
                    Measurement::FetchFailed(e) => {
                        error!(sensor = %name, error = %e, "Error when reading device");
                        summary.errors += 1;
                    }
                    Measurement::GetFailed(e) => {
                        error!(sensor = %name, error = %e, "reading the sample failed, stopping");
                        return Err(e).with_context(|| format!("sensor {name}"));
                    }
                }
            }
            round += 1;
            debug!(round, "round complete");
        }
        Ok(summary)
    }
}

/// One fetch and get, off the async runtime since fetch blocks.
async fn measure(sensor: Arc<dyn DistanceSensor>) -> anyhow::Result<Measurement> {
    tokio::task::spawn_blocking(move || {
        if let Err(e) = sensor.fetch(SensorChannel::All) {
            return Measurement::FetchFailed(e);
        }
        match sensor.get(SensorChannel::Distance) {
            Ok(sample) => Measurement::Sample(sample),
            Err(e) => Measurement::GetFailed(e),
        }
    })
    .await
    .context("measurement task failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use sonar_driver::sim::SimBench;
    use sonar_driver::pipeline::FabricError;
    use sonar_driver::{DeviceConfiguration, DeviceTable, IoError, SimulationConfig, TimingWindow};

    struct Scripted {
        fetches: Mutex<Vec<Result<(), SensorError>>>,
        get_fails: bool,
    }

    impl Scripted {
        /// Fetch results are returned in order.
        fn new(mut fetches: Vec<Result<(), SensorError>>) -> Self {
            fetches.reverse();
            Scripted { fetches: Mutex::new(fetches), get_fails: false }
        }
    }

    impl DistanceSensor for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn fetch(&self, _channel: SensorChannel) -> Result<(), SensorError> {
            self.fetches.lock().pop().unwrap_or(Ok(()))
        }

        fn get(&self, _channel: SensorChannel) -> Result<DistanceSample, SensorError> {
            if self.get_fails {
                return Err(SensorError::NotReady);
            }
            Ok(DistanceSample::from_micrometers(1_250_000))
        }
    }

    fn settings(cycles: u64) -> PollSettings {
        PollSettings { interval_ms: 5, cycles }
    }

    #[tokio::test]
    async fn test_no_response_is_skipped() {
        let sensor = Scripted::new(vec![Ok(()), Err(IoError::NoResponse.into()), Ok(())]);
        let poller = Poller::new(vec![Arc::new(sensor)], &settings(3));
        let summary = poller.run().await.unwrap();
        assert_eq!(summary, PollSummary { readings: 2, misses: 1, errors: 0 });
    }

    #[tokio::test]
    async fn test_setup_failure_keeps_polling() {
        let sensor = Scripted::new(vec![Err(IoError::Fabric(FabricError::PinInUse(5)).into()), Ok(()), Ok(())]);
        let poller = Poller::new(vec![Arc::new(sensor)], &settings(3));
        let summary = poller.run().await.unwrap();
        assert_eq!(summary, PollSummary { readings: 2, misses: 1, errors: 0 });
    }

    #[tokio::test]
    async fn test_other_fetch_errors_keep_polling() {
        let sensor = Scripted::new(vec![
            Ok(()),
            Err(SensorError::NotReady),
            Err(SensorError::Unsupported(SensorChannel::Proximity)),
        ]);
        let poller = Poller::new(vec![Arc::new(sensor)], &settings(4));
        let summary = poller.run().await.unwrap();
        assert_eq!(summary, PollSummary { readings: 2, misses: 0, errors: 2 });
    }

    #[tokio::test]
    async fn test_failed_get_stops_the_run() {
        let sensor = Scripted { get_fails: true, ..Scripted::new(Vec::new()) };
        let poller = Poller::new(vec![Arc::new(sensor)], &settings(5));
        let err = poller.run().await.unwrap_err();
        assert_eq!(err.downcast_ref::<SensorError>(), Some(&SensorError::NotReady));
    }

    #[tokio::test]
    async fn test_polls_simulated_sensors() {
        let table = DeviceTable {
            sensors: vec![
                DeviceConfiguration::edge("front", 3, 4),
                DeviceConfiguration::pipeline("rear", 5, 6).with_simulation(SimulationConfig {
                    no_echo: true,
                    ..Default::default()
                }),
            ],
            ..Default::default()
        };
        let bench = SimBench::from_table(&table, TimingWindow::HC_SR04).unwrap();
        let poller = Poller::new(bench.sensors().to_vec(), &settings(2));
        let summary = poller.run().await.unwrap();
        assert_eq!(summary, PollSummary { readings: 2, misses: 2, errors: 0 });
    }
}
