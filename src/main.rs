mod poller;
mod settings;

use anyhow::Context;
use sonar_driver::TimingWindow;
use sonar_driver::sim::SimBench;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::poller::Poller;
use crate::settings::{DEFAULT_CONFIG_PATH, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let settings = Settings::load(DEFAULT_CONFIG_PATH).context("loading settings")?;
    let window = TimingWindow::HC_SR04;
    info!(%window, "Sonar started. Bringing up sensors...");

    let bench = SimBench::from_table(&settings.devices, window).context("bringing up sensors")?;
    let poller = Poller::new(bench.sensors().to_vec(), &settings.poll);
    let summary = poller.run().await?;

    info!(
        readings = summary.readings,
        misses = summary.misses,
        errors = summary.errors,
        "Polling finished."
    );
    Ok(())
}
