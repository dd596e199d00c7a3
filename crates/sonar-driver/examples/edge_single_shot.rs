use std::sync::Arc;

use sonar_driver::sim::{EchoModel, EventLog, SimClock, SimEchoLine};
use sonar_driver::*;

fn main() {
    let window = TimingWindow::HC_SR04;
    let clock = Arc::new(SimClock::new(TickRate::MHZ_1));
    let shared = EdgeShared::new(window, clock.clone());

    let config = DeviceConfiguration::edge("front", 3, 4);
    let echo = SimEchoLine::new(config.echo_pin, EchoModel::at_distance(1_234), clock, EventLog::new());
    let trigger = echo.trigger_pin(config.trigger_pin, config.trigger_flags);

    println!("Initializing edge-timed sensor...");
    println!("  Timing window: {}", window);
    println!("  Trigger pin:   {}", config.trigger_pin);
    println!("  Echo pin:      {}", config.echo_pin);

    let sensor = match EdgeSensor::new(&config, shared, trigger, echo, SpinDelay::new()) {
        Ok(sensor) => sensor,
        Err(e) => {
            eprintln!("Failed to initialize sensor: {}", e);
            return;
        }
    };

    for i in 0..5 {
        match sensor.fetch(SensorChannel::All).and_then(|_| sensor.get(SensorChannel::Distance)) {
            Ok(sample) => println!("Shot {:>2}: {}", i + 1, sample),
            Err(e) => eprintln!("Shot {:>2} failed: {}", i + 1, e),
        }
    }
}
