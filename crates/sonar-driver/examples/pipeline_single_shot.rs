use sonar_driver::pipeline::Peripherals;
use sonar_driver::sim::{EchoModel, SimChip};
use sonar_driver::*;

fn main() {
    let window = TimingWindow::HC_SR04;
    let chip = SimChip::new();
    let (router, timer, pins, event) = chip.split();
    let shared = PipelineShared::new(
        PeripheralSelection::default(),
        window,
        Peripherals { router, timer, pins, event },
    );

    let near = DeviceConfiguration::pipeline("near", 5, 6);
    let far = DeviceConfiguration::pipeline("far", 7, 8);
    chip.attach_sensor(near.trigger_pin, near.echo_pin, EchoModel::at_distance(420));
    chip.attach_sensor(far.trigger_pin, far.echo_pin, EchoModel::out_of_range());

    println!("Initializing event pipeline...");
    println!("  Timing window: {}", window);
    println!("  Peripherals:   {:?}", shared.selection());

    let sensors = match PipelineSensor::new(&near, shared.clone())
        .and_then(|near| Ok([near, PipelineSensor::new(&far, shared.clone())?]))
    {
        Ok(sensors) => sensors,
        Err(e) => {
            eprintln!("Failed to initialize pipeline: {}", e);
            return;
        }
    };
    println!("  Router channels in use: {}", chip.allocated_channels());

    for sensor in &sensors {
        match sensor.fetch(SensorChannel::All).and_then(|_| sensor.get(SensorChannel::Distance)) {
            Ok(sample) if sample.is_zero() => println!("{}: nothing in range", sensor.name()),
            Ok(sample) => println!("{}: {}", sensor.name(), sample),
            Err(e) => eprintln!("{}: {}", sensor.name(), e),
        }
    }
}
