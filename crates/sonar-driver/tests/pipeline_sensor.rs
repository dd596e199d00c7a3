use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use sonar_driver::pipeline::{FabricError, Peripherals, PinEvents};
use sonar_driver::sim::{Activity, EchoModel, EventLog, SimChip, SimPipelineSensor, SimPipelineShared};
use sonar_driver::{
    DeviceConfiguration, DistanceSample, DistanceSensor, InitError, IoError, MAX_INSTANCES, PeripheralSelection,
    PipelineSensor, PipelineShared, SensorChannel, SensorError, TimingWindow,
};

/// Route driver logs to the test output. Set `RUST_LOG=sonar_driver=debug` to see them.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Rig {
    chip: SimChip,
    shared: Arc<SimPipelineShared>,
    log: EventLog,
}

impl Rig {
    fn new() -> Self {
        init_logging();
        let log = EventLog::new();
        let chip = SimChip::with_log(log.clone());
        let (router, timer, pins, event) = chip.split();
        let shared = PipelineShared::new(
            PeripheralSelection::default(),
            TimingWindow::HC_SR04,
            Peripherals { router, timer, pins, event },
        );
        Rig { chip, shared, log }
    }

    fn sensor(&self, name: &str, trigger_pin: u8, echo_pin: u8, model: EchoModel) -> SimPipelineSensor {
        self.sensor_with(DeviceConfiguration::pipeline(name, trigger_pin, echo_pin), model)
            .expect("sensor init")
    }

    fn sensor_with(&self, config: DeviceConfiguration, model: EchoModel) -> Result<SimPipelineSensor, InitError> {
        self.chip.attach_sensor(config.trigger_pin, config.echo_pin, model);
        PipelineSensor::new(&config, self.shared.clone())
    }

    fn assert_idle(&self) {
        assert!(!self.chip.timer_running());
        assert!(!self.chip.any_group_enabled());
        assert!(self.chip.bound_pins().is_empty());
    }
}

fn expected(width_us: u32) -> DistanceSample {
    TimingWindow::HC_SR04.classify(width_us).sample()
}

#[test]
fn test_first_device_installs_graph_and_releases_its_pins() {
    let rig = Rig::new();
    assert!(!rig.shared.is_ready());
    let sensor = rig.sensor("front", 3, 4, EchoModel::silent());
    assert!(rig.shared.is_ready());
    assert_eq!(rig.chip.allocated_channels(), 7);
    rig.assert_idle();
    assert_eq!((sensor.trigger_pin(), sensor.echo_pin()), (3, 4));

    rig.sensor("rear", 5, 6, EchoModel::silent());
    assert_eq!(rig.chip.allocated_channels(), 7);
    assert_eq!(rig.shared.instance_count(), 2);
}

#[test]
fn test_valid_widths_produce_exact_samples() {
    let rig = Rig::new();
    for (i, width) in [12, 150, 5_883, 24_999].into_iter().enumerate() {
        let pin = 2 * i as u8;
        let sensor = rig.sensor(&format!("front-{i}"), pin, pin + 1, EchoModel::fixed_pulse(width));
        sensor.fetch(SensorChannel::All).unwrap();
        assert_eq!(sensor.get(SensorChannel::Distance).unwrap(), expected(width), "width {width}");
        rig.assert_idle();
    }
}

#[test]
fn test_one_meter_target() {
    let rig = Rig::new();
    let sensor = rig.sensor("front", 3, 4, EchoModel::at_distance(1_000));
    sensor.fetch(SensorChannel::Distance).unwrap();
    let sample = sensor.get(SensorChannel::Distance).unwrap();
    assert!((sample.as_micrometers() - 1_000_000).abs() <= 200, "sample {sample}");
    assert_eq!((sample.meters(), sample.micros()), (0, 999_940));
}

#[test]
fn test_out_of_range_reads_zero_after_drain() {
    let rig = Rig::new();
    let far = rig.sensor("far", 3, 4, EchoModel::out_of_range());
    let near = rig.sensor("near", 5, 6, EchoModel::fixed_pulse(1_500));

    let started = Instant::now();
    far.fetch(SensorChannel::All).unwrap();
    assert!(started.elapsed() >= Duration::from_micros(38_000 + 450 + 145));
    assert_eq!(far.get(SensorChannel::Distance).unwrap(), DistanceSample::ZERO);
    rig.assert_idle();

    near.fetch(SensorChannel::All).unwrap();
    assert_eq!(near.get(SensorChannel::Distance).unwrap(), expected(1_500));
}

#[test]
fn test_upper_bound_pulse_reads_zero() {
    let rig = Rig::new();
    let sensor = rig.sensor("front", 3, 4, EchoModel::fixed_pulse(25_000));
    sensor.fetch(SensorChannel::All).unwrap();
    assert_eq!(sensor.get(SensorChannel::Distance).unwrap(), DistanceSample::ZERO);
}

#[test]
fn test_silent_sensor_times_out_and_tears_down() {
    let rig = Rig::new();
    let silent = rig.sensor("silent", 3, 4, EchoModel::silent());
    let near = rig.sensor("near", 5, 6, EchoModel::fixed_pulse(700));

    let started = Instant::now();
    let err = silent.fetch(SensorChannel::All).unwrap_err();
    let spent = started.elapsed();
    assert_eq!(err, SensorError::Io(IoError::NoResponse));
    assert!(spent >= Duration::from_millis(130), "timed out after {spent:?}");
    assert!(spent < Duration::from_secs(2));
    rig.assert_idle();

    near.fetch(SensorChannel::All).unwrap();
    assert_eq!(near.get(SensorChannel::Distance).unwrap(), expected(700));
}

#[test]
fn test_repeated_fetches_rebuild_the_pipeline() {
    let rig = Rig::new();
    let sensor = rig.sensor("front", 3, 4, EchoModel::fixed_pulse(3_000));
    for _ in 0..3 {
        sensor.fetch(SensorChannel::All).unwrap();
        assert_eq!(sensor.get(SensorChannel::Distance).unwrap(), expected(3_000));
    }
    rig.assert_idle();
}

#[test]
fn test_get_before_fetch_returns_zero() {
    let rig = Rig::new();
    let sensor = rig.sensor("front", 3, 4, EchoModel::at_distance(300));
    assert_eq!(sensor.get(SensorChannel::Distance).unwrap(), DistanceSample::ZERO);
    assert_eq!(
        sensor.get(SensorChannel::All),
        Err(SensorError::Unsupported(SensorChannel::All))
    );
}

#[test]
fn test_mismatched_peripherals_are_rejected() {
    let rig = Rig::new();
    let mut config = DeviceConfiguration::pipeline("front", 3, 4);
    config.peripherals = Some(PeripheralSelection { timer: 2, ..Default::default() });
    let result = rig.sensor_with(config, EchoModel::silent());
    assert!(matches!(result, Err(InitError::Config(_))));
    assert_eq!(rig.shared.instance_count(), 0);
    assert!(!rig.shared.is_ready());
}

#[test]
fn test_failed_graph_install_frees_the_slot() {
    let rig = Rig::new();
    let (_, _, mut pins, _) = rig.chip.split();
    pins.bind_input(4).unwrap();

    let result = PipelineSensor::new(&DeviceConfiguration::pipeline("front", 3, 4), rig.shared.clone());
    assert!(matches!(result, Err(InitError::Fabric(FabricError::PinInUse(4)))));
    assert_eq!(rig.shared.instance_count(), 0);
    assert!(!rig.shared.is_ready());

    pins.release(4).unwrap();
    let sensor = rig.sensor("front", 3, 4, EchoModel::fixed_pulse(900));
    assert_eq!(rig.shared.instance_count(), 1);
    sensor.fetch(SensorChannel::All).unwrap();
    assert_eq!(sensor.get(SensorChannel::Distance).unwrap(), expected(900));
}

#[test]
fn test_edge_record_is_rejected() {
    let rig = Rig::new();
    let result = rig.sensor_with(DeviceConfiguration::edge("front", 3, 4), EchoModel::silent());
    assert!(matches!(result, Err(InitError::Config(_))));
}

#[test]
fn test_instance_limit() {
    let rig = Rig::new();
    let mut sensors = Vec::new();
    for i in 0..MAX_INSTANCES as u8 {
        sensors.push(rig.sensor(&format!("s{i}"), 2 * i, 2 * i + 1, EchoModel::silent()));
    }
    let extra = rig.sensor_with(DeviceConfiguration::pipeline("extra", 40, 41), EchoModel::silent());
    assert!(matches!(extra, Err(InitError::ResourceExhausted(_))));
}

#[test]
fn test_concurrent_fetches_never_overlap() {
    let rig = Rig::new();
    let left = Arc::new(rig.sensor("left", 3, 4, EchoModel::fixed_pulse(2_000)));
    let right = Arc::new(rig.sensor("right", 5, 6, EchoModel::fixed_pulse(3_000)));
    rig.log.clear();

    let workers: Vec<_> = [left, right]
        .into_iter()
        .map(|sensor| {
            thread::spawn(move || {
                for _ in 0..4 {
                    sensor.fetch(SensorChannel::All).unwrap();
                }
                sensor.get(SensorChannel::Distance).unwrap()
            })
        })
        .collect();
    let samples: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    assert_eq!(samples, vec![expected(2_000), expected(3_000)]);

    let entries = rig.log.entries();
    assert_eq!(entries.len(), 32);
    for cycle in entries.chunks(4) {
        let activities: Vec<_> = cycle.iter().map(|e| e.activity).collect();
        assert_eq!(
            activities,
            vec![Activity::Bind, Activity::Bind, Activity::Release, Activity::Release]
        );
        let mut bound: Vec<_> = cycle[..2].iter().map(|e| e.pin).collect();
        let mut released: Vec<_> = cycle[2..].iter().map(|e| e.pin).collect();
        bound.sort_unstable();
        released.sort_unstable();
        assert_eq!(bound, released);
    }
    rig.assert_idle();
}
