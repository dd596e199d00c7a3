//! What the simulated sensor sees in front of it.

use rand::Rng;
use sonar_timing::TimingWindow;

use crate::config::SimulationConfig;

/// Time from the end of the trigger pulse to the echo line rising, while
/// the sensor sends its burst.
pub const ECHO_DELAY_US: u32 = 450;

/// Echo width the sensor reports when nothing is in range.
pub const NO_TARGET_PULSE_US: u32 = 38_000;

/// Gap between the end of a no-target pulse and the spurious pulse after it.
pub const SPURIOUS_GAP_US: u32 = 100;

/// Width of the spurious pulse.
pub const SPURIOUS_PULSE_US: u32 = 6;

/// One high period of the echo line, relative to the trigger release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoPulse {
    pub offset_us: u32,
    pub width_us: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A reflector at a distance, with uniform noise of up to `jitter_mm`.
    Distance { mm: u32, jitter_mm: u32 },
    /// A single echo of exactly this width.
    FixedPulse(u32),
    /// Nothing in range: a long pulse followed by a short spurious one.
    OutOfRange,
    /// The sensor never answers.
    Silent,
}

/// Turns a [`Target`] into echo-line activity.
#[derive(Debug, Clone, Copy)]
pub struct EchoModel {
    target: Target,
    window: TimingWindow,
}

impl EchoModel {
    pub fn new(target: Target, window: TimingWindow) -> Self {
        EchoModel { target, window }
    }

    pub fn at_distance(mm: u32) -> Self {
        EchoModel::new(Target::Distance { mm, jitter_mm: 0 }, TimingWindow::HC_SR04)
    }

    pub fn fixed_pulse(width_us: u32) -> Self {
        EchoModel::new(Target::FixedPulse(width_us), TimingWindow::HC_SR04)
    }

    pub fn out_of_range() -> Self {
        EchoModel::new(Target::OutOfRange, TimingWindow::HC_SR04)
    }

    pub fn silent() -> Self {
        EchoModel::new(Target::Silent, TimingWindow::HC_SR04)
    }

    pub fn from_config(sim: &SimulationConfig, window: TimingWindow) -> Self {
        let target = if sim.no_echo {
            Target::Silent
        } else {
            Target::Distance {
                mm: sim.distance_mm,
                jitter_mm: sim.jitter_mm,
            }
        };
        EchoModel::new(target, window)
    }

    pub fn target(&self) -> Target {
        self.target
    }

    /// Echo pulses answering one trigger.
    pub fn respond(&self) -> Vec<EchoPulse> {
        match self.target {
            Target::Silent => Vec::new(),
            Target::OutOfRange => no_target(),
            Target::FixedPulse(width_us) => vec![EchoPulse {
                offset_us: ECHO_DELAY_US,
                width_us,
            }],
            Target::Distance { mm, jitter_mm } => {
                let mut um = i64::from(mm) * 1_000;
                if jitter_mm > 0 {
                    let jitter = i64::from(jitter_mm) * 1_000;
                    um += rand::rng().random_range(-jitter..=jitter);
                }
                let um = um.clamp(0, i64::from(u32::MAX)) as u32;
                let width_us = self.window.echo_width_us(um);
                if width_us >= self.window.invalid_pulse_us {
                    return no_target();
                }
                vec![EchoPulse {
                    offset_us: ECHO_DELAY_US,
                    width_us,
                }]
            }
        }
    }
}

fn no_target() -> Vec<EchoPulse> {
    vec![
        EchoPulse {
            offset_us: ECHO_DELAY_US,
            width_us: NO_TARGET_PULSE_US,
        },
        EchoPulse {
            offset_us: ECHO_DELAY_US + NO_TARGET_PULSE_US + SPURIOUS_GAP_US,
            width_us: SPURIOUS_PULSE_US,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_meter_echo_width() {
        let pulses = EchoModel::at_distance(1_000).respond();
        assert_eq!(pulses, vec![EchoPulse { offset_us: ECHO_DELAY_US, width_us: 5_882 }]);
    }

    #[test]
    fn test_far_target_behaves_like_no_target() {
        let pulses = EchoModel::at_distance(6_000).respond();
        assert_eq!(pulses.len(), 2);
        assert_eq!(pulses[0].width_us, NO_TARGET_PULSE_US);
        let spurious_start = pulses[1].offset_us - (pulses[0].offset_us + pulses[0].width_us);
        assert!(spurious_start < TimingWindow::HC_SR04.spurious_drain_us);
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let model = EchoModel::new(
            Target::Distance { mm: 1_000, jitter_mm: 10 },
            TimingWindow::HC_SR04,
        );
        for _ in 0..100 {
            let width = model.respond()[0].width_us;
            assert!((5_823..=5_941).contains(&width), "width {width}");
        }
    }

    #[test]
    fn test_silent_target_never_answers() {
        assert!(EchoModel::silent().respond().is_empty());
    }
}
