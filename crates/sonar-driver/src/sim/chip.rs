//! A simulated event-routing chip.
//!
//! Models a 24-bit, 1 MHz capture timer with four compare/capture slots,
//! an event router with 20 channels and 6 channel groups, 8 pin-event
//! slots and a software event block. Everything runs in logical
//! microseconds derived from one start instant: scheduled activity is
//! processed at its exact logical time, so captured counts are exact, while
//! a worker thread paces the processing to real time.
//!
//! Routing follows the hardware: all channels listening to an event are
//! selected before any of their tasks run, so a group enabled by an event
//! does not see that same event.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use sonar_timing::TickRate;
use tracing::trace;

use super::target::EchoModel;
use super::{Activity, EventLog};
use crate::pipeline::fabric::{
    CaptureTimer, ChannelId, EventEndpoint, EventHandler, EventRouter, FabricError, GroupId, PinEvents,
    SoftwareEvent, TaskEndpoint,
};

pub const ROUTER_CHANNELS: usize = 20;
pub const ROUTER_GROUPS: usize = 6;
pub const PIN_SLOTS: usize = 8;
pub const TIMER_SLOTS: usize = 4;
pub const SOFTWARE_EVENTS: u8 = 16;
/// Counter mask of the 24-bit timer.
pub const TIMER_MASK: u32 = 0x00FF_FFFF;

#[derive(Debug, Clone, Copy, Default)]
struct ChannelRegs {
    allocated: bool,
    enabled: bool,
    event: Option<EventEndpoint>,
    task: Option<TaskEndpoint>,
    fork: Option<TaskEndpoint>,
}

#[derive(Debug, Clone, Copy, Default)]
struct GroupRegs {
    allocated: bool,
    members: u32,
}

#[derive(Debug, Default)]
struct TimerRegs {
    running: bool,
    /// Count at `since`.
    base: u32,
    since: u64,
    compare: [Option<u32>; TIMER_SLOTS],
    capture: [u32; TIMER_SLOTS],
    /// Bumped whenever pending compare matches become stale.
    generation: u64,
}

impl TimerRegs {
    fn count(&self, now: u64) -> u32 {
        if self.running {
            self.base.wrapping_add((now - self.since) as u32) & TIMER_MASK
        } else {
            self.base
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy)]
struct PinSlot {
    pin: u8,
    direction: Direction,
    level: bool,
}

#[derive(Debug, Clone, Copy)]
struct Responder {
    trigger_pin: u8,
    echo_pin: u8,
    model: EchoModel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activation {
    Compare { slot: u8, generation: u64 },
    EchoLevel { pin: u8, high: bool },
}

#[derive(Debug, PartialEq, Eq)]
struct Pending {
    at: u64,
    seq: u64,
    what: Activation,
}

impl Ord for Pending {
    // Reversed so the heap pops the earliest activation first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (other.at, other.seq).cmp(&(self.at, self.seq))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

struct ChipState {
    now: u64,
    channels: [ChannelRegs; ROUTER_CHANNELS],
    groups: [GroupRegs; ROUTER_GROUPS],
    timer: TimerRegs,
    pins: [Option<PinSlot>; PIN_SLOTS],
    responders: Vec<Responder>,
    queue: BinaryHeap<Pending>,
    seq: u64,
    raised: Vec<u8>,
    handler: Option<EventHandler>,
    log: EventLog,
    shutdown: bool,
}

impl ChipState {
    fn new(log: EventLog) -> Self {
        ChipState {
            now: 0,
            channels: [ChannelRegs::default(); ROUTER_CHANNELS],
            groups: [GroupRegs::default(); ROUTER_GROUPS],
            timer: TimerRegs::default(),
            pins: [None; PIN_SLOTS],
            responders: Vec::new(),
            queue: BinaryHeap::new(),
            seq: 0,
            raised: Vec::new(),
            handler: None,
            log,
            shutdown: false,
        }
    }

    fn schedule(&mut self, at: u64, what: Activation) {
        self.seq += 1;
        self.queue.push(Pending { at, seq: self.seq, what });
    }

    /// Process every activation due at or before `until`.
    fn advance(&mut self, until: u64) {
        while self.queue.peek().is_some_and(|p| p.at <= until) {
            let Some(pending) = self.queue.pop() else { break };
            self.now = self.now.max(pending.at);
            self.activate(pending.what);
        }
        self.now = self.now.max(until);
    }

    fn next_due(&self) -> Option<u64> {
        self.queue.peek().map(|p| p.at)
    }

    fn activate(&mut self, what: Activation) {
        match what {
            Activation::Compare { slot, generation } => {
                if generation != self.timer.generation || !self.timer.running {
                    return;
                }
                self.fire(EventEndpoint::TimerCompare(slot));
                let period = u64::from(TIMER_MASK) + 1;
                self.schedule(self.now + period, Activation::Compare { slot, generation });
            }
            Activation::EchoLevel { pin, high } => {
                trace!(pin, high, at = self.now, "echo level");
                let slot = self
                    .pins
                    .iter()
                    .position(|s| matches!(s, Some(s) if s.pin == pin && s.direction == Direction::In));
                if let Some(slot) = slot {
                    self.fire(EventEndpoint::PinIn(slot as u8));
                }
            }
        }
    }

    /// Route `event` through every enabled channel listening to it.
    fn fire(&mut self, event: EventEndpoint) {
        let tasks: Vec<TaskEndpoint> = self
            .channels
            .iter()
            .filter(|c| c.allocated && c.enabled && c.event == Some(event))
            .flat_map(|c| c.task.into_iter().chain(c.fork))
            .collect();
        for task in tasks {
            self.run(task);
        }
    }

    fn run(&mut self, task: TaskEndpoint) {
        let now = self.now;
        match task {
            TaskEndpoint::PinOut(slot) => self.toggle(slot as usize),
            TaskEndpoint::TimerCapture(slot) => {
                let count = self.timer.count(now);
                if let Some(capture) = self.timer.capture.get_mut(slot as usize) {
                    *capture = count;
                }
            }
            TaskEndpoint::TimerStart => self.start_timer(),
            TaskEndpoint::TimerStop => self.stop_timer(),
            TaskEndpoint::TimerClear => self.clear_timer(),
            TaskEndpoint::GroupEnable(group) => self.set_group(group, true),
            TaskEndpoint::GroupDisable(group) => self.set_group(group, false),
            TaskEndpoint::SoftwareTrigger(index) => self.raised.push(index),
        }
    }

    fn toggle(&mut self, slot: usize) {
        let Some(Some(pin)) = self.pins.get_mut(slot) else { return };
        if pin.direction != Direction::Out {
            return;
        }
        pin.level = !pin.level;
        let (trigger_pin, released) = (pin.pin, !pin.level);
        if !released {
            return;
        }
        let now = self.now;
        let answers: Vec<_> = self
            .responders
            .iter()
            .filter(|r| r.trigger_pin == trigger_pin)
            .flat_map(|r| r.model.respond().into_iter().map(move |p| (r.echo_pin, p)))
            .collect();
        for (echo_pin, pulse) in answers {
            let rise = now + u64::from(pulse.offset_us);
            self.schedule(rise, Activation::EchoLevel { pin: echo_pin, high: true });
            self.schedule(rise + u64::from(pulse.width_us), Activation::EchoLevel { pin: echo_pin, high: false });
        }
    }

    fn set_group(&mut self, group: GroupId, enabled: bool) {
        let Some(regs) = self.groups.get(group.0 as usize).copied() else { return };
        for (i, channel) in self.channels.iter_mut().enumerate() {
            if regs.members & (1 << i) != 0 {
                channel.enabled = enabled;
            }
        }
    }

    fn start_timer(&mut self) {
        if self.timer.running {
            return;
        }
        self.timer.running = true;
        self.timer.since = self.now;
        self.reschedule_compares();
    }

    fn stop_timer(&mut self) {
        if !self.timer.running {
            return;
        }
        self.timer.base = self.timer.count(self.now);
        self.timer.running = false;
        self.timer.generation += 1;
    }

    fn clear_timer(&mut self) {
        self.timer.base = 0;
        self.timer.since = self.now;
        if self.timer.running {
            self.reschedule_compares();
        }
    }

    fn reschedule_compares(&mut self) {
        self.timer.generation += 1;
        let generation = self.timer.generation;
        let count = self.timer.count(self.now);
        for slot in 0..TIMER_SLOTS {
            let Some(target) = self.timer.compare[slot] else { continue };
            let mut delta = u64::from(target.wrapping_sub(count) & TIMER_MASK);
            if delta == 0 {
                delta = u64::from(TIMER_MASK) + 1;
            }
            self.schedule(self.now + delta, Activation::Compare { slot: slot as u8, generation });
        }
    }

    fn channel(&mut self, channel: ChannelId) -> Result<&mut ChannelRegs, FabricError> {
        self.channels
            .get_mut(channel.0 as usize)
            .filter(|c| c.allocated)
            .ok_or(FabricError::UnknownChannel(channel.0))
    }

    fn group(&mut self, group: GroupId) -> Result<&mut GroupRegs, FabricError> {
        self.groups
            .get_mut(group.0 as usize)
            .filter(|g| g.allocated)
            .ok_or(FabricError::UnknownGroup(group.0))
    }
}

struct ChipCore {
    origin: Instant,
    state: Mutex<ChipState>,
    wake: Condvar,
}

impl ChipCore {
    fn elapsed_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    /// Bring the chip up to the present and run `f` on it.
    ///
    /// Software events raised meanwhile are delivered after the state lock
    /// is released.
    fn with<T>(&self, f: impl FnOnce(&mut ChipState) -> T) -> T {
        let mut state = self.state.lock();
        state.advance(self.elapsed_us());
        let out = f(&mut state);
        self.wake.notify_all();
        self.deliver(state);
        out
    }

    fn deliver(&self, mut state: MutexGuard<'_, ChipState>) {
        let raised = std::mem::take(&mut state.raised);
        let handler = state.handler.clone();
        drop(state);
        if let Some(handler) = handler {
            for index in raised {
                trace!(index, "software event");
                handler(index);
            }
        }
    }

    fn run(self: Arc<Self>) {
        loop {
            let mut state = self.state.lock();
            if state.shutdown {
                return;
            }
            state.advance(self.elapsed_us());
            if !state.raised.is_empty() {
                self.deliver(state);
                continue;
            }
            match state.next_due() {
                Some(at) => {
                    let deadline = self.origin + Duration::from_micros(at);
                    let _ = self.wake.wait_until(&mut state, deadline);
                }
                None => self.wake.wait(&mut state),
            }
        }
    }
}

/// Owner of the simulated chip; split it into per-peripheral handles.
pub struct SimChip {
    link: Arc<ChipLink>,
}

/// Shared by every handle; stops the worker when the last one goes.
struct ChipLink {
    core: Arc<ChipCore>,
}

impl Drop for ChipLink {
    fn drop(&mut self) {
        self.core.state.lock().shutdown = true;
        self.core.wake.notify_all();
    }
}

impl SimChip {
    pub fn new() -> Self {
        SimChip::with_log(EventLog::new())
    }

    /// A chip recording pin binds and releases in `log`.
    pub fn with_log(log: EventLog) -> Self {
        let core = Arc::new(ChipCore {
            origin: Instant::now(),
            state: Mutex::new(ChipState::new(log)),
            wake: Condvar::new(),
        });
        let worker = Arc::clone(&core);
        thread::Builder::new()
            .name("sim-chip".into())
            .spawn(move || worker.run())
            .map(drop)
            .unwrap_or_else(|e| tracing::error!(error = %e, "failed to start simulated chip"));
        SimChip {
            link: Arc::new(ChipLink { core }),
        }
    }

    /// Put a sensor answering with `model` on the given pins.
    pub fn attach_sensor(&self, trigger_pin: u8, echo_pin: u8, model: EchoModel) {
        self.link.core.with(|s| {
            s.responders.push(Responder {
                trigger_pin,
                echo_pin,
                model,
            })
        });
    }

    /// Router, timer, pin and software-event handles sharing this chip.
    pub fn split(&self) -> (SimRouter, SimTimer, SimGpiote, SimEgu) {
        (
            SimRouter { link: Arc::clone(&self.link) },
            SimTimer { link: Arc::clone(&self.link) },
            SimGpiote { link: Arc::clone(&self.link) },
            SimEgu { link: Arc::clone(&self.link) },
        )
    }

    /// Whether the timer is counting.
    pub fn timer_running(&self) -> bool {
        self.link.core.with(|s| s.timer.running)
    }

    /// Whether any channel of the router is currently enabled inside a group.
    pub fn any_group_enabled(&self) -> bool {
        self.link.core.with(|s| {
            s.groups
                .iter()
                .filter(|g| g.allocated)
                .any(|g| s.channels.iter().enumerate().any(|(i, c)| g.members & (1 << i) != 0 && c.enabled))
        })
    }

    /// Pins currently bound to pin-event slots.
    pub fn bound_pins(&self) -> Vec<u8> {
        self.link.core.with(|s| s.pins.iter().flatten().map(|p| p.pin).collect())
    }

    /// Number of allocated router channels.
    pub fn allocated_channels(&self) -> usize {
        self.link.core.with(|s| s.channels.iter().filter(|c| c.allocated).count())
    }
}

impl Default for SimChip {
    fn default() -> Self {
        SimChip::new()
    }
}

pub struct SimRouter {
    link: Arc<ChipLink>,
}

impl EventRouter for SimRouter {
    fn alloc_channel(&mut self) -> Result<ChannelId, FabricError> {
        self.link.core.with(|s| {
            let (i, channel) = s
                .channels
                .iter_mut()
                .enumerate()
                .find(|(_, c)| !c.allocated)
                .ok_or(FabricError::NoFreeChannel)?;
            *channel = ChannelRegs { allocated: true, ..Default::default() };
            Ok(ChannelId(i as u8))
        })
    }

    fn alloc_group(&mut self) -> Result<GroupId, FabricError> {
        self.link.core.with(|s| {
            let (i, group) = s
                .groups
                .iter_mut()
                .enumerate()
                .find(|(_, g)| !g.allocated)
                .ok_or(FabricError::NoFreeGroup)?;
            *group = GroupRegs { allocated: true, members: 0 };
            Ok(GroupId(i as u8))
        })
    }

    fn set_event(&mut self, channel: ChannelId, event: EventEndpoint) -> Result<(), FabricError> {
        self.link.core.with(|s| {
            s.channel(channel)?.event = Some(event);
            Ok(())
        })
    }

    fn set_task(&mut self, channel: ChannelId, task: TaskEndpoint) -> Result<(), FabricError> {
        self.link.core.with(|s| {
            s.channel(channel)?.task = Some(task);
            Ok(())
        })
    }

    fn set_fork(&mut self, channel: ChannelId, task: TaskEndpoint) -> Result<(), FabricError> {
        self.link.core.with(|s| {
            s.channel(channel)?.fork = Some(task);
            Ok(())
        })
    }

    fn include_in_group(&mut self, channel: ChannelId, group: GroupId) -> Result<(), FabricError> {
        self.link.core.with(|s| {
            s.channel(channel)?;
            s.group(group)?.members |= 1 << channel.0;
            Ok(())
        })
    }

    fn enable_channel(&mut self, channel: ChannelId) -> Result<(), FabricError> {
        self.link.core.with(|s| {
            s.channel(channel)?.enabled = true;
            Ok(())
        })
    }

    fn enable_group(&mut self, group: GroupId) -> Result<(), FabricError> {
        self.link.core.with(|s| {
            s.group(group)?;
            s.set_group(group, true);
            Ok(())
        })
    }

    fn disable_group(&mut self, group: GroupId) -> Result<(), FabricError> {
        self.link.core.with(|s| {
            s.group(group)?;
            s.set_group(group, false);
            Ok(())
        })
    }
}

pub struct SimTimer {
    link: Arc<ChipLink>,
}

impl CaptureTimer for SimTimer {
    fn set_compare(&mut self, slot: u8, count: u32) -> Result<(), FabricError> {
        if slot as usize >= TIMER_SLOTS {
            return Err(FabricError::InvalidSlot(slot));
        }
        if count > TIMER_MASK {
            return Err(FabricError::CompareOutOfRange(count));
        }
        self.link.core.with(|s| {
            s.timer.compare[slot as usize] = Some(count);
            if s.timer.running {
                s.reschedule_compares();
            }
        });
        Ok(())
    }

    fn enable(&mut self) {
        self.link.core.with(|s| {
            s.clear_timer();
            s.start_timer();
        });
    }

    fn disable(&mut self) {
        self.link.core.with(|s| {
            s.stop_timer();
            s.clear_timer();
        });
    }

    fn capture(&self, slot: u8) -> Result<u32, FabricError> {
        self.link.core.with(|s| {
            s.timer
                .capture
                .get(slot as usize)
                .copied()
                .ok_or(FabricError::InvalidSlot(slot))
        })
    }

    fn rate(&self) -> TickRate {
        TickRate::MHZ_1
    }

    fn max_count(&self) -> u32 {
        TIMER_MASK
    }
}

pub struct SimGpiote {
    link: Arc<ChipLink>,
}

impl SimGpiote {
    fn bind(&mut self, pin: u8, direction: Direction) -> Result<usize, FabricError> {
        self.link.core.with(|s| {
            if s.pins.iter().flatten().any(|p| p.pin == pin) {
                return Err(FabricError::PinInUse(pin));
            }
            let slot = s.pins.iter().position(Option::is_none).ok_or(FabricError::NoFreePinSlot)?;
            s.pins[slot] = Some(PinSlot { pin, direction, level: false });
            s.log.record(Activity::Bind, pin);
            Ok(slot)
        })
    }
}

impl PinEvents for SimGpiote {
    fn bind_input(&mut self, pin: u8) -> Result<EventEndpoint, FabricError> {
        self.bind(pin, Direction::In).map(|slot| EventEndpoint::PinIn(slot as u8))
    }

    fn bind_output(&mut self, pin: u8) -> Result<TaskEndpoint, FabricError> {
        self.bind(pin, Direction::Out).map(|slot| TaskEndpoint::PinOut(slot as u8))
    }

    fn release(&mut self, pin: u8) -> Result<(), FabricError> {
        self.link.core.with(|s| {
            let slot = s
                .pins
                .iter_mut()
                .find(|p| matches!(p, Some(p) if p.pin == pin))
                .ok_or(FabricError::PinNotBound(pin))?;
            *slot = None;
            s.log.record(Activity::Release, pin);
            Ok(())
        })
    }
}

pub struct SimEgu {
    link: Arc<ChipLink>,
}

impl SoftwareEvent for SimEgu {
    fn trigger_task(&self, index: u8) -> Result<TaskEndpoint, FabricError> {
        if index >= SOFTWARE_EVENTS {
            return Err(FabricError::InvalidEvent(index));
        }
        Ok(TaskEndpoint::SoftwareTrigger(index))
    }

    fn listen(&mut self, handler: EventHandler) {
        self.link.core.with(|s| s.handler = Some(handler));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn routed_chip() -> (SimChip, SimRouter, SimTimer, SimGpiote, SimEgu) {
        let chip = SimChip::new();
        let (router, timer, pins, egu) = chip.split();
        (chip, router, timer, pins, egu)
    }

    #[test]
    fn test_router_exhaustion() {
        let (_chip, mut router, ..) = routed_chip();
        for _ in 0..ROUTER_CHANNELS {
            router.alloc_channel().unwrap();
        }
        assert_eq!(router.alloc_channel(), Err(FabricError::NoFreeChannel));
        for _ in 0..ROUTER_GROUPS {
            router.alloc_group().unwrap();
        }
        assert_eq!(router.alloc_group(), Err(FabricError::NoFreeGroup));
    }

    #[test]
    fn test_unallocated_channel_is_rejected() {
        let (_chip, mut router, ..) = routed_chip();
        assert_eq!(router.enable_channel(ChannelId(3)), Err(FabricError::UnknownChannel(3)));
        assert_eq!(router.enable_group(GroupId(1)), Err(FabricError::UnknownGroup(1)));
    }

    #[test]
    fn test_pin_binding() {
        let (chip, _router, _timer, mut pins, _egu) = routed_chip();
        assert_eq!(pins.bind_input(7), Ok(EventEndpoint::PinIn(0)));
        assert_eq!(pins.bind_output(8), Ok(TaskEndpoint::PinOut(1)));
        assert_eq!(pins.bind_output(7), Err(FabricError::PinInUse(7)));
        assert_eq!(chip.bound_pins(), vec![7, 8]);
        pins.release(7).unwrap();
        assert_eq!(pins.release(7), Err(FabricError::PinNotBound(7)));
        assert_eq!(chip.bound_pins(), vec![8]);
    }

    #[test]
    fn test_compare_routes_to_capture_and_software_event() {
        let (chip, mut router, mut timer, _pins, mut egu) = routed_chip();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        egu.listen(Arc::new(move |index: u8| {
            let _ = tx.lock().send(index);
        }));

        timer.set_compare(0, 500).unwrap();
        let capture = router.alloc_channel().unwrap();
        router.set_event(capture, EventEndpoint::TimerCompare(0)).unwrap();
        router.set_task(capture, TaskEndpoint::TimerCapture(2)).unwrap();
        router.set_fork(capture, TaskEndpoint::TimerStop).unwrap();
        router.enable_channel(capture).unwrap();
        let notify = router.alloc_channel().unwrap();
        router.set_event(notify, EventEndpoint::TimerCompare(0)).unwrap();
        router.set_task(notify, egu.trigger_task(3).unwrap()).unwrap();
        router.enable_channel(notify).unwrap();

        timer.enable();
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)), Ok(3));
        assert_eq!(timer.capture(2), Ok(500));
        assert!(!chip.timer_running());
    }

    #[test]
    fn test_group_enabled_by_an_event_misses_that_event() {
        let (chip, mut router, mut timer, _pins, _egu) = routed_chip();
        let group = router.alloc_group().unwrap();
        timer.set_compare(0, 10).unwrap();

        let arm = router.alloc_channel().unwrap();
        router.set_event(arm, EventEndpoint::TimerCompare(0)).unwrap();
        router.set_task(arm, TaskEndpoint::GroupEnable(group)).unwrap();
        router.enable_channel(arm).unwrap();

        let gated = router.alloc_channel().unwrap();
        router.set_event(gated, EventEndpoint::TimerCompare(0)).unwrap();
        router.set_task(gated, TaskEndpoint::TimerCapture(1)).unwrap();
        router.include_in_group(gated, group).unwrap();
        router.disable_group(group).unwrap();

        timer.enable();
        thread::sleep(Duration::from_millis(20));
        assert!(chip.any_group_enabled());
        assert_eq!(timer.capture(1), Ok(0));
    }

    #[test]
    fn test_disable_stops_and_clears() {
        let (chip, _router, mut timer, ..) = routed_chip();
        timer.enable();
        assert!(chip.timer_running());
        timer.disable();
        assert!(!chip.timer_running());
    }

    #[test]
    fn test_out_of_range_slot() {
        let (_chip, _router, mut timer, ..) = routed_chip();
        assert_eq!(timer.set_compare(4, 1), Err(FabricError::InvalidSlot(4)));
        assert_eq!(timer.set_compare(0, 1 << 24), Err(FabricError::CompareOutOfRange(1 << 24)));
        assert_eq!(timer.capture(9), Err(FabricError::InvalidSlot(9)));
    }
}
