//! Peripheral seams of the event-routed variant.
//!
//! An [`EventRouter`] connects hardware events to hardware tasks without CPU
//! involvement. Channels carry one event, one task and one fork task;
//! groups enable or disable a set of channels at once. A [`CaptureTimer`]
//! supplies compare events and capture tasks, [`PinEvents`] turns pins into
//! endpoints and a [`SoftwareEvent`] delivers the single CPU notification.

use std::sync::Arc;

use sonar_timing::TickRate;
use thiserror::Error;

/// Router channel handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u8);

/// Router channel-group handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub u8);

/// Sources a router channel can listen to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventEndpoint {
    /// Timer compare slot matched.
    TimerCompare(u8),
    /// The input bound to pin slot `n` changed level, either direction.
    PinIn(u8),
}

/// Tasks a router channel can start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskEndpoint {
    /// Toggle the output bound to pin slot `n`.
    PinOut(u8),
    /// Copy the timer count into a capture slot.
    TimerCapture(u8),
    TimerStart,
    TimerStop,
    TimerClear,
    /// Enable every channel of a group.
    GroupEnable(GroupId),
    /// Disable every channel of a group.
    GroupDisable(GroupId),
    /// Raise the software completion event with the given index.
    SoftwareTrigger(u8),
}

/// Failures reported by router, timer and pin peripherals.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FabricError {
    #[error("no free router channel")]
    NoFreeChannel,
    #[error("no free channel group")]
    NoFreeGroup,
    #[error("unknown channel {0}")]
    UnknownChannel(u8),
    #[error("unknown group {0}")]
    UnknownGroup(u8),
    #[error("timer slot {0} out of range")]
    InvalidSlot(u8),
    #[error("compare value {0} does not fit the timer width")]
    CompareOutOfRange(u32),
    #[error("pin {0} is already bound")]
    PinInUse(u8),
    #[error("pin {0} is not bound")]
    PinNotBound(u8),
    #[error("no free pin slot")]
    NoFreePinSlot,
    #[error("software event {0} out of range")]
    InvalidEvent(u8),
}

/// Programmable event-to-task interconnect.
pub trait EventRouter: Send {
    fn alloc_channel(&mut self) -> Result<ChannelId, FabricError>;

    fn alloc_group(&mut self) -> Result<GroupId, FabricError>;

    /// Set the event a channel listens to.
    fn set_event(&mut self, channel: ChannelId, event: EventEndpoint) -> Result<(), FabricError>;

    /// Set the primary task of a channel.
    fn set_task(&mut self, channel: ChannelId, task: TaskEndpoint) -> Result<(), FabricError>;

    /// Set the secondary task a channel starts together with its primary one.
    fn set_fork(&mut self, channel: ChannelId, task: TaskEndpoint) -> Result<(), FabricError>;

    fn include_in_group(&mut self, channel: ChannelId, group: GroupId) -> Result<(), FabricError>;

    fn enable_channel(&mut self, channel: ChannelId) -> Result<(), FabricError>;

    fn enable_group(&mut self, group: GroupId) -> Result<(), FabricError>;

    fn disable_group(&mut self, group: GroupId) -> Result<(), FabricError>;
}

/// A counter with compare and capture slots.
pub trait CaptureTimer: Send {
    /// Arm compare slot `slot` to fire at `count`.
    fn set_compare(&mut self, slot: u8, count: u32) -> Result<(), FabricError>;

    /// Clear the counter and start counting.
    fn enable(&mut self);

    /// Stop and clear the counter.
    fn disable(&mut self);

    /// Value latched in capture slot `slot`.
    fn capture(&self, slot: u8) -> Result<u32, FabricError>;

    /// Counting frequency.
    fn rate(&self) -> TickRate;

    /// Highest count before the counter wraps to zero.
    fn max_count(&self) -> u32;
}

/// Binds pins to event and task endpoints.
pub trait PinEvents: Send {
    /// Sense both edges of `pin` and expose them as an event.
    fn bind_input(&mut self, pin: u8) -> Result<EventEndpoint, FabricError>;

    /// Drive `pin` low and expose a toggle task for it.
    fn bind_output(&mut self, pin: u8) -> Result<TaskEndpoint, FabricError>;

    /// Return `pin` to its unbound, high-impedance state.
    fn release(&mut self, pin: u8) -> Result<(), FabricError>;
}

/// Handler invoked from the notification context.
pub type EventHandler = Arc<dyn Fn(u8) + Send + Sync>;

/// The software-triggerable completion event.
pub trait SoftwareEvent: Send {
    /// Task that raises event `index`.
    fn trigger_task(&self, index: u8) -> Result<TaskEndpoint, FabricError>;

    /// Deliver every raised event to `handler`.
    fn listen(&mut self, handler: EventHandler);
}
