//! The static event graph of one measurement.
//!
//! ```text
//! compare[TRIG_UP]    -> toggle trigger
//! compare[TRIG_DOWN]  -> toggle trigger,          enable(Rising)
//! echo edge [Rising]  -> capture[ECHO_START]
//! echo edge [Rising]  -> disable(Rising),         enable(Falling)
//! echo edge [Falling] -> capture[ECHO_END],       stop timer
//! echo edge [Falling] -> raise completion,        clear timer
//! echo edge [Falling] -> disable(Falling)
//! ```
//!
//! Only edges seen while the matching arming group is enabled reach the
//! timer, so neither the trigger pulse nor line noise before it can be
//! taken for an echo. The graph is installed once; the pin endpoints are
//! rebound on every build because pins are released between measurements.

use super::fabric::{ChannelId, EventEndpoint, EventRouter, FabricError, GroupId, TaskEndpoint};

/// Compare slot that raises the trigger.
pub const TRIG_UP_SLOT: u8 = 0;
/// Compare slot that lowers the trigger.
pub const TRIG_DOWN_SLOT: u8 = 1;
/// Capture slot latching the echo rising edge.
pub const ECHO_START_SLOT: u8 = 2;
/// Capture slot latching the echo falling edge.
pub const ECHO_END_SLOT: u8 = 3;

/// Timer count at which the trigger goes high.
pub const TRIG_UP_COUNT: u32 = 1;

/// The two mutually exclusive phases of an echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmingGroup {
    Rising,
    Falling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Compare(u8),
    Echo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    ToggleTrigger,
    Capture(u8),
    StopTimer,
    ClearTimer,
    Enable(ArmingGroup),
    Disable(ArmingGroup),
    Complete,
}

/// One router channel of the graph.
#[derive(Debug, Clone, Copy)]
struct Link {
    name: &'static str,
    source: Source,
    task: Target,
    fork: Option<Target>,
    group: Option<ArmingGroup>,
}

const LINKS: [Link; 7] = [
    Link {
        name: "trig_up",
        source: Source::Compare(TRIG_UP_SLOT),
        task: Target::ToggleTrigger,
        fork: None,
        group: None,
    },
    Link {
        name: "trig_down",
        source: Source::Compare(TRIG_DOWN_SLOT),
        task: Target::ToggleTrigger,
        fork: Some(Target::Enable(ArmingGroup::Rising)),
        group: None,
    },
    Link {
        name: "echo_start",
        source: Source::Echo,
        task: Target::Capture(ECHO_START_SLOT),
        fork: None,
        group: Some(ArmingGroup::Rising),
    },
    Link {
        name: "rising_done",
        source: Source::Echo,
        task: Target::Disable(ArmingGroup::Rising),
        fork: Some(Target::Enable(ArmingGroup::Falling)),
        group: Some(ArmingGroup::Rising),
    },
    Link {
        name: "echo_end",
        source: Source::Echo,
        task: Target::Capture(ECHO_END_SLOT),
        fork: Some(Target::StopTimer),
        group: Some(ArmingGroup::Falling),
    },
    Link {
        name: "complete",
        source: Source::Echo,
        task: Target::Complete,
        fork: Some(Target::ClearTimer),
        group: Some(ArmingGroup::Falling),
    },
    Link {
        name: "falling_done",
        source: Source::Echo,
        task: Target::Disable(ArmingGroup::Falling),
        fork: None,
        group: Some(ArmingGroup::Falling),
    },
];

/// Endpoints resolved from the bound pins and the completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    pub trigger: TaskEndpoint,
    pub echo: EventEndpoint,
    pub complete: TaskEndpoint,
}

/// The graph as installed into a router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledGraph {
    channels: [ChannelId; LINKS.len()],
    rising: GroupId,
    falling: GroupId,
}

impl InstalledGraph {
    /// Allocate channels and groups and wire every link.
    ///
    /// Channels are left enabled and both groups disabled, so only the
    /// trigger links are live until the timer reaches `TRIG_DOWN_SLOT`.
    pub fn install<R: EventRouter + ?Sized>(
        router: &mut R,
        ends: &Endpoints,
    ) -> Result<Self, FabricError> {
        let rising = router.alloc_group()?;
        let falling = router.alloc_group()?;

        let mut channels = [ChannelId(0); LINKS.len()];
        for (slot, link) in channels.iter_mut().zip(LINKS.iter()) {
            *slot = router.alloc_channel()?;
            tracing::trace!(link = link.name, channel = slot.0, "allocated router channel");
        }

        let graph = InstalledGraph { channels, rising, falling };
        for (channel, link) in graph.channels.iter().zip(LINKS.iter()) {
            router.set_event(*channel, graph.event(link.source, ends))?;
            router.set_task(*channel, graph.task(link.task, ends))?;
            if let Some(fork) = link.fork {
                router.set_fork(*channel, graph.task(fork, ends))?;
            }
            if let Some(group) = link.group {
                router.include_in_group(*channel, graph.group(group))?;
            }
            router.enable_channel(*channel)?;
        }
        graph.disarm(router)?;
        Ok(graph)
    }

    /// Point the pin-facing links at freshly bound pins.
    pub fn rebind<R: EventRouter + ?Sized>(
        &self,
        router: &mut R,
        ends: &Endpoints,
    ) -> Result<(), FabricError> {
        for (channel, link) in self.channels.iter().zip(LINKS.iter()) {
            if link.source == Source::Echo {
                router.set_event(*channel, ends.echo)?;
            }
            if link.task == Target::ToggleTrigger {
                router.set_task(*channel, ends.trigger)?;
            }
        }
        Ok(())
    }

    /// Disable both arming groups.
    pub fn disarm<R: EventRouter + ?Sized>(&self, router: &mut R) -> Result<(), FabricError> {
        router.disable_group(self.rising)?;
        router.disable_group(self.falling)
    }

    pub fn group(&self, group: ArmingGroup) -> GroupId {
        match group {
            ArmingGroup::Rising => self.rising,
            ArmingGroup::Falling => self.falling,
        }
    }

    /// Channel carrying the link called `name`.
    pub fn channel(&self, name: &str) -> Option<ChannelId> {
        LINKS
            .iter()
            .position(|link| link.name == name)
            .map(|i| self.channels[i])
    }

    fn event(&self, source: Source, ends: &Endpoints) -> EventEndpoint {
        match source {
            Source::Compare(slot) => EventEndpoint::TimerCompare(slot),
            Source::Echo => ends.echo,
        }
    }

    fn task(&self, target: Target, ends: &Endpoints) -> TaskEndpoint {
        match target {
            Target::ToggleTrigger => ends.trigger,
            Target::Capture(slot) => TaskEndpoint::TimerCapture(slot),
            Target::StopTimer => TaskEndpoint::TimerStop,
            Target::ClearTimer => TaskEndpoint::TimerClear,
            Target::Enable(group) => TaskEndpoint::GroupEnable(self.group(group)),
            Target::Disable(group) => TaskEndpoint::GroupDisable(self.group(group)),
            Target::Complete => ends.complete,
        }
    }
}
