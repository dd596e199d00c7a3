use crate::hal::Edge;

/// States of the edge-timing state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmState {
    Idle,
    ArmedWaitingRisingEdge,
    ArmedWaitingFallingEdge,
    Finished,
    Error,
}

/// Timestamps of one completed echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeCompletion {
    pub start: u32,
    pub end: u32,
}

impl EdgeCompletion {
    /// Echo width in ticks, across at most one counter wrap.
    pub fn elapsed_ticks(&self) -> u32 {
        sonar_timing::elapsed_ticks(self.start, self.end)
    }
}

/// What a notification did to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOutcome {
    /// The echo started; wait for its end.
    EchoStarted,
    /// The echo ended; detach and post the completion.
    EchoFinished(EdgeCompletion),
    /// The edge arrived outside an armed state; detach and give up.
    Rejected,
}

/// Timestamps the two transitions of an echo pulse.
///
/// The first edge after [`arm`](Self::arm) starts the echo and the second
/// ends it, whatever their direction. Timestamps survive `Error` and are
/// only overwritten by the next edges.
#[derive(Debug, Clone)]
pub struct EdgeTimingStateMachine {
    state: FsmState,
    start_time: u32,
    end_time: u32,
}

impl EdgeTimingStateMachine {
    pub const fn new() -> Self {
        EdgeTimingStateMachine {
            state: FsmState::Idle,
            start_time: 0,
            end_time: 0,
        }
    }

    /// Wait for the next rising edge, whatever happened before.
    pub fn arm(&mut self) {
        self.state = FsmState::ArmedWaitingRisingEdge;
    }

    /// Feed one echo-line transition observed at tick `now`.
    pub fn on_edge(&mut self, edge: Edge, now: u32) -> EdgeOutcome {
        match self.state {
            FsmState::ArmedWaitingRisingEdge => {
                self.start_time = now;
                self.state = FsmState::ArmedWaitingFallingEdge;
                tracing::trace!(?edge, now, "echo started");
                EdgeOutcome::EchoStarted
            }
            FsmState::ArmedWaitingFallingEdge => {
                self.end_time = now;
                self.state = FsmState::Finished;
                tracing::trace!(?edge, now, "echo finished");
                EdgeOutcome::EchoFinished(EdgeCompletion {
                    start: self.start_time,
                    end: self.end_time,
                })
            }
            FsmState::Idle | FsmState::Finished | FsmState::Error => {
                self.state = FsmState::Error;
                tracing::trace!(?edge, now, "unexpected edge");
                EdgeOutcome::Rejected
            }
        }
    }

    pub fn state(&self) -> FsmState {
        self.state
    }

    /// Last recorded `(start, end)` timestamps.
    pub fn timestamps(&self) -> (u32, u32) {
        (self.start_time, self.end_time)
    }
}

impl Default for EdgeTimingStateMachine {
    fn default() -> Self {
        EdgeTimingStateMachine::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_echo() {
        let mut fsm = EdgeTimingStateMachine::new();
        assert_eq!(fsm.state(), FsmState::Idle);
        fsm.arm();
        assert_eq!(fsm.on_edge(Edge::Rising, 100), EdgeOutcome::EchoStarted);
        assert_eq!(fsm.state(), FsmState::ArmedWaitingFallingEdge);
        let outcome = fsm.on_edge(Edge::Falling, 5_983);
        assert_eq!(outcome, EdgeOutcome::EchoFinished(EdgeCompletion { start: 100, end: 5_983 }));
        assert_eq!(fsm.state(), FsmState::Finished);
    }

    #[test]
    fn test_edge_while_idle_is_an_error() {
        let mut fsm = EdgeTimingStateMachine::new();
        assert_eq!(fsm.on_edge(Edge::Rising, 1), EdgeOutcome::Rejected);
        assert_eq!(fsm.state(), FsmState::Error);
    }

    #[test]
    fn test_third_edge_is_an_error() {
        let mut fsm = EdgeTimingStateMachine::new();
        fsm.arm();
        fsm.on_edge(Edge::Rising, 1);
        fsm.on_edge(Edge::Falling, 2);
        assert_eq!(fsm.on_edge(Edge::Rising, 3), EdgeOutcome::Rejected);
        assert_eq!(fsm.state(), FsmState::Error);
    }

    #[test]
    fn test_arm_recovers_from_error_and_keeps_timestamps() {
        let mut fsm = EdgeTimingStateMachine::new();
        fsm.arm();
        fsm.on_edge(Edge::Rising, 10);
        fsm.on_edge(Edge::Falling, 20);
        fsm.on_edge(Edge::Rising, 30);
        assert_eq!(fsm.state(), FsmState::Error);

        fsm.arm();
        assert_eq!(fsm.state(), FsmState::ArmedWaitingRisingEdge);
        assert_eq!(fsm.timestamps(), (10, 20));
    }

    #[test]
    fn test_elapsed_across_counter_wrap() {
        let completion = EdgeCompletion { start: 0xFFFF_FFF0, end: 0x0000_0010 };
        assert_eq!(completion.elapsed_ticks(), 32);
    }
}
