//! The edge-timed variant: a state machine timestamps the rising and falling
//! edges of the echo against a free-running tick clock.

pub mod driver;
pub mod fsm;

pub use driver::{EdgeSensor, EdgeShared};
pub use fsm::{EdgeCompletion, EdgeOutcome, EdgeTimingStateMachine, FsmState};
