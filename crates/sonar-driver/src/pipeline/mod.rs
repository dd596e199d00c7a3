//! The event-routed variant.
//!
//! After the graph is installed, pulse generation, edge detection, time
//! capture and the completion notification are chained in hardware; the
//! CPU only builds the pipeline, waits for the completion event and reads
//! two capture registers.

pub mod builder;
pub mod driver;
pub mod fabric;
pub mod graph;

pub use builder::{Peripherals, PipelineBuilder, PipelineHandle};
pub use driver::{PipelineResources, PipelineSensor, PipelineShared};
pub use fabric::{
    CaptureTimer, ChannelId, EventEndpoint, EventHandler, EventRouter, FabricError, GroupId, PinEvents,
    SoftwareEvent, TaskEndpoint,
};
pub use graph::{ArmingGroup, Endpoints, InstalledGraph};
