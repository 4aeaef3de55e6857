// Gate/trigger control and segment writing
//
// - `controller`: run state, segment files, cursors and the run loop
// - `policy`: immediate, timed and TTL trigger policies
// - `align`: matching counts across independently clocked streams
// - `writer`: the segment writer contract plus an in-memory writer

pub mod align;
pub mod controller;
pub mod policy;
mod probe;
pub mod types;
pub mod writer;

pub use align::align_x12;
pub use controller::{GateSnapshot, SegmentProgress, TriggerController};
pub use policy::{policy_for, EdgeSource, ImmediatePolicy, TimedPolicy, TriggerPolicy, TtlPolicy};
pub use types::{
    Destination, NiStream, ProbeStream, RunSummary, SegmentRecord, SegmentSpec, StreamBlock,
    StreamSet, TimedParams, TriggerConfig, TriggerMode, TtlMode, TtlParams, TtlSource, WritePerf,
};
pub use writer::{MemorySegment, MemoryWriter, MemoryWriterFactory, SegmentWriter, WriterFactory};
