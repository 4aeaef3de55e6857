// Common types for the stream module

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where a count or time falls relative to a stream's retention window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Placement {
    /// Before the stream epoch, or the stream holds nothing yet
    WayLeft,
    /// Already evicted
    Left,
    Inside,
    /// At or after the end count, not produced yet
    Right,
}

impl Placement {
    pub fn is_inside(&self) -> bool {
        matches!(self, Placement::Inside)
    }
}

/// Lock wait and copy time of one profiled enqueue.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueTiming {
    pub lock: Duration,
    pub work: Duration,
}
