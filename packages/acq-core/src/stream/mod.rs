// Count-addressable stream buffers and the scanners built on them
//
// - `buffer`: mutex-guarded circular store of interleaved scans
// - `walker`: cursors over one channel across the ring wraparound
// - `edge`: threshold and bit edge detection on top of the walkers

pub mod buffer;
pub mod edge;
pub mod types;
pub mod walker;

pub use buffer::StreamBuffer;
pub use edge::EdgeScan;
pub use types::{EnqueueTiming, Placement};
pub use walker::{ChunkFilter, FilteredStreamWalker, RingView, SampleCursor, StreamWalker};
