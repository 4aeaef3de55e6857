/// Segment Writers
///
/// The trigger controller hands ordered scan batches to a `SegmentWriter`
/// per destination. Writers are created by a `WriterFactory` so the file
/// format stays outside the core.
///
/// Data Pipeline:
/// StreamBuffer → StreamBlock batch → SegmentWriter → segment file
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::types::{Destination, SegmentSpec};
use crate::error::{AcqError, Result};

/// Sink for the scans of one segment.
///
/// Failures are reported, never retried by the caller.
pub trait SegmentWriter: Send {
    /// Open a segment; `metadata` is written alongside the data.
    fn open(&mut self, spec: &SegmentSpec, metadata: &BTreeMap<String, String>) -> Result<()>;

    /// Append `n_scans` interleaved scans.
    fn write_scans(&mut self, data: &[i16], n_scans: usize) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    /// Scans written since open.
    fn scan_count(&self) -> u64;

    /// Location of the open segment, if it has one.
    fn path(&self) -> Option<&Path> {
        None
    }
}

pub trait WriterFactory: Send + Sync {
    fn create(&self, dst: Destination) -> Box<dyn SegmentWriter>;
}

/// A segment captured in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySegment {
    pub stem: String,
    pub dst: Option<Destination>,
    pub n_chans: usize,
    pub data: Vec<i16>,
    pub metadata: BTreeMap<String, String>,
    pub closed: bool,
}

/// Writer keeping segments in a shared list; useful for embedding and
/// tests.
pub struct MemoryWriter {
    sink: Arc<Mutex<Vec<MemorySegment>>>,
    index: Option<usize>,
    scans: u64,
    path: Option<PathBuf>,
    fail_on_write: bool,
}

impl SegmentWriter for MemoryWriter {
    fn open(&mut self, spec: &SegmentSpec, metadata: &BTreeMap<String, String>) -> Result<()> {
        let mut sink = self.sink.lock();
        sink.push(MemorySegment {
            stem: spec.stem(),
            dst: Some(spec.dst),
            n_chans: spec.n_chans,
            data: Vec::new(),
            metadata: metadata.clone(),
            closed: false,
        });
        self.index = Some(sink.len() - 1);
        self.scans = 0;
        self.path = Some(PathBuf::from(spec.stem()));
        Ok(())
    }

    fn write_scans(&mut self, data: &[i16], n_scans: usize) -> Result<()> {
        if self.fail_on_write {
            return Err(AcqError::Writer("memory sink refused write".to_string()));
        }
        let index = self
            .index
            .ok_or_else(|| AcqError::Writer("write to unopened segment".to_string()))?;

        let mut sink = self.sink.lock();
        let seg = &mut sink[index];
        let n = (n_scans * seg.n_chans).min(data.len());
        seg.data.extend_from_slice(&data[..n]);
        self.scans += n_scans as u64;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(index) = self.index.take() {
            self.sink.lock()[index].closed = true;
        }
        self.path = None;
        Ok(())
    }

    fn scan_count(&self) -> u64 {
        self.scans
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[derive(Clone, Default)]
pub struct MemoryWriterFactory {
    sink: Arc<Mutex<Vec<MemorySegment>>>,
    failing: Arc<Mutex<Vec<Destination>>>,
}

impl MemoryWriterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make writes to `dst` fail from now on.
    pub fn fail_writes_to(&self, dst: Destination) {
        self.failing.lock().push(dst);
    }

    pub fn segments(&self) -> Vec<MemorySegment> {
        self.sink.lock().clone()
    }
}

impl WriterFactory for MemoryWriterFactory {
    fn create(&self, dst: Destination) -> Box<dyn SegmentWriter> {
        Box::new(MemoryWriter {
            sink: Arc::clone(&self.sink),
            index: None,
            scans: 0,
            path: None,
            fail_on_write: self.failing.lock().contains(&dst),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn spec(dst: Destination) -> SegmentSpec {
        SegmentSpec {
            run_name: "t".into(),
            gate: 0,
            trigger: 0,
            dst,
            sample_rate: 1000.0,
            n_chans: 2,
            created: Utc::now(),
        }
    }

    #[test]
    fn test_memory_writer_lifecycle() {
        let factory = MemoryWriterFactory::new();
        let mut w = factory.create(Destination::Ni);

        assert!(w.write_scans(&[1, 2], 1).is_err());

        w.open(&spec(Destination::Ni), &BTreeMap::new()).unwrap();
        assert!(w.path().is_some());
        w.write_scans(&[1, 2, 3, 4], 2).unwrap();
        assert_eq!(w.scan_count(), 2);
        w.close().unwrap();
        assert!(w.path().is_none());

        let segs = factory.segments();
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].data, vec![1, 2, 3, 4]);
        assert!(segs[0].closed);
        assert_eq!(segs[0].stem, "t_g0_t0.nidq");
    }

    #[test]
    fn test_failing_destination() {
        let factory = MemoryWriterFactory::new();
        factory.fail_writes_to(Destination::ProbeAp(0));

        let mut w = factory.create(Destination::ProbeAp(0));
        w.open(&spec(Destination::ProbeAp(0)), &BTreeMap::new()).unwrap();
        assert!(matches!(w.write_scans(&[0, 0], 1), Err(AcqError::Writer(_))));
    }
}
