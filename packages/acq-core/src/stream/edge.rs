//! Threshold and bit edge detection over a stream buffer.
//!
//! Every scan follows the same three phases. If the first sample is already
//! on the target side it is skipped along with its run, since an edge needs
//! a crossing. Then the scan seeks the first sample on the target side and
//! requires `inarow` consecutive qualifying samples, counting that first
//! one, before reporting it.

use serde::{Deserialize, Serialize};

use super::buffer::StreamBuffer;
use super::walker::{ChunkFilter, FilteredStreamWalker, SampleCursor, StreamWalker};

/// Outcome of an edge scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeScan {
    /// Count of the first sample of a qualifying run.
    Found(u64),
    /// No edge yet; the count to pass as `from_ct` on the next attempt.
    Resume(u64),
}

impl EdgeScan {
    pub fn is_found(&self) -> bool {
        matches!(self, EdgeScan::Found(_))
    }

    pub fn ct(&self) -> u64 {
        match *self {
            EdgeScan::Found(ct) | EdgeScan::Resume(ct) => ct,
        }
    }
}

#[derive(Clone, Copy)]
enum Phase {
    PrefixSkip,
    Seek,
    Sustain { start: u64, run: usize },
}

fn scan_for_edge<C, P>(cursor: &mut C, end_ct: u64, inarow: usize, on_target: P) -> EdgeScan
where
    C: SampleCursor,
    P: Fn(i16) -> bool,
{
    let inarow = inarow.max(1);

    let mut phase = if on_target(cursor.current()) {
        Phase::PrefixSkip
    } else {
        Phase::Seek
    };

    loop {
        let hit = on_target(cursor.current());

        phase = match phase {
            Phase::PrefixSkip if hit => Phase::PrefixSkip,
            Phase::PrefixSkip => Phase::Seek,
            Phase::Seek if hit => {
                if inarow == 1 {
                    return EdgeScan::Found(cursor.cur_ct());
                }
                Phase::Sustain {
                    start: cursor.cur_ct(),
                    run: 1,
                }
            }
            Phase::Seek => Phase::Seek,
            Phase::Sustain { start, run } if hit => {
                let run = run + 1;
                if run >= inarow {
                    return EdgeScan::Found(start);
                }
                Phase::Sustain { start, run }
            }
            Phase::Sustain { .. } => Phase::Seek,
        };

        if !cursor.advance() {
            break;
        }
    }

    match phase {
        // Rescan the open run once more data arrives
        Phase::Sustain { start, .. } => EdgeScan::Resume(start.saturating_sub(1)),
        _ => EdgeScan::Resume(end_ct),
    }
}

fn bit_of(v: i16, bit: u32) -> bool {
    (v as u16).checked_shr(bit).unwrap_or(0) & 1 != 0
}

impl StreamBuffer {
    fn scan_raw<P: Fn(i16) -> bool>(
        &self,
        from_ct: u64,
        chan: usize,
        inarow: usize,
        on_target: P,
    ) -> EdgeScan {
        self.with_view(|view| {
            let end_ct = view.end_ct();
            let mut w = StreamWalker::new(view, chan);
            if !w.set_start(from_ct) {
                return EdgeScan::Resume(from_ct);
            }
            scan_for_edge(&mut w, end_ct, inarow, on_target)
        })
    }

    fn scan_filtered<F, P>(&self, from_ct: u64, inarow: usize, filter: &mut F, on_target: P) -> EdgeScan
    where
        F: ChunkFilter,
        P: Fn(i16) -> bool,
    {
        self.with_view(|view| {
            let end_ct = view.end_ct();
            let mut w = FilteredStreamWalker::new(view, filter);
            if !w.set_start(from_ct) {
                return EdgeScan::Resume(from_ct);
            }
            scan_for_edge(&mut w, end_ct, inarow, on_target)
        })
    }

    /// First run of `inarow` samples of `chan` at or above `t`.
    pub fn find_rising_edge(&self, from_ct: u64, chan: usize, t: i16, inarow: usize) -> EdgeScan {
        self.scan_raw(from_ct, chan, inarow, |v| v >= t)
    }

    /// First run of `inarow` samples of `chan` below `t`.
    pub fn find_falling_edge(&self, from_ct: u64, chan: usize, t: i16, inarow: usize) -> EdgeScan {
        self.scan_raw(from_ct, chan, inarow, |v| v < t)
    }

    pub fn find_bit_rising_edge(&self, from_ct: u64, chan: usize, bit: u32, inarow: usize) -> EdgeScan {
        self.scan_raw(from_ct, chan, inarow, |v| bit_of(v, bit))
    }

    pub fn find_bit_falling_edge(&self, from_ct: u64, chan: usize, bit: u32, inarow: usize) -> EdgeScan {
        self.scan_raw(from_ct, chan, inarow, |v| !bit_of(v, bit))
    }

    /// As `find_rising_edge`, on the filter's channel after filtering.
    pub fn find_flt_rising_edge<F: ChunkFilter>(
        &self,
        from_ct: u64,
        t: i16,
        inarow: usize,
        filter: &mut F,
    ) -> EdgeScan {
        self.scan_filtered(from_ct, inarow, filter, |v| v >= t)
    }

    pub fn find_flt_falling_edge<F: ChunkFilter>(
        &self,
        from_ct: u64,
        t: i16,
        inarow: usize,
        filter: &mut F,
    ) -> EdgeScan {
        self.scan_filtered(from_ct, inarow, filter, |v| v < t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono(samples: &[i16]) -> StreamBuffer {
        let q = StreamBuffer::with_capacity_scans(1000.0, 1, 100);
        q.enqueue(samples, samples.len());
        q
    }

    struct Negate {
        buf: Vec<i16>,
    }

    impl ChunkFilter for Negate {
        fn channel(&self) -> usize {
            0
        }

        fn scratch(&self) -> &[i16] {
            &self.buf
        }

        fn scratch_mut(&mut self) -> &mut [i16] {
            &mut self.buf
        }

        fn apply(&mut self, n: usize) {
            for v in &mut self.buf[..n] {
                *v = v.saturating_neg();
            }
        }
    }

    #[test]
    fn test_rising_requires_run() {
        let q = mono(&[0, 0, 5, 5, 0, 5, 5, 5, 0]);

        assert_eq!(q.find_rising_edge(0, 0, 5, 1), EdgeScan::Found(2));
        assert_eq!(q.find_rising_edge(0, 0, 5, 3), EdgeScan::Found(5));
        assert_eq!(q.find_rising_edge(0, 0, 5, 4), EdgeScan::Resume(9));
    }

    #[test]
    fn test_open_run_resumes_before_candidate() {
        let q = mono(&[0, 5, 5]);
        let scan = q.find_rising_edge(0, 0, 5, 3);
        assert_eq!(scan, EdgeScan::Resume(0));

        q.enqueue(&[5], 1);
        assert_eq!(q.find_rising_edge(scan.ct(), 0, 5, 3), EdgeScan::Found(1));
    }

    #[test]
    fn test_prefix_skipped() {
        let q = mono(&[5, 5, 0, 5]);
        assert_eq!(q.find_rising_edge(0, 0, 5, 1), EdgeScan::Found(3));

        // Starting mid-prefix still needs a crossing
        assert_eq!(q.find_rising_edge(1, 0, 5, 1), EdgeScan::Found(3));
    }

    #[test]
    fn test_unstartable_returns_from() {
        let q = mono(&[0, 5]);
        assert_eq!(q.find_rising_edge(7, 0, 5, 1), EdgeScan::Resume(7));

        let empty = StreamBuffer::with_capacity_scans(1000.0, 1, 10);
        assert_eq!(empty.find_rising_edge(0, 0, 5, 1), EdgeScan::Resume(0));
    }

    #[test]
    fn test_falling_edge() {
        let q = mono(&[5, 6, 4, 0, 7]);
        assert_eq!(q.find_falling_edge(0, 0, 5, 2), EdgeScan::Found(2));
        assert_eq!(q.find_falling_edge(0, 0, 5, 3), EdgeScan::Resume(5));
    }

    #[test]
    fn test_bit_edges() {
        let q = mono(&[0, 4, 5, 1, 0]);
        assert_eq!(q.find_bit_rising_edge(0, 0, 2, 2), EdgeScan::Found(1));
        assert_eq!(q.find_bit_falling_edge(0, 0, 2, 2), EdgeScan::Found(3));

        // Sign bit
        let q = mono(&[0, -1]);
        assert_eq!(q.find_bit_rising_edge(0, 0, 15, 1), EdgeScan::Found(1));
    }

    #[test]
    fn test_filtered_edges() {
        let q = mono(&[0, -5, -5, -5, 0, 0]);
        let mut flt = Negate { buf: vec![0; 2] };

        assert_eq!(q.find_flt_rising_edge(0, 5, 3, &mut flt), EdgeScan::Found(1));
        assert_eq!(q.find_flt_falling_edge(1, 5, 2, &mut flt), EdgeScan::Found(4));
    }
}
