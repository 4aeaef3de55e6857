// Recursive filter as a chunk stage of the filtered stream walker

use super::biquad::BiquadFilter;
use crate::stream::ChunkFilter;

/// Filters one channel a chunk at a time, carrying a single delay line
/// between chunks.
#[derive(Debug, Clone)]
pub struct BiquadChunkFilter {
    chan: usize,
    buf: Vec<i16>,
    biquad: BiquadFilter,
}

impl BiquadChunkFilter {
    pub fn new(chan: usize, max_chunk: usize, biquad: BiquadFilter) -> Self {
        Self {
            chan,
            buf: vec![0; max_chunk],
            biquad,
        }
    }

    /// Forget filter history before scanning a new span.
    pub fn reset(&mut self) {
        self.biquad.clear_mem();
    }
}

impl ChunkFilter for BiquadChunkFilter {
    fn channel(&self) -> usize {
        self.chan
    }

    fn scratch(&self) -> &[i16] {
        &self.buf
    }

    fn scratch_mut(&mut self) -> &mut [i16] {
        &mut self.buf
    }

    fn apply(&mut self, n: usize) {
        self.biquad.apply1_blockwise_mem1(&mut self.buf[..n], n, 1, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal_processing::BiquadType;
    use crate::stream::{EdgeScan, StreamBuffer};

    #[test]
    fn test_highpassed_edge_ignores_offset() {
        // Large DC offset on channel 1 with a burst riding on it
        let q = StreamBuffer::with_capacity_scans(1000.0, 2, 4000);
        let mut data = Vec::new();
        for ct in 0..3000 {
            let burst = if (2500..2510).contains(&ct) { 3000 } else { 0 };
            data.extend_from_slice(&[0i16, 8000 + burst]);
        }
        q.enqueue(&data, 3000);

        // Raw samples never cross back below the threshold
        assert_eq!(q.find_rising_edge(0, 1, 2000, 1), EdgeScan::Resume(3000));

        let hp = BiquadFilter::new(BiquadType::Highpass, 0.01);
        let mut flt = BiquadChunkFilter::new(1, 256, hp);
        let scan = q.find_flt_rising_edge(1000, 2000, 1, &mut flt);
        assert_eq!(scan, EdgeScan::Found(2500));
    }
}
