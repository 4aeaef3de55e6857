//! Per-channel activity tallies for shank activity maps.
//!
//! A tally accumulates over `chunks_reqd` calls of roughly 0.1 s of data
//! each. A call that completes the period converts the sums to their final
//! units and returns true; the next call starts a new period.

use rayon::prelude::*;

/// Nominal duration of one accumulated chunk in seconds.
pub const TALLY_CHUNK_SECS: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct Tally {
    sample_rate: f64,
    sums: Vec<f64>,
    /// Per-channel side of the threshold at the end of the last chunk
    last_above: Vec<Option<bool>>,
    sum_samps: usize,
    chunks_done: usize,
    chunks_reqd: usize,
    complete: bool,
}

impl Tally {
    pub fn new(sample_rate: f64, n_sums: usize, update_secs: f64) -> Self {
        let mut tally = Self {
            sample_rate,
            sums: vec![0.0; n_sums],
            last_above: vec![None; n_sums],
            sum_samps: 0,
            chunks_done: 0,
            chunks_reqd: 1,
            complete: false,
        };
        tally.updt_changed(update_secs);
        tally
    }

    /// Change the update period and restart accumulation.
    pub fn updt_changed(&mut self, update_secs: f64) {
        self.chunks_reqd = ((update_secs / TALLY_CHUNK_SECS) as usize).max(1);
        self.zero_data();
    }

    pub fn zero_data(&mut self) {
        self.restart();
        self.last_above.iter_mut().for_each(|a| *a = None);
    }

    fn restart(&mut self) {
        self.sums.iter_mut().for_each(|s| *s = 0.0);
        self.sum_samps = 0;
        self.chunks_done = 0;
        self.complete = false;
    }

    pub fn chunks_reqd(&self) -> usize {
        self.chunks_reqd
    }

    /// Results of the last completed period, indexed from `c0`.
    pub fn sums(&self) -> &[f64] {
        &self.sums
    }

    fn begin(&mut self, n_sums: usize) {
        if self.sums.len() != n_sums {
            self.sums.resize(n_sums, 0.0);
            self.last_above = vec![None; n_sums];
            self.restart();
        } else if self.complete {
            self.restart();
        }
    }

    /// Accumulate threshold crossings of channels `[c0, c_lim)`.
    ///
    /// A spike is a transition from above `thresh` to at or below it, so
    /// `thresh` is negative for the usual negative-going spikes. Crossings
    /// between consecutive chunks count. Completed sums hold the spike rate
    /// in Hz.
    pub fn count_spikes(
        &mut self,
        data: &[i16],
        ntpts: usize,
        nchans: usize,
        c0: usize,
        c_lim: usize,
        thresh: i16,
    ) -> bool {
        let c_lim = c_lim.min(nchans);
        let ntpts = ntpts.min(data.len() / nchans.max(1));
        if c0 >= c_lim || ntpts == 0 {
            return false;
        }
        self.begin(c_lim - c0);

        let counts: Vec<(usize, bool)> = (c0..c_lim)
            .into_par_iter()
            .zip(self.last_above.par_iter())
            .map(|(c, &last)| {
                let mut prev_above = last.unwrap_or(data[c] > thresh);
                let mut n = 0;
                for t in 0..ntpts {
                    let above = data[t * nchans + c] > thresh;
                    if prev_above && !above {
                        n += 1;
                    }
                    prev_above = above;
                }
                (n, prev_above)
            })
            .collect();

        for ((sum, last), (n, above)) in self.sums.iter_mut().zip(self.last_above.iter_mut()).zip(counts) {
            *sum += n as f64;
            *last = Some(above);
        }
        self.sum_samps += ntpts;

        if !self.finish_chunk() {
            return false;
        }

        let scale = self.sample_rate / self.sum_samps as f64;
        self.sums.iter_mut().for_each(|s| *s *= scale);
        true
    }

    /// Accumulate the peak-to-peak span of channels `[c0, c_lim)`.
    ///
    /// Completed sums hold the mean span per chunk in raw units.
    pub fn accum_pk_pk(&mut self, data: &[i16], ntpts: usize, nchans: usize, c0: usize, c_lim: usize) -> bool {
        let c_lim = c_lim.min(nchans);
        let ntpts = ntpts.min(data.len() / nchans.max(1));
        if c0 >= c_lim || ntpts == 0 {
            return false;
        }
        self.begin(c_lim - c0);

        let spans: Vec<i32> = (c0..c_lim)
            .into_par_iter()
            .map(|c| {
                let (lo, hi) = data
                    .iter()
                    .skip(c)
                    .step_by(nchans)
                    .take(ntpts)
                    .fold((i16::MAX, i16::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
                i32::from(hi) - i32::from(lo)
            })
            .collect();

        for (sum, span) in self.sums.iter_mut().zip(spans) {
            *sum += f64::from(span);
        }
        self.sum_samps += ntpts;

        if !self.finish_chunk() {
            return false;
        }

        let scale = 1.0 / self.chunks_done as f64;
        self.sums.iter_mut().for_each(|s| *s *= scale);
        true
    }

    /// Count a chunk; true when it completes the period.
    fn finish_chunk(&mut self) -> bool {
        self.chunks_done += 1;
        self.complete = self.chunks_done >= self.chunks_reqd;
        self.complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One second of 2-channel data at 1 kHz; channel 0 spikes `n` times.
    fn spiky(n: usize) -> Vec<i16> {
        let mut data = vec![0i16; 2000];
        for k in 0..n {
            let t = 10 + k * (990 / n.max(1));
            data[t * 2] = -500;
        }
        data
    }

    #[test]
    fn test_chunks_reqd() {
        assert_eq!(Tally::new(1000.0, 2, 1.05).chunks_reqd(), 10);
        assert_eq!(Tally::new(1000.0, 2, 0.01).chunks_reqd(), 1);
    }

    #[test]
    fn test_spike_rate() {
        let mut tally = Tally::new(1000.0, 2, 0.25);
        let data = spiky(5);

        assert!(!tally.count_spikes(&data, 1000, 2, 0, 2, -100));
        assert!(tally.count_spikes(&data, 1000, 2, 0, 2, -100));

        // 10 spikes over 2 seconds
        assert!((tally.sums()[0] - 5.0).abs() < 1e-9);
        assert_eq!(tally.sums()[1], 0.0);

        // Next call opens a fresh period
        assert!(!tally.count_spikes(&spiky(1), 1000, 2, 0, 2, -100));
        assert_eq!(tally.sums()[0], 1.0);
    }

    #[test]
    fn test_pk_pk_mean() {
        let mut tally = Tally::new(1000.0, 1, 0.25);
        let mut a = vec![0i16; 20];
        a[3] = 40;
        a[7] = -10;
        let b = vec![5i16; 20];

        assert!(!tally.accum_pk_pk(&a, 10, 2, 1, 2));
        assert!(tally.accum_pk_pk(&b, 10, 2, 1, 2));
        assert_eq!(tally.sums(), &[25.0]);
    }

    #[test]
    fn test_zero_and_resize() {
        let mut tally = Tally::new(1000.0, 4, 0.15);
        assert!(tally.count_spikes(&spiky(3), 1000, 2, 0, 1, -100));
        assert_eq!(tally.sums().len(), 1);

        tally.zero_data();
        assert!(tally.sums().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_crossing_between_chunks() {
        let mut tally = Tally::new(1000.0, 1, 0.25);
        let quiet = vec![0i16; 100];
        let mut dip = vec![0i16; 100];
        dip[0] = -500;

        assert!(!tally.count_spikes(&quiet, 100, 1, 0, 1, -100));
        assert!(tally.count_spikes(&dip, 100, 1, 0, 1, -100));
        // One spike over 0.2 s
        assert!((tally.sums()[0] - 5.0).abs() < 1e-9);

        // Reset forgets which side the last chunk ended on
        let mut low = vec![-500i16; 100];
        assert!(!tally.count_spikes(&low, 100, 1, 0, 1, -100));
        tally.zero_data();
        low[99] = 0;
        assert!(!tally.count_spikes(&low, 100, 1, 0, 1, -100));
        assert_eq!(tally.sums()[0], 0.0);
    }

    #[test]
    fn test_short_data_ignored() {
        let mut tally = Tally::new(1000.0, 2, 0.05);
        assert!(!tally.count_spikes(&[], 10, 2, 0, 2, -100));
        assert!(!tally.accum_pk_pk(&[], 10, 2, 0, 1));
        assert!(!tally.accum_pk_pk(&[3], 10, 2, 0, 1));
        assert!(tally.sums().iter().all(|&s| s == 0.0));

        // A claimed count larger than the data uses the whole scans present
        assert!(tally.accum_pk_pk(&[1, 0, 9, 0], 10, 2, 0, 1));
        assert_eq!(tally.sums(), &[8.0]);
    }
}
