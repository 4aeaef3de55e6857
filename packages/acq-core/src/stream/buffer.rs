// Circular scan store for one acquisition stream
//
// Samples are interleaved channel-fastest. Every scan ever enqueued gets a
// count; the buffer retains the newest `capacity` of them. One producer
// thread writes, any number of readers query, and every public method
// holds the stream mutex for its whole body.

use parking_lot::Mutex;
use std::time::Instant;

use super::types::{EnqueueTiming, Placement};
use super::walker::RingView;
use crate::error::{AcqError, Result};

/// Tolerance, in samples, absorbing float error when mapping time to counts.
const CT_EPSILON: f64 = 1e-6;

struct Ring {
    buf: Vec<i16>,
    bufmax: usize,
    head: usize,
    len: usize,
    end_ct: u64,
    tzero: f64,
}

impl Ring {
    fn head_ct(&self) -> u64 {
        self.end_ct - self.len as u64
    }

    /// Advance the tail by `n_cts` scans, letting `fill` write each
    /// contiguous destination run. `fill` receives the run and the index
    /// of its first scan within the appended block.
    fn append_with<F>(&mut self, n_cts: usize, n_chans: usize, mut fill: F)
    where
        F: FnMut(&mut [i16], usize),
    {
        let bufmax = self.bufmax;

        self.end_ct += n_cts as u64;

        if n_cts >= bufmax {
            // Keep only the newest bufmax scans
            self.head = 0;
            self.len = bufmax;
            fill(&mut self.buf[..], n_cts - bufmax);
            return;
        }

        let newlen = (self.len + n_cts).min(bufmax);
        let newhead = (self.head + self.len + n_cts - newlen) % bufmax;
        let oldtail = (self.head + self.len) % bufmax;
        let ncpy1 = n_cts.min(bufmax - oldtail);

        fill(
            &mut self.buf[oldtail * n_chans..(oldtail + ncpy1) * n_chans],
            0,
        );

        let rem = n_cts - ncpy1;
        if rem > 0 {
            fill(&mut self.buf[..rem * n_chans], ncpy1);
        }

        self.head = newhead;
        self.len = newlen;
    }

    /// Ring index of the scan `offset` scans past the head.
    fn index_of(&self, offset: usize) -> usize {
        (self.head + offset) % self.bufmax
    }
}

pub struct StreamBuffer {
    srate: f64,
    n_chans: usize,
    ring: Mutex<Ring>,
}

impl StreamBuffer {
    /// Create a buffer retaining `capacity_secs` worth of scans.
    pub fn new(srate: f64, n_chans: usize, capacity_secs: f64) -> Self {
        Self::with_capacity_scans(srate, n_chans, (capacity_secs * srate) as usize)
    }

    pub fn with_capacity_scans(srate: f64, n_chans: usize, capacity: usize) -> Self {
        let bufmax = capacity.max(1);
        let n_chans = n_chans.max(1);

        log::debug!(
            "StreamBuffer: {} chans @ {} Hz, {} scans retained",
            n_chans,
            srate,
            bufmax
        );

        Self {
            srate,
            n_chans,
            ring: Mutex::new(Ring {
                buf: vec![0; bufmax * n_chans],
                bufmax,
                head: 0,
                len: 0,
                end_ct: 0,
                tzero: 0.0,
            }),
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.srate
    }

    pub fn n_chans(&self) -> usize {
        self.n_chans
    }

    /// Maximum number of scans retained.
    pub fn capacity(&self) -> usize {
        self.ring.lock().bufmax
    }

    /// Number of scans currently retained.
    pub fn len(&self) -> usize {
        self.ring.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_tzero(&self, tzero: f64) {
        self.ring.lock().tzero = tzero;
    }

    pub fn tzero(&self) -> f64 {
        self.ring.lock().tzero
    }

    /// Append `n_cts` interleaved scans from `src`.
    pub fn enqueue(&self, src: &[i16], n_cts: usize) {
        let n_cts = self.checked_scans(src, n_cts);
        let nc = self.n_chans;

        let mut ring = self.ring.lock();
        ring.append_with(n_cts, nc, |dst, first| {
            let from = first * nc;
            dst.copy_from_slice(&src[from..from + dst.len()]);
        });
    }

    /// Enqueue that also reports time spent waiting for the lock and copying.
    pub fn enqueue_profile(&self, src: &[i16], n_cts: usize) -> EnqueueTiming {
        let n_cts = self.checked_scans(src, n_cts);
        let nc = self.n_chans;

        let t0 = Instant::now();
        let mut ring = self.ring.lock();
        let t1 = Instant::now();

        ring.append_with(n_cts, nc, |dst, first| {
            let from = first * nc;
            dst.copy_from_slice(&src[from..from + dst.len()]);
        });

        EnqueueTiming {
            lock: t1 - t0,
            work: t1.elapsed(),
        }
    }

    /// Fill the span `[t0, t_lim)` with zero scans, marking a clock gap.
    pub fn enqueue_zero(&self, t0: f64, t_lim: f64) {
        let n_cts = ((t_lim - t0) * self.srate).max(0.0) as usize;
        if n_cts == 0 {
            return;
        }

        log::debug!("Zero-filling {} scans ({:.4}s gap)", n_cts, t_lim - t0);

        let mut ring = self.ring.lock();
        ring.append_with(n_cts, self.n_chans, |dst, _| dst.fill(0));
    }

    fn checked_scans(&self, src: &[i16], n_cts: usize) -> usize {
        let have = src.len() / self.n_chans;
        if have < n_cts {
            log::warn!(
                "Enqueue of {} scans given only {} scans of data, truncating",
                n_cts,
                have
            );
            return have;
        }
        n_cts
    }

    /// Count of the oldest retained scan.
    pub fn q_head_ct(&self) -> u64 {
        self.ring.lock().head_ct()
    }

    /// Count of scans enqueued since run start.
    pub fn end_count(&self) -> u64 {
        self.ring.lock().end_ct
    }

    /// Stream wall time at the end count.
    pub fn end_time(&self) -> f64 {
        let ring = self.ring.lock();
        ring.tzero + ring.end_ct as f64 / self.srate
    }

    /// Map a stream time to its count.
    ///
    /// The count is meaningful for every placement except `WayLeft`, where
    /// it is zero.
    pub fn map_time_to_ct(&self, t: f64) -> (u64, Placement) {
        let ring = self.ring.lock();

        if t < ring.tzero || ring.end_ct == 0 {
            return (0, Placement::WayLeft);
        }

        let ct = ((t - ring.tzero) * self.srate + CT_EPSILON).floor() as u64;

        if ct >= ring.end_ct {
            (ct, Placement::Right)
        } else if ct < ring.head_ct() {
            (ct, Placement::Left)
        } else {
            (ct, Placement::Inside)
        }
    }

    /// Map a count to its stream time.
    ///
    /// The time is meaningful for every placement except `WayLeft`, where
    /// it is zero.
    pub fn map_ct_to_time(&self, ct: u64) -> (f64, Placement) {
        let ring = self.ring.lock();

        if ring.end_ct == 0 {
            return (0.0, Placement::WayLeft);
        }

        let t = ring.tzero + ct as f64 / self.srate;

        if ct >= ring.end_ct {
            (t, Placement::Right)
        } else if ct < ring.head_ct() {
            (t, Placement::Left)
        } else {
            (t, Placement::Inside)
        }
    }

    /// Append up to `n_max` scans starting at `from_ct` onto `dest`.
    ///
    /// Fewer scans are copied when fewer are available. Nothing is copied
    /// for `Left` or `Right`.
    pub fn get_n_scans_from_ct(
        &self,
        dest: &mut Vec<i16>,
        from_ct: u64,
        n_max: usize,
    ) -> Result<Placement> {
        let nc = self.n_chans;
        let ring = self.ring.lock();

        if from_ct >= ring.end_ct {
            return Ok(Placement::Right);
        }

        let head_ct = ring.head_ct();
        if from_ct < head_ct {
            return Ok(Placement::Left);
        }

        let offset = (from_ct - head_ct) as usize;
        let head = ring.index_of(offset);
        let n = n_max.min(ring.len - offset);

        dest.try_reserve(n * nc).map_err(|_| {
            log::warn!("StreamBuffer low mem for {} scans. SRate {}", n, self.srate);
            AcqError::LowMemory(n * nc)
        })?;

        let nrhs = n.min(ring.bufmax - head);
        dest.extend_from_slice(&ring.buf[head * nc..(head + nrhs) * nc]);

        if n > nrhs {
            dest.extend_from_slice(&ring.buf[..(n - nrhs) * nc]);
        }

        Ok(Placement::Inside)
    }

    /// Copy exactly `n_scans` samples of `chan` starting at `from_ct`.
    ///
    /// Fails without writing when the window cannot supply all of them.
    /// Returns `from_ct`.
    pub fn get_n_scans_from_ct_mono(
        &self,
        dst: &mut [i16],
        from_ct: u64,
        n_scans: usize,
        chan: usize,
    ) -> Result<u64> {
        self.demux(dst, from_ct, n_scans, &[chan])
    }

    /// Copy exactly `n_scans` sample pairs of `(chan1, chan2)` starting at
    /// `from_ct`, interleaved into `dst`.
    pub fn get_n_scans_from_ct_stereo(
        &self,
        dst: &mut [i16],
        from_ct: u64,
        n_scans: usize,
        chan1: usize,
        chan2: usize,
    ) -> Result<u64> {
        self.demux(dst, from_ct, n_scans, &[chan1, chan2])
    }

    pub fn get_newest_n_scans_mono(
        &self,
        dst: &mut [i16],
        n_scans: usize,
        chan: usize,
    ) -> Result<u64> {
        let from_ct = self.newest_start(n_scans)?;
        self.get_n_scans_from_ct_mono(dst, from_ct, n_scans, chan)
    }

    pub fn get_newest_n_scans_stereo(
        &self,
        dst: &mut [i16],
        n_scans: usize,
        chan1: usize,
        chan2: usize,
    ) -> Result<u64> {
        let from_ct = self.newest_start(n_scans)?;
        self.get_n_scans_from_ct_stereo(dst, from_ct, n_scans, chan1, chan2)
    }

    fn newest_start(&self, n_scans: usize) -> Result<u64> {
        let end = self.end_count();
        if end <= n_scans as u64 {
            return Err(AcqError::InexactUnavailable {
                from_ct: 0,
                requested: n_scans,
                available: end as usize,
            });
        }
        Ok(end - n_scans as u64)
    }

    fn demux(&self, dst: &mut [i16], from_ct: u64, n_scans: usize, chans: &[usize]) -> Result<u64> {
        let nc = self.n_chans;
        let width = chans.len();

        if chans.iter().any(|&c| c >= nc) {
            return Err(AcqError::InvalidConfig(format!(
                "Channel {:?} out of range for {} channels",
                chans, nc
            )));
        }
        if dst.len() < n_scans * width {
            return Err(AcqError::InvalidConfig(format!(
                "Destination holds {} samples, {} required",
                dst.len(),
                n_scans * width
            )));
        }

        let ring = self.ring.lock();
        let head_ct = ring.head_ct();

        if from_ct < head_ct {
            return Err(AcqError::OutOfRetention(from_ct));
        }

        let available = ring.end_ct.saturating_sub(from_ct) as usize;
        if available < n_scans {
            return Err(AcqError::InexactUnavailable {
                from_ct,
                requested: n_scans,
                available,
            });
        }

        let offset = (from_ct - head_ct) as usize;
        let head = ring.index_of(offset);
        let nrhs = n_scans.min(ring.bufmax - head);

        let scans = ring.buf[head * nc..(head + nrhs) * nc]
            .chunks_exact(nc)
            .chain(ring.buf[..(n_scans - nrhs) * nc].chunks_exact(nc));

        for (out, scan) in dst.chunks_exact_mut(width).zip(scans) {
            for (o, &c) in out.iter_mut().zip(chans) {
                *o = scan[c];
            }
        }

        Ok(from_ct)
    }

    /// Run `f` on a consistent snapshot of the ring, holding the stream
    /// lock for its duration.
    pub fn with_view<R>(&self, f: impl FnOnce(RingView<'_>) -> R) -> R {
        let ring = self.ring.lock();
        f(RingView::new(
            &ring.buf,
            ring.bufmax,
            ring.head,
            ring.len,
            self.n_chans,
            ring.end_ct,
        ))
    }
}
