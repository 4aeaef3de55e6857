//! Second-order recursive filter over interleaved `i16` blocks
//!
//! Direct Form II Transposed with the denominator normalized to 1.
//! Samples enter as `f32`, state is carried in `f64`, and outputs are
//! truncated back to `i16` with saturation.

use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_1_SQRT_2, PI, SQRT_2};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiquadType {
    Lowpass,
    Highpass,
    Bandpass,
    Notch,
    Peak,
    Lowshelf,
    Highshelf,
}

/// Transfer function `H(z) = (a0 + a1 z^-1 + a2 z^-2) / (1 + b1 z^-1 + b2 z^-2)`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BiquadCoeffs {
    pub a0: f64,
    pub a1: f64,
    pub a2: f64,
    pub b1: f64,
    pub b2: f64,
}

impl BiquadCoeffs {
    /// Bilinear cookbook design. `fc` is the cutoff over the sample rate.
    pub fn design(kind: BiquadType, fc: f64, q: f64, peak_gain_db: f64) -> Self {
        let k = (PI * fc).tan();
        let kk = k * k;
        let v = 10f64.powf(peak_gain_db.abs() / 20.0);
        let boost = peak_gain_db >= 0.0;

        match kind {
            BiquadType::Lowpass => {
                let norm = 1.0 / (1.0 + k / q + kk);
                let a0 = kk * norm;
                Self {
                    a0,
                    a1: 2.0 * a0,
                    a2: a0,
                    b1: 2.0 * (kk - 1.0) * norm,
                    b2: (1.0 - k / q + kk) * norm,
                }
            }
            BiquadType::Highpass => {
                let norm = 1.0 / (1.0 + k / q + kk);
                Self {
                    a0: norm,
                    a1: -2.0 * norm,
                    a2: norm,
                    b1: 2.0 * (kk - 1.0) * norm,
                    b2: (1.0 - k / q + kk) * norm,
                }
            }
            BiquadType::Bandpass => {
                let norm = 1.0 / (1.0 + k / q + kk);
                let a0 = k / q * norm;
                Self {
                    a0,
                    a1: 0.0,
                    a2: -a0,
                    b1: 2.0 * (kk - 1.0) * norm,
                    b2: (1.0 - k / q + kk) * norm,
                }
            }
            BiquadType::Notch => {
                let norm = 1.0 / (1.0 + k / q + kk);
                let a0 = (1.0 + kk) * norm;
                let a1 = 2.0 * (kk - 1.0) * norm;
                Self {
                    a0,
                    a1,
                    a2: a0,
                    b1: a1,
                    b2: (1.0 - k / q + kk) * norm,
                }
            }
            BiquadType::Peak => {
                let (num, den) = if boost { (v / q, 1.0 / q) } else { (1.0 / q, v / q) };
                let norm = 1.0 / (1.0 + den * k + kk);
                let a1 = 2.0 * (kk - 1.0) * norm;
                Self {
                    a0: (1.0 + num * k + kk) * norm,
                    a1,
                    a2: (1.0 - num * k + kk) * norm,
                    b1: a1,
                    b2: (1.0 - den * k + kk) * norm,
                }
            }
            BiquadType::Lowshelf => {
                let sv = (2.0 * v).sqrt();
                if boost {
                    let norm = 1.0 / (1.0 + SQRT_2 * k + kk);
                    Self {
                        a0: (1.0 + sv * k + v * kk) * norm,
                        a1: 2.0 * (v * kk - 1.0) * norm,
                        a2: (1.0 - sv * k + v * kk) * norm,
                        b1: 2.0 * (kk - 1.0) * norm,
                        b2: (1.0 - SQRT_2 * k + kk) * norm,
                    }
                } else {
                    let norm = 1.0 / (1.0 + sv * k + v * kk);
                    Self {
                        a0: (1.0 + SQRT_2 * k + kk) * norm,
                        a1: 2.0 * (kk - 1.0) * norm,
                        a2: (1.0 - SQRT_2 * k + kk) * norm,
                        b1: 2.0 * (v * kk - 1.0) * norm,
                        b2: (1.0 - sv * k + v * kk) * norm,
                    }
                }
            }
            BiquadType::Highshelf => {
                let sv = (2.0 * v).sqrt();
                if boost {
                    let norm = 1.0 / (1.0 + SQRT_2 * k + kk);
                    Self {
                        a0: (v + sv * k + kk) * norm,
                        a1: 2.0 * (kk - v) * norm,
                        a2: (v - sv * k + kk) * norm,
                        b1: 2.0 * (kk - 1.0) * norm,
                        b2: (1.0 - SQRT_2 * k + kk) * norm,
                    }
                } else {
                    let norm = 1.0 / (v + sv * k + kk);
                    Self {
                        a0: (1.0 + SQRT_2 * k + kk) * norm,
                        a1: 2.0 * (kk - 1.0) * norm,
                        a2: (1.0 - SQRT_2 * k + kk) * norm,
                        b1: 2.0 * (kk - v) * norm,
                        b2: (v - sv * k + kk) * norm,
                    }
                }
            }
        }
    }
}

/// Delay line of one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Taps {
    z1: f64,
    z2: f64,
}

impl Taps {
    #[inline]
    fn step(&mut self, c: &BiquadCoeffs, input: f32) -> f64 {
        let input = f64::from(input);
        let out = input * c.a0 + self.z1;
        self.z1 = input * c.a1 + self.z2 - c.b1 * out;
        self.z2 = input * c.a2 - c.b2 * out;
        out
    }

    #[inline]
    fn filter(&mut self, c: &BiquadCoeffs, sample: &mut i16) {
        // Float-to-int casts saturate and truncate toward zero
        *sample = self.step(c, f32::from(*sample)) as i16;
    }
}

/// Retained state, tagged by the mode that created it.
#[derive(Debug, Clone, Default)]
enum Memory {
    #[default]
    Empty,
    Range {
        c0: usize,
        c_lim: usize,
        taps: Vec<Taps>,
    },
    AllChans(Vec<Taps>),
    Single(Taps),
}

#[derive(Debug, Clone)]
pub struct BiquadFilter {
    kind: BiquadType,
    fc: f64,
    q: f64,
    peak_gain_db: f64,
    coeffs: BiquadCoeffs,
    mem: Memory,
}

fn checked_q(q: f64) -> f64 {
    if q > 0.0 {
        q
    } else {
        FRAC_1_SQRT_2
    }
}

impl BiquadFilter {
    /// Filter with Butterworth Q and no peak gain.
    pub fn new(kind: BiquadType, fc: f64) -> Self {
        Self::with_params(kind, fc, FRAC_1_SQRT_2, 0.0)
    }

    pub fn with_params(kind: BiquadType, fc: f64, q: f64, peak_gain_db: f64) -> Self {
        let q = checked_q(q);
        Self {
            kind,
            fc,
            q,
            peak_gain_db,
            coeffs: BiquadCoeffs::design(kind, fc, q, peak_gain_db),
            mem: Memory::Empty,
        }
    }

    pub fn kind(&self) -> BiquadType {
        self.kind
    }

    pub fn fc(&self) -> f64 {
        self.fc
    }

    pub fn q(&self) -> f64 {
        self.q
    }

    pub fn peak_gain_db(&self) -> f64 {
        self.peak_gain_db
    }

    pub fn coeffs(&self) -> BiquadCoeffs {
        self.coeffs
    }

    pub fn set_type(&mut self, kind: BiquadType) {
        self.kind = kind;
        self.calc();
    }

    pub fn set_q(&mut self, q: f64) {
        self.q = checked_q(q);
        self.calc();
    }

    pub fn set_fc(&mut self, fc: f64) {
        self.fc = fc;
        self.calc();
    }

    pub fn set_peak_gain(&mut self, peak_gain_db: f64) {
        self.peak_gain_db = peak_gain_db;
        self.calc();
    }

    pub fn set_biquad(&mut self, kind: BiquadType, fc: f64, q: f64, peak_gain_db: f64) {
        self.kind = kind;
        self.fc = fc;
        self.q = checked_q(q);
        self.peak_gain_db = peak_gain_db;
        self.calc();
    }

    fn calc(&mut self) {
        self.coeffs = BiquadCoeffs::design(self.kind, self.fc, self.q, self.peak_gain_db);
    }

    pub fn clear_mem(&mut self) {
        self.mem = Memory::Empty;
    }

    /// Filter channels `[c0, c_lim)` of `ntpts` interleaved scans in place,
    /// carrying one delay line per channel across calls.
    ///
    /// Changing the range discards the retained state.
    pub fn apply_blockwise_mem(
        &mut self,
        data: &mut [i16],
        ntpts: usize,
        nchans: usize,
        c0: usize,
        c_lim: usize,
    ) {
        let c_lim = c_lim.min(nchans);
        if c0 >= c_lim {
            return;
        }

        let same_range = matches!(&self.mem,
            Memory::Range { c0: m0, c_lim: m1, .. } if *m0 == c0 && *m1 == c_lim);
        if !same_range {
            self.mem = Memory::Range {
                c0,
                c_lim,
                taps: vec![Taps::default(); c_lim - c0],
            };
        }

        let coeffs = self.coeffs;
        if let Memory::Range { taps, .. } = &mut self.mem {
            for scan in data.chunks_exact_mut(nchans).take(ntpts) {
                for (tap, sample) in taps.iter_mut().zip(&mut scan[c0..c_lim]) {
                    tap.filter(&coeffs, sample);
                }
            }
        }
    }

    /// Filter one channel, keeping a delay line for every channel so
    /// calls may alternate between channels.
    pub fn apply1_blockwise_mem_all(&mut self, data: &mut [i16], ntpts: usize, nchans: usize, c: usize) {
        if c >= nchans {
            return;
        }

        let fits = matches!(&self.mem, Memory::AllChans(taps) if taps.len() == nchans);
        if !fits {
            self.mem = Memory::AllChans(vec![Taps::default(); nchans]);
        }

        let coeffs = self.coeffs;
        if let Memory::AllChans(taps) = &mut self.mem {
            let tap = &mut taps[c];
            for scan in data.chunks_exact_mut(nchans).take(ntpts) {
                tap.filter(&coeffs, &mut scan[c]);
            }
        }
    }

    /// Filter one channel with a single retained delay line.
    pub fn apply1_blockwise_mem1(&mut self, data: &mut [i16], ntpts: usize, nchans: usize, c: usize) {
        if c >= nchans {
            return;
        }

        if !matches!(self.mem, Memory::Single(_)) {
            self.mem = Memory::Single(Taps::default());
        }

        let coeffs = self.coeffs;
        if let Memory::Single(tap) = &mut self.mem {
            for scan in data.chunks_exact_mut(nchans).take(ntpts) {
                tap.filter(&coeffs, &mut scan[c]);
            }
        }
    }

    /// Filter one channel starting from zero state every call.
    pub fn apply1_blockwise_no_mem(&mut self, data: &mut [i16], ntpts: usize, nchans: usize, c: usize) {
        self.mem = Memory::Empty;
        if c >= nchans {
            return;
        }

        let mut tap = Taps::default();
        for scan in data.chunks_exact_mut(nchans).take(ntpts) {
            tap.filter(&self.coeffs, &mut scan[c]);
        }
    }
}

/// Band limiting with independent edges: highpass at `lo_fc`, then lowpass
/// at `hi_fc`.
#[derive(Debug, Clone)]
pub struct BandpassChain {
    hipass: BiquadFilter,
    lopass: BiquadFilter,
}

impl BandpassChain {
    pub fn new(lo_fc: f64, hi_fc: f64) -> Self {
        Self {
            hipass: BiquadFilter::new(BiquadType::Highpass, lo_fc),
            lopass: BiquadFilter::new(BiquadType::Lowpass, hi_fc),
        }
    }

    pub fn apply_blockwise_mem(
        &mut self,
        data: &mut [i16],
        ntpts: usize,
        nchans: usize,
        c0: usize,
        c_lim: usize,
    ) {
        self.hipass.apply_blockwise_mem(data, ntpts, nchans, c0, c_lim);
        self.lopass.apply_blockwise_mem(data, ntpts, nchans, c0, c_lim);
    }

    pub fn apply1_blockwise_mem1(&mut self, data: &mut [i16], ntpts: usize, nchans: usize, c: usize) {
        self.hipass.apply1_blockwise_mem1(data, ntpts, nchans, c);
        self.lopass.apply1_blockwise_mem1(data, ntpts, nchans, c);
    }

    pub fn clear_mem(&mut self) {
        self.hipass.clear_mem();
        self.lopass.clear_mem();
    }
}
