//! Synthetic signal producers.
//!
//! Each stream gets its own producer thread that paces itself against the
//! wall clock and enqueues blocks the way acquisition hardware would:
//! - neural channels carry noise and sparse biphasic spikes
//! - slow channels carry a 5 Hz wave
//! - TTL pulses appear on a digital bit and optionally an analog channel
//! - the sync square wave sits on its own digital bit in every stream

use acq_core::{clock, StreamBuffer};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Normalized spike waveform, one entry per sample at 25-30 kHz.
const SPIKE_SHAPE: [f64; 12] = [
    -0.2, -0.6, -1.0, -0.8, -0.4, 0.0, 0.25, 0.35, 0.3, 0.2, 0.1, 0.05,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthConfig {
    pub seed: u64,
    pub noise: i16,
    pub spike_amp: i16,
    pub spike_rate_hz: f64,
    pub ttl_period_secs: f64,
    pub ttl_width_secs: f64,

    #[serde(default = "default_sync_period")]
    pub sync_period_secs: f64,

    /// Producer wake-up period
    #[serde(default = "default_block_secs")]
    pub block_secs: f64,
}

fn default_sync_period() -> f64 {
    1.0
}

fn default_block_secs() -> f64 {
    0.01
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            noise: 200,
            spike_amp: 4000,
            spike_rate_hz: 20.0,
            ttl_period_secs: 0.5,
            ttl_width_secs: 0.1,
            sync_period_secs: default_sync_period(),
            block_secs: default_block_secs(),
        }
    }
}

/// What each channel of one stream carries.
#[derive(Debug, Clone, Default)]
pub struct SignalPlan {
    pub n_chans: usize,
    pub neural: Range<usize>,
    pub slow: Range<usize>,
    /// Analog channel and raw level of the TTL pulse
    pub ttl_analog: Option<(usize, i16)>,
    /// Digital word channel
    pub digital: Option<usize>,
    pub ttl_bit: Option<u32>,
    pub sync_bit: Option<u32>,
}

/// Stateful generator of interleaved scans for one stream.
pub struct Generator {
    plan: SignalPlan,
    cfg: SynthConfig,
    srate: f64,
    rng: StdRng,
    /// Per neural channel, position within an ongoing spike
    spike_pos: Vec<Option<usize>>,
}

impl Generator {
    pub fn new(plan: SignalPlan, cfg: SynthConfig, srate: f64, stream_index: u64) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed.wrapping_add(stream_index));
        let spike_pos = vec![None; plan.neural.len()];
        Self {
            plan,
            cfg,
            srate,
            rng,
            spike_pos,
        }
    }

    fn ttl_high(&self, t: f64) -> bool {
        self.cfg.ttl_period_secs > 0.0 && t.rem_euclid(self.cfg.ttl_period_secs) < self.cfg.ttl_width_secs
    }

    fn sync_high(&self, t: f64) -> bool {
        t.rem_euclid(self.cfg.sync_period_secs) < 0.5 * self.cfg.sync_period_secs
    }

    /// Append `n` scans starting at count `from_ct` onto `out`.
    pub fn fill(&mut self, from_ct: u64, n: usize, out: &mut Vec<i16>) {
        let nc = self.plan.n_chans;
        let p_spike = (self.cfg.spike_rate_hz / self.srate).clamp(0.0, 1.0);
        let noise = self.cfg.noise.max(0);
        out.reserve(n * nc);

        for i in 0..n {
            let t = (from_ct + i as u64) as f64 / self.srate;
            let base = out.len();
            out.resize(base + nc, 0);
            let scan = &mut out[base..];

            for (k, c) in self.plan.neural.clone().enumerate() {
                let mut v = if noise > 0 {
                    f64::from(self.rng.random_range(-noise..=noise))
                } else {
                    0.0
                };

                match self.spike_pos[k] {
                    Some(pos) => {
                        v += SPIKE_SHAPE[pos] * f64::from(self.cfg.spike_amp);
                        self.spike_pos[k] = (pos + 1 < SPIKE_SHAPE.len()).then_some(pos + 1);
                    }
                    None => {
                        if self.rng.random::<f64>() < p_spike {
                            self.spike_pos[k] = Some(0);
                        }
                    }
                }
                scan[c] = v.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
            }

            let slow = (1000.0 * (2.0 * PI * 5.0 * t).sin()) as i16;
            for c in self.plan.slow.clone() {
                scan[c] = slow;
            }

            let ttl = self.ttl_high(t);
            if let Some((c, level)) = self.plan.ttl_analog {
                scan[c] = if ttl { level } else { 0 };
            }

            if let Some(c) = self.plan.digital {
                let mut word: u16 = 0;
                if let Some(bit) = self.plan.ttl_bit {
                    word |= u16::from(ttl) << bit;
                }
                if let Some(bit) = self.plan.sync_bit {
                    word |= u16::from(self.sync_high(t)) << bit;
                }
                scan[c] = word as i16;
            }
        }
    }
}

/// Start a producer feeding `buffer` in real time until `stop` is set.
///
/// The stream epoch is taken when the thread starts. Returns the number of
/// scans produced.
pub fn spawn_producer(
    name: String,
    buffer: Arc<StreamBuffer>,
    mut gen: Generator,
    block_secs: f64,
    stop: Arc<AtomicBool>,
) -> std::io::Result<thread::JoinHandle<u64>> {
    thread::Builder::new().name(name.clone()).spawn(move || {
        let srate = buffer.sample_rate();
        let t0 = clock::now_secs();
        buffer.set_tzero(t0);

        let mut produced: u64 = 0;
        let mut block = Vec::new();
        let mut worst_us: u64 = 0;

        while !stop.load(Ordering::Relaxed) {
            let target = ((clock::now_secs() - t0) * srate) as u64;
            if target > produced {
                let n = (target - produced) as usize;
                block.clear();
                gen.fill(produced, n, &mut block);

                let timing = buffer.enqueue_profile(&block, n);
                worst_us = worst_us.max((timing.lock + timing.work).as_micros() as u64);
                produced += n as u64;
            }
            thread::sleep(Duration::from_secs_f64(block_secs));
        }

        log::info!(
            "Producer {} stopped after {} scans (worst enqueue {} us)",
            name,
            produced,
            worst_us
        );
        produced
    })
}
