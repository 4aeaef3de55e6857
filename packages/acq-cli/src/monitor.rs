//! Live monitor - a reader thread doing what a display would: highpass
//! the newest neural data and keep the per-channel activity tally.

use acq_core::signal_processing::{dc_average, LiveFilter, Tally, TALLY_CHUNK_SECS};
use acq_core::StreamBuffer;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Live highpass corner; `None` leaves the data unfiltered
    #[serde(default)]
    pub highpass_hz: Option<f64>,

    pub spike_thresh: i16,

    #[serde(default = "default_tally_secs")]
    pub tally_secs: f64,
}

fn default_tally_secs() -> f64 {
    1.0
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            highpass_hz: Some(300.0),
            spike_thresh: -1500,
            tally_secs: default_tally_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorReport {
    pub stream: String,
    pub scans_seen: u64,
    /// Scans skipped because the monitor fell behind the ring
    pub scans_missed: u64,
    pub tally_periods: u32,
    /// Spike rate per neural channel over the last complete period, Hz
    pub spike_rates_hz: Vec<f64>,
    /// Mean per-chunk peak-to-peak per neural channel over the last period
    pub pk_pk: Vec<f64>,
    /// Per-channel mean of the last chunk, before filtering
    pub dc_offsets: Vec<i16>,
}

/// Incremental tally over one stream's neural channels.
pub struct Monitor {
    buffer: Arc<StreamBuffer>,
    chans: Range<usize>,
    thresh: i16,
    live: LiveFilter,
    spikes: Tally,
    pk_pk: Tally,
    next_ct: u64,
    report: MonitorReport,
}

impl Monitor {
    pub fn new(name: &str, buffer: Arc<StreamBuffer>, chans: Range<usize>, cfg: &MonitorConfig) -> Self {
        let srate = buffer.sample_rate();
        let n = chans.len();
        let live = LiveFilter::new(srate, chans.clone());
        live.set_highpass(cfg.highpass_hz);

        Self {
            buffer,
            chans,
            thresh: cfg.spike_thresh,
            live,
            spikes: Tally::new(srate, n, cfg.tally_secs),
            pk_pk: Tally::new(srate, n, cfg.tally_secs),
            next_ct: 0,
            report: MonitorReport {
                stream: name.to_string(),
                ..Default::default()
            },
        }
    }

    fn chunk_scans(&self) -> u64 {
        ((TALLY_CHUNK_SECS * self.buffer.sample_rate()) as u64).max(1)
    }

    /// Consume every complete chunk available. Returns the chunks done.
    pub fn poll(&mut self) -> usize {
        let nc = self.buffer.n_chans();
        let chunk = self.chunk_scans();
        let mut done = 0;

        let head = self.buffer.q_head_ct();
        if self.next_ct < head {
            log::warn!(
                "Monitor on {} fell behind, skipping {} scans",
                self.report.stream,
                head - self.next_ct
            );
            self.report.scans_missed += head - self.next_ct;
            self.next_ct = head;
        }

        while self.buffer.end_count() >= self.next_ct + chunk {
            let mut data = Vec::new();
            match self.buffer.get_n_scans_from_ct(&mut data, self.next_ct, chunk as usize) {
                Ok(p) if p.is_inside() => {}
                Ok(_) => break,
                Err(e) => {
                    log::error!("Monitor read failed: {}", e);
                    break;
                }
            }
            let n = data.len() / nc;
            self.consume(&mut data, n);
            self.next_ct += n as u64;
            done += 1;
        }

        done
    }

    fn consume(&mut self, data: &mut [i16], n: usize) {
        let nc = self.buffer.n_chans();
        let (c0, c_lim) = (self.chans.start, self.chans.end);

        self.report.dc_offsets = dc_average(data, n, nc, c0, c_lim, 32768);
        self.live.process(data, n, nc);

        if self.spikes.count_spikes(data, n, nc, c0, c_lim, self.thresh) {
            self.report.spike_rates_hz = self.spikes.sums().to_vec();
            self.report.tally_periods += 1;
            log::debug!(
                "{} spike rates (Hz): {:?}",
                self.report.stream,
                self.report.spike_rates_hz
            );
        }
        if self.pk_pk.accum_pk_pk(data, n, nc, c0, c_lim) {
            self.report.pk_pk = self.pk_pk.sums().to_vec();
        }
        self.report.scans_seen += n as u64;
    }

    pub fn report(&self) -> &MonitorReport {
        &self.report
    }
}

/// Poll `monitor` until `stop` is set.
pub fn spawn_monitor(
    mut monitor: Monitor,
    stop: Arc<AtomicBool>,
) -> std::io::Result<thread::JoinHandle<MonitorReport>> {
    thread::Builder::new().name("monitor".to_string()).spawn(move || {
        let nap = Duration::from_secs_f64(TALLY_CHUNK_SECS / 2.0);
        while !stop.load(Ordering::Relaxed) {
            monitor.poll();
            thread::sleep(nap);
        }
        monitor.poll();
        monitor.report
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(highpass_hz: Option<f64>) -> MonitorConfig {
        MonitorConfig {
            highpass_hz,
            spike_thresh: -1000,
            tally_secs: 0.55,
        }
    }

    /// Two neural channels: channel 0 dips every 50 scans, channel 1 is flat.
    fn spiking(n: u64) -> Vec<i16> {
        (0..n)
            .flat_map(|ct| [if ct % 50 == 10 { -3000 } else { 0 }, 100, 7])
            .collect()
    }

    #[test]
    fn test_rates_after_period() {
        let buffer = Arc::new(StreamBuffer::with_capacity_scans(1000.0, 3, 10_000));
        let mut m = Monitor::new("nidq", buffer.clone(), 0..2, &cfg(None));

        buffer.enqueue(&spiking(450), 450);
        assert_eq!(m.poll(), 4);
        assert!(m.report().spike_rates_hz.is_empty());

        buffer.enqueue(&spiking(100), 100);
        assert_eq!(m.poll(), 1);

        let r = m.report();
        assert_eq!(r.tally_periods, 1);
        assert_eq!(r.scans_seen, 500);
        // One dip per 50 scans at 1 kHz
        assert!((r.spike_rates_hz[0] - 20.0).abs() < 1e-9);
        assert_eq!(r.spike_rates_hz[1], 0.0);
        assert_eq!(r.pk_pk, vec![3000.0, 0.0]);
        assert_eq!(r.dc_offsets, vec![-60, 100]);
    }

    #[test]
    fn test_skips_evicted_data() {
        let buffer = Arc::new(StreamBuffer::with_capacity_scans(1000.0, 3, 200));
        let mut m = Monitor::new("nidq", buffer.clone(), 0..2, &cfg(Some(300.0)));

        buffer.enqueue(&spiking(1000), 1000);
        assert_eq!(m.poll(), 2);
        assert_eq!(m.report().scans_missed, 800);
        assert_eq!(m.report().scans_seen, 200);
    }
}
