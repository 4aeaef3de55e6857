//! Read-only configuration consumed by the acquisition core.
//!
//! Parsing these from settings files happens elsewhere; the structs only
//! carry what the buffers, filters and trigger loop need.

use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::{AcqError, Result};

/// LF channels are sampled once every this many AP scans.
pub const LF_DECIMATION: u64 = 12;

/// Sync pulse source within a stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyncParams {
    /// Channel carrying the sync signal.
    pub chan: usize,
    /// Digital bit within the channel word.
    pub bit: u32,
    /// Nominal pulse period in seconds.
    #[serde(default = "default_sync_period")]
    pub period_secs: f64,
}

fn default_sync_period() -> f64 {
    1.0
}

/// Geometry of one NI-style stream.
///
/// Channel types are laid out neural first, then aux analog, then digital
/// words; the cumulative counts mark the boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Sample rate in Hz
    pub sample_rate: f64,

    /// Count of neural channels
    pub n_neural: usize,

    /// Cumulative count of neural plus aux analog channels
    pub n_analog: usize,

    /// Total channel count, digital words included
    pub n_chans: usize,

    /// Retention of the stream buffer in seconds
    #[serde(default = "default_capacity_secs")]
    pub capacity_secs: f64,

    #[serde(default)]
    pub sync: Option<SyncParams>,
}

fn default_capacity_secs() -> f64 {
    4.0
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 25_000.0,
            n_neural: 8,
            n_analog: 8,
            n_chans: 9,
            capacity_secs: 4.0,
            sync: None,
        }
    }
}

impl StreamConfig {
    pub fn neural_range(&self) -> Range<usize> {
        0..self.n_neural
    }

    pub fn aux_analog_range(&self) -> Range<usize> {
        self.n_neural..self.n_analog
    }

    pub fn digital_range(&self) -> Range<usize> {
        self.n_analog..self.n_chans
    }

    pub fn is_chan_analog(&self, ic: usize) -> bool {
        ic < self.n_analog
    }

    /// Buffer capacity in scans.
    pub fn capacity_scans(&self) -> usize {
        (self.capacity_secs * self.sample_rate) as usize
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.sample_rate > 0.0) {
            return Err(AcqError::InvalidConfig(format!(
                "Sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.n_neural > self.n_analog || self.n_analog > self.n_chans || self.n_chans == 0 {
            return Err(AcqError::InvalidConfig(format!(
                "Channel counts must satisfy neural <= analog <= total > 0, got {}/{}/{}",
                self.n_neural, self.n_analog, self.n_chans
            )));
        }
        if self.capacity_scans() == 0 {
            return Err(AcqError::InvalidConfig(
                "Buffer capacity must hold at least one scan".to_string(),
            ));
        }
        if let Some(sync) = &self.sync {
            if sync.chan >= self.n_chans || sync.bit > 15 {
                return Err(AcqError::InvalidConfig(format!(
                    "Sync source chan {} bit {} out of range",
                    sync.chan, sync.bit
                )));
            }
        }
        Ok(())
    }
}

/// Per-scan channel layout of a probe stream: AP, then LF, then SY words.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbeLayout {
    pub n_ap: usize,
    pub n_lf: usize,
    #[serde(default = "default_n_sy")]
    pub n_sy: usize,
}

fn default_n_sy() -> usize {
    1
}

impl Default for ProbeLayout {
    fn default() -> Self {
        Self {
            n_ap: 384,
            n_lf: 384,
            n_sy: 1,
        }
    }
}

impl ProbeLayout {
    pub fn n_chans(&self) -> usize {
        self.n_ap + self.n_lf + self.n_sy
    }

    pub fn ap_range(&self) -> Range<usize> {
        0..self.n_ap
    }

    pub fn lf_range(&self) -> Range<usize> {
        self.n_ap..self.n_ap + self.n_lf
    }

    pub fn sy_range(&self) -> Range<usize> {
        self.n_ap + self.n_lf..self.n_chans()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_probe_rate")]
    pub sample_rate: f64,

    #[serde(default)]
    pub layout: ProbeLayout,

    #[serde(default = "default_capacity_secs")]
    pub capacity_secs: f64,

    #[serde(default)]
    pub sync: Option<SyncParams>,
}

fn default_enabled() -> bool {
    true
}

fn default_probe_rate() -> f64 {
    30_000.0
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: 30_000.0,
            layout: ProbeLayout::default(),
            capacity_secs: 4.0,
            sync: None,
        }
    }
}

impl ProbeConfig {
    /// View of the probe as a generic stream; every AP and LF channel counts as neural.
    pub fn stream_config(&self) -> StreamConfig {
        let neural = self.layout.n_ap + self.layout.n_lf;
        StreamConfig {
            sample_rate: self.sample_rate,
            n_neural: neural,
            n_analog: neural,
            n_chans: self.layout.n_chans(),
            capacity_secs: self.capacity_secs,
            sync: self.sync,
        }
    }

    pub fn lf_sample_rate(&self) -> f64 {
        self.sample_rate / LF_DECIMATION as f64
    }
}

/// Converts a threshold in volts to the raw ADC code of a channel.
///
/// The encoding is vendor specific; the core only consumes the result.
pub trait ThresholdConverter: Send + Sync {
    fn to_raw(&self, chan: usize, volts: f64) -> i16;
}

/// Linear ADC mapping `[vmin, vmax]` (after gain) onto `[-max_int, max_int)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearAdc {
    pub vmin: f64,
    pub vmax: f64,
    /// 32768 for 16-bit codes, 512 for 10-bit codes
    pub max_int: i32,
    /// Per-channel gains; channels past the end use the last entry
    pub gains: Vec<f64>,
}

impl Default for LinearAdc {
    fn default() -> Self {
        Self {
            vmin: -5.0,
            vmax: 5.0,
            max_int: 32768,
            gains: vec![1.0],
        }
    }
}

impl LinearAdc {
    pub fn chan_gain(&self, chan: usize) -> f64 {
        self.gains
            .get(chan)
            .or_else(|| self.gains.last())
            .copied()
            .unwrap_or(1.0)
    }
}

impl ThresholdConverter for LinearAdc {
    fn to_raw(&self, chan: usize, volts: f64) -> i16 {
        let unity = (volts * self.chan_gain(chan) - self.vmin) / (self.vmax - self.vmin);
        let span = f64::from(2 * self.max_int - 1);
        let raw = (span * unity - f64::from(self.max_int)).trunc();
        raw.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_ranges() {
        let cfg = StreamConfig {
            n_neural: 4,
            n_analog: 6,
            n_chans: 7,
            ..Default::default()
        };
        assert_eq!(cfg.neural_range(), 0..4);
        assert_eq!(cfg.aux_analog_range(), 4..6);
        assert_eq!(cfg.digital_range(), 6..7);
        assert!(cfg.is_chan_analog(5));
        assert!(!cfg.is_chan_analog(6));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_invalid_counts() {
        let cfg = StreamConfig {
            n_neural: 5,
            n_analog: 4,
            n_chans: 7,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_probe_layout() {
        let layout = ProbeLayout {
            n_ap: 3,
            n_lf: 3,
            n_sy: 1,
        };
        assert_eq!(layout.n_chans(), 7);
        assert_eq!(layout.lf_range(), 3..6);
        assert_eq!(layout.sy_range(), 6..7);
    }

    #[test]
    fn test_linear_adc() {
        let adc = LinearAdc::default();
        assert_eq!(adc.to_raw(0, 0.0), 0);
        assert_eq!(adc.to_raw(0, 5.0), 32767);
        assert_eq!(adc.to_raw(0, -5.0), -32768);

        let gained = LinearAdc {
            gains: vec![500.0],
            ..Default::default()
        };
        // 1 mV at gain 500 -> 0.5 V -> ~3277 counts
        let raw = gained.to_raw(3, 0.001);
        assert!((3270..3285).contains(&raw));
    }

    #[test]
    fn test_serde_defaults() {
        let cfg: StreamConfig =
            serde_json::from_str(r#"{"sample_rate": 1000.0, "n_neural": 2, "n_analog": 2, "n_chans": 3}"#)
                .unwrap();
        assert_eq!(cfg.capacity_secs, 4.0);
        assert!(cfg.sync.is_none());
    }
}
