// Common types for the trigger module

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{ProbeConfig, StreamConfig, LF_DECIMATION};
use crate::stream::StreamBuffer;

/// Trigger loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Polling period of the run loop
    #[serde(default = "default_loop_period_ms")]
    pub loop_period_ms: u64,

    #[serde(default)]
    pub mode: TriggerMode,

    /// Base name of every segment of the run
    #[serde(default = "default_run_name")]
    pub run_name: String,

    /// Longest span fetched from one stream per loop iteration
    #[serde(default = "default_max_fetch_secs")]
    pub max_fetch_secs: f64,
}

fn default_loop_period_ms() -> u64 {
    10
}

fn default_run_name() -> String {
    "run".to_string()
}

fn default_max_fetch_secs() -> f64 {
    0.5
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            loop_period_ms: default_loop_period_ms(),
            mode: TriggerMode::default(),
            run_name: default_run_name(),
            max_fetch_secs: default_max_fetch_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerMode {
    /// One segment spanning each gate-high interval
    #[default]
    Immediate,
    Timed(TimedParams),
    Ttl(TtlParams),
}

/// Fixed-length segments on a fixed schedule within a gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedParams {
    /// Delay from gate high to the first segment
    #[serde(default)]
    pub t_l0: f64,

    /// Segment duration
    pub t_h: f64,

    /// Low time between segments
    #[serde(default)]
    pub t_l: f64,

    /// Segments per gate; unlimited when absent
    #[serde(default)]
    pub n_max: Option<u32>,
}

impl Default for TimedParams {
    fn default() -> Self {
        Self {
            t_l0: 0.0,
            t_h: 1.0,
            t_l: 1.0,
            n_max: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TtlSource {
    /// NI analog channel compared against a voltage threshold
    Analog { chan: usize, thresh_v: f64 },
    /// One bit of an NI digital word
    Digital { chan: usize, bit: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlMode {
    /// Record from the edge until the gate goes low
    Latched,
    /// Record `t_h` seconds from the edge
    Timed,
    /// Record from the edge until the matching falling edge
    Follower,
}

/// Edge-triggered segments from an NI channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlParams {
    pub source: TtlSource,

    #[serde(default = "default_ttl_mode")]
    pub mode: TtlMode,

    /// Consecutive qualifying samples required for an edge
    #[serde(default = "default_inarow")]
    pub inarow: usize,

    /// Pre-edge data included in each segment
    #[serde(default = "default_margin_secs")]
    pub margin_secs: f64,

    /// Segment duration in `Timed` mode
    #[serde(default = "default_ttl_t_h")]
    pub t_h: f64,

    /// Dead time after an edge before the next one is accepted
    #[serde(default)]
    pub refractory_secs: f64,

    #[serde(default)]
    pub n_max: Option<u32>,
}

fn default_ttl_mode() -> TtlMode {
    TtlMode::Timed
}

fn default_inarow() -> usize {
    5
}

fn default_margin_secs() -> f64 {
    0.1
}

fn default_ttl_t_h() -> f64 {
    1.0
}

/// Stream feeding one segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "stream", content = "probe", rename_all = "snake_case")]
pub enum Destination {
    ProbeAp(usize),
    ProbeLf(usize),
    Ni,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::ProbeAp(ip) => write!(f, "imec{}.ap", ip),
            Destination::ProbeLf(ip) => write!(f, "imec{}.lf", ip),
            Destination::Ni => write!(f, "nidq"),
        }
    }
}

/// Contiguous scans fetched from a stream, starting at `head_ct`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamBlock {
    pub data: Vec<i16>,
    pub head_ct: u64,
}

/// Everything a writer needs to open one segment.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentSpec {
    pub run_name: String,
    pub gate: u32,
    pub trigger: u32,
    pub dst: Destination,
    pub sample_rate: f64,
    pub n_chans: usize,
    pub created: DateTime<Utc>,
}

impl SegmentSpec {
    /// File stem in the `run_g0_t0.nidq` style.
    pub fn stem(&self) -> String {
        format!("{}_g{}_t{}.{}", self.run_name, self.gate, self.trigger, self.dst)
    }
}

/// One closed segment as reported in the run summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub dst: Destination,
    pub gate: u32,
    pub trigger: u32,
    /// First count written, in the destination's own sample domain
    pub first_ct: Option<u64>,
    pub scans: u64,
    pub path: Option<PathBuf>,
    pub persisted: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_name: String,
    pub gates: u32,
    pub segments: Vec<SegmentRecord>,
}

/// Write throughput of one open segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WritePerf {
    pub dst: Destination,
    pub scans: u64,
    pub mb_per_sec: f64,
}

#[derive(Clone)]
pub struct NiStream {
    pub config: StreamConfig,
    pub buffer: Arc<StreamBuffer>,
}

#[derive(Clone)]
pub struct ProbeStream {
    pub config: ProbeConfig,
    pub buffer: Arc<StreamBuffer>,
}

/// The independently clocked streams of one run.
#[derive(Clone, Default)]
pub struct StreamSet {
    pub ni: Option<NiStream>,
    pub probes: Vec<ProbeStream>,
}

/// Stream identity, as opposed to the per-file `Destination`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum StreamId {
    Ni,
    Probe(usize),
}

impl StreamSet {
    pub(crate) fn buffer(&self, id: StreamId) -> Option<&Arc<StreamBuffer>> {
        match id {
            StreamId::Ni => self.ni.as_ref().map(|s| &s.buffer),
            StreamId::Probe(ip) => self.probes.get(ip).map(|p| &p.buffer),
        }
    }

    pub(crate) fn sync(&self, id: StreamId) -> Option<crate::config::SyncParams> {
        match id {
            StreamId::Ni => self.ni.as_ref().and_then(|s| s.config.sync),
            StreamId::Probe(ip) => self.probes.get(ip).and_then(|p| p.config.sync),
        }
    }

    /// Streams that record, NI first.
    pub(crate) fn active(&self) -> Vec<StreamId> {
        let mut ids = Vec::new();
        if self.ni.is_some() {
            ids.push(StreamId::Ni);
        }
        ids.extend(
            self.probes
                .iter()
                .enumerate()
                .filter(|(_, p)| p.config.enabled)
                .map(|(ip, _)| StreamId::Probe(ip)),
        );
        ids
    }

    /// Stream that trigger decisions are made on.
    pub(crate) fn reference(&self) -> Option<StreamId> {
        self.active().first().copied()
    }

    /// Files produced by one stream.
    pub(crate) fn destinations(&self, id: StreamId) -> Vec<Destination> {
        match id {
            StreamId::Ni => vec![Destination::Ni],
            StreamId::Probe(ip) => {
                let mut dsts = vec![Destination::ProbeAp(ip)];
                if self.probes.get(ip).is_some_and(|p| p.config.layout.n_lf > 0) {
                    dsts.push(Destination::ProbeLf(ip));
                }
                dsts
            }
        }
    }

    /// Sample rate and channel count of a destination's file.
    pub(crate) fn file_geometry(&self, dst: Destination) -> Option<(f64, usize)> {
        match dst {
            Destination::Ni => self.ni.as_ref().map(|s| (s.config.sample_rate, s.config.n_chans)),
            Destination::ProbeAp(ip) => self.probes.get(ip).map(|p| {
                (p.config.sample_rate, p.config.layout.n_ap + p.config.layout.n_sy)
            }),
            Destination::ProbeLf(ip) => self.probes.get(ip).map(|p| {
                (
                    p.config.sample_rate / LF_DECIMATION as f64,
                    p.config.layout.n_lf + p.config.layout.n_sy,
                )
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_serde() {
        let mode: TriggerMode = serde_json::from_str(
            r#"{"type": "ttl", "source": {"kind": "digital", "chan": 8, "bit": 0}}"#,
        )
        .unwrap();
        match mode {
            TriggerMode::Ttl(p) => {
                assert_eq!(p.mode, TtlMode::Timed);
                assert_eq!(p.inarow, 5);
                assert_eq!(p.source, TtlSource::Digital { chan: 8, bit: 0 });
            }
            other => panic!("unexpected {:?}", other),
        }

        let cfg: TriggerConfig = serde_json::from_str("{}").unwrap();
        assert!(matches!(cfg.mode, TriggerMode::Immediate));
        assert_eq!(cfg.loop_period_ms, 10);
    }

    #[test]
    fn test_stem() {
        let spec = SegmentSpec {
            run_name: "mouse1".into(),
            gate: 0,
            trigger: 3,
            dst: Destination::ProbeLf(1),
            sample_rate: 2500.0,
            n_chans: 385,
            created: Utc::now(),
        };
        assert_eq!(spec.stem(), "mouse1_g0_t3.imec1.lf");
    }

    #[test]
    fn test_destinations() {
        let mut probe = ProbeConfig::default();
        let buffer = Arc::new(StreamBuffer::with_capacity_scans(30_000.0, 769, 10));
        let mut set = StreamSet {
            ni: None,
            probes: vec![ProbeStream {
                config: probe.clone(),
                buffer: buffer.clone(),
            }],
        };
        assert_eq!(set.reference(), Some(StreamId::Probe(0)));
        assert_eq!(
            set.destinations(StreamId::Probe(0)),
            vec![Destination::ProbeAp(0), Destination::ProbeLf(0)]
        );
        assert_eq!(set.file_geometry(Destination::ProbeLf(0)), Some((2500.0, 385)));

        probe.enabled = false;
        set.probes[0].config = probe;
        assert!(set.active().is_empty());
    }
}
