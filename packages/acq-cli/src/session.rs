// Session configuration - everything one acquisition run needs, built
// from the command line and printable as JSON.

use acq_core::trigger::{
    NiStream, ProbeStream, StreamSet, TimedParams, TriggerConfig, TriggerMode, TtlMode, TtlParams,
    TtlSource,
};
use acq_core::{
    LinearAdc, ProbeConfig, ProbeLayout, StreamBuffer, StreamConfig, SyncParams, ThresholdConverter,
};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cli::{SessionArgs, TriggerKind, TtlModeArg, TtlSourceKind};
use crate::monitor::MonitorConfig;
use crate::synth::{SignalPlan, SynthConfig};

/// Bit of the NI digital word carrying the TTL pulse.
pub const NI_TTL_BIT: u32 = 0;
/// Bit of the NI digital word carrying the sync wave.
pub const NI_SYNC_BIT: u32 = 1;
/// Bit of the probe SY word carrying the sync wave.
pub const PROBE_SYNC_BIT: u32 = 6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub ni: Option<StreamConfig>,
    pub probes: Vec<ProbeConfig>,
    pub trigger: TriggerConfig,
    pub adc: LinearAdc,
    pub synth: SynthConfig,
    pub monitor: MonitorConfig,
    pub seconds: f64,
    #[serde(default)]
    pub gate_period_secs: Option<f64>,
}

impl SessionConfig {
    pub fn from_args(args: &SessionArgs) -> Result<Self> {
        let s = &args.streams;
        let sync = |chan: usize, bit: u32| {
            (!s.no_sync).then_some(SyncParams {
                chan,
                bit,
                period_secs: 1.0,
            })
        };

        let ni = (!s.no_ni).then(|| {
            let n_analog = s.ni_neural + s.ni_aux;
            StreamConfig {
                sample_rate: s.ni_rate,
                n_neural: s.ni_neural,
                n_analog,
                n_chans: n_analog + 1,
                capacity_secs: s.capacity_secs,
                sync: sync(n_analog, NI_SYNC_BIT),
            }
        });

        let layout = ProbeLayout {
            n_ap: s.n_ap,
            n_lf: s.n_lf,
            n_sy: 1,
        };
        let probes = (0..s.probes)
            .map(|_| ProbeConfig {
                enabled: true,
                sample_rate: s.probe_rate,
                layout,
                capacity_secs: s.capacity_secs,
                sync: sync(layout.n_ap + layout.n_lf, PROBE_SYNC_BIT),
            })
            .collect();

        let t = &args.trigger;
        let mode = match t.trigger {
            TriggerKind::Immediate => TriggerMode::Immediate,
            TriggerKind::Timed => TriggerMode::Timed(TimedParams {
                t_l0: t.t_l0,
                t_h: t.t_h,
                t_l: t.t_l,
                n_max: t.n_max,
            }),
            TriggerKind::Ttl => {
                let source = match (t.ttl_source, &ni) {
                    (_, None) => bail!("TTL trigger requires the NI stream (drop --no-ni)"),
                    (TtlSourceKind::Digital, Some(cfg)) => TtlSource::Digital {
                        chan: cfg.n_analog,
                        bit: NI_TTL_BIT,
                    },
                    (TtlSourceKind::Analog, Some(cfg)) => {
                        if cfg.n_analog == cfg.n_neural {
                            bail!("Analog TTL source needs at least one aux channel (--ni-aux)");
                        }
                        TtlSource::Analog {
                            chan: cfg.n_neural,
                            thresh_v: t.ttl_thresh_v,
                        }
                    }
                };
                TriggerMode::Ttl(TtlParams {
                    source,
                    mode: match t.ttl_mode {
                        TtlModeArg::Latched => TtlMode::Latched,
                        TtlModeArg::Timed => TtlMode::Timed,
                        TtlModeArg::Follower => TtlMode::Follower,
                    },
                    inarow: t.inarow,
                    margin_secs: t.margin,
                    t_h: t.t_h,
                    refractory_secs: t.refractory,
                    n_max: t.n_max,
                })
            }
        };

        let trigger = TriggerConfig {
            loop_period_ms: t.loop_ms,
            mode,
            run_name: t.run_name.clone(),
            ..Default::default()
        };

        let y = &args.synth;
        let synth = SynthConfig {
            seed: y.seed,
            noise: y.noise,
            spike_amp: y.spike_amp,
            spike_rate_hz: y.spike_rate,
            ttl_period_secs: y.ttl_period,
            ttl_width_secs: y.ttl_width,
            ..Default::default()
        };

        let m = &args.monitor;
        let monitor = MonitorConfig {
            highpass_hz: (!m.no_highpass).then_some(m.highpass),
            spike_thresh: m.spike_thresh,
            tally_secs: m.tally_secs,
        };

        let config = Self {
            ni,
            probes,
            trigger,
            adc: LinearAdc::default(),
            synth,
            monitor,
            seconds: args.seconds,
            gate_period_secs: args.gate_period,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ni.is_none() && self.probes.is_empty() {
            bail!("No streams configured: enable NI or add --probes");
        }
        if let Some(ni) = &self.ni {
            ni.validate()?;
        }
        for (ip, probe) in self.probes.iter().enumerate() {
            if probe.layout.n_ap == 0 {
                bail!("Probe {} has no AP channels", ip);
            }
            probe.stream_config().validate()?;
        }
        if !(self.seconds > 0.0) {
            bail!("Acquisition time must be positive, got {}", self.seconds);
        }
        if self.gate_period_secs.is_some_and(|p| !(p > 0.0)) {
            bail!("Gate period must be positive");
        }
        if self.trigger.loop_period_ms == 0 {
            bail!("Trigger loop period must be at least 1 ms");
        }
        Ok(())
    }

    /// Fresh buffers for every configured stream.
    pub fn build_streams(&self) -> StreamSet {
        StreamSet {
            ni: self.ni.as_ref().map(|cfg| NiStream {
                config: cfg.clone(),
                buffer: Arc::new(StreamBuffer::new(cfg.sample_rate, cfg.n_chans, cfg.capacity_secs)),
            }),
            probes: self
                .probes
                .iter()
                .map(|cfg| ProbeStream {
                    config: cfg.clone(),
                    buffer: Arc::new(StreamBuffer::new(
                        cfg.sample_rate,
                        cfg.layout.n_chans(),
                        cfg.capacity_secs,
                    )),
                })
                .collect(),
        }
    }

    pub fn ni_plan(&self, cfg: &StreamConfig) -> SignalPlan {
        let ttl_analog = (cfg.n_analog > cfg.n_neural).then(|| {
            let volts = match &self.trigger.mode {
                TriggerMode::Ttl(TtlParams {
                    source: TtlSource::Analog { thresh_v, .. },
                    ..
                }) => 2.0 * thresh_v,
                _ => 5.0,
            };
            (cfg.n_neural, self.adc.to_raw(cfg.n_neural, volts))
        });

        SignalPlan {
            n_chans: cfg.n_chans,
            neural: cfg.neural_range(),
            slow: 0..0,
            ttl_analog,
            digital: Some(cfg.n_analog),
            ttl_bit: Some(NI_TTL_BIT),
            sync_bit: Some(NI_SYNC_BIT),
        }
    }

    pub fn probe_plan(&self, cfg: &ProbeConfig) -> SignalPlan {
        let layout = cfg.layout;
        SignalPlan {
            n_chans: layout.n_chans(),
            neural: layout.ap_range(),
            slow: layout.lf_range(),
            ttl_analog: None,
            digital: layout.sy_range().next(),
            ttl_bit: None,
            sync_bit: Some(PROBE_SYNC_BIT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use clap::Parser;

    fn session(args: &[&str]) -> Result<SessionConfig> {
        let mut argv = vec!["acqsim", "config"];
        argv.extend_from_slice(args);
        let Command::Config(cfg) = Cli::parse_from(argv).command else {
            panic!("expected config");
        };
        SessionConfig::from_args(&cfg.session)
    }

    #[test]
    fn test_default_session() {
        let cfg = session(&[]).unwrap();
        let ni = cfg.ni.as_ref().unwrap();
        assert_eq!(ni.n_neural, 8);
        assert_eq!(ni.n_analog, 9);
        assert_eq!(ni.n_chans, 10);
        assert_eq!(ni.sync.unwrap().chan, 9);
        assert!(cfg.probes.is_empty());
        assert!(matches!(cfg.trigger.mode, TriggerMode::Immediate));
    }

    #[test]
    fn test_ttl_sources() {
        let cfg = session(&["--trigger", "ttl"]).unwrap();
        let TriggerMode::Ttl(p) = &cfg.trigger.mode else {
            panic!("expected ttl");
        };
        assert_eq!(p.source, TtlSource::Digital { chan: 9, bit: NI_TTL_BIT });

        let cfg = session(&["--trigger", "ttl", "--ttl-source", "analog"]).unwrap();
        let TriggerMode::Ttl(p) = &cfg.trigger.mode else {
            panic!("expected ttl");
        };
        assert!(matches!(p.source, TtlSource::Analog { chan: 8, .. }));

        assert!(session(&["--trigger", "ttl", "--ttl-source", "analog", "--ni-aux", "0"]).is_err());
        assert!(session(&["--trigger", "ttl", "--no-ni", "--probes", "1"]).is_err());
    }

    #[test]
    fn test_rejects_empty_session() {
        assert!(session(&["--no-ni"]).is_err());
        assert!(session(&["--seconds", "0"]).is_err());
        assert!(session(&["--no-ni", "--probes", "2"]).is_ok());
    }

    #[test]
    fn test_analog_ttl_level_crosses_threshold() {
        let cfg = session(&["--trigger", "ttl", "--ttl-source", "analog"]).unwrap();
        let ni = cfg.ni.clone().unwrap();
        let plan = cfg.ni_plan(&ni);
        let (chan, level) = plan.ttl_analog.unwrap();
        assert!(level > cfg.adc.to_raw(chan, 2.5));
    }

    #[test]
    fn test_probe_plan() {
        let cfg = session(&["--no-ni", "--probes", "1", "--n-ap", "4", "--n-lf", "2"]).unwrap();
        let plan = cfg.probe_plan(&cfg.probes[0]);
        assert_eq!(plan.n_chans, 7);
        assert_eq!(plan.neural, 0..4);
        assert_eq!(plan.slow, 4..6);
        assert_eq!(plan.digital, Some(6));
    }
}
