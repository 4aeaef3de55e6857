//! Trigger policies.
//!
//! A policy decides when segments begin and end. The controller's run loop
//! calls `tick` once per iteration; the policy reads the gate, searches the
//! reference stream and drives the controller's segment operations.

use crate::config::ThresholdConverter;
use crate::error::{AcqError, Result};
use crate::stream::EdgeScan;

use super::controller::TriggerController;
use super::types::{TimedParams, TriggerMode, TtlMode, TtlParams, TtlSource, StreamSet};

pub trait TriggerPolicy: Send {
    fn name(&self) -> &'static str;

    /// One iteration of the run loop.
    fn tick(&mut self, ctl: &TriggerController) -> Result<()>;

    /// Write what is already buffered for the open segment, then close it.
    fn finish(&mut self, ctl: &TriggerController) -> Result<()> {
        let flushed = ctl.flush_segment();
        ctl.end_trig();
        flushed.map(|_| ())
    }
}

/// Build the policy for `mode`.
///
/// TTL triggers need the NI stream; analog thresholds are converted to raw
/// codes once, here.
pub fn policy_for(
    mode: &TriggerMode,
    streams: &StreamSet,
    converter: &dyn ThresholdConverter,
) -> Result<Box<dyn TriggerPolicy>> {
    match mode {
        TriggerMode::Immediate => Ok(Box::new(ImmediatePolicy::new())),
        TriggerMode::Timed(p) => Ok(Box::new(TimedPolicy::new(p.clone())?)),
        TriggerMode::Ttl(p) => {
            let ni = streams
                .ni
                .as_ref()
                .ok_or_else(|| AcqError::InvalidConfig("TTL trigger requires the NI stream".to_string()))?;

            let chan = match p.source {
                TtlSource::Analog { chan, .. } | TtlSource::Digital { chan, .. } => chan,
            };
            if chan >= ni.config.n_chans {
                return Err(AcqError::InvalidConfig(format!(
                    "TTL channel {} out of range for {} NI channels",
                    chan, ni.config.n_chans
                )));
            }

            let edge = match p.source {
                TtlSource::Analog { chan, thresh_v } => {
                    if !ni.config.is_chan_analog(chan) {
                        return Err(AcqError::InvalidConfig(format!("TTL channel {} is not analog", chan)));
                    }
                    EdgeSource::Threshold {
                        chan,
                        raw: converter.to_raw(chan, thresh_v),
                    }
                }
                TtlSource::Digital { chan, bit } => EdgeSource::Bit { chan, bit },
            };

            Ok(Box::new(TtlPolicy::new(p.clone(), edge, ni.config.sample_rate)))
        }
    }
}

// ---------------------------------------------------------------
// Immediate
// ---------------------------------------------------------------

enum ImmState {
    Idle,
    Writing { epoch: u64, limited: bool },
}

/// One segment per gate-high interval.
pub struct ImmediatePolicy {
    state: ImmState,
    last_epoch: u64,
}

impl ImmediatePolicy {
    pub fn new() -> Self {
        Self {
            state: ImmState::Idle,
            last_epoch: 0,
        }
    }
}

impl Default for ImmediatePolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerPolicy for ImmediatePolicy {
    fn name(&self) -> &'static str {
        "immediate"
    }

    fn tick(&mut self, ctl: &TriggerController) -> Result<()> {
        let gate = ctl.gate_snapshot();

        match self.state {
            ImmState::Idle => {
                if gate.hi && gate.epoch != self.last_epoch {
                    let start = ctl.ref_ct_at(gate.hi_t);
                    ctl.begin_segment(start, None);
                    self.last_epoch = gate.epoch;
                    self.state = ImmState::Writing {
                        epoch: gate.epoch,
                        limited: false,
                    };
                }
            }
            ImmState::Writing { epoch, limited } => {
                if !limited && (!gate.hi || gate.epoch != epoch) {
                    ctl.set_segment_limit(ctl.ref_ct_at(gate.lo_t));
                    self.state = ImmState::Writing { epoch, limited: true };
                }

                if ctl.service_segment()?.done {
                    ctl.end_trig();
                    self.state = ImmState::Idle;
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------
// Timed
// ---------------------------------------------------------------

#[derive(Clone, Copy)]
enum TimedState {
    Idle,
    Waiting { start_t: f64 },
    Writing { start_t: f64 },
    Exhausted,
}

/// Fixed-duration segments on a fixed schedule within each gate.
pub struct TimedPolicy {
    params: TimedParams,
    state: TimedState,
    last_epoch: u64,
    n_done: u32,
}

impl TimedPolicy {
    pub fn new(params: TimedParams) -> Result<Self> {
        if !(params.t_h > 0.0) || params.t_l < 0.0 || params.t_l0 < 0.0 {
            return Err(AcqError::InvalidConfig(format!(
                "Timed trigger needs t_h > 0 and non-negative low times, got {:?}",
                params
            )));
        }
        Ok(Self {
            params,
            state: TimedState::Idle,
            last_epoch: 0,
            n_done: 0,
        })
    }
}

impl TriggerPolicy for TimedPolicy {
    fn name(&self) -> &'static str {
        "timed"
    }

    fn tick(&mut self, ctl: &TriggerController) -> Result<()> {
        let gate = ctl.gate_snapshot();

        if gate.hi && gate.epoch != self.last_epoch {
            if matches!(self.state, TimedState::Writing { .. }) {
                ctl.flush_segment()?;
                ctl.end_trig();
            }
            self.last_epoch = gate.epoch;
            self.n_done = 0;
            self.state = TimedState::Waiting {
                start_t: gate.hi_t + self.params.t_l0,
            };
        }

        match self.state {
            TimedState::Idle | TimedState::Exhausted => {}
            TimedState::Waiting { start_t } => {
                if !gate.hi {
                    self.state = TimedState::Idle;
                } else if ctl.reference_buffer().end_time() >= start_t {
                    let buf = ctl.reference_buffer();
                    let start = ctl.ref_ct_at(start_t);
                    let lim = start + (self.params.t_h * buf.sample_rate()).round() as u64;
                    ctl.begin_segment(start, Some(lim));
                    self.state = TimedState::Writing { start_t };
                }
            }
            TimedState::Writing { start_t } => {
                if !gate.hi {
                    ctl.set_segment_limit(ctl.ref_ct_at(gate.lo_t));
                }

                if ctl.service_segment()?.done {
                    ctl.end_trig();
                    self.n_done += 1;

                    self.state = if self.params.n_max.is_some_and(|n| self.n_done >= n) {
                        log::info!("Timed trigger: {} segments done in gate {}", self.n_done, gate.index);
                        TimedState::Exhausted
                    } else if gate.hi {
                        TimedState::Waiting {
                            start_t: start_t + self.params.t_h + self.params.t_l,
                        }
                    } else {
                        TimedState::Idle
                    };
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------
// TTL
// ---------------------------------------------------------------

/// Resolved TTL source on the NI stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EdgeSource {
    Threshold { chan: usize, raw: i16 },
    Bit { chan: usize, bit: u32 },
}

#[derive(Clone, Copy)]
enum TtlState {
    Idle,
    Seeking,
    Writing {
        edge_ct: u64,
        fall_from: u64,
        lim_ct: Option<u64>,
    },
    Exhausted,
}

/// Segments started by edges on an NI channel.
pub struct TtlPolicy {
    params: TtlParams,
    edge: EdgeSource,
    srate: f64,
    state: TtlState,
    last_epoch: u64,
    n_done: u32,
    from_ct: u64,
    /// Earliest count a new segment may start at
    floor_ct: u64,
}

impl TtlPolicy {
    pub fn new(params: TtlParams, edge: EdgeSource, srate: f64) -> Self {
        Self {
            params,
            edge,
            srate,
            state: TtlState::Idle,
            last_epoch: 0,
            n_done: 0,
            from_ct: 0,
            floor_ct: 0,
        }
    }

    fn scans(&self, secs: f64) -> u64 {
        (secs * self.srate).round().max(0.0) as u64
    }

    fn rising(&self, ctl: &TriggerController, from_ct: u64) -> EdgeScan {
        let buf = ctl.reference_buffer();
        match self.edge {
            EdgeSource::Threshold { chan, raw } => buf.find_rising_edge(from_ct, chan, raw, self.params.inarow),
            EdgeSource::Bit { chan, bit } => buf.find_bit_rising_edge(from_ct, chan, bit, self.params.inarow),
        }
    }

    fn falling(&self, ctl: &TriggerController, from_ct: u64) -> EdgeScan {
        let buf = ctl.reference_buffer();
        match self.edge {
            EdgeSource::Threshold { chan, raw } => buf.find_falling_edge(from_ct, chan, raw, self.params.inarow),
            EdgeSource::Bit { chan, bit } => buf.find_bit_falling_edge(from_ct, chan, bit, self.params.inarow),
        }
    }
}

impl TriggerPolicy for TtlPolicy {
    fn name(&self) -> &'static str {
        "ttl"
    }

    fn tick(&mut self, ctl: &TriggerController) -> Result<()> {
        let gate = ctl.gate_snapshot();

        if gate.hi && gate.epoch != self.last_epoch {
            if matches!(self.state, TtlState::Writing { .. }) {
                ctl.flush_segment()?;
                ctl.end_trig();
            }
            self.last_epoch = gate.epoch;
            self.n_done = 0;
            self.from_ct = ctl.ref_ct_at(gate.hi_t);
            self.floor_ct = self.from_ct;
            self.state = TtlState::Seeking;
        }

        match self.state {
            TtlState::Idle | TtlState::Exhausted => {}
            TtlState::Seeking => {
                if !gate.hi {
                    self.state = TtlState::Idle;
                    return Ok(());
                }

                match self.rising(ctl, self.from_ct) {
                    EdgeScan::Found(edge_ct) => {
                        let head = ctl.reference_buffer().q_head_ct();
                        let start = edge_ct
                            .saturating_sub(self.scans(self.params.margin_secs))
                            .max(self.floor_ct)
                            .max(head);
                        let lim_ct = match self.params.mode {
                            TtlMode::Timed => Some(edge_ct + self.scans(self.params.t_h)),
                            TtlMode::Latched | TtlMode::Follower => None,
                        };

                        log::info!("TTL edge at count {}, segment from {}", edge_ct, start);
                        ctl.begin_segment(start, lim_ct);
                        self.state = TtlState::Writing {
                            edge_ct,
                            fall_from: edge_ct,
                            lim_ct,
                        };
                    }
                    EdgeScan::Resume(ct) => self.from_ct = ct,
                }
            }
            TtlState::Writing {
                edge_ct,
                mut fall_from,
                mut lim_ct,
            } => {
                if self.params.mode == TtlMode::Follower && lim_ct.is_none() {
                    match self.falling(ctl, fall_from) {
                        EdgeScan::Found(fall_ct) => {
                            ctl.set_segment_limit(fall_ct);
                            lim_ct = Some(fall_ct);
                        }
                        EdgeScan::Resume(ct) => fall_from = ct,
                    }
                }

                if !gate.hi {
                    let lo_ct = ctl.ref_ct_at(gate.lo_t);
                    ctl.set_segment_limit(lo_ct);
                    lim_ct = Some(lim_ct.map_or(lo_ct, |l| l.min(lo_ct)));
                }

                self.state = TtlState::Writing {
                    edge_ct,
                    fall_from,
                    lim_ct,
                };

                if ctl.service_segment()?.done {
                    ctl.end_trig();
                    self.n_done += 1;

                    let seg_end = lim_ct.unwrap_or(edge_ct);
                    self.floor_ct = seg_end;
                    self.from_ct = seg_end.max(edge_ct + self.scans(self.params.refractory_secs));

                    self.state = if self.params.n_max.is_some_and(|n| self.n_done >= n) {
                        log::info!("TTL trigger: {} segments done in gate {}", self.n_done, gate.index);
                        TtlState::Exhausted
                    } else if gate.hi {
                        TtlState::Seeking
                    } else {
                        TtlState::Idle
                    };
                }
            }
        }

        Ok(())
    }
}
