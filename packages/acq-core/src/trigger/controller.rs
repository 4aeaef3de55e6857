// Trigger controller - turns buffered samples into recorded segments
//
// The controller manages:
// - Gate and trigger counters, with a one-shot manual override
// - Segment writers for every active stream (NI, probe AP and LF)
// - Per-stream write cursors aligned across independent clocks
// - The cooperative run loop and its "finished" notification
//
// Run state and file handles sit behind separate locks so status queries
// never wait on disk writes.

use chrono::Utc;
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::align::align_x12;
use super::policy::TriggerPolicy;
use super::probe::split_ap_lf;
use super::types::{
    Destination, RunSummary, SegmentRecord, SegmentSpec, StreamBlock, StreamId, StreamSet,
    TriggerConfig, WritePerf,
};
use super::writer::{SegmentWriter, WriterFactory};
use crate::clock;
use crate::error::{AcqError, Result};
use crate::stream::{Placement, StreamBuffer};

/// Pending gate/trigger override, consumed by the next trigger.
#[derive(Debug, Default, Clone, Copy)]
struct ManOvr {
    gate: i32,
    trig: i32,
    forced: bool,
}

impl ManOvr {
    fn set(&mut self, gate: i32, trig: i32) {
        *self = ManOvr {
            gate,
            trig,
            forced: true,
        };
    }

    /// Counters to install before the trigger increment.
    fn take(&mut self) -> Option<(i32, i32)> {
        if !self.forced {
            return None;
        }
        self.forced = false;
        Some((self.gate, self.trig - 1))
    }
}

struct RunState {
    gate_hi: bool,
    gate_enabled: bool,
    gate_hi_t: f64,
    gate_lo_t: f64,
    trig_hi_t: f64,
    i_gate: i32,
    i_trig: i32,
    /// Low-to-high gate transitions; overrides never touch it
    gate_epoch: u64,
    ovr: ManOvr,
    loop_period_us: u64,
    metadata: BTreeMap<String, String>,
}

struct OpenSegment {
    writer: Box<dyn SegmentWriter>,
    spec: SegmentSpec,
    persisted: bool,
    bytes: u64,
    write_time: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    next_ct: u64,
    lim_ct: Option<u64>,
}

#[derive(Default)]
struct FileState {
    open: BTreeMap<Destination, OpenSegment>,
    first_ct: BTreeMap<Destination, u64>,
    cursors: BTreeMap<StreamId, Cursor>,
    closed: Vec<SegmentRecord>,
}

/// Gate status read under one lock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateSnapshot {
    pub hi: bool,
    pub index: i32,
    /// Bumped on every low-to-high gate transition
    pub epoch: u64,
    pub hi_t: f64,
    pub lo_t: f64,
}

/// Outcome of one pass over the open segment's streams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentProgress {
    /// Every stream reached its limit
    pub done: bool,
    /// Scans written in this pass, all streams together
    pub scans: u64,
}

pub struct TriggerController {
    config: TriggerConfig,
    streams: StreamSet,
    ref_id: StreamId,
    ref_buffer: Arc<StreamBuffer>,
    factory: Arc<dyn WriterFactory>,
    run: Mutex<RunState>,
    files: Mutex<FileState>,
    start_t: Mutex<f64>,
    please_stop: AtomicBool,
    finished_tx: Sender<RunSummary>,
    finished_rx: Receiver<RunSummary>,
}

impl TriggerController {
    /// Controller for one run over `streams`.
    pub fn new(config: TriggerConfig, streams: StreamSet, factory: Arc<dyn WriterFactory>) -> Result<Self> {
        let (ref_id, ref_buffer) = match streams.reference() {
            Some(id) => match streams.buffer(id) {
                Some(buf) => (id, Arc::clone(buf)),
                None => return Err(AcqError::InvalidConfig(format!("Missing buffer for {:?}", id))),
            },
            None => return Err(AcqError::InvalidConfig("No active stream to record".to_string())),
        };
        if !(config.max_fetch_secs > 0.0) {
            return Err(AcqError::InvalidConfig(format!(
                "max_fetch_secs must be positive, got {}",
                config.max_fetch_secs
            )));
        }

        let (finished_tx, finished_rx) = bounded(1);
        let loop_period_us = config.loop_period_ms * 1000;

        Ok(Self {
            config,
            streams,
            ref_id,
            ref_buffer,
            factory,
            run: Mutex::new(RunState {
                gate_hi: false,
                gate_enabled: true,
                gate_hi_t: 0.0,
                gate_lo_t: 0.0,
                trig_hi_t: 0.0,
                i_gate: -1,
                i_trig: -1,
                gate_epoch: 0,
                ovr: ManOvr::default(),
                loop_period_us,
                metadata: BTreeMap::new(),
            }),
            files: Mutex::new(FileState::default()),
            start_t: Mutex::new(clock::now_secs()),
            please_stop: AtomicBool::new(false),
            finished_tx,
            finished_rx,
        })
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    pub fn streams(&self) -> &StreamSet {
        &self.streams
    }

    /// Receiver signalled once with the summary when a run ends.
    pub fn finished(&self) -> Receiver<RunSummary> {
        self.finished_rx.clone()
    }

    /// Ask the run loop to wind down after its current iteration.
    pub fn stop(&self) {
        self.please_stop.store(true, Ordering::Relaxed);
    }

    pub fn is_stopping(&self) -> bool {
        self.please_stop.load(Ordering::Relaxed)
    }

    // ---------------------------------------------------------------
    // Gate and trigger counters
    // ---------------------------------------------------------------

    pub fn set_gate(&self, hi: bool) {
        let mut run = self.run.lock();
        Self::base_set_gate(&mut run, hi);
    }

    fn base_set_gate(run: &mut RunState, hi: bool) {
        let hi = hi && run.gate_enabled;
        let now = clock::now_secs();

        if hi && !run.gate_hi {
            run.i_gate += 1;
            run.i_trig = -1;
            run.gate_epoch += 1;
            run.gate_hi_t = now;
            log::info!("Gate {} high at {:.3}s", run.i_gate, now);
        } else if !hi && run.gate_hi {
            run.gate_lo_t = now;
            log::info!("Gate {} low at {:.3}s", run.i_gate, now);
        }

        run.gate_hi = hi;
    }

    /// A disabled gate holds recording low.
    pub fn set_gate_enabled(&self, enabled: bool) {
        let mut run = self.run.lock();
        run.gate_enabled = enabled;
        if !enabled {
            Self::base_set_gate(&mut run, false);
        }
    }

    pub fn is_gate_hi(&self) -> bool {
        self.run.lock().gate_hi
    }

    pub fn gate_hi_t(&self) -> f64 {
        self.run.lock().gate_hi_t
    }

    pub fn gate_lo_t(&self) -> f64 {
        self.run.lock().gate_lo_t
    }

    pub fn trig_hi_t(&self) -> f64 {
        self.run.lock().trig_hi_t
    }

    /// Current (gate, trigger) indices; -1 before the first of each.
    pub fn get_gt(&self) -> (i32, i32) {
        let run = self.run.lock();
        (run.i_gate, run.i_trig)
    }

    pub fn gate_snapshot(&self) -> GateSnapshot {
        let run = self.run.lock();
        GateSnapshot {
            hi: run.gate_hi,
            index: run.i_gate,
            epoch: run.gate_epoch,
            hi_t: run.gate_hi_t,
            lo_t: run.gate_lo_t,
        }
    }

    /// Make the next trigger use gate `g`, trigger `t`.
    pub fn force_gt_counters(&self, g: i32, t: i32) {
        self.run.lock().ovr.set(g, t);
    }

    pub fn reset_gt_counters(&self) {
        let mut run = self.run.lock();
        run.i_gate = -1;
        run.i_trig = -1;
    }

    /// Advance the trigger index, applying any pending override.
    pub fn inc_trig(&self) -> (u32, u32) {
        let mut run = self.run.lock();

        if let Some((g, t)) = run.ovr.take() {
            log::info!("Manual override: next segment g{} t{}", g, t + 1);
            run.i_gate = g;
            run.i_trig = t;
        }

        run.i_trig += 1;
        run.trig_hi_t = clock::now_secs();

        (run.i_gate.max(0) as u32, run.i_trig.max(0) as u32)
    }

    // ---------------------------------------------------------------
    // Segment files
    // ---------------------------------------------------------------

    /// Close any open segment and open a new one for every active stream.
    ///
    /// Returns false if any writer failed to open; the others stay open.
    pub fn new_trig(&self) -> bool {
        self.end_trig();

        let (gate, trigger) = self.inc_trig();
        let user_meta = self.run.lock().metadata.clone();
        let created = Utc::now();

        let mut files = self.files.lock();
        files.first_ct.clear();

        let mut ok = true;
        for id in self.streams.active() {
            for dst in self.streams.destinations(id) {
                let Some((sample_rate, n_chans)) = self.streams.file_geometry(dst) else {
                    continue;
                };

                let spec = SegmentSpec {
                    run_name: self.config.run_name.clone(),
                    gate,
                    trigger,
                    dst,
                    sample_rate,
                    n_chans,
                    created,
                };

                let mut meta = user_meta.clone();
                meta.insert("fileCreateTime".to_string(), created.to_rfc3339());
                meta.insert("nSavedChans".to_string(), n_chans.to_string());
                meta.insert("sampleRate".to_string(), sample_rate.to_string());
                meta.insert("gate".to_string(), gate.to_string());
                meta.insert("trigger".to_string(), trigger.to_string());

                let mut writer = self.factory.create(dst);
                match writer.open(&spec, &meta) {
                    Ok(()) => {
                        log::info!("Opened segment {}", spec.stem());
                        files.open.insert(
                            dst,
                            OpenSegment {
                                writer,
                                spec,
                                persisted: true,
                                bytes: 0,
                                write_time: Duration::ZERO,
                            },
                        );
                    }
                    Err(e) => {
                        log::error!("Failed to open segment {}: {}", spec.stem(), e);
                        ok = false;
                        files.closed.push(SegmentRecord {
                            dst,
                            gate,
                            trigger,
                            first_ct: None,
                            scans: 0,
                            path: None,
                            persisted: false,
                        });
                    }
                }
            }
        }

        ok
    }

    /// Close every open segment.
    pub fn end_trig(&self) {
        let mut files = self.files.lock();
        Self::close_all(&mut files);
    }

    fn close_all(files: &mut FileState) {
        files.cursors.clear();

        for (dst, mut seg) in std::mem::take(&mut files.open) {
            let path = seg.writer.path().map(Path::to_path_buf);
            let scans = seg.writer.scan_count();

            if let Err(e) = seg.writer.close() {
                log::error!("Failed to close segment {}: {}", seg.spec.stem(), e);
                seg.persisted = false;
            }

            log::info!("Closed segment {} ({} scans)", seg.spec.stem(), scans);
            files.closed.push(SegmentRecord {
                dst,
                gate: seg.spec.gate,
                trigger: seg.spec.trigger,
                first_ct: files.first_ct.get(&dst).copied(),
                scans,
                path,
                persisted: seg.persisted,
            });
        }
    }

    /// Hand `blocks` to the writer of `dst`, then empty the batch.
    ///
    /// Records the first written count of the destination. Returns false
    /// when nothing could be written.
    pub fn write_and_inval_vb(&self, dst: Destination, blocks: &mut Vec<StreamBlock>) -> bool {
        let mut files = self.files.lock();
        Self::write_blocks(&mut files, dst, blocks)
    }

    fn write_blocks(files: &mut FileState, dst: Destination, blocks: &mut Vec<StreamBlock>) -> bool {
        let Some(seg) = files.open.get_mut(&dst) else {
            blocks.clear();
            return false;
        };
        if !seg.persisted {
            blocks.clear();
            return false;
        }

        let nc = seg.spec.n_chans.max(1);
        let mut ok = true;

        for block in blocks.iter() {
            let n = block.data.len() / nc;
            if n == 0 {
                continue;
            }

            files.first_ct.entry(dst).or_insert(block.head_ct);

            let t0 = Instant::now();
            match seg.writer.write_scans(&block.data, n) {
                Ok(()) => {
                    seg.bytes += (block.data.len() * std::mem::size_of::<i16>()) as u64;
                    seg.write_time += t0.elapsed();
                }
                Err(e) => {
                    log::error!(
                        "Write to {} failed, segment will not be persisted: {}",
                        seg.spec.stem(),
                        e
                    );
                    seg.persisted = false;
                    ok = false;
                    break;
                }
            }
        }

        blocks.clear();
        ok
    }

    /// Matched count in stream `to` for `ct` in stream `from`.
    pub(crate) fn align(&self, from: StreamId, ct: u64, to: StreamId) -> u64 {
        if from == to {
            return ct;
        }
        match (self.streams.buffer(from), self.streams.buffer(to)) {
            (Some(src), Some(dst)) => align_x12(
                src,
                self.streams.sync(from).as_ref(),
                ct,
                dst,
                self.streams.sync(to).as_ref(),
            ),
            _ => ct,
        }
    }

    /// Buffer that trigger decisions are made on.
    pub fn reference_buffer(&self) -> &Arc<StreamBuffer> {
        &self.ref_buffer
    }

    /// Reference-stream count at stream time `t`, clamped up to the
    /// oldest retained count.
    pub fn ref_ct_at(&self, t: f64) -> u64 {
        let buf = self.reference_buffer();
        match buf.map_time_to_ct(t) {
            (_, Placement::WayLeft) => buf.q_head_ct(),
            (_, Placement::Left) => {
                let head = buf.q_head_ct();
                log::warn!("Time {:.3}s already evicted, starting at count {}", t, head);
                head
            }
            (ct, _) => ct,
        }
    }

    /// Open a segment covering `[start_ct, lim_ct)` of the reference
    /// stream, aligned onto every other active stream.
    pub fn begin_segment(&self, start_ct: u64, lim_ct: Option<u64>) -> bool {
        let ok = self.new_trig();
        let ref_id = self.ref_id;

        let cursors: Vec<(StreamId, Cursor)> = self
            .streams
            .active()
            .into_iter()
            .map(|id| {
                let cursor = Cursor {
                    next_ct: self.align(ref_id, start_ct, id),
                    lim_ct: lim_ct.map(|lim| self.align(ref_id, lim, id)),
                };
                (id, cursor)
            })
            .collect();

        log::debug!("Segment span {}..{:?} on reference stream", start_ct, lim_ct);
        self.files.lock().cursors.extend(cursors);
        ok
    }

    /// End the open segment at reference count `lim_ct`, unless it already
    /// ends earlier.
    pub fn set_segment_limit(&self, lim_ct: u64) {
        let ref_id = self.ref_id;
        let ids: Vec<StreamId> = self.files.lock().cursors.keys().copied().collect();
        let limits: Vec<(StreamId, u64)> = ids
            .into_iter()
            .map(|id| (id, self.align(ref_id, lim_ct, id)))
            .collect();

        let mut files = self.files.lock();
        for (id, lim) in limits {
            if let Some(cursor) = files.cursors.get_mut(&id) {
                cursor.lim_ct = Some(cursor.lim_ct.map_or(lim, |cur| cur.min(lim)));
            }
        }
    }

    pub fn has_open_segment(&self) -> bool {
        !self.files.lock().cursors.is_empty()
    }

    /// Write whatever each stream of the open segment has produced since
    /// the last pass, up to its limit.
    pub fn service_segment(&self) -> Result<SegmentProgress> {
        let mut files = self.files.lock();
        let mut progress = SegmentProgress {
            done: true,
            scans: 0,
        };

        let ids: Vec<StreamId> = files.cursors.keys().copied().collect();
        for id in ids {
            let Some(buf) = self.streams.buffer(id) else {
                continue;
            };
            let Some(mut cursor) = files.cursors.get(&id).copied() else {
                continue;
            };

            let max_n = ((self.config.max_fetch_secs * buf.sample_rate()) as u64).max(1);
            let want = match cursor.lim_ct {
                Some(lim) => lim.saturating_sub(cursor.next_ct).min(max_n),
                None => max_n,
            };

            if want > 0 {
                let mut data = Vec::new();
                match buf.get_n_scans_from_ct(&mut data, cursor.next_ct, want as usize)? {
                    Placement::Inside => {
                        let n = (data.len() / buf.n_chans()) as u64;
                        let block = StreamBlock {
                            data,
                            head_ct: cursor.next_ct,
                        };
                        self.dispatch(&mut files, id, block);
                        cursor.next_ct += n;
                        progress.scans += n;
                    }
                    Placement::Left => {
                        let head = buf.q_head_ct();
                        log::warn!(
                            "{:?} writer fell behind at count {}, skipping {} scans",
                            id,
                            cursor.next_ct,
                            head - cursor.next_ct
                        );
                        cursor.next_ct = head;
                    }
                    Placement::Right | Placement::WayLeft => {}
                }
                files.cursors.insert(id, cursor);
            }

            if cursor.lim_ct.map_or(true, |lim| cursor.next_ct < lim) {
                progress.done = false;
            }
        }

        Ok(progress)
    }

    /// Service the open segment until it is complete or no stream has
    /// more data.
    pub fn flush_segment(&self) -> Result<SegmentProgress> {
        let mut total = SegmentProgress::default();
        loop {
            let p = self.service_segment()?;
            total.scans += p.scans;
            total.done = p.done;
            if p.done || p.scans == 0 {
                return Ok(total);
            }
        }
    }

    fn dispatch(&self, files: &mut FileState, id: StreamId, block: StreamBlock) {
        match id {
            StreamId::Ni => {
                let mut vb = vec![block];
                Self::write_blocks(files, Destination::Ni, &mut vb);
            }
            StreamId::Probe(ip) => {
                let Some(probe) = self.streams.probes.get(ip) else {
                    return;
                };
                let (ap, lf) = split_ap_lf(&probe.config.layout, &block);

                let mut vb = vec![ap];
                Self::write_blocks(files, Destination::ProbeAp(ip), &mut vb);

                if !lf.data.is_empty() {
                    let mut vb = vec![lf];
                    Self::write_blocks(files, Destination::ProbeLf(ip), &mut vb);
                }
            }
        }
    }

    // ---------------------------------------------------------------
    // File status
    // ---------------------------------------------------------------

    pub fn all_files_closed(&self) -> bool {
        self.files.lock().open.is_empty()
    }

    /// True if an open segment is writing to `path`.
    pub fn is_in_use(&self, path: &Path) -> bool {
        self.files
            .lock()
            .open
            .values()
            .any(|seg| seg.writer.path() == Some(path))
    }

    /// Replace the user metadata merged into every opened segment.
    pub fn set_metadata(&self, metadata: BTreeMap<String, String>) {
        self.run.lock().metadata = metadata;
    }

    pub fn cur_ni_filename(&self) -> Option<PathBuf> {
        self.files
            .lock()
            .open
            .get(&Destination::Ni)
            .and_then(|seg| seg.writer.path().map(Path::to_path_buf))
    }

    /// First count written to the current AP segment of probe `ip`.
    pub fn cur_im_file_start(&self, ip: usize) -> Option<u64> {
        self.files.lock().first_ct.get(&Destination::ProbeAp(ip)).copied()
    }

    pub fn cur_ni_file_start(&self) -> Option<u64> {
        self.files.lock().first_ct.get(&Destination::Ni).copied()
    }

    /// Scans written to the open segment of `dst`.
    pub fn scan_count(&self, dst: Destination) -> u64 {
        self.files
            .lock()
            .open
            .get(&dst)
            .map_or(0, |seg| seg.writer.scan_count())
    }

    pub fn status_wr_perf(&self) -> Vec<WritePerf> {
        self.files
            .lock()
            .open
            .iter()
            .map(|(dst, seg)| {
                let secs = seg.write_time.as_secs_f64();
                WritePerf {
                    dst: *dst,
                    scans: seg.writer.scan_count(),
                    mb_per_sec: if secs > 0.0 {
                        seg.bytes as f64 / secs / (1024.0 * 1024.0)
                    } else {
                        0.0
                    },
                }
            })
            .collect()
    }

    // ---------------------------------------------------------------
    // Run timing
    // ---------------------------------------------------------------

    pub fn set_start_t(&self) {
        *self.start_t.lock() = clock::now_secs();
    }

    pub fn start_t(&self) -> f64 {
        *self.start_t.lock()
    }

    /// Status line such as `ON 0h01m05.2s <G0 T3>`.
    pub fn status_on_since(&self, now: f64, ig: i32, it: i32) -> String {
        let secs = (now - self.start_t()).max(0.0);
        let h = (secs / 3600.0) as u64;
        let m = (secs / 60.0) as u64 % 60;
        let s = secs - (h * 3600 + m * 60) as f64;
        format!("ON {}h{:02}m{:04.1}s <G{} T{}>", h, m, s, ig, it)
    }

    pub fn set_yield_period_ms(&self, ms: u64) {
        self.run.lock().loop_period_us = ms * 1000;
    }

    /// Sleep out the rest of the loop period begun at `loop_t`.
    pub fn yield_loop(&self, loop_t: f64) {
        let period = self.run.lock().loop_period_us as f64 * 1e-6;
        let remaining = period - (clock::now_secs() - loop_t);
        if remaining > 0.0 {
            thread::sleep(Duration::from_secs_f64(remaining));
        }
    }

    // ---------------------------------------------------------------
    // Run loop
    // ---------------------------------------------------------------

    /// Drive `policy` until `stop` is called, then close everything and
    /// signal "finished".
    pub fn run(&self, policy: &mut dyn TriggerPolicy) -> RunSummary {
        self.set_start_t();
        log::info!("Trigger '{}' running for '{}'", policy.name(), self.config.run_name);

        while !self.is_stopping() {
            let loop_t = clock::now_secs();

            if let Err(e) = policy.tick(self) {
                log::error!("Trigger iteration failed: {}", e);
            }

            self.yield_loop(loop_t);
        }

        if let Err(e) = policy.finish(self) {
            log::error!("Failed to finish in-flight writes: {}", e);
        }

        self.end_run()
    }

    /// Close open segments and publish the run summary.
    pub fn end_run(&self) -> RunSummary {
        self.end_trig();

        let segments = std::mem::take(&mut self.files.lock().closed);
        let (i_gate, _) = self.get_gt();

        let summary = RunSummary {
            run_name: self.config.run_name.clone(),
            gates: (i_gate + 1).max(0) as u32,
            segments,
        };

        log::info!(
            "Run '{}' ended: {} gates, {} segments",
            summary.run_name,
            summary.gates,
            summary.segments.len()
        );

        match self.finished_tx.try_send(summary.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => log::debug!("Previous finished notice not consumed"),
            Err(TrySendError::Disconnected(_)) => {}
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProbeConfig, ProbeLayout, StreamConfig};
    use crate::trigger::types::{NiStream, ProbeStream};
    use crate::trigger::writer::MemoryWriterFactory;

    fn ni_only(factory: &MemoryWriterFactory) -> (TriggerController, Arc<StreamBuffer>) {
        let config = StreamConfig {
            sample_rate: 1000.0,
            n_neural: 1,
            n_analog: 1,
            n_chans: 2,
            ..Default::default()
        };
        let buffer = Arc::new(StreamBuffer::with_capacity_scans(1000.0, 2, 5000));
        let streams = StreamSet {
            ni: Some(NiStream {
                config,
                buffer: buffer.clone(),
            }),
            probes: Vec::new(),
        };
        let ctl = TriggerController::new(TriggerConfig::default(), streams, Arc::new(factory.clone())).unwrap();
        (ctl, buffer)
    }

    #[test]
    fn test_requires_stream() {
        let factory = MemoryWriterFactory::new();
        let r = TriggerController::new(TriggerConfig::default(), StreamSet::default(), Arc::new(factory));
        assert!(matches!(r, Err(AcqError::InvalidConfig(_))));
    }

    #[test]
    fn test_gate_counters() {
        let factory = MemoryWriterFactory::new();
        let (ctl, _) = ni_only(&factory);
        assert_eq!(ctl.get_gt(), (-1, -1));

        ctl.set_gate(true);
        assert!(ctl.is_gate_hi());
        assert_eq!(ctl.inc_trig(), (0, 0));
        assert_eq!(ctl.inc_trig(), (0, 1));

        // Repeated high does not open a new gate
        ctl.set_gate(true);
        assert_eq!(ctl.get_gt(), (0, 1));

        ctl.set_gate(false);
        assert!(ctl.gate_lo_t() >= ctl.gate_hi_t());
        ctl.set_gate(true);
        assert_eq!(ctl.get_gt(), (1, -1));
        assert_eq!(ctl.gate_snapshot().epoch, 2);

        ctl.reset_gt_counters();
        assert_eq!(ctl.get_gt(), (-1, -1));
    }

    #[test]
    fn test_disabled_gate_stays_low() {
        let factory = MemoryWriterFactory::new();
        let (ctl, _) = ni_only(&factory);

        ctl.set_gate(true);
        ctl.set_gate_enabled(false);
        assert!(!ctl.is_gate_hi());

        ctl.set_gate(true);
        assert!(!ctl.is_gate_hi());

        ctl.set_gate_enabled(true);
        ctl.set_gate(true);
        assert_eq!(ctl.get_gt().0, 1);
    }

    #[test]
    fn test_override_consumed_once() {
        let factory = MemoryWriterFactory::new();
        let (ctl, _) = ni_only(&factory);
        ctl.set_gate(true);

        let epoch = ctl.gate_snapshot().epoch;
        ctl.force_gt_counters(4, 7);
        assert!(ctl.new_trig());
        assert_eq!(ctl.get_gt(), (4, 7));
        // The forced gate index is not a gate transition
        assert_eq!(ctl.gate_snapshot().epoch, epoch);

        assert!(ctl.new_trig());
        assert_eq!(ctl.get_gt(), (4, 8));

        ctl.end_trig();
        let stems: Vec<String> = factory.segments().into_iter().map(|s| s.stem).collect();
        assert_eq!(stems, vec!["run_g4_t7.nidq", "run_g4_t8.nidq"]);
    }

    #[test]
    fn test_write_and_inval_vb() {
        let factory = MemoryWriterFactory::new();
        let (ctl, _) = ni_only(&factory);
        ctl.set_gate(true);
        assert!(ctl.new_trig());

        let mut vb = vec![
            StreamBlock {
                data: vec![1, 2, 3, 4],
                head_ct: 40,
            },
            StreamBlock {
                data: vec![5, 6],
                head_ct: 42,
            },
        ];
        assert!(ctl.write_and_inval_vb(Destination::Ni, &mut vb));
        assert!(vb.is_empty());
        assert_eq!(ctl.cur_ni_file_start(), Some(40));
        assert_eq!(ctl.scan_count(Destination::Ni), 3);
        assert!(ctl.cur_ni_filename().is_some());
        assert!(ctl.is_in_use(Path::new("run_g0_t0.nidq")));

        // No open segment for a probe
        let mut vb = vec![StreamBlock::default()];
        assert!(!ctl.write_and_inval_vb(Destination::ProbeAp(0), &mut vb));
        assert!(vb.is_empty());

        ctl.end_trig();
        assert!(ctl.all_files_closed());
        assert_eq!(factory.segments()[0].data, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_metadata_merged() {
        let factory = MemoryWriterFactory::new();
        let (ctl, _) = ni_only(&factory);
        let mut meta = BTreeMap::new();
        meta.insert("subject".to_string(), "m12".to_string());
        ctl.set_metadata(meta);

        ctl.new_trig();
        let seg = &factory.segments()[0];
        assert_eq!(seg.metadata.get("subject").map(String::as_str), Some("m12"));
        assert_eq!(seg.metadata.get("nSavedChans").map(String::as_str), Some("2"));
        assert!(seg.metadata.contains_key("fileCreateTime"));
    }

    #[test]
    fn test_segment_service_until_limit() {
        let factory = MemoryWriterFactory::new();
        let (ctl, buffer) = ni_only(&factory);
        let data: Vec<i16> = (0..600).map(|i| i as i16).collect();
        buffer.enqueue(&data, 300);

        assert!(ctl.begin_segment(100, Some(400)));
        let p = ctl.service_segment().unwrap();
        assert_eq!(p, SegmentProgress { done: false, scans: 200 });

        buffer.enqueue(&data, 300);
        let p = ctl.flush_segment().unwrap();
        assert!(p.done);
        assert_eq!(p.scans, 100);

        ctl.end_trig();
        let seg = &factory.segments()[0];
        assert_eq!(seg.data.len(), 600);
        assert_eq!(seg.data[0], 200);
    }

    #[test]
    fn test_writer_failure_isolated() {
        let factory = MemoryWriterFactory::new();
        factory.fail_writes_to(Destination::ProbeAp(0));

        let ni_buf = Arc::new(StreamBuffer::with_capacity_scans(1000.0, 1, 5000));
        let layout = ProbeLayout {
            n_ap: 2,
            n_lf: 2,
            n_sy: 1,
        };
        let im_buf = Arc::new(StreamBuffer::with_capacity_scans(1000.0, layout.n_chans(), 5000));
        let streams = StreamSet {
            ni: Some(NiStream {
                config: StreamConfig {
                    sample_rate: 1000.0,
                    n_neural: 0,
                    n_analog: 0,
                    n_chans: 1,
                    ..Default::default()
                },
                buffer: ni_buf.clone(),
            }),
            probes: vec![ProbeStream {
                config: ProbeConfig {
                    sample_rate: 1000.0,
                    layout,
                    ..Default::default()
                },
                buffer: im_buf.clone(),
            }],
        };
        let ctl = TriggerController::new(TriggerConfig::default(), streams, Arc::new(factory.clone())).unwrap();

        ni_buf.enqueue(&vec![1; 120], 120);
        im_buf.enqueue(&vec![2; 120 * 5], 120);

        ctl.set_gate(true);
        ctl.begin_segment(0, Some(120));
        assert!(ctl.flush_segment().unwrap().done);
        let summary = ctl.end_run();

        let rec = |dst: Destination| summary.segments.iter().find(|r| r.dst == dst).unwrap();
        assert!(!rec(Destination::ProbeAp(0)).persisted);
        assert!(rec(Destination::Ni).persisted);
        assert_eq!(rec(Destination::Ni).scans, 120);
        assert!(rec(Destination::ProbeLf(0)).persisted);
        assert_eq!(rec(Destination::ProbeLf(0)).scans, 10);
        assert_eq!(summary.gates, 1);

        assert!(ctl.finished().try_recv().is_ok());
    }

    #[test]
    fn test_status_on_since() {
        let factory = MemoryWriterFactory::new();
        let (ctl, _) = ni_only(&factory);
        let now = ctl.start_t() + 3725.4;
        assert_eq!(ctl.status_on_since(now, 2, 5), "ON 1h02m05.4s <G2 T5>");
    }
}
