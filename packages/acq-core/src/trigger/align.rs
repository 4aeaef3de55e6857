//! Cross-stream sample alignment.
//!
//! Each stream counts samples on its own clock. Mapping through stream
//! time gives a first estimate; when both streams carry the shared sync
//! pulse, the estimate is corrected against the most recent pulse seen by
//! both.

use crate::config::SyncParams;
use crate::stream::{EdgeScan, Placement, StreamBuffer};

/// Count in `dst` matching `src_ct` in `src`.
pub fn align_x12(
    src: &StreamBuffer,
    src_sync: Option<&SyncParams>,
    src_ct: u64,
    dst: &StreamBuffer,
    dst_sync: Option<&SyncParams>,
) -> u64 {
    let by_time = map_via_time(src, src_ct, dst);

    match (src_sync, dst_sync) {
        (Some(a), Some(b)) => match refine_by_sync(src, a, src_ct, dst, b) {
            Some(ct) => {
                if ct != by_time {
                    log::trace!("Sync alignment moved count {} -> {}", by_time, ct);
                }
                ct
            }
            None => by_time,
        },
        _ => by_time,
    }
}

fn map_via_time(src: &StreamBuffer, src_ct: u64, dst: &StreamBuffer) -> u64 {
    let (t, _) = src.map_ct_to_time(src_ct);
    match dst.map_time_to_ct(t) {
        (_, Placement::WayLeft) => dst.q_head_ct(),
        (ct, _) => ct,
    }
}

/// Latest sync rising edge at or before `ct`, searching back 1.5 periods.
fn last_edge_before(buf: &StreamBuffer, sync: &SyncParams, ct: u64) -> Option<u64> {
    let span = (1.5 * sync.period_secs * buf.sample_rate()) as u64;
    let mut from = ct.saturating_sub(span);
    let mut last = None;

    while let EdgeScan::Found(edge) = buf.find_bit_rising_edge(from, sync.chan, sync.bit, 1) {
        if edge > ct {
            break;
        }
        last = Some(edge);
        from = edge + 1;
    }

    last
}

fn refine_by_sync(
    src: &StreamBuffer,
    a: &SyncParams,
    src_ct: u64,
    dst: &StreamBuffer,
    b: &SyncParams,
) -> Option<u64> {
    let src_edge = last_edge_before(src, a, src_ct)?;

    // The same pulse must lie within half a period of its time estimate
    let approx = map_via_time(src, src_edge, dst);
    let half = (0.5 * b.period_secs * dst.sample_rate()) as u64;

    let dst_edge = match dst.find_bit_rising_edge(approx.saturating_sub(half), b.chan, b.bit, 1) {
        EdgeScan::Found(edge) if edge <= approx + half => edge,
        _ => return None,
    };

    let delta = (src_ct - src_edge) as f64 * dst.sample_rate() / src.sample_rate();
    Some(dst_edge + delta.round() as u64)
}
