// Splitting probe scans into their AP and LF files
//
// A probe scan carries AP, LF and SY words. The AP file takes AP+SY of
// every scan; the LF file takes LF+SY of every scan whose absolute count
// is a multiple of the LF decimation, and counts in LF samples.

use super::types::StreamBlock;
use crate::config::{ProbeLayout, LF_DECIMATION};

pub(crate) fn split_ap_lf(layout: &ProbeLayout, block: &StreamBlock) -> (StreamBlock, StreamBlock) {
    let nc = layout.n_chans();
    let ap = layout.ap_range();
    let lf = layout.lf_range();
    let sy = layout.sy_range();

    let n_scans = block.data.len() / nc;
    let mut ap_data = Vec::with_capacity(n_scans * (ap.len() + sy.len()));
    let mut lf_data = Vec::new();

    for (i, scan) in block.data.chunks_exact(nc).enumerate() {
        ap_data.extend_from_slice(&scan[ap.clone()]);
        ap_data.extend_from_slice(&scan[sy.clone()]);

        if (block.head_ct + i as u64) % LF_DECIMATION == 0 {
            lf_data.extend_from_slice(&scan[lf.clone()]);
            lf_data.extend_from_slice(&scan[sy.clone()]);
        }
    }

    let ap_block = StreamBlock {
        data: ap_data,
        head_ct: block.head_ct,
    };
    let lf_block = StreamBlock {
        data: lf_data,
        head_ct: block.head_ct.div_ceil(LF_DECIMATION),
    };
    (ap_block, lf_block)
}
