// Swappable display-path filter applied to incoming neural blocks
//
// The filter is swapped under its own lock. A block being filtered holds
// that lock, so a swap takes effect from the next block on.

use parking_lot::Mutex;
use std::ops::Range;

use super::biquad::{BiquadFilter, BiquadType};

/// Scans zeroed after a filter is enabled, covering its start-up ringing.
pub const BIQUAD_TRANS_WIDE: usize = 1000;

struct LiveState {
    filter: Option<BiquadFilter>,
    /// Scans still to be zeroed
    transient: usize,
}

pub struct LiveFilter {
    sample_rate: f64,
    chans: Range<usize>,
    state: Mutex<LiveState>,
}

impl LiveFilter {
    /// Filter acting on the channels in `chans`, initially disabled.
    pub fn new(sample_rate: f64, chans: Range<usize>) -> Self {
        Self {
            sample_rate,
            chans,
            state: Mutex::new(LiveState {
                filter: None,
                transient: 0,
            }),
        }
    }

    /// Enable a highpass at `cutoff_hz`, or disable with `None`.
    pub fn set_highpass(&self, cutoff_hz: Option<f64>) {
        let filter = cutoff_hz.map(|hz| BiquadFilter::new(BiquadType::Highpass, hz / self.sample_rate));
        self.set_filter(filter);
    }

    /// Replace the filter. Disabling discards its state.
    pub fn set_filter(&self, filter: Option<BiquadFilter>) {
        let mut state = self.state.lock();

        state.transient = if filter.is_some() { BIQUAD_TRANS_WIDE } else { 0 };
        log::debug!(
            "Live filter {} on chans {:?}",
            if filter.is_some() { "enabled" } else { "disabled" },
            self.chans
        );
        state.filter = filter;
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().filter.is_some()
    }

    /// Filter `ntpts` interleaved scans in place.
    pub fn process(&self, data: &mut [i16], ntpts: usize, nchans: usize) {
        let mut state = self.state.lock();
        let LiveState { filter, transient } = &mut *state;

        let Some(filter) = filter else {
            return;
        };

        let c0 = self.chans.start;
        let c_lim = self.chans.end.min(nchans);
        filter.apply_blockwise_mem(data, ntpts, nchans, c0, c_lim);

        if *transient > 0 && c0 < c_lim {
            let n = (*transient).min(ntpts);
            for scan in data.chunks_exact_mut(nchans).take(n) {
                scan[c0..c_lim].fill(0);
            }
            *transient -= n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_passthrough() {
        let live = LiveFilter::new(30_000.0, 0..2);
        let mut data = vec![123i16; 30];
        live.process(&mut data, 10, 3);
        assert!(data.iter().all(|&v| v == 123));
        assert!(!live.is_enabled());
    }

    #[test]
    fn test_transient_zeroed_then_filtered() {
        let live = LiveFilter::new(30_000.0, 0..2);
        live.set_highpass(Some(300.0));
        assert!(live.is_enabled());

        let nchans = 3;
        let ntpts = 800;
        let mut first = vec![1000i16; ntpts * nchans];
        live.process(&mut first, ntpts, nchans);
        assert!(first.chunks_exact(nchans).all(|s| s[0] == 0 && s[1] == 0 && s[2] == 1000));

        // 200 transient scans remain
        let mut second: Vec<i16> = (0..ntpts * nchans).map(|i| if i % 2 == 0 { 900 } else { -900 }).collect();
        live.process(&mut second, ntpts, nchans);
        assert!(second[..200 * nchans].chunks_exact(nchans).all(|s| s[0] == 0 && s[1] == 0));
        assert!(second[200 * nchans..].chunks_exact(nchans).any(|s| s[0] != 0));
    }

    #[test]
    fn test_reenable_restarts_transient() {
        let live = LiveFilter::new(1000.0, 0..1);
        live.set_highpass(Some(10.0));

        let mut warm = vec![5i16; 2000];
        live.process(&mut warm, 2000, 1);

        live.set_highpass(None);
        live.set_highpass(Some(10.0));

        let mut data = vec![5000i16; 10];
        live.process(&mut data, 10, 1);
        assert!(data.iter().all(|&v| v == 0));
    }
}
