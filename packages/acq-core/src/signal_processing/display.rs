// Reductions used when preparing neural data for display

/// Per-channel mean of `[c0, c_lim)` over `ntpts` scans, clamped to
/// `[-max_int, max_int)`.
pub fn dc_average(data: &[i16], ntpts: usize, nchans: usize, c0: usize, c_lim: usize, max_int: i32) -> Vec<i16> {
    let c_lim = c_lim.min(nchans);
    if c0 >= c_lim {
        return Vec::new();
    }

    let ntpts = ntpts.min(data.len() / nchans.max(1));
    if ntpts == 0 {
        return vec![0; c_lim - c0];
    }

    let mut sums = vec![0i64; c_lim - c0];
    for scan in data.chunks_exact(nchans).take(ntpts) {
        for (sum, &v) in sums.iter_mut().zip(&scan[c0..c_lim]) {
            *sum += i64::from(v);
        }
    }

    let lo = i64::from(-max_int).max(i64::from(i16::MIN));
    let hi = (i64::from(max_int) - 1).min(i64::from(i16::MAX));
    sums.into_iter()
        .map(|s| (s / ntpts as i64).clamp(lo, hi) as i16)
        .collect()
}

/// Reduce channel `chan` to one sample per `bin` scans, keeping the sample
/// of largest magnitude in each bin so brief spikes survive.
pub fn downsample_extremum(data: &[i16], ntpts: usize, nchans: usize, chan: usize, bin: usize) -> Vec<i16> {
    if chan >= nchans {
        return Vec::new();
    }

    let bin = bin.max(1);
    let samples: Vec<i16> = data.iter().skip(chan).step_by(nchans).take(ntpts).copied().collect();

    samples
        .chunks(bin)
        .map(|b| {
            b.iter()
                .copied()
                .reduce(|best, v| if i32::from(v).abs() > i32::from(best).abs() { v } else { best })
                .unwrap_or(0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dc_average() {
        let data = [10, 1, 100, 20, 3, 100, 30, 5, 100];
        assert_eq!(dc_average(&data, 3, 3, 0, 2, 512), vec![20, 3]);

        // Clamp to a 10-bit range
        let hot = [1000i16, -1000, 1000, -1000];
        assert_eq!(dc_average(&hot, 2, 2, 0, 2, 512), vec![511, -512]);
    }

    #[test]
    fn test_downsample_keeps_spikes() {
        let mut data = vec![2i16; 40];
        data[2 * 13 + 1] = -900;
        let out = downsample_extremum(&data, 20, 2, 1, 5);
        assert_eq!(out, vec![2, 2, -900, 2]);

        let ragged = downsample_extremum(&[1, 7, -3], 3, 1, 0, 2);
        assert_eq!(ragged, vec![7, -3]);
    }
}
