//! Per-axis kernel weights.
//!
//! Every output sample on an axis gets the same number of taps; taps that
//! fall outside the kernel carry weight zero. Weights of one output sample
//! always sum to one.

use super::filter::Filter;

/// Taps per output sample when resampling `in_len` samples to `out_len`.
pub(crate) fn taps(filter: Filter, in_len: usize, out_len: usize) -> usize {
    let radius = filter.support() * (in_len as f32 / out_len as f32).max(1.0);
    (2.0 * radius).ceil() as usize + 2
}

/// Fills `first` (one entry per output sample: index of its first tap) and
/// `weights` (`taps` entries per output sample).
pub(crate) fn compute(
    filter: Filter,
    in_len: usize,
    out_len: usize,
    taps: usize,
    first: &mut [i32],
    weights: &mut [f32],
) {
    let ratio = in_len as f32 / out_len as f32;
    // Kernel is stretched by `ratio` when downsampling.
    let squeeze = (1.0 / ratio).min(1.0);
    let radius = filter.support() / squeeze;

    for (out, (start, row)) in first.iter_mut().zip(weights.chunks_exact_mut(taps)).enumerate() {
        let center = (out as f32 + 0.5) * ratio - 0.5;
        let lo = (center - radius).floor() as i32;
        *start = lo;

        let mut sum = 0.0f32;
        for (t, w) in row.iter_mut().enumerate() {
            let position = (lo + t as i32) as f32;
            *w = filter.eval((position - center) * squeeze);
            sum += *w;
        }

        if sum.abs() > 1e-6 {
            let inv = 1.0 / sum;
            row.iter_mut().for_each(|w| *w *= inv);
        } else {
            row.fill(0.0);
            let nearest = (center.round() as i32 - lo).clamp(0, taps as i32 - 1) as usize;
            row[nearest] = 1.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights_for(filter: Filter, in_len: usize, out_len: usize) -> (usize, Vec<i32>, Vec<f32>) {
        let n = taps(filter, in_len, out_len);
        let mut first = vec![0; out_len];
        let mut weights = vec![0.0; out_len * n];
        compute(filter, in_len, out_len, n, &mut first, &mut weights);
        (n, first, weights)
    }

    #[test]
    fn weights_sum_to_one() {
        for filter in Filter::ALL {
            for (in_len, out_len) in [(4, 9), (9, 4), (10, 10), (1, 5), (7, 1)] {
                let filter = filter.resolve(out_len > in_len);
                let (n, _, weights) = weights_for(filter, in_len, out_len);
                for row in weights.chunks_exact(n) {
                    let sum: f32 = row.iter().sum();
                    assert!((sum - 1.0).abs() < 1e-5, "{filter:?} {in_len}->{out_len}: {sum}");
                }
            }
        }
    }

    #[test]
    fn box_halving_averages_pairs() {
        let (n, first, weights) = weights_for(Filter::Box, 4, 2);
        for (out, row) in weights.chunks_exact(n).enumerate() {
            for (t, &w) in row.iter().enumerate() {
                let index = first[out] + t as i32;
                let expected = if index == 2 * out as i32 || index == 2 * out as i32 + 1 { 0.5 } else { 0.0 };
                assert!((w - expected).abs() < 1e-6, "out {out} tap {index}: {w}");
            }
        }
    }

    #[test]
    fn identity_scale_triangle_is_a_pass_through() {
        let (n, first, weights) = weights_for(Filter::Triangle, 5, 5);
        for (out, row) in weights.chunks_exact(n).enumerate() {
            for (t, &w) in row.iter().enumerate() {
                let index = first[out] + t as i32;
                let expected = if index == out as i32 { 1.0 } else { 0.0 };
                assert!((w - expected).abs() < 1e-6);
            }
        }
    }
}
