//! Small numeric helpers shared across the pipeline.

/// Get a canonicalised u64 for f64 to be able to hash f64, based on the `ordered_float` crate (MIT license)
pub fn f64_bits(value: f64) -> u64 {
    if value.is_nan() {
        0x7ff8_0000_0000_0000_u64 // CANONICAL_NAN_BITS
    } else {
        (value + 0.0).to_bits() // The +0.0 is to guarantee even handling of negative and positive zero
    }
}

/// The median of the given values, scrambling the slice in the process.
/// Returns [`None`] on an empty slice.
pub fn median_in_place(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let len = values.len();
    let mid = len / 2;
    let (low, pivot, _) = values.select_nth_unstable_by(mid, f64::total_cmp);
    if len % 2 == 1 {
        Some(*pivot)
    } else {
        // Even length: average the upper of the low partition with the pivot
        let lower = low.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some((lower + *pivot) / 2.0)
    }
}

/// The q-quantile (0 ≤ q ≤ 1) of an ascending slice, with linear interpolation
/// between adjacent ranks. Returns [`None`] on an empty slice.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let below = position.floor() as usize;
    let above = position.ceil() as usize;
    let fraction = position - below as f64;
    Some(sorted[below] * (1.0 - fraction) + sorted[above] * fraction)
}

/// Trapezoidal integral of y over x. The x values are assumed ascending.
pub fn trapezoid(x: &[f64], y: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), y.len());
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| (xs[1] - xs[0]) * (ys[0] + ys[1]) / 2.0)
        .sum()
}

/// Cosine similarity between two equal length vectors.
/// Returns [`None`] when either vector has zero norm or the lengths differ.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    (norm_a > 0.0 && norm_b > 0.0).then(|| dot / (norm_a * norm_b))
}

/// The weighted mean of the given values. Returns [`None`] when the total
/// weight is not a positive finite number.
pub fn weighted_mean(values: impl Iterator<Item = (f64, f64)>) -> Option<f64> {
    let (sum, total) = values.fold((0.0, 0.0), |(sum, total), (value, weight)| {
        (sum + value * weight, total + weight)
    });
    (total > 0.0 && total.is_finite()).then(|| sum / total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_odd_even() {
        let mut odd = [3.0, 1.0, 2.0];
        assert_eq!(median_in_place(&mut odd), Some(2.0));
        let mut even = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(median_in_place(&mut even), Some(2.5));
        assert_eq!(median_in_place(&mut []), None);
    }

    #[test]
    fn quantiles_interpolate() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile_sorted(&sorted, 0.0), Some(1.0));
        assert_eq!(quantile_sorted(&sorted, 1.0), Some(5.0));
        assert_eq!(quantile_sorted(&sorted, 0.5), Some(3.0));
        assert_eq!(quantile_sorted(&sorted, 0.25), Some(2.0));
    }

    #[test]
    fn trapezoid_of_triangle() {
        let x = [0.0, 1.0, 2.0];
        let y = [0.0, 1.0, 0.0];
        assert!((trapezoid(&x, &y) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn cosine_of_parallel_vectors() {
        let similarity = cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]).unwrap();
        assert!((similarity - 1.0).abs() < 1e-12);
        assert_eq!(cosine_similarity(&[0.0], &[1.0]), None);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), None);
    }

    #[test]
    fn weighted_mean_ignores_zero_weight_total() {
        let mean = weighted_mean([(1.0, 1.0), (3.0, 3.0)].into_iter()).unwrap();
        assert!((mean - 2.5).abs() < 1e-12);
        assert_eq!(weighted_mean(std::iter::empty()), None);
    }
}
