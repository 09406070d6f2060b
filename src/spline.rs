//! Natural cubic spline interpolation with derivative evaluation and root
//! refinement, used to place chromatographic apexes at subsample resolution.

use serde::{Deserialize, Serialize};

use crate::error::FeatureFindingError;

/// A natural cubic spline through a set of strictly increasing knots.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CubicSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    /// Second derivatives at the knots (zero at both ends)
    second: Vec<f64>,
}

impl CubicSpline {
    /// Fit a natural cubic spline through the given knots.
    ///
    /// # Errors
    /// [`FeatureFindingError::MalformedInput`] when fewer than two knots are
    /// given or the x values are not strictly increasing.
    pub fn new(xs: &[f64], ys: &[f64]) -> Result<Self, FeatureFindingError> {
        if xs.len() < 2 || xs.len() != ys.len() {
            return Err(FeatureFindingError::malformed(
                None,
                "a spline needs at least two knots with matching y values",
            ));
        }
        if xs.windows(2).any(|pair| pair[1] <= pair[0]) {
            return Err(FeatureFindingError::malformed(
                None,
                "spline knots must be strictly increasing",
            ));
        }

        let n = xs.len();
        let mut second = vec![0.0; n];
        let mut buffer = vec![0.0; n];
        // Tridiagonal forward sweep with natural boundary conditions
        for i in 1..n - 1 {
            let sig = (xs[i] - xs[i - 1]) / (xs[i + 1] - xs[i - 1]);
            let p = sig * second[i - 1] + 2.0;
            second[i] = (sig - 1.0) / p;
            let slope_right = (ys[i + 1] - ys[i]) / (xs[i + 1] - xs[i]);
            let slope_left = (ys[i] - ys[i - 1]) / (xs[i] - xs[i - 1]);
            buffer[i] =
                (6.0 * (slope_right - slope_left) / (xs[i + 1] - xs[i - 1]) - sig * buffer[i - 1]) / p;
        }
        for i in (1..n - 1).rev() {
            second[i] = second[i] * second[i + 1] + buffer[i];
        }
        second[0] = 0.0;
        second[n - 1] = 0.0;

        Ok(Self {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            second,
        })
    }

    /// The index of the segment containing x, clamping beyond the ends
    fn segment(&self, x: f64) -> usize {
        self.xs
            .partition_point(|knot| *knot <= x)
            .clamp(1, self.xs.len() - 1)
            - 1
    }

    /// Evaluate the spline at x. Outside the knot range the boundary segment
    /// polynomial is extrapolated.
    pub fn value(&self, x: f64) -> f64 {
        let i = self.segment(x);
        let h = self.xs[i + 1] - self.xs[i];
        let a = (self.xs[i + 1] - x) / h;
        let b = (x - self.xs[i]) / h;
        a * self.ys[i]
            + b * self.ys[i + 1]
            + ((a.powi(3) - a) * self.second[i] + (b.powi(3) - b) * self.second[i + 1]) * h * h / 6.0
    }

    /// Evaluate the first derivative of the spline at x.
    pub fn derivative(&self, x: f64) -> f64 {
        let i = self.segment(x);
        let h = self.xs[i + 1] - self.xs[i];
        let a = (self.xs[i + 1] - x) / h;
        let b = (x - self.xs[i]) / h;
        (self.ys[i + 1] - self.ys[i]) / h
            - (3.0 * a * a - 1.0) / 6.0 * h * self.second[i]
            + (3.0 * b * b - 1.0) / 6.0 * h * self.second[i + 1]
    }

    /// Find a zero of the first derivative inside `[low, high]` by bisection.
    /// The derivative must change sign over the bracket; returns [`None`]
    /// otherwise.
    pub fn derivative_root(&self, low: f64, high: f64) -> Option<f64> {
        let mut low = low;
        let mut high = high;
        let mut d_low = self.derivative(low);
        let d_high = self.derivative(high);
        if d_low == 0.0 {
            return Some(low);
        }
        if d_high == 0.0 {
            return Some(high);
        }
        if d_low.signum() == d_high.signum() {
            return None;
        }
        for _ in 0..64 {
            let mid = (low + high) / 2.0;
            let d_mid = self.derivative(mid);
            if d_mid == 0.0 {
                return Some(mid);
            }
            if d_mid.signum() == d_low.signum() {
                low = mid;
                d_low = d_mid;
            } else {
                high = mid;
            }
        }
        Some((low + high) / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_through_the_knots() {
        let xs = [0.0, 1.0, 2.5, 4.0];
        let ys = [1.0, 3.0, 0.5, 2.0];
        let spline = CubicSpline::new(&xs, &ys).unwrap();
        for (x, y) in xs.iter().zip(&ys) {
            assert!((spline.value(*x) - y).abs() < 1e-9);
        }
    }

    #[test]
    fn two_knots_interpolate_linearly() {
        let spline = CubicSpline::new(&[0.0, 2.0], &[0.0, 4.0]).unwrap();
        assert!((spline.value(1.0) - 2.0).abs() < 1e-12);
        assert!((spline.derivative(1.0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn derivative_root_finds_the_apex_of_a_parabola_sampling() {
        // Samples of 4 - (x - 3)^2: the spline apex must land near x = 3
        let xs: Vec<f64> = (0..7).map(f64::from).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 4.0 - (x - 3.0).powi(2)).collect();
        let spline = CubicSpline::new(&xs, &ys).unwrap();
        let root = spline.derivative_root(2.0, 4.0).unwrap();
        assert!((root - 3.0).abs() < 1e-6, "root was {root}");
        assert!(spline.derivative(2.0) > 0.0);
        assert!(spline.derivative(4.0) < 0.0);
    }

    #[test]
    fn rejects_unsorted_knots() {
        assert!(CubicSpline::new(&[0.0, 0.0, 1.0], &[1.0, 2.0, 3.0]).is_err());
        assert!(CubicSpline::new(&[0.0], &[1.0]).is_err());
    }
}
