//! The final feature records and their construction from isotope patterns.

use serde::{Deserialize, Serialize};

use crate::helper_functions::weighted_mean;
use crate::isotopes::ISOTOPE_SPACING;
use crate::pattern::IsotopePattern;
use crate::system::{seconds, th, usize::Charge, MassOverCharge, Time};
use crate::trace::MassTrace;

/// A corner point of a convex hull in the retention time × m/z plane
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct HullPoint {
    /// The retention time coordinate
    pub rt: Time,
    /// The m/z coordinate
    pub mz: MassOverCharge,
}

/// One detected analyte at one charge in one elution event, carrying an
/// integrated abundance. Features own copies of everything they expose and
/// are immutable once emitted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Feature {
    monoisotopic_mz: MassOverCharge,
    charge: Charge,
    rt: Time,
    intensity: f64,
    quality: f64,
    convex_hull: Vec<HullPoint>,
    subordinate_hulls: Vec<Vec<HullPoint>>,
    traces: Vec<MassTrace>,
}

impl Feature {
    /// The monoisotopic m/z
    pub fn monoisotopic_mz(&self) -> MassOverCharge {
        self.monoisotopic_mz
    }

    /// The charge
    pub fn charge(&self) -> Charge {
        self.charge
    }

    /// The apex retention time, the intensity weighted mean of the member
    /// trace apexes
    pub fn rt(&self) -> Time {
        self.rt
    }

    /// The integrated intensity: the sum of the member trace intensities
    pub fn intensity(&self) -> f64 {
        self.intensity
    }

    /// The quality score in [0, 1]: envelope fit times envelope coverage
    /// times co-elution
    pub fn quality(&self) -> f64 {
        self.quality
    }

    /// The convex hull of all member centroids in the retention time × m/z
    /// plane, in counter clockwise order
    pub fn convex_hull(&self) -> &[HullPoint] {
        &self.convex_hull
    }

    /// One hull per member trace, in isotope position order
    pub fn subordinate_hulls(&self) -> &[Vec<HullPoint>] {
        &self.subordinate_hulls
    }

    /// The member traces, in isotope position order
    pub fn traces(&self) -> &[MassTrace] {
        &self.traces
    }

    /// Whether the given point lies inside (or on) the convex hull
    pub fn hull_contains(&self, rt: Time, mz: MassOverCharge) -> bool {
        contains(&self.convex_hull, (rt.value, mz.value))
    }
}

/// Turn accepted isotope patterns into feature records, ordered by decreasing
/// integrated intensity.
pub fn emit_features(patterns: Vec<IsotopePattern>) -> Vec<Feature> {
    let mut features: Vec<Feature> = patterns.into_iter().map(emit_one).collect();
    features.sort_unstable_by(|a, b| {
        b.intensity
            .total_cmp(&a.intensity)
            .then(a.monoisotopic_mz.value.total_cmp(&b.monoisotopic_mz.value))
    });
    log::debug!("emitted {} features", features.len());
    features
}

fn emit_one(pattern: IsotopePattern) -> Feature {
    let first_mz = pattern.traces[0].centroid_mz().value;
    let monoisotopic_mz = if pattern.mono_shift {
        th(first_mz - ISOTOPE_SPACING / pattern.charge as f64)
    } else {
        th(first_mz)
    };

    let rt = weighted_mean(
        pattern
            .traces
            .iter()
            .map(|trace| (trace.apex().rt.value, trace.apex().intensity)),
    )
    .unwrap_or_else(|| pattern.traces[0].apex().rt.value);

    let coverage = (pattern.traces.len() as f64 / pattern.predicted_len as f64).min(1.0);
    let quality = pattern.fit_score * coverage * pattern.coelution_score;

    let all_points: Vec<(f64, f64)> = pattern
        .traces
        .iter()
        .flat_map(|trace| trace.entries().iter().map(|e| (e.rt.value, e.mz.value)))
        .collect();
    let subordinate_hulls = pattern
        .traces
        .iter()
        .map(|trace| {
            hull_points(
                &trace
                    .entries()
                    .iter()
                    .map(|e| (e.rt.value, e.mz.value))
                    .collect::<Vec<_>>(),
            )
        })
        .collect();

    Feature {
        monoisotopic_mz,
        charge: Charge::new::<crate::system::usize::e>(pattern.charge),
        rt: seconds(rt),
        intensity: pattern.intensity_sum(),
        quality,
        convex_hull: hull_points(&all_points),
        subordinate_hulls,
        traces: pattern.traces,
    }
}

fn hull_points(points: &[(f64, f64)]) -> Vec<HullPoint> {
    convex_hull(points)
        .into_iter()
        .map(|(rt, mz)| HullPoint {
            rt: seconds(rt),
            mz: th(mz),
        })
        .collect()
}

/// Cross product of OA × OB, positive for a counter clockwise turn
fn cross(o: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

/// The planar convex hull by Andrew's monotone chain, in counter clockwise
/// order. Inputs with fewer than three distinct points return them as is.
fn convex_hull(points: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut sorted: Vec<(f64, f64)> = points.to_vec();
    sorted.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    sorted.dedup_by(|a, b| a.0.total_cmp(&b.0).is_eq() && a.1.total_cmp(&b.1).is_eq());
    if sorted.len() < 3 {
        return sorted;
    }

    let mut lower: Vec<(f64, f64)> = Vec::new();
    for &point in &sorted {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], point) <= 0.0 {
            lower.pop();
        }
        lower.push(point);
    }
    let mut upper: Vec<(f64, f64)> = Vec::new();
    for &point in sorted.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], point) <= 0.0 {
            upper.pop();
        }
        upper.push(point);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Point in convex polygon test, tolerant of points on the boundary
fn contains(hull: &[HullPoint], point: (f64, f64)) -> bool {
    const EPSILON: f64 = 1e-9;
    match hull.len() {
        0 => false,
        1 => {
            (hull[0].rt.value - point.0).abs() < EPSILON
                && (hull[0].mz.value - point.1).abs() < EPSILON
        }
        2 => {
            // Degenerate hull: the point must lie on the segment
            let a = (hull[0].rt.value, hull[0].mz.value);
            let b = (hull[1].rt.value, hull[1].mz.value);
            cross(a, b, point).abs() < EPSILON
                && point.0 >= a.0.min(b.0) - EPSILON
                && point.0 <= a.0.max(b.0) + EPSILON
                && point.1 >= a.1.min(b.1) - EPSILON
                && point.1 <= a.1.max(b.1) + EPSILON
        }
        _ => hull.iter().zip(hull.iter().cycle().skip(1)).all(|(a, b)| {
            cross(
                (a.rt.value, a.mz.value),
                (b.rt.value, b.mz.value),
                point,
            ) >= -EPSILON
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TraceEntry;

    fn elution_peak(mz: f64, height: f64, center: f64) -> MassTrace {
        MassTrace::new(
            (0..15)
                .map(|i| {
                    let rt = center - 7.0 + f64::from(i);
                    TraceEntry {
                        spectrum_index: i as usize,
                        rt: seconds(rt),
                        mz: th(mz),
                        intensity: height * (-(rt - center).powi(2) / 18.0).exp(),
                    }
                })
                .collect(),
        )
        .unwrap()
    }

    fn pattern(mono_shift: bool) -> IsotopePattern {
        IsotopePattern {
            charge: 2,
            traces: vec![
                elution_peak(750.3800, 5e5, 207.0),
                elution_peak(750.8812, 3e5, 207.0),
            ],
            fit_score: 0.95,
            coelution_score: 1.0,
            predicted_len: 4,
            mono_shift,
        }
    }

    #[test]
    fn feature_fields_follow_the_pattern() {
        let features = emit_features(vec![pattern(false)]);
        assert_eq!(features.len(), 1);
        let feature = &features[0];
        assert_eq!(feature.charge().value, 2);
        assert!((feature.monoisotopic_mz().value - 750.38).abs() < 1e-9);
        assert!((feature.rt().value - 207.0).abs() < 0.5);
        let expected: f64 = feature.traces().iter().map(MassTrace::intensity_sum).sum();
        assert!((feature.intensity() - expected).abs() < 1e-9);
        // fit 0.95 × coverage 0.5 × coelution 1.0
        assert!((feature.quality() - 0.475).abs() < 1e-12);
        assert_eq!(feature.subordinate_hulls().len(), 2);
    }

    #[test]
    fn mono_shift_moves_the_monoisotopic_position_left() {
        let features = emit_features(vec![pattern(true)]);
        let expected = 750.38 - ISOTOPE_SPACING / 2.0;
        assert!((features[0].monoisotopic_mz().value - expected).abs() < 1e-9);
    }

    #[test]
    fn hull_contains_every_contributing_centroid() {
        let features = emit_features(vec![pattern(false)]);
        let feature = &features[0];
        assert!(feature.convex_hull().len() >= 3);
        for trace in feature.traces() {
            for entry in trace.entries() {
                assert!(feature.hull_contains(entry.rt, entry.mz));
            }
        }
        // A far away point is outside
        assert!(!feature.hull_contains(seconds(500.0), th(900.0)));
    }

    #[test]
    fn features_sort_by_descending_intensity() {
        let small = IsotopePattern {
            traces: vec![elution_peak(400.0, 1e4, 100.0), elution_peak(400.5, 5e3, 100.0)],
            ..pattern(false)
        };
        let features = emit_features(vec![small, pattern(false)]);
        assert!(features[0].intensity() > features[1].intensity());
    }
}
