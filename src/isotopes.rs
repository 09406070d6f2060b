//! Averagine isotope envelopes.
//!
//! The assembler needs the theoretical relative intensities of the
//! isotopologues of an unknown analyte of a given mass. Following the
//! averagine approach the analyte is modelled as a polymer of an average
//! building block; the envelope is then the convolution of the binomial
//! distributions of every heavy isotope over the rounded element counts.
//! The building block composition is a parameter, so a metabolite leaning
//! table can be substituted for the default peptide table.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use ndarray::{arr1, concatenate, s, Array1, Axis};
use probability::distribution::{Binomial, Discrete};
use serde::{Deserialize, Serialize};

use crate::error::FeatureFindingError;
use crate::helper_functions::f64_bits;
use crate::system::{da, Mass};

/// The mass difference between consecutive isotopologue peaks, in Da
pub const ISOTOPE_SPACING: f64 = 1.00235;

/// The mass of a proton, in Da
pub const PROTON_MASS: f64 = 1.007_276_466_879;

/// Binomial tail probabilities below this are cut before convolution
const TAIL_THRESHOLD: f64 = 1e-6;

/// Envelope positions below this fraction of the strongest position are
/// trimmed from the end
const RELATIVE_CUTOFF: f64 = 1e-3;

/// A hard cap on the envelope length
const MAX_POSITIONS: usize = 32;

/// The heavy isotopes per modelled element: (mass offset, natural abundance)
const CARBON_HEAVY: &[(usize, f64)] = &[(1, 0.0107)];
const HYDROGEN_HEAVY: &[(usize, f64)] = &[(1, 0.000_115)];
const NITROGEN_HEAVY: &[(usize, f64)] = &[(1, 0.003_64)];
const OXYGEN_HEAVY: &[(usize, f64)] = &[(1, 0.000_38), (2, 0.002_05)];
const SULFUR_HEAVY: &[(usize, f64)] = &[(1, 0.007_5), (2, 0.042_5), (4, 0.000_1)];

/// An average building block composition used to predict isotope envelopes
/// for analytes of which only the mass is known.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AveragineTable {
    /// Carbon atoms per building block
    pub carbon: f64,
    /// Hydrogen atoms per building block
    pub hydrogen: f64,
    /// Nitrogen atoms per building block
    pub nitrogen: f64,
    /// Oxygen atoms per building block
    pub oxygen: f64,
    /// Sulfur atoms per building block
    pub sulfur: f64,
    /// The mass of one building block in Da
    pub mass_per_unit: f64,
}

impl AveragineTable {
    /// The classic peptide averagine composition
    pub const PEPTIDE: Self = Self {
        carbon: 4.9384,
        hydrogen: 7.7583,
        nitrogen: 1.3577,
        oxygen: 1.4773,
        sulfur: 0.0417,
        mass_per_unit: 111.1254,
    };

    /// The rounded element counts for an analyte of the given mass
    fn element_counts(&self, mass: Mass) -> [(usize, &'static [(usize, f64)]); 5] {
        let units = (mass.value / self.mass_per_unit).max(0.0);
        [
            ((self.carbon * units).round() as usize, CARBON_HEAVY),
            ((self.hydrogen * units).round() as usize, HYDROGEN_HEAVY),
            ((self.nitrogen * units).round() as usize, NITROGEN_HEAVY),
            ((self.oxygen * units).round() as usize, OXYGEN_HEAVY),
            ((self.sulfur * units).round() as usize, SULFUR_HEAVY),
        ]
    }

    /// The isotope envelope for an analyte of the given neutral mass: a
    /// vector of relative intensities, one per Dalton offset from the
    /// monoisotopic position, normalised to unit sum and trimmed where the
    /// tail drops below a thousandth of the strongest position.
    ///
    /// # Errors
    /// [`FeatureFindingError::NumericalFailure`] when the convolution
    /// produces a non finite value.
    pub fn envelope(&self, mass: Mass) -> Result<Vec<f64>, FeatureFindingError> {
        let mut result = arr1(&[1.0]);
        for (amount, heavy) in self.element_counts(mass) {
            if amount == 0 {
                continue;
            }
            for (offset, abundance) in heavy {
                let binomial = Binomial::new(amount, *abundance);

                // Cut the vanishing tail from the end of the distribution
                let tail = (0..=amount)
                    .rev()
                    .map(|k| binomial.mass(k))
                    .take_while(|p| *p < TAIL_THRESHOLD)
                    .count();

                // Interweave with the mass offset to land every probability
                // on its Dalton position
                let mut distribution: Array1<f64> = (0..=amount - tail)
                    .map(|k| binomial.mass(k))
                    .flat_map(|p| std::iter::once(p).chain(std::iter::repeat(0.0)).take(*offset))
                    .collect();

                // Make the lengths equal
                match result.len().cmp(&distribution.len()) {
                    std::cmp::Ordering::Less => {
                        result
                            .append(Axis(0), Array1::zeros(distribution.len() - result.len()).view())
                            .map_err(|e| FeatureFindingError::numerical("averagine", e))?;
                    }
                    std::cmp::Ordering::Greater => {
                        distribution
                            .append(Axis(0), Array1::zeros(result.len() - distribution.len()).view())
                            .map_err(|e| FeatureFindingError::numerical("averagine", e))?;
                    }
                    std::cmp::Ordering::Equal => (),
                }

                // Convolve with the distribution accumulated so far
                let mut combined = Array1::zeros(result.len());
                for (i, p) in distribution.into_iter().enumerate() {
                    combined += &(concatenate(
                        Axis(0),
                        &[Array1::zeros(i).view(), result.slice(s![0..result.len() - i])],
                    )
                    .map_err(|e| FeatureFindingError::numerical("averagine", e))?
                        * p);
                }

                result = combined;
            }
        }

        let mut envelope: Vec<f64> = result.into_iter().take(MAX_POSITIONS).collect();
        let max = envelope.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() || max <= 0.0 {
            return Err(FeatureFindingError::numerical(
                "averagine",
                "the envelope has no finite maximum",
            ));
        }
        if let Some(last) = envelope.iter().rposition(|p| *p >= RELATIVE_CUTOFF * max) {
            envelope.truncate(last + 1);
        }
        let total: f64 = envelope.iter().sum();
        for position in &mut envelope {
            *position /= total;
        }
        Ok(envelope)
    }

    /// A stable key identifying this composition in the envelope cache
    fn fingerprint(&self) -> u64 {
        f64_bits(self.carbon)
            ^ f64_bits(self.hydrogen).rotate_left(8)
            ^ f64_bits(self.nitrogen).rotate_left(16)
            ^ f64_bits(self.oxygen).rotate_left(24)
            ^ f64_bits(self.sulfur).rotate_left(32)
            ^ f64_bits(self.mass_per_unit).rotate_left(40)
    }
}

impl Default for AveragineTable {
    fn default() -> Self {
        Self::PEPTIDE
    }
}

/// The width of the mass bins sharing one cached envelope
const MASS_BIN_WIDTH: f64 = 64.0;

/// Envelopes per (mass bin, table) pair, built once per process and never
/// mutated afterwards
static ENVELOPE_CACHE: OnceLock<RwLock<HashMap<(u64, u64), Arc<Vec<f64>>>>> = OnceLock::new();

/// The isotope envelope for the given mass, served from a process wide cache
/// keyed by the mass binned to 64 Da and the table composition.
///
/// # Errors
/// Passes through the errors of [`AveragineTable::envelope`].
pub fn cached_envelope(
    table: &AveragineTable,
    mass: Mass,
) -> Result<Arc<Vec<f64>>, FeatureFindingError> {
    let bin = (mass.value / MASS_BIN_WIDTH).round().max(0.0) as u64;
    let key = (bin, table.fingerprint());
    let cache = ENVELOPE_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    if let Some(hit) = cache
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key)
    {
        return Ok(Arc::clone(hit));
    }

    let envelope = Arc::new(table.envelope(da(bin as f64 * MASS_BIN_WIDTH))?);
    let mut map = cache.write().unwrap_or_else(PoisonError::into_inner);
    Ok(Arc::clone(map.entry(key).or_insert(envelope)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peptide_envelope_around_one_kilodalton() {
        let envelope = AveragineTable::PEPTIDE.envelope(da(1000.0)).unwrap();
        assert!(envelope.len() >= 3);
        let total: f64 = envelope.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        // The monoisotopic position dominates at this mass
        assert!(envelope[0] > envelope[1]);
        let ratio = envelope[1] / envelope[0];
        assert!((0.4..0.7).contains(&ratio), "ratio was {ratio}");
    }

    #[test]
    fn heavier_analytes_shift_intensity_into_the_envelope() {
        let light = AveragineTable::PEPTIDE.envelope(da(500.0)).unwrap();
        let heavy = AveragineTable::PEPTIDE.envelope(da(2500.0)).unwrap();
        assert!(heavy[1] / heavy[0] > light[1] / light[0]);
        assert!(heavy.len() > light.len());
    }

    #[test]
    fn tiny_mass_collapses_to_the_monoisotopic_peak() {
        let envelope = AveragineTable::PEPTIDE.envelope(da(10.0)).unwrap();
        assert!(envelope[0] > 0.98);
    }

    #[test]
    fn cache_shares_envelopes_within_a_bin() {
        let a = cached_envelope(&AveragineTable::PEPTIDE, da(1000.0)).unwrap();
        let b = cached_envelope(&AveragineTable::PEPTIDE, da(1001.0)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let c = cached_envelope(&AveragineTable::PEPTIDE, da(2000.0)).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
