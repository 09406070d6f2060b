//! Tolerances for m/z and mass matching.

use std::{fmt::Display, str::FromStr};

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::system::{da, th, Mass, MassOverCharge};

/// A tolerance around a given unit for searching purposes
#[allow(non_camel_case_types)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum Tolerance<T> {
    /// A relative search tolerance in parts per million
    ppm(OrderedFloat<f64>),
    /// An absolute tolerance defined by a constant offset from the unit (bounds are unit - tolerance, unit + tolerance)
    Abs(T),
}

impl<T> Tolerance<T> {
    /// Create a new ppm value
    pub fn new_ppm(value: f64) -> Self {
        Self::ppm(value.into())
    }

    /// Create a new absolute value
    pub fn new_absolute(value: impl Into<T>) -> Self {
        Self::Abs(value.into())
    }
}

impl<T> Tolerance<T>
where
    T: std::ops::Mul<f64, Output = T> + std::ops::Sub<T, Output = T> + std::ops::Add<T, Output = T> + Copy,
{
    /// Find the bounds around a given value for this tolerance
    pub fn bounds(&self, value: impl Into<T>) -> (T, T) {
        let value = value.into();
        match self {
            Self::ppm(ppm) => (
                value * (1.0 - ppm.into_inner() / 1e6),
                value * (1.0 + ppm.into_inner() / 1e6),
            ),
            Self::Abs(tolerance) => (value - *tolerance, value + *tolerance),
        }
    }
}

impl<T: Display> Display for Tolerance<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Abs(value) => write!(f, "{value} abs"),
            Self::ppm(ppm) => write!(f, "{ppm} ppm"),
        }
    }
}

impl FromStr for Tolerance<MassOverCharge> {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (number, unit) = split_number(s)?;
        match unit {
            "ppm" => Ok(Self::ppm(number.into())),
            "mz" | "th" => Ok(Self::Abs(th(number))),
            _ => Err(()),
        }
    }
}

impl FromStr for Tolerance<Mass> {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (number, unit) = split_number(s)?;
        match unit {
            "ppm" => Ok(Self::ppm(number.into())),
            "da" => Ok(Self::Abs(da(number))),
            _ => Err(()),
        }
    }
}

/// Split a string like `20 ppm` or `0.02 da` into the number and the unit tail
fn split_number(s: &str) -> Result<(f64, &str), ()> {
    let length = s
        .bytes()
        .take_while(|c| {
            c.is_ascii_digit() || matches!(*c, b'.' | b'-' | b'+' | b'e' | b'E')
        })
        .count();
    let number = s[..length].parse::<f64>().map_err(|_| ())?;
    Ok((number, s[length..].trim()))
}

impl<T> TryFrom<&str> for Tolerance<T>
where
    Tolerance<T>: FromStr,
{
    type Error = <Tolerance<T> as FromStr>::Err;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Check if two values are within the specified tolerance from each other.
pub trait WithinTolerance<A, B> {
    /// Check if two values are within the specified tolerance from each other.
    fn within(&self, a: &A, b: &B) -> bool;
}

impl WithinTolerance<MassOverCharge, MassOverCharge> for Tolerance<MassOverCharge> {
    fn within(&self, a: &MassOverCharge, b: &MassOverCharge) -> bool {
        match self {
            Self::Abs(tolerance) => (a.value - b.value).abs() <= tolerance.value,
            Self::ppm(ppm) => a.ppm(*b).value * 1e6 <= ppm.into_inner(),
        }
    }
}

impl WithinTolerance<Mass, Mass> for Tolerance<Mass> {
    fn within(&self, a: &Mass, b: &Mass) -> bool {
        match self {
            Self::Abs(tolerance) => (a.value - b.value).abs() <= tolerance.value,
            Self::ppm(ppm) => a.ppm(*b).value * 1e6 <= ppm.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ppm_bounds() {
        let tolerance: Tolerance<MassOverCharge> = Tolerance::new_ppm(10.0);
        let (low, high) = tolerance.bounds(th(500.0));
        assert!((low.value - 499.995).abs() < 1e-9);
        assert!((high.value - 500.005).abs() < 1e-9);
        assert!(tolerance.within(&th(500.0), &th(500.004)));
        assert!(!tolerance.within(&th(500.0), &th(500.006)));
    }

    #[test]
    fn parses_both_units() {
        let ppm: Tolerance<MassOverCharge> = "20 ppm".parse().unwrap();
        assert_eq!(ppm, Tolerance::new_ppm(20.0));
        let abs: Tolerance<Mass> = "0.02 da".parse().unwrap();
        assert!(abs.within(&da(100.0), &da(100.015)));
        assert!("20 lightyears".parse::<Tolerance<Mass>>().is_err());
    }
}
