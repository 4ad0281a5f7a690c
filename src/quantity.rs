//! Length quantities for wavelength setpoints and readings.
//!
//! The controller speaks plain numbers in nanometers. Callers hand in a
//! [`Quantity`] in whatever length unit they use; conversion happens at the
//! edge of each call.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length unit of a [`Quantity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthUnit {
    /// 1e-12 m
    Picometer,
    /// 1e-10 m
    Angstrom,
    /// 1e-9 m, the controller's native unit
    Nanometer,
    /// 1e-6 m
    Micrometer,
    /// SI base unit
    Meter,
}

impl LengthUnit {
    /// Size of one unit expressed in nanometers.
    pub fn nanometers_per_unit(self) -> f64 {
        match self {
            LengthUnit::Picometer => 1e-3,
            LengthUnit::Angstrom => 0.1,
            LengthUnit::Nanometer => 1.0,
            LengthUnit::Micrometer => 1e3,
            LengthUnit::Meter => 1e9,
        }
    }

    /// Conventional unit symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            LengthUnit::Picometer => "pm",
            LengthUnit::Angstrom => "Å",
            LengthUnit::Nanometer => "nm",
            LengthUnit::Micrometer => "µm",
            LengthUnit::Meter => "m",
        }
    }
}

impl FromStr for LengthUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pm" => Ok(LengthUnit::Picometer),
            "a" | "å" | "angstrom" => Ok(LengthUnit::Angstrom),
            "nm" => Ok(LengthUnit::Nanometer),
            "um" | "µm" | "μm" => Ok(LengthUnit::Micrometer),
            "m" => Ok(LengthUnit::Meter),
            other => Err(format!("unknown length unit '{}'", other)),
        }
    }
}

/// A value with a length unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    /// Magnitude in `unit`
    pub value: f64,
    /// Unit of `value`
    pub unit: LengthUnit,
}

impl Quantity {
    /// Build a quantity.
    pub fn new(value: f64, unit: LengthUnit) -> Self {
        Self { value, unit }
    }

    /// Shorthand for a nanometer quantity.
    pub fn nanometers(value: f64) -> Self {
        Self::new(value, LengthUnit::Nanometer)
    }

    /// The zero quantity, used when nothing is known yet.
    pub fn zero() -> Self {
        Self::nanometers(0.0)
    }

    /// Magnitude converted to nanometers.
    pub fn to_nanometers(self) -> f64 {
        self.value * self.unit.nanometers_per_unit()
    }

    /// Same length expressed in `unit`.
    pub fn to_unit(self, unit: LengthUnit) -> Self {
        Self::new(self.to_nanometers() / unit.nanometers_per_unit(), unit)
    }

    /// Absolute difference to `other`, in nanometers.
    pub fn distance_nm(self, other: Quantity) -> f64 {
        (self.to_nanometers() - other.to_nanometers()).abs()
    }
}

impl Default for Quantity {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit.symbol())
    }
}

/// Parses `"780"`, `"780nm"`, `"780 nm"`, `"0.78um"` or `"7.8e2nm"`. A bare number is nanometers.
/// Byte offset where the unit suffix begins. An `e`/`E` followed by a digit or
/// sign is an exponent, not a unit.
fn unit_start(s: &str) -> usize {
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == 'e' || c == 'E' {
            let exponent = matches!(chars.peek(), Some((_, n)) if n.is_ascii_digit() || *n == '+' || *n == '-');
            if exponent && i > 0 {
                continue;
            }
        }
        if c.is_alphabetic() || c == 'µ' || c == 'μ' || c == 'Å' {
            return i;
        }
    }
    s.len()
}

impl FromStr for Quantity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = unit_start(s);
        let (number, unit) = s.split_at(split);
        let value: f64 = number
            .trim()
            .parse()
            .map_err(|e| format!("invalid length '{}': {}", s, e))?;
        let unit = if unit.trim().is_empty() {
            LengthUnit::Nanometer
        } else {
            unit.parse()?
        };
        Ok(Quantity::new(value, unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_to_nanometers() {
        assert!((Quantity::new(0.78, LengthUnit::Micrometer).to_nanometers() - 780.0).abs() < 1e-9);
        assert!((Quantity::new(7800.0, LengthUnit::Angstrom).to_nanometers() - 780.0).abs() < 1e-9);
        assert!((Quantity::new(780e-9, LengthUnit::Meter).to_nanometers() - 780.0).abs() < 1e-9);
    }

    #[test]
    fn converts_between_units() {
        let q = Quantity::nanometers(1550.0).to_unit(LengthUnit::Micrometer);
        assert_eq!(q.unit, LengthUnit::Micrometer);
        assert!((q.value - 1.55).abs() < 1e-12);
    }

    #[test]
    fn parses_with_and_without_units() {
        let test_cases = vec![
            ("780", 780.0),
            ("780nm", 780.0),
            (" 780.02 nm ", 780.02),
            ("0.85um", 850.0),
            ("8500A", 850.0),
            ("7.8e2nm", 780.0),
            ("1E3", 1000.0),
            ("2.5e-1 um", 250.0),
        ];

        for (input, expected) in test_cases {
            let q: Quantity = input.parse().unwrap();
            assert!(
                (q.to_nanometers() - expected).abs() < 1e-9,
                "Failed to parse: {}",
                input
            );
        }
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!("780 furlongs".parse::<Quantity>().is_err());
        assert!("nm".parse::<Quantity>().is_err());
        assert!("780e".parse::<Quantity>().is_err());
    }

    #[test]
    fn displays_value_and_symbol() {
        assert_eq!(Quantity::nanometers(780.02).to_string(), "780.02 nm");
    }
}
