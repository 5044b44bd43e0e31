//! loadgrid-units — measurement units for resource targets.
//!
//! A closed set of units grouped into families: memory sizes, compute
//! capacity, transfer rates, and percentage. Conversion is a lossless
//! linear scaling between units of the same family; converting across
//! families is an error, never a silent coercion.

use thiserror::Error;

/// Errors from unit conversion.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("cannot convert {from:?} ({} family) to {to:?} ({} family)", from.family().name(), to.family().name())]
    IncompatibleFamilies { from: Unit, to: Unit },
}

pub type UnitResult<T> = Result<T, UnitError>;

/// The family a unit belongs to. Conversion requires identical families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitFamily {
    /// Dimensionless fraction in `[0, 1]`.
    Percentage,
    /// Memory sizes (binary magnitudes).
    Memory,
    /// CPU capacity in virtual CPUs.
    Compute,
    /// Transfer rates per second (binary magnitudes).
    Rate,
}

impl UnitFamily {
    fn name(self) -> &'static str {
        match self {
            UnitFamily::Percentage => "percentage",
            UnitFamily::Memory => "memory",
            UnitFamily::Compute => "compute",
            UnitFamily::Rate => "rate",
        }
    }
}

/// A measurement unit exchanged on the wire and used for targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Percentage,
    Bytes,
    Kilobytes,
    Megabytes,
    Gigabytes,
    Vcpu,
    BytesPerSecond,
    KilobytesPerSecond,
    MegabytesPerSecond,
}

const KIB: f64 = 1024.0;

impl Unit {
    /// The family this unit belongs to.
    pub fn family(self) -> UnitFamily {
        match self {
            Unit::Percentage => UnitFamily::Percentage,
            Unit::Bytes | Unit::Kilobytes | Unit::Megabytes | Unit::Gigabytes => {
                UnitFamily::Memory
            }
            Unit::Vcpu => UnitFamily::Compute,
            Unit::BytesPerSecond | Unit::KilobytesPerSecond | Unit::MegabytesPerSecond => {
                UnitFamily::Rate
            }
        }
    }

    /// Magnitude relative to the family's base unit.
    fn magnitude(self) -> f64 {
        match self {
            Unit::Percentage | Unit::Vcpu | Unit::Bytes | Unit::BytesPerSecond => 1.0,
            Unit::Kilobytes | Unit::KilobytesPerSecond => KIB,
            Unit::Megabytes | Unit::MegabytesPerSecond => KIB * KIB,
            Unit::Gigabytes => KIB * KIB * KIB,
        }
    }

    /// Whether a value in this unit can be expressed in `other`.
    pub fn can_convert_to(self, other: Unit) -> bool {
        self.family() == other.family()
    }

    /// Convert `value` expressed in this unit into `target`.
    pub fn convert(self, value: f64, target: Unit) -> UnitResult<f64> {
        if !self.can_convert_to(target) {
            return Err(UnitError::IncompatibleFamilies {
                from: self,
                to: target,
            });
        }
        Ok(value * self.magnitude() / target.magnitude())
    }

    /// All units this unit can convert to (its family, itself included).
    pub fn matching_units(self) -> Vec<Unit> {
        ALL_UNITS
            .iter()
            .copied()
            .filter(|u| self.can_convert_to(*u))
            .collect()
    }
}

const ALL_UNITS: [Unit; 9] = [
    Unit::Percentage,
    Unit::Bytes,
    Unit::Kilobytes,
    Unit::Megabytes,
    Unit::Gigabytes,
    Unit::Vcpu,
    Unit::BytesPerSecond,
    Unit::KilobytesPerSecond,
    Unit::MegabytesPerSecond,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_conversions_scale_by_1024() {
        assert_eq!(Unit::Kilobytes.convert(1.0, Unit::Bytes).unwrap(), 1024.0);
        assert_eq!(Unit::Megabytes.convert(2.0, Unit::Kilobytes).unwrap(), 2048.0);
        assert_eq!(
            Unit::Bytes.convert(3.0 * 1024.0 * 1024.0 * 1024.0, Unit::Gigabytes).unwrap(),
            3.0
        );
    }

    #[test]
    fn rate_conversions_scale_by_1024() {
        assert_eq!(
            Unit::MegabytesPerSecond.convert(1.0, Unit::BytesPerSecond).unwrap(),
            1024.0 * 1024.0
        );
        assert_eq!(
            Unit::BytesPerSecond.convert(512.0, Unit::KilobytesPerSecond).unwrap(),
            0.5
        );
    }

    #[test]
    fn identity_conversion_is_lossless() {
        for unit in ALL_UNITS {
            assert_eq!(unit.convert(17.25, unit).unwrap(), 17.25);
        }
    }

    #[test]
    fn round_trip_within_family() {
        let kb = Unit::Gigabytes.convert(1.5, Unit::Kilobytes).unwrap();
        let back = Unit::Kilobytes.convert(kb, Unit::Gigabytes).unwrap();
        assert!((back - 1.5).abs() < 1e-9);
    }

    #[test]
    fn cross_family_conversion_fails() {
        assert!(Unit::Bytes.convert(1.0, Unit::BytesPerSecond).is_err());
        assert!(Unit::Percentage.convert(0.5, Unit::Megabytes).is_err());
        assert!(Unit::Vcpu.convert(2.0, Unit::Percentage).is_err());
    }

    #[test]
    fn matching_units_cover_the_family() {
        let rates = Unit::KilobytesPerSecond.matching_units();
        assert_eq!(rates.len(), 3);
        assert!(rates.iter().all(|u| u.family() == UnitFamily::Rate));

        assert_eq!(Unit::Percentage.matching_units(), vec![Unit::Percentage]);
        assert_eq!(Unit::Vcpu.matching_units(), vec![Unit::Vcpu]);
    }
}
