//! Unit Policy
//!
//! Pure conversion constants and functions between weight and energy unit
//! systems. Stored weights are plain magnitudes; the active [`WeightUnit`]
//! is metadata that tells callers how to interpret them.

use serde::{Deserialize, Serialize};

/// Kilograms in one pound (exact by definition)
pub const KILOGRAMS_PER_POUND: f32 = 0.453_592_37;

/// Energy equivalent of one pound of body fat
pub const CALORIES_PER_POUND: f32 = 3500.0;

/// Energy equivalent of one kilogram of body fat
pub const CALORIES_PER_KILOGRAM: f32 = CALORIES_PER_POUND / KILOGRAMS_PER_POUND;

/// Kilojoules in one (food) calorie
pub const KILOJOULES_PER_CALORIE: f32 = 4.184;

/// Unit that stored weight magnitudes are expressed in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum WeightUnit {
    #[default]
    Pounds,
    Kilograms,
}

impl WeightUnit {
    /// Integer code persisted in the settings table
    pub fn code(self) -> i64 {
        match self {
            WeightUnit::Pounds => 1,
            WeightUnit::Kilograms => 2,
        }
    }

    /// Decode a persisted integer code
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(WeightUnit::Pounds),
            2 => Some(WeightUnit::Kilograms),
            _ => None,
        }
    }

    /// Short label used when formatting values
    pub fn abbreviation(self) -> &'static str {
        match self {
            WeightUnit::Pounds => "lb",
            WeightUnit::Kilograms => "kg",
        }
    }

    /// Convert a magnitude expressed in `self` into `target`
    pub fn convert(self, value: f32, target: WeightUnit) -> f32 {
        match (self, target) {
            (WeightUnit::Pounds, WeightUnit::Kilograms) => value * KILOGRAMS_PER_POUND,
            (WeightUnit::Kilograms, WeightUnit::Pounds) => value / KILOGRAMS_PER_POUND,
            _ => value,
        }
    }

    /// Calories represented by one unit of body weight
    pub fn calories_per_unit(self) -> f32 {
        match self {
            WeightUnit::Pounds => CALORIES_PER_POUND,
            WeightUnit::Kilograms => CALORIES_PER_KILOGRAM,
        }
    }

    /// Format a value with one decimal and the unit label
    pub fn format(self, value: f32) -> String {
        format!("{:.1} {}", value, self.abbreviation())
    }
}

impl std::fmt::Display for WeightUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WeightUnit::Pounds => write!(f, "pounds"),
            WeightUnit::Kilograms => write!(f, "kilograms"),
        }
    }
}

impl std::str::FromStr for WeightUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lb" | "lbs" | "pound" | "pounds" => Ok(WeightUnit::Pounds),
            "kg" | "kgs" | "kilogram" | "kilograms" => Ok(WeightUnit::Kilograms),
            other => Err(format!("Unknown weight unit: {}", other)),
        }
    }
}

/// Unit used to express energy equivalents of weight change
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnergyUnit {
    #[default]
    Calories,
    Kilojoules,
}

impl EnergyUnit {
    pub fn code(self) -> i64 {
        match self {
            EnergyUnit::Calories => 1,
            EnergyUnit::Kilojoules => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(EnergyUnit::Calories),
            2 => Some(EnergyUnit::Kilojoules),
            _ => None,
        }
    }

    pub fn abbreviation(self) -> &'static str {
        match self {
            EnergyUnit::Calories => "cal",
            EnergyUnit::Kilojoules => "kJ",
        }
    }

    /// Convert a calorie amount into this unit
    pub fn from_calories(self, calories: f32) -> f32 {
        match self {
            EnergyUnit::Calories => calories,
            EnergyUnit::Kilojoules => calories * KILOJOULES_PER_CALORIE,
        }
    }
}

/// Energy equivalent of a change in body weight
///
/// A negative `weight_delta` (weight lost) yields a negative amount, i.e. an
/// energy deficit.
pub fn energy_equivalent(weight_delta: f32, weight_unit: WeightUnit, energy_unit: EnergyUnit) -> f32 {
    energy_unit.from_calories(weight_delta * weight_unit.calories_per_unit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_conversion() {
        let kg = WeightUnit::Pounds.convert(100.0, WeightUnit::Kilograms);
        assert!((kg - 45.359237).abs() < 1e-4);

        let lb = WeightUnit::Kilograms.convert(kg, WeightUnit::Pounds);
        assert!((lb - 100.0).abs() < 1e-3);

        assert_eq!(WeightUnit::Pounds.convert(150.0, WeightUnit::Pounds), 150.0);
    }

    #[test]
    fn test_unit_codes() {
        for unit in [WeightUnit::Pounds, WeightUnit::Kilograms] {
            assert_eq!(WeightUnit::from_code(unit.code()), Some(unit));
        }
        assert_eq!(WeightUnit::from_code(7), None);
        assert_eq!(EnergyUnit::from_code(2), Some(EnergyUnit::Kilojoules));
    }

    #[test]
    fn test_energy_equivalent() {
        // one pound lost over a week is a 500 cal/day deficit
        let per_day = energy_equivalent(-1.0 / 7.0, WeightUnit::Pounds, EnergyUnit::Calories);
        assert!((per_day + 500.0).abs() < 0.01);

        let kj = energy_equivalent(1.0, WeightUnit::Pounds, EnergyUnit::Kilojoules);
        assert!((kj - 3500.0 * 4.184).abs() < 0.1);

        let per_kg = energy_equivalent(1.0, WeightUnit::Kilograms, EnergyUnit::Calories);
        assert!((per_kg - 7716.18).abs() < 0.1);
    }

    #[test]
    fn test_parse_and_format() {
        assert_eq!("kg".parse::<WeightUnit>(), Ok(WeightUnit::Kilograms));
        assert_eq!("Pounds".parse::<WeightUnit>(), Ok(WeightUnit::Pounds));
        assert!("stone".parse::<WeightUnit>().is_err());
        assert_eq!(WeightUnit::Kilograms.format(72.345), "72.3 kg");
    }
}
