use serde::{Deserialize, Serialize};
use std::fmt;

use super::nutrients::Nutrients;

/// A catalog food. Owned by the catalog; the ledger only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Food {
    pub id: String,
    pub name: String,
    /// Nutrient density per 100 mass units (grams).
    #[serde(default)]
    pub per_100: Nutrients,
    /// Grams per consumption unit (e.g. one egg). `None` means the unit is a gram.
    #[serde(default)]
    pub mass_per_unit: Option<f64>,
}

impl Food {
    pub fn new(id: impl Into<String>, name: impl Into<String>, per_100: Nutrients) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            per_100,
            mass_per_unit: None,
        }
    }

    pub fn with_mass_per_unit(mut self, grams: f64) -> Self {
        self.mass_per_unit = Some(grams);
        self
    }
}

impl fmt::Display for Food {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {} per 100 g", self.name, self.id, self.per_100)?;
        if let Some(unit) = self.mass_per_unit {
            write!(f, ", {} g per unit", unit)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_food_builder() {
        let egg = Food::new("egg", "Egg", Nutrients::new(143.0, 0.7, 12.6, 9.5))
            .with_mass_per_unit(50.0);
        assert_eq!(egg.mass_per_unit, Some(50.0));
        assert_eq!(egg.per_100.protein, 12.6);
    }

    #[test]
    fn test_food_partial_json() {
        let food: Food = serde_json::from_str(r#"{"id": "x", "name": "Water"}"#).unwrap();
        assert!(food.per_100.is_zero());
        assert!(food.mass_per_unit.is_none());
    }
}
