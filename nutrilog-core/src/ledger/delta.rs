//! Conversion of (food, quantity) into nutrient deltas.

use super::error::LedgerError;
use crate::models::{Food, Nutrients};

/// Nutrients contributed by `mass` grams of `food`.
pub fn compute_delta(food: &Food, mass: f64) -> Nutrients {
    food.per_100.scale(mass / 100.0)
}

/// Grams for `units` consumption units. A missing or sub-gram unit mass counts as 1 g.
pub fn mass_from_units(units: f64, mass_per_unit: Option<f64>) -> f64 {
    units * mass_per_unit.unwrap_or(1.0).max(1.0)
}

/// Accepts only finite quantities greater than zero.
pub fn validate_quantity(quantity: f64) -> Result<f64, LedgerError> {
    if quantity.is_finite() && quantity > 0.0 {
        Ok(quantity)
    } else {
        Err(LedgerError::InvalidQuantity(quantity))
    }
}
