//! Incremental application of signed deltas to the aggregates.
//!
//! Addition is commutative and associative, so applying deltas in any
//! order yields the same aggregates as recomputing them from scratch.

use crate::models::{MealAggregate, MealType, Nutrients};

pub fn apply_day_delta(day: Nutrients, delta: Nutrients) -> Nutrients {
    day + delta
}

/// Adds `delta` to the aggregate tagged `meal_type`, creating it from `delta` if absent.
pub fn apply_meal_delta(meals: &mut Vec<MealAggregate>, meal_type: MealType, delta: Nutrients) {
    match meals.iter_mut().find(|m| m.meal_type == meal_type) {
        Some(meal) => meal.totals += delta,
        None => meals.push(MealAggregate::new(meal_type, delta)),
    }
}
