use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::meal_type::MealType;
use super::nutrients::Nutrients;

/// Summed nutrients of every item sharing one meal-type on one day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MealAggregate {
    pub meal_type: MealType,
    pub totals: Nutrients,
}

impl MealAggregate {
    pub fn new(meal_type: MealType, totals: Nutrients) -> Self {
        Self { meal_type, totals }
    }
}

impl fmt::Display for MealAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.meal_type, self.totals)
    }
}

/// One day's totals, as used by the history window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DaySummary {
    pub date: NaiveDate,
    pub totals: Nutrients,
}

impl DaySummary {
    /// Builds the `days`-long window ending at `end`, oldest first.
    ///
    /// Days without an entry in `totals` are reported as zero.
    pub fn window(
        end: NaiveDate,
        days: u32,
        totals: &BTreeMap<NaiveDate, Nutrients>,
    ) -> Vec<DaySummary> {
        (0..days)
            .rev()
            .filter_map(|offset| end.checked_sub_days(Days::new(u64::from(offset))))
            .map(|date| DaySummary {
                date,
                totals: totals.get(&date).copied().unwrap_or_default(),
            })
            .collect()
    }
}

impl fmt::Display for DaySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.date, self.totals)
    }
}
