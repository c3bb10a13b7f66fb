use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// A nutrient vector: energy in kcal, macros in grams.
///
/// The same shape serves as a per-100-unit density on a [`Food`](super::Food),
/// as a signed delta produced by one ledger operation, and as an aggregate
/// total. Missing fields deserialize as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Nutrients {
    pub energy: f64,
    pub carbohydrate: f64,
    pub protein: f64,
    pub fat: f64,
}

impl Nutrients {
    pub const ZERO: Nutrients = Nutrients {
        energy: 0.0,
        carbohydrate: 0.0,
        protein: 0.0,
        fat: 0.0,
    };

    pub fn new(energy: f64, carbohydrate: f64, protein: f64, fat: f64) -> Self {
        Self {
            energy,
            carbohydrate,
            protein,
            fat,
        }
    }

    /// Multiplies every component by `factor`.
    pub fn scale(self, factor: f64) -> Self {
        Self {
            energy: self.energy * factor,
            carbohydrate: self.carbohydrate * factor,
            protein: self.protein * factor,
            fat: self.fat * factor,
        }
    }

    /// Componentwise comparison within an absolute tolerance.
    pub fn approx_eq(&self, other: &Nutrients, tolerance: f64) -> bool {
        (self.energy - other.energy).abs() <= tolerance
            && (self.carbohydrate - other.carbohydrate).abs() <= tolerance
            && (self.protein - other.protein).abs() <= tolerance
            && (self.fat - other.fat).abs() <= tolerance
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl Add for Nutrients {
    type Output = Nutrients;

    fn add(self, rhs: Nutrients) -> Nutrients {
        Nutrients {
            energy: self.energy + rhs.energy,
            carbohydrate: self.carbohydrate + rhs.carbohydrate,
            protein: self.protein + rhs.protein,
            fat: self.fat + rhs.fat,
        }
    }
}

impl AddAssign for Nutrients {
    fn add_assign(&mut self, rhs: Nutrients) {
        *self = *self + rhs;
    }
}

impl Sub for Nutrients {
    type Output = Nutrients;

    fn sub(self, rhs: Nutrients) -> Nutrients {
        self + (-rhs)
    }
}

impl SubAssign for Nutrients {
    fn sub_assign(&mut self, rhs: Nutrients) {
        *self = *self - rhs;
    }
}

impl Neg for Nutrients {
    type Output = Nutrients;

    fn neg(self) -> Nutrients {
        self.scale(-1.0)
    }
}

impl std::iter::Sum for Nutrients {
    fn sum<I: Iterator<Item = Nutrients>>(iter: I) -> Nutrients {
        iter.fold(Nutrients::ZERO, |acc, n| acc + n)
    }
}

impl fmt::Display for Nutrients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.0} kcal (carbs {:.1} g, protein {:.1} g, fat {:.1} g)",
            self.energy, self.carbohydrate, self.protein, self.fat
        )
    }
}
