//! Per-user, per-day nutrition ledger with optimistic mutations.

mod accumulator;
mod delta;
mod engine;
mod error;
mod locks;
mod reconcile;
mod state;

pub use accumulator::{apply_day_delta, apply_meal_delta};
pub use delta::{compute_delta, mass_from_units, validate_quantity};
pub use engine::{FoodIntent, Ledger, LedgerOptions};
pub use error::{LedgerError, Resource};
pub use reconcile::{fetch_all, Fetched, ReconcileReport};
pub use state::LedgerState;
