mod aggregate;
mod food;
mod meal_item;
mod meal_type;
mod nutrients;

pub use aggregate::{DaySummary, MealAggregate};
pub use food::Food;
pub use meal_item::{ItemId, ItemWrite, MealItem, StoredItem};
pub use meal_type::MealType;
pub use nutrients::Nutrients;

/// Opaque "something of this user's may have changed" prompt from a change feed.
///
/// Carries nothing the ledger trusts; it only triggers reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeSignal;
