//! Nutrilog Core Library
//!
//! Optimistic nutrition ledger, store contracts and change-feed listener
//! shared by the nutrilog client and server.

pub mod feed;
pub mod ledger;
pub mod models;
pub mod store;

pub use feed::{ChangeFeedListener, FeedHandle, ListenerOptions};
pub use ledger::{FoodIntent, Ledger, LedgerError, LedgerOptions, LedgerState, ReconcileReport};
pub use models::{
    ChangeSignal, DaySummary, Food, ItemId, ItemWrite, MealAggregate, MealItem, MealType,
    Nutrients, StoredItem,
};
pub use store::{
    ChangeFeed, FoodCatalog, HttpStore, MemoryStore, RemoteStore, StoreError, StoreResult,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
