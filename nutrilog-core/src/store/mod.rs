//! Contracts of the external collaborators the ledger talks to.
//!
//! - [`RemoteStore`]: durable owner of consumption records and their
//!   derived day/meal/history views.
//! - [`FoodCatalog`]: read-only food search.
//! - [`ChangeFeed`]: push channel announcing that a user's records changed.
//!
//! [`HttpStore`] implements all three against the nutrilog server;
//! [`MemoryStore`] implements them in-process.

mod error;
mod http;
mod memory;

use std::future::Future;

use chrono::NaiveDate;
use futures::stream::BoxStream;

use crate::models::{ChangeSignal, DaySummary, Food, ItemWrite, MealAggregate, Nutrients, StoredItem};

pub use error::{StoreError, StoreResult};
pub use http::HttpStore;
pub use memory::{MemoryStore, Operation};

/// Request/response access to the remote consumption store.
///
/// Every call is independent and may fail on its own.
pub trait RemoteStore: Send + Sync + 'static {
    /// Day-level totals, or `None` when nothing was recorded that day.
    fn fetch_day(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> impl Future<Output = StoreResult<Option<Nutrients>>> + Send;

    /// Per-meal totals for the day.
    fn fetch_meals(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> impl Future<Output = StoreResult<Vec<MealAggregate>>> + Send;

    /// Itemized consumption records for the day.
    fn fetch_items(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> impl Future<Output = StoreResult<Vec<StoredItem>>> + Send;

    /// Daily summaries for the `days` days ending at `end` (inclusive), oldest first.
    fn fetch_history(
        &self,
        user_id: &str,
        end: NaiveDate,
        days: u32,
    ) -> impl Future<Output = StoreResult<Vec<DaySummary>>> + Send;

    /// Creates a record and returns its store-assigned id.
    fn create_item(
        &self,
        user_id: &str,
        date: NaiveDate,
        item: &ItemWrite,
    ) -> impl Future<Output = StoreResult<String>> + Send;

    fn update_item(
        &self,
        item_id: &str,
        item: &ItemWrite,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    fn delete_item(&self, item_id: &str) -> impl Future<Output = StoreResult<()>> + Send;
}

/// Read-only food catalog search.
pub trait FoodCatalog: Send + Sync + 'static {
    /// Returns up to `limit` foods whose name matches `fragment`.
    fn search_foods(
        &self,
        fragment: &str,
        limit: usize,
    ) -> impl Future<Output = StoreResult<Vec<Food>>> + Send;
}

/// Push-style change notifications scoped to one user.
pub trait ChangeFeed: Send + Sync + 'static {
    /// Subscribes to the user's change channel. Dropping the stream unsubscribes.
    fn subscribe(
        &self,
        user_id: &str,
    ) -> impl Future<Output = StoreResult<BoxStream<'static, ChangeSignal>>> + Send;
}
