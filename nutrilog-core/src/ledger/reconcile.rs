//! Bulk refetch of a day from the remote store.
//!
//! The four reads run concurrently and fail independently. Whatever
//! succeeded replaces the local piece wholesale; a failed read leaves its
//! piece untouched and is reported, never raised.

use std::future::Future;
use std::time::Duration;

use chrono::NaiveDate;

use super::error::{LedgerError, Resource};
use super::state::LedgerState;
use crate::models::{DaySummary, MealAggregate, MealItem, Nutrients, StoredItem};
use crate::store::{RemoteStore, StoreError, StoreResult};

/// Raw outcome of the four reads.
#[derive(Debug)]
pub struct Fetched {
    pub day: StoreResult<Option<Nutrients>>,
    pub meals: StoreResult<Vec<MealAggregate>>,
    pub items: StoreResult<Vec<StoredItem>>,
    pub history: StoreResult<Vec<DaySummary>>,
}

/// What a reconciliation managed to apply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// One `PartialReadFailure` per read that failed.
    pub failures: Vec<LedgerError>,
}

impl ReconcileReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed(&self, resource: Resource) -> bool {
        self.failures.iter().any(|f| {
            matches!(f, LedgerError::PartialReadFailure { resource: r, .. } if *r == resource)
        })
    }
}

async fn within<T>(
    limit: Duration,
    request: impl Future<Output = StoreResult<T>>,
) -> StoreResult<T> {
    tokio::time::timeout(limit, request)
        .await
        .unwrap_or(Err(StoreError::Timeout))
}

/// Issues the day, meals, items and history reads in parallel.
pub async fn fetch_all<S: RemoteStore>(
    store: &S,
    user_id: &str,
    date: NaiveDate,
    history_days: u32,
    timeout: Duration,
) -> Fetched {
    let (day, meals, items, history) = tokio::join!(
        within(timeout, store.fetch_day(user_id, date)),
        within(timeout, store.fetch_meals(user_id, date)),
        within(timeout, store.fetch_items(user_id, date)),
        within(timeout, store.fetch_history(user_id, date, history_days)),
    );

    Fetched {
        day,
        meals,
        items,
        history,
    }
}

impl Fetched {
    /// Replaces every successfully read piece of `state`.
    pub(crate) fn apply(self, state: &mut LedgerState) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let day = accept(Resource::Day, self.day, &mut report).map(Option::unwrap_or_default);
        let meals = accept(Resource::Meals, self.meals, &mut report);
        let items = accept(Resource::Items, self.items, &mut report)
            .map(|items| items.into_iter().map(MealItem::from).collect());
        let history = accept(Resource::History, self.history, &mut report);

        state.replace_remote(day, meals, items, history);
        report
    }
}

fn accept<T>(resource: Resource, result: StoreResult<T>, report: &mut ReconcileReport) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(source) => {
            tracing::warn!("Reconciliation could not read {}: {}", resource, source);
            report
                .failures
                .push(LedgerError::PartialReadFailure { resource, source });
            None
        }
    }
}
