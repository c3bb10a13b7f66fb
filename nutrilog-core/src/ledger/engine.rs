//! Optimistic driver over [`LedgerState`].
//!
//! Every mutation follows the same shape: validate, lock the item, apply the
//! optimistic effect in one atomic step, send the write, then either confirm
//! (and schedule a settle-delay reconciliation) or roll back.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinSet;
use uuid::Uuid;

use super::delta::{compute_delta, mass_from_units, validate_quantity};
use super::error::LedgerError;
use super::locks::{ItemGuard, ItemLocks};
use super::reconcile::{fetch_all, ReconcileReport};
use super::state::LedgerState;
use crate::models::{Food, ItemId, ItemWrite, MealItem, MealType};
use crate::store::{RemoteStore, StoreError, StoreResult};

/// Tunables of a [`Ledger`].
#[derive(Debug, Clone)]
pub struct LedgerOptions {
    /// Wait after a confirmed write before reconciling; the store's derived views may lag.
    pub settle_delay: Duration,
    /// Upper bound on any single remote request.
    pub request_timeout: Duration,
    /// Length of the history window, in days, ending at the ledger's date.
    pub history_days: u32,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(10),
            history_days: 7,
        }
    }
}

/// What the caller wants recorded: `quantity` consumption units of `food`.
#[derive(Debug, Clone)]
pub struct FoodIntent {
    pub meal_type: MealType,
    pub food: Food,
    pub quantity: f64,
}

impl FoodIntent {
    pub fn new(meal_type: MealType, food: Food, quantity: f64) -> Self {
        Self {
            meal_type,
            food,
            quantity,
        }
    }

    /// Builds the optimistic item this intent produces under `id`.
    fn to_item(&self, id: ItemId) -> Result<MealItem, LedgerError> {
        let quantity = validate_quantity(self.quantity)?;
        let mass = mass_from_units(quantity, self.food.mass_per_unit);
        let applied = compute_delta(&self.food, mass);
        Ok(MealItem {
            id,
            meal_type: self.meal_type,
            food_id: self.food.id.clone(),
            food_name: self.food.name.clone(),
            mass_per_unit: self.food.mass_per_unit,
            mass,
            energy: applied.energy,
            applied,
            optimistic: true,
        })
    }
}

struct Inner<S> {
    store: Arc<S>,
    options: LedgerOptions,
    state: watch::Sender<LedgerState>,
    locks: ItemLocks,
    reconciling: AsyncMutex<()>,
    scheduled: Mutex<JoinSet<()>>,
}

/// The nutrition ledger of one user for one day.
///
/// Cheap to clone; clones share the same state. Construct one per
/// `(user, date)` and [`close`](Ledger::close) it when the session ends.
pub struct Ledger<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for Ledger<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: RemoteStore> Ledger<S> {
    pub fn new(
        store: Arc<S>,
        user_id: impl Into<String>,
        date: NaiveDate,
        options: LedgerOptions,
    ) -> Self {
        let (state, _) = watch::channel(LedgerState::new(user_id, date));
        Self {
            inner: Arc::new(Inner {
                store,
                options,
                state,
                locks: ItemLocks::default(),
                reconciling: AsyncMutex::new(()),
                scheduled: Mutex::new(JoinSet::new()),
            }),
        }
    }

    /// Creates a ledger and runs the initial reconciliation.
    pub async fn open(
        store: Arc<S>,
        user_id: impl Into<String>,
        date: NaiveDate,
        options: LedgerOptions,
    ) -> (Self, ReconcileReport) {
        let ledger = Self::new(store, user_id, date, options);
        let report = ledger.refresh().await;
        (ledger, report)
    }

    pub fn user_id(&self) -> String {
        self.inner.state.borrow().user_id().to_string()
    }

    pub fn date(&self) -> NaiveDate {
        self.inner.state.borrow().date()
    }

    /// Receiver notified after every state change.
    pub fn subscribe(&self) -> watch::Receiver<LedgerState> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> LedgerState {
        self.inner.state.borrow().clone()
    }

    /// Records a new consumption. Returns the store-assigned id.
    pub async fn add_food(&self, intent: FoodIntent) -> Result<ItemId, LedgerError> {
        let pending = Uuid::new_v4();
        let id = ItemId::Pending(pending);
        let item = intent.to_item(id.clone())?;
        let write = ItemWrite::from(&item);

        let _guard = self.inner.locks.lock(&id).await;
        let checkpoint = self.modify(|state| {
            state.checkpointed(|s| {
                s.insert_item(item.clone());
                Ok(())
            })
        })?;

        let (user_id, date) = (self.user_id(), self.date());
        match self
            .send(self.inner.store.create_item(&user_id, date, &write))
            .await
        {
            Ok(stored) => {
                let held = self.modify(|state| state.confirm_item(pending, stored.clone()));
                if !held {
                    tracing::debug!("Item {} confirmed after being reconciled away", stored);
                }
                tracing::debug!("Added {} as item {}", write.food_name, stored);
                self.schedule_refresh();
                Ok(ItemId::Stored(stored))
            }
            Err(e) => {
                tracing::warn!("Rolling back add of {}: {}", write.food_name, e);
                self.modify(|state| {
                    state.roll_back(checkpoint.0, |s| {
                        if s.find(&id) == Some(&item) {
                            let _ = s.remove_item(&id);
                        }
                    })
                });
                Err(LedgerError::AddFailed(e))
            }
        }
    }

    /// Replaces an item's meal-type, food and quantity.
    pub async fn update_food(&self, id: &ItemId, intent: FoodIntent) -> Result<(), LedgerError> {
        // Reject bad input before waiting on anything.
        validate_quantity(intent.quantity)?;

        let (id, _guard) = self.lock_item(id).await;
        let stored = self.stored_target(&id)?;
        let updated = intent.to_item(id.clone())?;
        let write = ItemWrite::from(&updated);

        let (checkpoint, previous) =
            self.modify(|state| state.checkpointed(|s| s.replace_item(&id, updated.clone())))?;

        match self.send(self.inner.store.update_item(&stored, &write)).await {
            Ok(()) => {
                self.modify(|state| state.settle_item(&updated));
                tracing::debug!("Updated item {}", id);
                self.schedule_refresh();
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Rolling back update of item {}: {}", id, e);
                self.modify(|state| {
                    state.roll_back(checkpoint, |s| {
                        if s.find(&id) == Some(&updated) {
                            let _ = s.replace_item(&id, previous);
                        }
                    })
                });
                Err(LedgerError::UpdateFailed(e))
            }
        }
    }

    /// Removes an item.
    pub async fn delete_food(&self, id: &ItemId) -> Result<(), LedgerError> {
        let (id, _guard) = self.lock_item(id).await;
        let stored = self.stored_target(&id)?;

        let (checkpoint, (position, removed)) =
            self.modify(|state| state.checkpointed(|s| s.remove_item(&id)))?;

        match self.send(self.inner.store.delete_item(&stored)).await {
            Ok(()) => {
                tracing::debug!("Deleted item {}", id);
                self.schedule_refresh();
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Rolling back delete of item {}: {}", id, e);
                self.modify(|state| {
                    state.roll_back(checkpoint, |s| {
                        if s.find(&id).is_none() {
                            s.insert_item_at(position, removed);
                        }
                    })
                });
                Err(LedgerError::DeleteFailed(e))
            }
        }
    }

    /// Replaces the local day with the store's. Read failures are reported, not raised.
    pub async fn refresh(&self) -> ReconcileReport {
        let _serial = self.inner.reconciling.lock().await;
        self.modify(LedgerState::begin_reconcile);

        let (user_id, date) = (self.user_id(), self.date());
        let fetched = fetch_all(
            self.inner.store.as_ref(),
            &user_id,
            date,
            self.inner.options.history_days,
            self.inner.options.request_timeout,
        )
        .await;

        let report = self.modify(|state| fetched.apply(state));
        tracing::debug!(
            "Reconciled {} on {} ({} read failures)",
            user_id,
            date,
            report.failures.len()
        );
        report
    }

    /// Waits for every scheduled reconciliation to finish.
    pub async fn settle(&self) {
        let mut pending = {
            let mut scheduled = self.scheduled();
            std::mem::take(&mut *scheduled)
        };
        while pending.join_next().await.is_some() {}
    }

    /// Cancels scheduled reconciliations. The ledger stays readable.
    pub fn close(&self) {
        self.scheduled().abort_all();
    }

    fn scheduled(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        self.inner
            .scheduled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn schedule_refresh(&self) {
        let ledger = self.clone();
        let delay = self.inner.options.settle_delay;

        let mut scheduled = self.scheduled();
        while scheduled.try_join_next().is_some() {}
        scheduled.spawn(async move {
            tokio::time::sleep(delay).await;
            ledger.refresh().await;
        });
    }

    /// Applies `f` as one atomic, observable step.
    fn modify<T>(&self, f: impl FnOnce(&mut LedgerState) -> T) -> T {
        let mut output = None;
        self.inner.state.send_modify(|state| output = Some(f(state)));
        // send_modify always runs the closure.
        output.unwrap_or_else(|| unreachable!())
    }

    async fn send<T>(&self, request: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        tokio::time::timeout(self.inner.options.request_timeout, request)
            .await
            .unwrap_or(Err(StoreError::Timeout))
    }

    /// Store id of a locally held item; a pending item left behind by an
    /// abandoned add has none yet.
    fn stored_target(&self, id: &ItemId) -> Result<String, LedgerError> {
        if self.inner.state.borrow().find(id).is_none() {
            return Err(LedgerError::ItemNotFound(id.clone()));
        }
        id.stored()
            .map(str::to_string)
            .ok_or_else(|| LedgerError::NotYetStored(id.clone()))
    }

    /// Locks `id`, following it to its stored id if an add confirmed it meanwhile.
    async fn lock_item(&self, id: &ItemId) -> (ItemId, ItemGuard) {
        let mut target = self.inner.state.borrow().resolve(id);
        loop {
            let guard = self.inner.locks.lock(&target).await;
            let resolved = self.inner.state.borrow().resolve(&target);
            if resolved == target {
                return (target, guard);
            }
            target = resolved;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Nutrients, StoredItem};
    use crate::store::{MemoryStore, Operation};
    use std::collections::BTreeMap;

    const TOLERANCE: f64 = 1e-9;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn porridge() -> Food {
        Food::new("porridge", "Porridge", Nutrients::new(150.0, 27.0, 5.0, 3.0))
            .with_mass_per_unit(50.0)
    }

    fn banana() -> Food {
        Food::new("banana", "Banana", Nutrients::new(89.0, 23.0, 1.1, 0.3))
            .with_mass_per_unit(120.0)
    }

    fn options() -> LedgerOptions {
        LedgerOptions {
            settle_delay: Duration::from_millis(100),
            request_timeout: Duration::from_secs(5),
            history_days: 7,
        }
    }

    async fn ledger() -> (Ledger<MemoryStore>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let (ledger, report) = Ledger::open(Arc::clone(&store), "u1", date(), options()).await;
        assert!(report.is_complete());
        (ledger, store)
    }

    fn meal_energy(state: &LedgerState) -> BTreeMap<MealType, f64> {
        state
            .meals()
            .iter()
            .map(|m| (m.meal_type, m.totals.energy))
            .collect()
    }

    async fn remote_items(store: &MemoryStore) -> Vec<StoredItem> {
        store.fetch_items("u1", date()).await.unwrap()
    }

    #[tokio::test]
    async fn test_open_clears_loading() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(Arc::clone(&store), "u1", date(), options());
        assert!(ledger.snapshot().is_loading());

        ledger.refresh().await;
        let state = ledger.snapshot();
        assert!(!state.is_loading());
        assert!(!state.is_recalculating());
        assert_eq!(state.history().len(), 7);
    }

    #[tokio::test]
    async fn test_add_on_empty_ledger() {
        let (ledger, store) = ledger().await;

        let id = ledger
            .add_food(FoodIntent::new(MealType::Breakfast, porridge(), 2.0))
            .await
            .unwrap();

        let state = ledger.snapshot();
        assert_eq!(state.day().energy, 150.0);
        assert_eq!(state.meals().len(), 1);
        assert_eq!(
            state.meal(MealType::Breakfast).unwrap().totals.energy,
            150.0
        );
        assert_eq!(state.items().len(), 1);
        assert_eq!(state.items()[0].mass, 100.0);
        assert_eq!(state.items()[0].id, id);
        assert!(!state.items()[0].optimistic);
        assert!(state.is_consistent(TOLERANCE));
        assert_eq!(remote_items(&store).await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_quantity() {
        let (ledger, _store) = ledger().await;
        let id = ledger
            .add_food(FoodIntent::new(MealType::Breakfast, porridge(), 2.0))
            .await
            .unwrap();

        ledger
            .update_food(&id, FoodIntent::new(MealType::Breakfast, porridge(), 4.0))
            .await
            .unwrap();

        let state = ledger.snapshot();
        assert_eq!(state.day().energy, 300.0);
        assert_eq!(state.find(&id).unwrap().mass, 200.0);
        assert!(state.is_consistent(TOLERANCE));
    }

    #[tokio::test]
    async fn test_update_meal_type_moves_totals() {
        let (ledger, _store) = ledger().await;
        let id = ledger
            .add_food(FoodIntent::new(MealType::Breakfast, porridge(), 2.0))
            .await
            .unwrap();

        ledger
            .update_food(&id, FoodIntent::new(MealType::Lunch, porridge(), 2.0))
            .await
            .unwrap();

        let state = ledger.snapshot();
        assert!(state.meal(MealType::Breakfast).is_none());
        assert_eq!(state.meal(MealType::Lunch).unwrap().totals.energy, 150.0);
        assert_eq!(state.day().energy, 150.0);
        assert!(state.is_consistent(TOLERANCE));
    }

    #[tokio::test]
    async fn test_delete_empties_ledger() {
        let (ledger, store) = ledger().await;
        let id = ledger
            .add_food(FoodIntent::new(MealType::Breakfast, porridge(), 2.0))
            .await
            .unwrap();

        ledger.delete_food(&id).await.unwrap();

        let state = ledger.snapshot();
        assert_eq!(state.day().energy, 0.0);
        assert!(state.meals().is_empty());
        assert!(state.items().is_empty());
        assert!(remote_items(&store).await.is_empty());
    }

    #[tokio::test]
    async fn test_add_failure_restores_snapshot() {
        let (ledger, store) = ledger().await;
        ledger
            .add_food(FoodIntent::new(MealType::Lunch, banana(), 1.0))
            .await
            .unwrap();
        let before = ledger.snapshot();

        store.fail_next(Operation::Create, 1);
        let result = ledger
            .add_food(FoodIntent::new(MealType::Breakfast, porridge(), 2.0))
            .await;

        assert!(matches!(result, Err(LedgerError::AddFailed(_))));
        let after = ledger.snapshot();
        assert_eq!(after.day(), before.day());
        assert_eq!(after.meals(), before.meals());
        assert_eq!(after.items(), before.items());
    }

    #[tokio::test]
    async fn test_update_failure_restores_snapshot() {
        let (ledger, store) = ledger().await;
        let id = ledger
            .add_food(FoodIntent::new(MealType::Breakfast, porridge(), 2.0))
            .await
            .unwrap();
        let before = ledger.snapshot();

        store.fail_next(Operation::Update, 1);
        let result = ledger
            .update_food(&id, FoodIntent::new(MealType::Dinner, banana(), 3.0))
            .await;

        assert!(matches!(result, Err(LedgerError::UpdateFailed(_))));
        let after = ledger.snapshot();
        assert_eq!(after.day(), before.day());
        assert_eq!(after.meals(), before.meals());
        assert_eq!(after.items(), before.items());
    }

    #[tokio::test]
    async fn test_delete_failure_restores_snapshot() {
        let (ledger, store) = ledger().await;
        ledger
            .add_food(FoodIntent::new(MealType::Snack, banana(), 1.0))
            .await
            .unwrap();
        let id = ledger
            .add_food(FoodIntent::new(MealType::Breakfast, porridge(), 2.0))
            .await
            .unwrap();
        let before = ledger.snapshot();

        store.fail_next(Operation::Delete, 1);
        let result = ledger.delete_food(&id).await;

        assert!(matches!(result, Err(LedgerError::DeleteFailed(_))));
        let after = ledger.snapshot();
        assert_eq!(after.day(), before.day());
        assert_eq!(after.meals(), before.meals());
        assert_eq!(after.items(), before.items());
    }

    #[tokio::test]
    async fn test_invalid_quantity_touches_nothing() {
        let (ledger, store) = ledger().await;
        let id = ledger
            .add_food(FoodIntent::new(MealType::Lunch, porridge(), 1.0))
            .await
            .unwrap();
        let mut changes = ledger.subscribe();
        changes.mark_unchanged();

        for quantity in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let result = ledger
                .add_food(FoodIntent::new(MealType::Lunch, porridge(), quantity))
                .await;
            assert!(matches!(result, Err(LedgerError::InvalidQuantity(_))));

            let result = ledger
                .update_food(&id, FoodIntent::new(MealType::Lunch, porridge(), quantity))
                .await;
            assert!(matches!(result, Err(LedgerError::InvalidQuantity(_))));
        }

        assert!(!changes.has_changed().unwrap());
        assert_eq!(store.calls(Operation::Create), 1);
        assert_eq!(store.calls(Operation::Update), 0);
        ledger.close();
    }

    #[tokio::test]
    async fn test_unknown_item_is_not_found() {
        let (ledger, _store) = ledger().await;
        let missing = ItemId::Stored("404".to_string());

        assert_eq!(
            ledger.delete_food(&missing).await,
            Err(LedgerError::ItemNotFound(missing.clone()))
        );
        assert_eq!(
            ledger
                .update_food(&missing, FoodIntent::new(MealType::Lunch, porridge(), 1.0))
                .await,
            Err(LedgerError::ItemNotFound(missing))
        );

        let never_added = ItemId::pending();
        assert_eq!(
            ledger.delete_food(&never_added).await,
            Err(LedgerError::ItemNotFound(never_added.clone()))
        );
        assert_eq!(
            ledger
                .update_food(&never_added, FoodIntent::new(MealType::Lunch, porridge(), 1.0))
                .await,
            Err(LedgerError::ItemNotFound(never_added))
        );
    }

    #[tokio::test]
    async fn test_abandoned_add_is_not_yet_stored() {
        let (ledger, store) = ledger().await;
        let mut changes = ledger.subscribe();
        store.hold_writes();

        let adding = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .add_food(FoodIntent::new(MealType::Snack, banana(), 1.0))
                    .await
            })
        };
        changes.changed().await.unwrap();
        let pending = changes.borrow_and_update().items()[0].id.clone();

        adding.abort();
        assert!(adding.await.unwrap_err().is_cancelled());

        assert_eq!(
            ledger.delete_food(&pending).await,
            Err(LedgerError::NotYetStored(pending.clone()))
        );
        assert!(ledger.snapshot().find(&pending).unwrap().optimistic);
        assert_eq!(store.calls(Operation::Delete), 0);
    }

    #[tokio::test]
    async fn test_add_order_is_irrelevant() {
        let (first, _s1) = ledger().await;
        first
            .add_food(FoodIntent::new(MealType::Breakfast, porridge(), 3.0))
            .await
            .unwrap();
        first
            .add_food(FoodIntent::new(MealType::Snack, banana(), 1.5))
            .await
            .unwrap();

        let (second, _s2) = ledger().await;
        second
            .add_food(FoodIntent::new(MealType::Snack, banana(), 1.5))
            .await
            .unwrap();
        second
            .add_food(FoodIntent::new(MealType::Breakfast, porridge(), 3.0))
            .await
            .unwrap();

        let (a, b) = (first.snapshot(), second.snapshot());
        assert_eq!(a.day(), b.day());
        assert_eq!(meal_energy(&a), meal_energy(&b));
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let (ledger, _store) = ledger().await;
        ledger
            .add_food(FoodIntent::new(MealType::Dinner, banana(), 2.0))
            .await
            .unwrap();

        ledger.refresh().await;
        let once = ledger.snapshot();
        ledger.refresh().await;
        let twice = ledger.snapshot();

        assert_eq!(once.day(), twice.day());
        assert_eq!(once.meals(), twice.meals());
        assert_eq!(once.items(), twice.items());
        assert_eq!(once.history(), twice.history());
    }

    #[tokio::test]
    async fn test_reconcile_agrees_with_local_totals() {
        let (ledger, _store) = ledger().await;
        ledger
            .add_food(FoodIntent::new(MealType::Breakfast, porridge(), 1.0))
            .await
            .unwrap();
        ledger
            .add_food(FoodIntent::new(MealType::Lunch, banana(), 2.0))
            .await
            .unwrap();
        let local = ledger.snapshot();

        ledger.refresh().await;
        let remote = ledger.snapshot();

        assert!(local.day().approx_eq(&remote.day(), TOLERANCE));
        assert_eq!(meal_energy(&local), meal_energy(&remote));
        assert!(remote.is_consistent(TOLERANCE));
        assert_eq!(remote.history().last().unwrap().totals, remote.day());
    }

    #[tokio::test]
    async fn test_optimistic_item_visible_before_confirmation() {
        let (ledger, store) = ledger().await;
        let mut changes = ledger.subscribe();
        store.hold_writes();

        let adding = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .add_food(FoodIntent::new(MealType::Breakfast, porridge(), 2.0))
                    .await
            })
        };

        changes.changed().await.unwrap();
        {
            let state = changes.borrow_and_update();
            assert_eq!(state.items().len(), 1);
            assert!(state.items()[0].optimistic);
            assert!(state.items()[0].id.is_pending());
            assert_eq!(state.day().energy, 150.0);
        }

        store.release_writes();
        let id = adding.await.unwrap().unwrap();
        let state = ledger.snapshot();
        assert_eq!(state.items()[0].id, id);
        assert!(!state.items()[0].optimistic);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_write_times_out_and_rolls_back() {
        let (ledger, store) = ledger().await;
        store.hold_writes();

        let result = ledger
            .add_food(FoodIntent::new(MealType::Dinner, porridge(), 1.0))
            .await;

        assert_eq!(result, Err(LedgerError::AddFailed(StoreError::Timeout)));
        assert!(ledger.snapshot().items().is_empty());
        assert!(ledger.snapshot().day().is_zero());
    }

    #[tokio::test]
    async fn test_update_waits_for_pending_add() {
        let (ledger, store) = ledger().await;
        let mut changes = ledger.subscribe();
        store.hold_writes();

        let adding = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .add_food(FoodIntent::new(MealType::Breakfast, porridge(), 2.0))
                    .await
            })
        };
        changes.changed().await.unwrap();
        let pending = changes.borrow_and_update().items()[0].id.clone();

        let updating = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .update_food(
                        &pending,
                        FoodIntent::new(MealType::Breakfast, porridge(), 4.0),
                    )
                    .await
            })
        };
        tokio::task::yield_now().await;
        store.release_writes();

        let id = adding.await.unwrap().unwrap();
        updating.await.unwrap().unwrap();

        let state = ledger.snapshot();
        assert_eq!(state.items().len(), 1);
        assert_eq!(state.find(&id).unwrap().mass, 200.0);
        assert_eq!(state.day().energy, 300.0);
        assert_eq!(remote_items(&store).await[0].nutrients.energy, 300.0);
    }

    #[tokio::test]
    async fn test_delete_queued_behind_failed_add() {
        let (ledger, store) = ledger().await;
        let mut changes = ledger.subscribe();
        store.hold_writes();
        store.fail_next(Operation::Create, 1);

        let adding = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .add_food(FoodIntent::new(MealType::Snack, banana(), 1.0))
                    .await
            })
        };
        changes.changed().await.unwrap();
        let pending = changes.borrow_and_update().items()[0].id.clone();

        let deleting = {
            let ledger = ledger.clone();
            let pending = pending.clone();
            tokio::spawn(async move { ledger.delete_food(&pending).await })
        };
        tokio::task::yield_now().await;
        store.release_writes();

        assert!(matches!(
            adding.await.unwrap(),
            Err(LedgerError::AddFailed(_))
        ));
        assert_eq!(
            deleting.await.unwrap(),
            Err(LedgerError::ItemNotFound(pending))
        );
        assert!(ledger.snapshot().items().is_empty());
        assert_eq!(store.calls(Operation::Delete), 0);
    }

    #[tokio::test]
    async fn test_concurrent_update_and_delete_are_serialized() {
        let (ledger, store) = ledger().await;
        ledger
            .add_food(FoodIntent::new(MealType::Lunch, banana(), 1.0))
            .await
            .unwrap();
        let id = ledger
            .add_food(FoodIntent::new(MealType::Breakfast, porridge(), 2.0))
            .await
            .unwrap();

        store.hold_writes();
        store.fail_next(Operation::Update, 1);

        let updating = {
            let (ledger, id) = (ledger.clone(), id.clone());
            tokio::spawn(async move {
                ledger
                    .update_food(&id, FoodIntent::new(MealType::Dinner, porridge(), 6.0))
                    .await
            })
        };
        tokio::task::yield_now().await;
        let deleting = {
            let (ledger, id) = (ledger.clone(), id.clone());
            tokio::spawn(async move { ledger.delete_food(&id).await })
        };
        tokio::task::yield_now().await;
        store.release_writes();

        assert!(matches!(
            updating.await.unwrap(),
            Err(LedgerError::UpdateFailed(_))
        ));
        deleting.await.unwrap().unwrap();

        let state = ledger.snapshot();
        assert!(state.find(&id).is_none());
        assert!(state.meal(MealType::Breakfast).is_none());
        assert!(state.meal(MealType::Dinner).is_none());
        assert!(state.day().approx_eq(&state.items()[0].applied, TOLERANCE));
        assert!(state.is_consistent(TOLERANCE));
    }

    #[tokio::test]
    async fn test_failed_add_while_another_is_pending() {
        let (ledger, store) = ledger().await;
        let mut changes = ledger.subscribe();
        store.hold_writes();
        store.fail_next(Operation::Create, 1);

        let failing = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .add_food(FoodIntent::new(MealType::Breakfast, porridge(), 2.0))
                    .await
            })
        };
        changes.changed().await.unwrap();

        let succeeding = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .add_food(FoodIntent::new(MealType::Lunch, banana(), 1.0))
                    .await
            })
        };
        changes.changed().await.unwrap();
        assert_eq!(changes.borrow_and_update().items().len(), 2);

        store.release_writes();
        let results = (failing.await.unwrap(), succeeding.await.unwrap());
        let failed_first = results.0.is_err();

        let state = ledger.snapshot();
        assert_eq!(state.items().len(), 1);
        assert!(state.is_consistent(TOLERANCE));
        // Whichever create reached the store first got the injected failure.
        let survivor = if failed_first {
            MealType::Lunch
        } else {
            MealType::Breakfast
        };
        assert_eq!(state.items()[0].meal_type, survivor);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_write_schedules_reconcile() {
        let (ledger, store) = ledger().await;
        let reads = store.calls(Operation::FetchItems);

        ledger
            .add_food(FoodIntent::new(MealType::Snack, banana(), 1.0))
            .await
            .unwrap();
        assert_eq!(store.calls(Operation::FetchItems), reads);

        ledger.settle().await;
        assert_eq!(store.calls(Operation::FetchItems), reads + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_scheduled_reconcile() {
        let (ledger, store) = ledger().await;
        let reads = store.calls(Operation::FetchItems);

        ledger
            .add_food(FoodIntent::new(MealType::Snack, banana(), 1.0))
            .await
            .unwrap();
        ledger.close();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(store.calls(Operation::FetchItems), reads);
    }
}
