//! In-process store used for offline runs and tests.
//!
//! Besides implementing the store contracts it can inject failures per
//! operation and hold writes in flight until released.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{broadcast, watch};

use super::{ChangeFeed, FoodCatalog, RemoteStore, StoreError, StoreResult};
use crate::models::{
    ChangeSignal, DaySummary, Food, ItemWrite, MealAggregate, MealType, Nutrients, StoredItem,
};

/// Store operations that can be counted or made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    FetchDay,
    FetchMeals,
    FetchItems,
    FetchHistory,
    Create,
    Update,
    Delete,
    Search,
}

#[derive(Debug, Clone)]
struct Record {
    user_id: String,
    date: NaiveDate,
    item: StoredItem,
}

#[derive(Default)]
struct Tables {
    foods: Vec<Food>,
    records: BTreeMap<u64, Record>,
    next_id: u64,
    failures: HashMap<Operation, usize>,
    calls: HashMap<Operation, usize>,
}

/// In-memory implementation of [`RemoteStore`], [`FoodCatalog`] and [`ChangeFeed`].
pub struct MemoryStore {
    tables: Mutex<Tables>,
    changes: broadcast::Sender<String>,
    writes_open: watch::Sender<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        let (writes_open, _) = watch::channel(true);
        Self {
            tables: Mutex::new(Tables {
                next_id: 1,
                ..Tables::default()
            }),
            changes,
            writes_open,
        }
    }

    pub fn with_foods(self, foods: Vec<Food>) -> Self {
        self.tables().foods = foods;
        self
    }

    /// Makes the next `count` calls of `op` fail.
    pub fn fail_next(&self, op: Operation, count: usize) {
        *self.tables().failures.entry(op).or_default() += count;
    }

    /// Number of times `op` has been called.
    pub fn calls(&self, op: Operation) -> usize {
        self.tables().calls.get(&op).copied().unwrap_or(0)
    }

    /// Parks every write until [`release_writes`](Self::release_writes).
    pub fn hold_writes(&self) {
        self.writes_open.send_replace(false);
    }

    pub fn release_writes(&self) {
        self.writes_open.send_replace(true);
    }

    /// Writes a record as another device would: no gate, no injected failure.
    pub fn external_create(&self, user_id: &str, date: NaiveDate, item: &ItemWrite) -> String {
        let id = self.insert(user_id, date, item);
        self.announce(user_id);
        id
    }

    /// Publishes a change signal for `user_id` without touching any record.
    pub fn announce(&self, user_id: &str) {
        // No receivers is fine.
        let _ = self.changes.send(user_id.to_string());
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        // A poisoned lock only means a test panicked mid-call; the tables are still usable.
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin(&self, op: Operation) -> StoreResult<()> {
        let mut tables = self.tables();
        *tables.calls.entry(op).or_default() += 1;
        match tables.failures.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(StoreError::Rejected(format!("injected {:?} failure", op)))
            }
            _ => Ok(()),
        }
    }

    async fn wait_for_gate(&self) {
        let mut open = self.writes_open.subscribe();
        // The sender lives as long as self.
        let _ = open.wait_for(|open| *open).await;
    }

    fn insert(&self, user_id: &str, date: NaiveDate, item: &ItemWrite) -> String {
        let mut tables = self.tables();
        let id = tables.next_id;
        tables.next_id += 1;
        tables.records.insert(
            id,
            Record {
                user_id: user_id.to_string(),
                date,
                item: StoredItem {
                    id: id.to_string(),
                    meal_type: item.meal_type,
                    food_id: item.food_id.clone(),
                    food_name: item.food_name.clone(),
                    mass: item.mass,
                    nutrients: item.nutrients,
                },
            },
        );
        id.to_string()
    }

    fn day_records(&self, user_id: &str, date: NaiveDate) -> Vec<StoredItem> {
        self.tables()
            .records
            .values()
            .filter(|r| r.user_id == user_id && r.date == date)
            .map(|r| r.item.clone())
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_id(item_id: &str) -> StoreResult<u64> {
    item_id
        .parse()
        .map_err(|_| StoreError::NotFound(item_id.to_string()))
}

impl RemoteStore for MemoryStore {
    async fn fetch_day(&self, user_id: &str, date: NaiveDate) -> StoreResult<Option<Nutrients>> {
        self.begin(Operation::FetchDay)?;
        let items = self.day_records(user_id, date);
        if items.is_empty() {
            return Ok(None);
        }
        Ok(Some(items.iter().map(|i| i.nutrients).sum()))
    }

    async fn fetch_meals(&self, user_id: &str, date: NaiveDate) -> StoreResult<Vec<MealAggregate>> {
        self.begin(Operation::FetchMeals)?;
        let mut totals: BTreeMap<MealType, Nutrients> = BTreeMap::new();
        for item in self.day_records(user_id, date) {
            *totals.entry(item.meal_type).or_default() += item.nutrients;
        }
        Ok(totals
            .into_iter()
            .map(|(meal_type, totals)| MealAggregate::new(meal_type, totals))
            .collect())
    }

    async fn fetch_items(&self, user_id: &str, date: NaiveDate) -> StoreResult<Vec<StoredItem>> {
        self.begin(Operation::FetchItems)?;
        Ok(self.day_records(user_id, date))
    }

    async fn fetch_history(
        &self,
        user_id: &str,
        end: NaiveDate,
        days: u32,
    ) -> StoreResult<Vec<DaySummary>> {
        self.begin(Operation::FetchHistory)?;
        let mut totals: BTreeMap<NaiveDate, Nutrients> = BTreeMap::new();
        for record in self.tables().records.values() {
            if record.user_id == user_id {
                *totals.entry(record.date).or_default() += record.item.nutrients;
            }
        }
        Ok(DaySummary::window(end, days, &totals))
    }

    async fn create_item(
        &self,
        user_id: &str,
        date: NaiveDate,
        item: &ItemWrite,
    ) -> StoreResult<String> {
        self.wait_for_gate().await;
        self.begin(Operation::Create)?;
        let id = self.insert(user_id, date, item);
        self.announce(user_id);
        Ok(id)
    }

    async fn update_item(&self, item_id: &str, item: &ItemWrite) -> StoreResult<()> {
        self.wait_for_gate().await;
        self.begin(Operation::Update)?;
        let key = parse_id(item_id)?;
        let user_id = {
            let mut tables = self.tables();
            let record = tables
                .records
                .get_mut(&key)
                .ok_or_else(|| StoreError::NotFound(item_id.to_string()))?;
            record.item.meal_type = item.meal_type;
            record.item.food_id = item.food_id.clone();
            record.item.food_name = item.food_name.clone();
            record.item.mass = item.mass;
            record.item.nutrients = item.nutrients;
            record.user_id.clone()
        };
        self.announce(&user_id);
        Ok(())
    }

    async fn delete_item(&self, item_id: &str) -> StoreResult<()> {
        self.wait_for_gate().await;
        self.begin(Operation::Delete)?;
        let key = parse_id(item_id)?;
        let removed = self.tables().records.remove(&key);
        match removed {
            Some(record) => {
                self.announce(&record.user_id);
                Ok(())
            }
            None => Err(StoreError::NotFound(item_id.to_string())),
        }
    }
}

impl FoodCatalog for MemoryStore {
    async fn search_foods(&self, fragment: &str, limit: usize) -> StoreResult<Vec<Food>> {
        self.begin(Operation::Search)?;
        let needle = fragment.trim().to_lowercase();
        Ok(self
            .tables()
            .foods
            .iter()
            .filter(|f| f.name.to_lowercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect())
    }
}

impl ChangeFeed for MemoryStore {
    async fn subscribe(&self, user_id: &str) -> StoreResult<BoxStream<'static, ChangeSignal>> {
        let receiver = self.changes.subscribe();
        let user_id = user_id.to_string();

        let signals = stream::unfold(receiver, move |mut receiver| {
            let user_id = user_id.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(changed) if changed == user_id => return Some((ChangeSignal, receiver)),
                        Ok(_) => continue,
                        // Missed events still mean "go re-read".
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            return Some((ChangeSignal, receiver))
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(signals.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    fn write(meal_type: MealType, energy: f64) -> ItemWrite {
        ItemWrite {
            meal_type,
            food_id: "oats".to_string(),
            food_name: "Oats".to_string(),
            mass: 100.0,
            nutrients: Nutrients::new(energy, 10.0, 2.0, 1.0),
        }
    }

    #[tokio::test]
    async fn test_create_and_aggregate() {
        let store = MemoryStore::new();
        store
            .create_item("u1", date(), &write(MealType::Breakfast, 100.0))
            .await
            .unwrap();
        store
            .create_item("u1", date(), &write(MealType::Lunch, 50.0))
            .await
            .unwrap();
        store
            .create_item("u2", date(), &write(MealType::Lunch, 999.0))
            .await
            .unwrap();

        let day = store.fetch_day("u1", date()).await.unwrap().unwrap();
        assert_eq!(day.energy, 150.0);

        let meals = store.fetch_meals("u1", date()).await.unwrap();
        assert_eq!(meals.len(), 2);
        assert_eq!(meals[0].meal_type, MealType::Breakfast);
        assert_eq!(meals[1].totals.energy, 50.0);

        assert_eq!(store.fetch_items("u1", date()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_day_is_none() {
        let store = MemoryStore::new();
        assert!(store.fetch_day("u1", date()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let store = MemoryStore::new();
        let id = store
            .create_item("u1", date(), &write(MealType::Dinner, 100.0))
            .await
            .unwrap();

        store
            .update_item(&id, &write(MealType::Snack, 40.0))
            .await
            .unwrap();
        let items = store.fetch_items("u1", date()).await.unwrap();
        assert_eq!(items[0].meal_type, MealType::Snack);
        assert_eq!(items[0].nutrients.energy, 40.0);

        store.delete_item(&id).await.unwrap();
        assert!(store.fetch_items("u1", date()).await.unwrap().is_empty());
        assert_eq!(
            store.delete_item(&id).await,
            Err(StoreError::NotFound(id.clone()))
        );
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed() {
        let store = MemoryStore::new();
        store.fail_next(Operation::FetchItems, 1);

        assert!(store.fetch_items("u1", date()).await.is_err());
        assert!(store.fetch_items("u1", date()).await.is_ok());
        assert_eq!(store.calls(Operation::FetchItems), 2);
    }

    #[tokio::test]
    async fn test_search_foods() {
        let store = MemoryStore::new().with_foods(vec![
            Food::new("1", "Brown Rice", Nutrients::default()),
            Food::new("2", "White Rice", Nutrients::default()),
            Food::new("3", "Egg", Nutrients::default()),
        ]);

        let found = store.search_foods("rice", 10).await.unwrap();
        assert_eq!(found.len(), 2);

        let limited = store.search_foods("RICE", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_feed_is_scoped_to_user() {
        let store = MemoryStore::new();
        let mut feed = store.subscribe("u1").await.unwrap();

        store.announce("u2");
        store.announce("u1");

        assert_eq!(feed.next().await, Some(ChangeSignal));
    }

    #[tokio::test]
    async fn test_history_window() {
        let store = MemoryStore::new();
        let yesterday = date().pred_opt().unwrap();
        store.external_create("u1", yesterday, &write(MealType::Lunch, 700.0));
        store.external_create("u1", date(), &write(MealType::Lunch, 300.0));

        let history = store.fetch_history("u1", date(), 7).await.unwrap();
        assert_eq!(history.len(), 7);
        assert_eq!(history[5].totals.energy, 700.0);
        assert_eq!(history[6].totals.energy, 300.0);
    }
}
