//! The ledger snapshot and its synchronous mutations.
//!
//! # Invariants
//! - `day == Σ meals == Σ items.applied` whenever no mutation is mid-apply.
//! - A meal aggregate exists only while at least one item carries its tag.
//! - Every mutation bumps `revision`; every reconciliation bumps `generation`.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use super::accumulator::{apply_day_delta, apply_meal_delta};
use super::error::LedgerError;
use crate::models::{DaySummary, ItemId, MealAggregate, MealItem, MealType, Nutrients};

/// Everything the UI reads about one user's day.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerState {
    user_id: String,
    date: NaiveDate,
    day: Nutrients,
    meals: Vec<MealAggregate>,
    items: Vec<MealItem>,
    history: Vec<DaySummary>,
    is_loading: bool,
    is_recalculating: bool,
    #[serde(skip)]
    revision: u64,
    #[serde(skip)]
    generation: u64,
    /// Pending id -> stored id, recorded on confirmation.
    #[serde(skip)]
    aliases: HashMap<Uuid, String>,
}

/// Pre-mutation copy of the three derived collections.
#[derive(Debug, Clone)]
pub(crate) struct Checkpoint {
    day: Nutrients,
    meals: Vec<MealAggregate>,
    items: Vec<MealItem>,
    generation: u64,
    revision_after: u64,
}

impl LedgerState {
    pub fn new(user_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            user_id: user_id.into(),
            date,
            day: Nutrients::ZERO,
            meals: Vec::new(),
            items: Vec::new(),
            history: Vec::new(),
            is_loading: true,
            is_recalculating: false,
            revision: 0,
            generation: 0,
            aliases: HashMap::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn day(&self) -> Nutrients {
        self.day
    }

    pub fn meals(&self) -> &[MealAggregate] {
        &self.meals
    }

    pub fn meal(&self, meal_type: MealType) -> Option<&MealAggregate> {
        self.meals.iter().find(|m| m.meal_type == meal_type)
    }

    pub fn items(&self) -> &[MealItem] {
        &self.items
    }

    pub fn history(&self) -> &[DaySummary] {
        &self.history
    }

    /// True until the first reconciliation completes.
    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    /// True while a reconciliation after the first one is running.
    pub fn is_recalculating(&self) -> bool {
        self.is_recalculating
    }

    pub fn find(&self, id: &ItemId) -> Option<&MealItem> {
        self.items.iter().find(|i| &i.id == id)
    }

    /// Follows a pending id to the stored id it was confirmed as.
    pub fn resolve(&self, id: &ItemId) -> ItemId {
        match id {
            ItemId::Pending(uuid) => match self.aliases.get(uuid) {
                Some(stored) => ItemId::Stored(stored.clone()),
                None => id.clone(),
            },
            ItemId::Stored(_) => id.clone(),
        }
    }

    /// Checks the central invariant within `tolerance`.
    pub fn is_consistent(&self, tolerance: f64) -> bool {
        let from_items: Nutrients = self.items.iter().map(|i| i.applied).sum();
        let from_meals: Nutrients = self.meals.iter().map(|m| m.totals).sum();

        let meals_match = self.meals.iter().all(|meal| {
            let tagged: Nutrients = self
                .items
                .iter()
                .filter(|i| i.meal_type == meal.meal_type)
                .map(|i| i.applied)
                .sum();
            meal.totals.approx_eq(&tagged, tolerance)
        });
        let no_orphan_items = self.items.iter().all(|i| self.meal(i.meal_type).is_some());

        self.day.approx_eq(&from_meals, tolerance)
            && self.day.approx_eq(&from_items, tolerance)
            && meals_match
            && no_orphan_items
    }

    #[cfg(test)]
    fn revision(&self) -> u64 {
        self.revision
    }

    /// Runs `mutation` and returns a checkpoint of the state before it.
    ///
    /// `mutation` must either fail without touching the state or succeed completely.
    pub(crate) fn checkpointed<T>(
        &mut self,
        mutation: impl FnOnce(&mut Self) -> Result<T, LedgerError>,
    ) -> Result<(Checkpoint, T), LedgerError> {
        let mut checkpoint = Checkpoint {
            day: self.day,
            meals: self.meals.clone(),
            items: self.items.clone(),
            generation: self.generation,
            revision_after: 0,
        };
        let output = mutation(self)?;
        checkpoint.revision_after = self.revision;
        Ok((checkpoint, output))
    }

    /// Undoes a failed write.
    ///
    /// Restores the checkpoint exactly when nothing else touched the state
    /// since; does nothing when a reconciliation replaced the state since;
    /// otherwise runs `compensate` to reverse only this write's effect.
    pub(crate) fn roll_back(&mut self, checkpoint: Checkpoint, compensate: impl FnOnce(&mut Self)) {
        if self.revision == checkpoint.revision_after {
            self.day = checkpoint.day;
            self.meals = checkpoint.meals;
            self.items = checkpoint.items;
            self.revision += 1;
        } else if self.generation != checkpoint.generation {
            tracing::debug!("State reconciled since the failed write; nothing to roll back");
        } else {
            compensate(self);
        }
    }

    pub(crate) fn insert_item(&mut self, item: MealItem) {
        let position = self.items.len();
        self.insert_item_at(position, item);
    }

    pub(crate) fn insert_item_at(&mut self, position: usize, item: MealItem) {
        self.day = apply_day_delta(self.day, item.applied);
        apply_meal_delta(&mut self.meals, item.meal_type, item.applied);
        let position = position.min(self.items.len());
        self.items.insert(position, item);
        self.revision += 1;
    }

    /// Swaps the item `id` for `replacement`, moving its contribution between
    /// meal aggregates when the tag changes. Returns the previous item.
    pub(crate) fn replace_item(
        &mut self,
        id: &ItemId,
        replacement: MealItem,
    ) -> Result<MealItem, LedgerError> {
        let index = self.index_of(id)?;
        let (meal_type, applied) = (replacement.meal_type, replacement.applied);
        let previous = std::mem::replace(&mut self.items[index], replacement);

        self.day = apply_day_delta(self.day, -previous.applied);
        apply_meal_delta(&mut self.meals, previous.meal_type, -previous.applied);
        self.day = apply_day_delta(self.day, applied);
        apply_meal_delta(&mut self.meals, meal_type, applied);

        self.prune();
        self.revision += 1;
        Ok(previous)
    }

    /// Removes the item `id` and returns it with its former position.
    pub(crate) fn remove_item(&mut self, id: &ItemId) -> Result<(usize, MealItem), LedgerError> {
        let index = self.index_of(id)?;
        let removed = self.items.remove(index);

        self.day = apply_day_delta(self.day, -removed.applied);
        apply_meal_delta(&mut self.meals, removed.meal_type, -removed.applied);

        self.prune();
        self.revision += 1;
        Ok((index, removed))
    }

    /// Re-keys a pending item to its stored id and clears its optimistic flag.
    ///
    /// Returns false if the pending item is no longer held locally.
    pub(crate) fn confirm_item(&mut self, pending: Uuid, stored: String) -> bool {
        self.aliases.insert(pending, stored.clone());
        let pending_id = ItemId::Pending(pending);
        match self.items.iter_mut().find(|i| i.id == pending_id) {
            Some(item) => {
                item.id = ItemId::Stored(stored);
                item.optimistic = false;
                self.revision += 1;
                true
            }
            None => false,
        }
    }

    /// Clears the optimistic flag if the item still holds exactly `expected`.
    pub(crate) fn settle_item(&mut self, expected: &MealItem) {
        if let Some(item) = self.items.iter_mut().find(|i| *i == expected) {
            item.optimistic = false;
            self.revision += 1;
        }
    }

    pub(crate) fn begin_reconcile(&mut self) {
        if !self.is_loading {
            self.is_recalculating = true;
        }
    }

    /// Replaces whichever pieces were fetched; `None` leaves a piece untouched.
    pub(crate) fn replace_remote(
        &mut self,
        day: Option<Nutrients>,
        meals: Option<Vec<MealAggregate>>,
        items: Option<Vec<MealItem>>,
        history: Option<Vec<DaySummary>>,
    ) {
        let replaced = day.is_some() || meals.is_some() || items.is_some() || history.is_some();

        if let Some(day) = day {
            self.day = day;
        }
        if let Some(meals) = meals {
            self.meals = meals;
        }
        if let Some(items) = items {
            self.items = items;
        }
        if let Some(history) = history {
            self.history = history;
        }

        if replaced {
            self.generation += 1;
            self.revision += 1;
        }
        self.is_loading = false;
        self.is_recalculating = false;
    }

    fn index_of(&self, id: &ItemId) -> Result<usize, LedgerError> {
        self.items
            .iter()
            .position(|i| &i.id == id)
            .ok_or_else(|| LedgerError::ItemNotFound(id.clone()))
    }

    /// Drops meal aggregates no item carries any more; an empty day is exactly zero.
    fn prune(&mut self) {
        let items = &self.items;
        self.meals
            .retain(|meal| items.iter().any(|i| i.meal_type == meal.meal_type));
        if self.items.is_empty() {
            self.day = Nutrients::ZERO;
        }
    }
}
