use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::meal_type::MealType;
use super::nutrients::Nutrients;

const PENDING_PREFIX: &str = "pending:";

/// Identifier of a consumption record.
///
/// A record starts life with a locally synthesized `Pending` id and is
/// re-keyed to the `Stored` id once the remote store assigns one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ItemId {
    Pending(Uuid),
    Stored(String),
}

impl ItemId {
    pub fn pending() -> Self {
        ItemId::Pending(Uuid::new_v4())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ItemId::Pending(_))
    }

    /// Returns the remote identifier, if the store has assigned one.
    pub fn stored(&self) -> Option<&str> {
        match self {
            ItemId::Pending(_) => None,
            ItemId::Stored(id) => Some(id),
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Pending(uuid) => write!(f, "{}{}", PENDING_PREFIX, uuid),
            ItemId::Stored(id) => f.write_str(id),
        }
    }
}

impl FromStr for ItemId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("Item id cannot be empty".to_string());
        }
        match s.strip_prefix(PENDING_PREFIX) {
            Some(uuid) => Uuid::parse_str(uuid)
                .map(ItemId::Pending)
                .map_err(|_| format!("Invalid pending item id '{}'", s)),
            None => Ok(ItemId::Stored(s.to_string())),
        }
    }
}

impl From<ItemId> for String {
    fn from(id: ItemId) -> String {
        id.to_string()
    }
}

impl TryFrom<String> for ItemId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// One consumption record as held by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealItem {
    pub id: ItemId,
    pub meal_type: MealType,
    pub food_id: String,
    pub food_name: String,
    pub mass_per_unit: Option<f64>,
    /// Total grams consumed.
    pub mass: f64,
    /// Display energy in kcal.
    pub energy: f64,
    /// The exact delta this item contributed to the aggregates.
    pub applied: Nutrients,
    /// Set while the remote store has not confirmed the last change.
    pub optimistic: bool,
}

/// A consumption record as returned by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredItem {
    pub id: String,
    pub meal_type: MealType,
    pub food_id: String,
    pub food_name: String,
    pub mass: f64,
    #[serde(default)]
    pub nutrients: Nutrients,
}

impl From<StoredItem> for MealItem {
    fn from(item: StoredItem) -> Self {
        MealItem {
            id: ItemId::Stored(item.id),
            meal_type: item.meal_type,
            food_id: item.food_id,
            food_name: item.food_name,
            mass_per_unit: None,
            mass: item.mass,
            energy: item.nutrients.energy,
            applied: item.nutrients,
            optimistic: false,
        }
    }
}

/// Payload of a create or update request.
///
/// Carries the delta applied locally so the store persists the same numbers
/// the ledger will later reverse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemWrite {
    pub meal_type: MealType,
    pub food_id: String,
    pub food_name: String,
    pub mass: f64,
    pub nutrients: Nutrients,
}

impl From<&MealItem> for ItemWrite {
    fn from(item: &MealItem) -> Self {
        ItemWrite {
            meal_type: item.meal_type,
            food_id: item.food_id.clone(),
            food_name: item.food_name.clone(),
            mass: item.mass,
            nutrients: item.applied,
        }
    }
}

impl fmt::Display for MealItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} - {:.0} g, {:.0} kcal",
            self.id, self.meal_type, self.food_name, self.mass, self.energy
        )?;
        if self.optimistic {
            write!(f, " (saving...)")?;
        }
        Ok(())
    }
}
