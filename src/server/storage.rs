//! Server-side SQLite storage for the food catalog and consumption records.
//!
//! ```text
//! <DATA_DIR>/
//!   nutrilog.db
//! ```
//!
//! Day, meal and history views are never stored; they are `SUM`s over the
//! consumption rows, so they always agree with the itemized records.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{Days, NaiveDate, Utc};
use nutrilog_core::{DaySummary, Food, ItemWrite, MealAggregate, MealType, Nutrients, StoredItem};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

/// Database file name inside the data directory.
pub const DB_FILENAME: &str = "nutrilog.db";

/// Errors that can occur during server storage operations.
#[derive(Debug)]
pub enum ServerStorageError {
    /// I/O error preparing the data directory.
    IoError(PathBuf, io::Error),
    /// Error talking to SQLite.
    Database(sqlx::Error),
    /// Error applying migrations.
    Migration(sqlx::migrate::MigrateError),
    /// No consumption record with this id.
    NotFound(String),
    /// A stored value could not be interpreted.
    InvalidData(String),
}

impl std::fmt::Display for ServerStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerStorageError::IoError(path, e) => {
                write!(f, "I/O error for {}: {}", path.display(), e)
            }
            ServerStorageError::Database(e) => write!(f, "Database error: {}", e),
            ServerStorageError::Migration(e) => write!(f, "Migration failed: {}", e),
            ServerStorageError::NotFound(id) => write!(f, "Item not found: {}", id),
            ServerStorageError::InvalidData(e) => write!(f, "Invalid stored data: {}", e),
        }
    }
}

impl std::error::Error for ServerStorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerStorageError::IoError(_, e) => Some(e),
            ServerStorageError::Database(e) => Some(e),
            ServerStorageError::Migration(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for ServerStorageError {
    fn from(e: sqlx::Error) -> Self {
        ServerStorageError::Database(e)
    }
}

#[derive(sqlx::FromRow)]
struct FoodRow {
    id: String,
    name: String,
    energy: f64,
    carbohydrate: f64,
    protein: f64,
    fat: f64,
    mass_per_unit: Option<f64>,
}

impl From<FoodRow> for Food {
    fn from(row: FoodRow) -> Self {
        Food {
            id: row.id,
            name: row.name,
            per_100: Nutrients::new(row.energy, row.carbohydrate, row.protein, row.fat),
            mass_per_unit: row.mass_per_unit,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: i64,
    meal_type: String,
    food_id: String,
    food_name: String,
    mass: f64,
    energy: f64,
    carbohydrate: f64,
    protein: f64,
    fat: f64,
}

#[derive(sqlx::FromRow)]
struct TotalsRow {
    key: String,
    energy: f64,
    carbohydrate: f64,
    protein: f64,
    fat: f64,
}

impl TotalsRow {
    fn totals(&self) -> Nutrients {
        Nutrients::new(self.energy, self.carbohydrate, self.protein, self.fat)
    }
}

fn parse_meal_type(value: &str) -> Result<MealType, ServerStorageError> {
    MealType::from_str(value).map_err(ServerStorageError::InvalidData)
}

fn parse_item_id(item_id: &str) -> Result<i64, ServerStorageError> {
    item_id
        .parse()
        .map_err(|_| ServerStorageError::NotFound(item_id.to_string()))
}

/// Escapes LIKE wildcards so a search fragment matches literally.
fn like_pattern(fragment: &str) -> String {
    let escaped = fragment
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Server-side storage backed by a SQLite pool.
#[derive(Debug, Clone)]
pub struct ServerStorage {
    pool: SqlitePool,
}

impl ServerStorage {
    /// Opens (creating if needed) the database in `data_dir` and runs migrations.
    pub async fn open(data_dir: &Path) -> Result<Self, ServerStorageError> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| ServerStorageError::IoError(data_dir.to_path_buf(), e))?;

        let options = SqliteConnectOptions::new()
            .filename(data_dir.join(DB_FILENAME))
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(ServerStorageError::Migration)?;

        Ok(Self { pool })
    }

    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------

    /// Inserts or replaces a catalog entry.
    pub async fn upsert_food(&self, food: &Food) -> Result<(), ServerStorageError> {
        sqlx::query(
            r#"
            INSERT INTO foods (id, name, energy, carbohydrate, protein, fat, mass_per_unit)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                energy = excluded.energy,
                carbohydrate = excluded.carbohydrate,
                protein = excluded.protein,
                fat = excluded.fat,
                mass_per_unit = excluded.mass_per_unit
            "#,
        )
        .bind(&food.id)
        .bind(&food.name)
        .bind(food.per_100.energy)
        .bind(food.per_100.carbohydrate)
        .bind(food.per_100.protein)
        .bind(food.per_100.fat)
        .bind(food.mass_per_unit)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Case-insensitive substring search on food names, alphabetical.
    pub async fn search_foods(
        &self,
        fragment: &str,
        limit: u32,
    ) -> Result<Vec<Food>, ServerStorageError> {
        let rows: Vec<FoodRow> = sqlx::query_as(
            "SELECT * FROM foods WHERE name LIKE ? ESCAPE '\\' ORDER BY name COLLATE NOCASE LIMIT ?",
        )
        .bind(like_pattern(fragment))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Food::from).collect())
    }

    pub async fn list_foods(&self) -> Result<Vec<Food>, ServerStorageError> {
        let rows: Vec<FoodRow> = sqlx::query_as("SELECT * FROM foods ORDER BY name COLLATE NOCASE")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Food::from).collect())
    }

    // ------------------------------------------------------------------
    // Consumption records
    // ------------------------------------------------------------------

    /// Stores a record and returns its id.
    pub async fn create_item(
        &self,
        user_id: &str,
        date: NaiveDate,
        item: &ItemWrite,
    ) -> Result<String, ServerStorageError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO consumption (user_id, date, meal_type, food_id, food_name, mass, energy, carbohydrate, protein, fat, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(date.to_string())
        .bind(item.meal_type.as_str())
        .bind(&item.food_id)
        .bind(&item.food_name)
        .bind(item.mass)
        .bind(item.nutrients.energy)
        .bind(item.nutrients.carbohydrate)
        .bind(item.nutrients.protein)
        .bind(item.nutrients.fat)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid().to_string())
    }

    pub async fn update_item(
        &self,
        item_id: &str,
        item: &ItemWrite,
    ) -> Result<(), ServerStorageError> {
        let id = parse_item_id(item_id)?;
        let result = sqlx::query(
            r#"
            UPDATE consumption
            SET meal_type = ?, food_id = ?, food_name = ?, mass = ?,
                energy = ?, carbohydrate = ?, protein = ?, fat = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(item.meal_type.as_str())
        .bind(&item.food_id)
        .bind(&item.food_name)
        .bind(item.mass)
        .bind(item.nutrients.energy)
        .bind(item.nutrients.carbohydrate)
        .bind(item.nutrients.protein)
        .bind(item.nutrients.fat)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ServerStorageError::NotFound(item_id.to_string()));
        }
        Ok(())
    }

    pub async fn delete_item(&self, item_id: &str) -> Result<(), ServerStorageError> {
        let id = parse_item_id(item_id)?;
        let result = sqlx::query("DELETE FROM consumption WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ServerStorageError::NotFound(item_id.to_string()));
        }
        Ok(())
    }

    /// Returns the user a record belongs to, if it exists.
    pub async fn item_owner(&self, item_id: &str) -> Result<Option<String>, ServerStorageError> {
        let Ok(id) = item_id.parse::<i64>() else {
            return Ok(None);
        };
        let owner: Option<(String,)> = sqlx::query_as("SELECT user_id FROM consumption WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(owner.map(|(user_id,)| user_id))
    }

    pub async fn items(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<StoredItem>, ServerStorageError> {
        let rows: Vec<ItemRow> = sqlx::query_as(
            r#"
            SELECT id, meal_type, food_id, food_name, mass, energy, carbohydrate, protein, fat
            FROM consumption
            WHERE user_id = ? AND date = ?
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .bind(date.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(StoredItem {
                    id: row.id.to_string(),
                    meal_type: parse_meal_type(&row.meal_type)?,
                    food_id: row.food_id,
                    food_name: row.food_name,
                    mass: row.mass,
                    nutrients: Nutrients::new(row.energy, row.carbohydrate, row.protein, row.fat),
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Derived views
    // ------------------------------------------------------------------

    /// Day totals, or `None` when the user recorded nothing that day.
    pub async fn day_totals(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<Nutrients>, ServerStorageError> {
        let row: Option<TotalsRow> = sqlx::query_as(
            r#"
            SELECT date AS key, SUM(energy) AS energy, SUM(carbohydrate) AS carbohydrate,
                   SUM(protein) AS protein, SUM(fat) AS fat
            FROM consumption
            WHERE user_id = ? AND date = ?
            GROUP BY date
            "#,
        )
        .bind(user_id)
        .bind(date.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.totals()))
    }

    /// Per-meal totals, ordered breakfast to snack. Meals without records are absent.
    pub async fn meal_totals(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<MealAggregate>, ServerStorageError> {
        let rows: Vec<TotalsRow> = sqlx::query_as(
            r#"
            SELECT meal_type AS key, SUM(energy) AS energy, SUM(carbohydrate) AS carbohydrate,
                   SUM(protein) AS protein, SUM(fat) AS fat
            FROM consumption
            WHERE user_id = ? AND date = ?
            GROUP BY meal_type
            "#,
        )
        .bind(user_id)
        .bind(date.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut meals = rows
            .iter()
            .map(|row| Ok(MealAggregate::new(parse_meal_type(&row.key)?, row.totals())))
            .collect::<Result<Vec<_>, ServerStorageError>>()?;
        meals.sort_by_key(|m| m.meal_type);
        Ok(meals)
    }

    /// The `days` daily summaries ending at `end`, oldest first, zero-filled.
    pub async fn history(
        &self,
        user_id: &str,
        end: NaiveDate,
        days: u32,
    ) -> Result<Vec<DaySummary>, ServerStorageError> {
        let start = end
            .checked_sub_days(Days::new(u64::from(days.saturating_sub(1))))
            .unwrap_or(NaiveDate::MIN);

        let rows: Vec<TotalsRow> = sqlx::query_as(
            r#"
            SELECT date AS key, SUM(energy) AS energy, SUM(carbohydrate) AS carbohydrate,
                   SUM(protein) AS protein, SUM(fat) AS fat
            FROM consumption
            WHERE user_id = ? AND date BETWEEN ? AND ?
            GROUP BY date
            "#,
        )
        .bind(user_id)
        .bind(start.to_string())
        .bind(end.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut totals = BTreeMap::new();
        for row in &rows {
            let date = NaiveDate::from_str(&row.key)
                .map_err(|e| ServerStorageError::InvalidData(format!("{}: {}", row.key, e)))?;
            totals.insert(date, row.totals());
        }
        Ok(DaySummary::window(end, days, &totals))
    }
}
