use clap::{Args, Subcommand};
use nutrilog_core::{FoodIntent, ItemId, MealType};

use super::food::resolve_food;
use super::today::render_state;
use super::{open_ledger, parse_date};
use crate::config::Config;

#[derive(Args)]
pub struct LogCommand {
    #[command(subcommand)]
    pub command: LogSubcommand,
}

/// Fields shared by add and update.
#[derive(Args)]
pub struct EntryArgs {
    /// Meal type (breakfast, lunch, dinner, snack)
    #[arg(long = "type", short = 't', value_name = "TYPE")]
    meal_type: MealType,

    /// Food by ID or name
    #[arg(long)]
    food: String,

    /// Quantity in consumption units (grams for foods without a unit mass)
    #[arg(long = "qty", short = 'q')]
    quantity: f64,
}

#[derive(Subcommand)]
pub enum LogSubcommand {
    /// Record a food
    Add {
        #[command(flatten)]
        entry: EntryArgs,

        /// Date (YYYY-MM-DD), defaults to today
        #[arg(long, short)]
        date: Option<String>,
    },

    /// Change a recorded item
    Update {
        /// Item ID
        item_id: String,

        #[command(flatten)]
        entry: EntryArgs,

        /// Date (YYYY-MM-DD) the item was recorded on, defaults to today
        #[arg(long, short)]
        date: Option<String>,
    },

    /// Remove a recorded item
    Delete {
        /// Item ID
        item_id: String,

        /// Date (YYYY-MM-DD) the item was recorded on, defaults to today
        #[arg(long, short)]
        date: Option<String>,
    },
}

impl LogCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            LogSubcommand::Add { entry, date } => {
                let (ledger, store) = open_ledger(config, parse_date(date.as_deref())?).await?;
                let food = resolve_food(store.as_ref(), &entry.food).await?;
                let name = food.name.clone();

                let id = ledger
                    .add_food(FoodIntent::new(entry.meal_type, food, entry.quantity))
                    .await?;
                println!("Added {} to {} ({})", name, entry.meal_type, id);

                ledger.settle().await;
                println!();
                print!("{}", render_state(&ledger.snapshot()));
                ledger.close();
                Ok(())
            }
            LogSubcommand::Update {
                item_id,
                entry,
                date,
            } => {
                let id: ItemId = item_id.parse()?;
                let (ledger, store) = open_ledger(config, parse_date(date.as_deref())?).await?;
                let food = resolve_food(store.as_ref(), &entry.food).await?;

                ledger
                    .update_food(&id, FoodIntent::new(entry.meal_type, food, entry.quantity))
                    .await?;
                println!("Updated item {}", id);

                ledger.settle().await;
                println!();
                print!("{}", render_state(&ledger.snapshot()));
                ledger.close();
                Ok(())
            }
            LogSubcommand::Delete { item_id, date } => {
                let id: ItemId = item_id.parse()?;
                let (ledger, _store) = open_ledger(config, parse_date(date.as_deref())?).await?;

                ledger.delete_food(&id).await?;
                println!("Deleted item {}", id);

                ledger.settle().await;
                println!();
                print!("{}", render_state(&ledger.snapshot()));
                ledger.close();
                Ok(())
            }
        }
    }
}
