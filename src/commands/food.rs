use clap::{Args, Subcommand};
use nutrilog_core::{Food, FoodCatalog};

use super::OutputFormat;
use crate::config::Config;

/// Candidates fetched when resolving a food by name.
const RESOLVE_LIMIT: usize = 20;

#[derive(Args)]
pub struct FoodCommand {
    #[command(subcommand)]
    pub command: FoodSubcommand,
}

#[derive(Subcommand)]
pub enum FoodSubcommand {
    /// Search the food catalog by name
    Search {
        /// Part of the food name
        text: String,

        /// Maximum number of results
        #[arg(long, short, default_value_t = 10)]
        limit: usize,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl FoodCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            FoodSubcommand::Search {
                text,
                limit,
                format,
            } => {
                let store = config.store()?;
                let foods = store.search_foods(text, *limit).await?;

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&foods)?);
                    }
                    OutputFormat::Text => {
                        if foods.is_empty() {
                            println!("No foods match '{}'.", text);
                        }
                        for food in &foods {
                            println!("{}", food);
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

/// Finds a food by exact id, then exact name, then a unique partial match.
pub(crate) async fn resolve_food<C: FoodCatalog>(
    catalog: &C,
    query: &str,
) -> Result<Food, Box<dyn std::error::Error>> {
    let candidates = catalog.search_foods(query, RESOLVE_LIMIT).await?;
    pick_food(candidates, query)
}

fn pick_food(candidates: Vec<Food>, query: &str) -> Result<Food, Box<dyn std::error::Error>> {
    let query = query.trim();

    if let Some(food) = candidates.iter().find(|f| f.id == query) {
        return Ok(food.clone());
    }
    if let Some(food) = candidates
        .iter()
        .find(|f| f.name.eq_ignore_ascii_case(query))
    {
        return Ok(food.clone());
    }

    match candidates.len() {
        0 => Err(format!("No food matches '{}'", query).into()),
        1 => Ok(candidates.into_iter().next().ok_or("No food found")?),
        _ => {
            let names: Vec<&str> = candidates.iter().map(|f| f.name.as_str()).collect();
            Err(format!(
                "'{}' is ambiguous; candidates: {}",
                query,
                names.join(", ")
            )
            .into())
        }
    }
}
