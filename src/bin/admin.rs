//! Nutrilog Admin CLI
//!
//! Administration tool for seeding and inspecting the server's food catalog.
//!
//! # Usage
//!
//! ```bash
//! nutrilog-admin foods import foods.yaml
//! nutrilog-admin foods list
//! ```
//!
//! # Import File Format
//!
//! ```yaml
//! - id: oats
//!   name: Rolled Oats
//!   per_100: { energy: 379, carbohydrate: 67.7, protein: 13.2, fat: 6.5 }
//!   mass_per_unit: 40
//! ```
//!
//! # Environment Variables
//!
//! - `NUTRILOG_DATA_DIR`: Directory where server stores data (default: ~/.local/share/nutrilog-server)

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use nutrilog::server::{data_dir_from_env, ServerStorage};
use nutrilog_core::Food;

// ============================================================================
// CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "nutrilog-admin")]
#[command(version)]
#[command(about = "Nutrilog server administration tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the food catalog
    Foods(FoodsCommand),
}

#[derive(Args)]
struct FoodsCommand {
    #[command(subcommand)]
    command: FoodsSubcommand,
}

#[derive(Subcommand)]
enum FoodsSubcommand {
    /// Import (insert or replace) foods from a YAML file
    Import {
        /// YAML file containing a list of foods
        file: PathBuf,
    },
    /// List all foods
    List,
}

// ============================================================================
// Commands
// ============================================================================

fn read_foods(file: &Path) -> Result<Vec<Food>, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(file)
        .map_err(|e| format!("Failed to read {}: {}", file.display(), e))?;
    let foods: Vec<Food> = serde_yaml::from_str(&contents)
        .map_err(|e| format!("Failed to parse {}: {}", file.display(), e))?;

    for food in &foods {
        if food.id.trim().is_empty() || food.name.trim().is_empty() {
            return Err(format!("Food entries need an id and a name: {:?}", food).into());
        }
        if food.mass_per_unit.is_some_and(|m| !m.is_finite() || m <= 0.0) {
            return Err(format!("mass_per_unit of '{}' must be positive", food.id).into());
        }
    }
    Ok(foods)
}

async fn import_foods(
    storage: &ServerStorage,
    file: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let foods = read_foods(file)?;
    for food in &foods {
        storage.upsert_food(food).await?;
    }
    println!("Imported {} food(s) from {}", foods.len(), file.display());
    Ok(())
}

async fn list_foods(storage: &ServerStorage) -> Result<(), Box<dyn std::error::Error>> {
    let foods = storage.list_foods().await?;

    if foods.is_empty() {
        println!("No foods in the catalog.");
        return Ok(());
    }

    println!(
        "{:<20} {:<30} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "ID", "NAME", "KCAL", "CARBS", "PROTEIN", "FAT", "UNIT G"
    );
    println!("{}", "-".repeat(98));

    for food in &foods {
        let unit = food
            .mass_per_unit
            .map(|m| format!("{:.0}", m))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:<30} {:>8.0} {:>8.1} {:>8.1} {:>8.1} {:>8}",
            food.id,
            food.name,
            food.per_100.energy,
            food.per_100.carbohydrate,
            food.per_100.protein,
            food.per_100.fat,
            unit
        );
    }

    println!();
    println!("Total: {} food(s)", foods.len());

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let storage = ServerStorage::open(&data_dir_from_env()).await?;

    match cli.command {
        Commands::Foods(foods_cmd) => match foods_cmd.command {
            FoodsSubcommand::Import { file } => import_foods(&storage, &file).await,
            FoodsSubcommand::List => list_foods(&storage).await,
        },
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
