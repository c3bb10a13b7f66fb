use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;

use commands::{ConfigCommand, FoodCommand, LogCommand, TodayCommand, WatchCommand};
use config::Config;

#[derive(Parser)]
#[command(name = "nutrilog")]
#[command(version)]
#[command(about = "Track daily nutrition against a nutrilog server", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Log ledger activity to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the food catalog
    Food(FoodCommand),

    /// Record, change or remove consumed foods
    Log(LogCommand),

    /// Show a day's totals, meals and history
    Today(TodayCommand),

    /// Show a day and follow changes made elsewhere
    Watch(WatchCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "nutrilog=debug,nutrilog_core=debug"
    } else {
        "nutrilog=warn,nutrilog_core=warn"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Food(cmd)) => cmd.run(&config).await?,
        Some(Commands::Log(cmd)) => cmd.run(&config).await?,
        Some(Commands::Today(cmd)) => cmd.run(&config).await?,
        Some(Commands::Watch(cmd)) => cmd.run(&config).await?,
        Some(Commands::Config(cmd)) => cmd.run(&config)?,
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
