mod config_cmd;
mod food;
mod log;
mod today;
mod watch;

pub use config_cmd::ConfigCommand;
pub use food::FoodCommand;
pub use log::LogCommand;
pub use today::TodayCommand;
pub use watch::WatchCommand;

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use clap::ValueEnum;
use nutrilog_core::{HttpStore, Ledger, ReconcileReport};

use crate::config::Config;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Parses a `YYYY-MM-DD` argument, defaulting to today.
fn parse_date(date: Option<&str>) -> Result<NaiveDate, Box<dyn std::error::Error>> {
    match date {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|_| format!("Invalid date '{}'. Use YYYY-MM-DD format.", s).into()),
        None => Ok(Local::now().date_naive()),
    }
}

/// Opens the configured user's ledger for `date` against the configured server.
async fn open_ledger(
    config: &Config,
    date: NaiveDate,
) -> Result<(Ledger<HttpStore>, Arc<HttpStore>), Box<dyn std::error::Error>> {
    let store = Arc::new(config.store()?);
    let user_id = config.require_user_id()?;

    let (ledger, report) =
        Ledger::open(Arc::clone(&store), user_id, date, config.ledger_options()).await;
    warn_incomplete(&report);

    Ok((ledger, store))
}

fn warn_incomplete(report: &ReconcileReport) {
    for failure in &report.failures {
        eprintln!("Warning: {}", failure);
    }
}
