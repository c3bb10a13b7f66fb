use std::fmt::Write;

use clap::Args;
use nutrilog_core::{LedgerState, MealType};

use super::{open_ledger, parse_date, OutputFormat};
use crate::config::Config;

#[derive(Args)]
pub struct TodayCommand {
    /// Date (YYYY-MM-DD), defaults to today
    #[arg(long, short)]
    date: Option<String>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl TodayCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let (ledger, _store) = open_ledger(config, parse_date(self.date.as_deref())?).await?;
        let state = ledger.snapshot();
        ledger.close();

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&state)?),
            OutputFormat::Text => print!("{}", render_state(&state)),
        }
        Ok(())
    }
}

/// Renders the day's totals, meals with their items, and the history window.
pub(crate) fn render_state(state: &LedgerState) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "{} ({})", state.date(), state.user_id());
    let _ = writeln!(out, "{}", "=".repeat(40));
    if state.is_loading() {
        let _ = writeln!(out, "Loading...");
        return out;
    }
    let _ = writeln!(out, "Day: {}", state.day());

    for meal_type in MealType::ALL {
        let Some(meal) = state.meal(meal_type) else {
            continue;
        };
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", meal);
        for item in state.items().iter().filter(|i| i.meal_type == meal_type) {
            let _ = writeln!(out, "  {}", item);
        }
    }

    if state.items().is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Nothing recorded.");
    }

    if !state.history().is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "History");
        for day in state.history() {
            let _ = writeln!(out, "  {}", day);
        }
    }

    out
}
