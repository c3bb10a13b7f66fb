use std::sync::Arc;

use clap::Args;
use nutrilog_core::ChangeFeedListener;

use super::today::render_state;
use super::{open_ledger, parse_date};
use crate::config::Config;

#[derive(Args)]
pub struct WatchCommand {
    /// Date (YYYY-MM-DD), defaults to today
    #[arg(long, short)]
    date: Option<String>,
}

impl WatchCommand {
    /// Prints the ledger, then reprints it whenever the server reports a change.
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let (ledger, store) = open_ledger(config, parse_date(self.date.as_deref())?).await?;
        let mut rx = ledger.subscribe();
        let handle =
            ChangeFeedListener::spawn(ledger.clone(), Arc::clone(&store), config.listener_options());

        print!("{}", render_state(&rx.borrow_and_update()));
        println!("\nWatching for changes (Ctrl-C to stop)...");

        loop {
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = rx.borrow_and_update().clone();
                    if state.is_recalculating() {
                        continue;
                    }
                    println!();
                    print!("{}", render_state(&state));
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        handle.unsubscribe();
        ledger.close();
        Ok(())
    }
}
