//! Turns remote change notifications into debounced reconciliations.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::ledger::Ledger;
use crate::store::{ChangeFeed, RemoteStore};

#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// Quiet period after the last signal before reconciling.
    pub debounce: Duration,
    /// Pause before resubscribing once the feed ends.
    pub retry_delay: Duration,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Keeps a ledger in step with changes made elsewhere.
pub struct ChangeFeedListener;

impl ChangeFeedListener {
    /// Subscribes to `feed` for the ledger's user and reconciles the ledger
    /// after each burst of signals. Stops when the handle is unsubscribed or dropped.
    pub fn spawn<S, F>(ledger: Ledger<S>, feed: Arc<F>, options: ListenerOptions) -> FeedHandle
    where
        S: RemoteStore,
        F: ChangeFeed,
    {
        let task = tokio::spawn(listen(ledger, feed, options));
        FeedHandle { task: Some(task) }
    }
}

async fn listen<S: RemoteStore, F: ChangeFeed>(
    ledger: Ledger<S>,
    feed: Arc<F>,
    options: ListenerOptions,
) {
    let user_id = ledger.user_id();
    let mut resubscribed = false;

    loop {
        let mut signals = match feed.subscribe(&user_id).await {
            Ok(signals) => signals,
            Err(e) => {
                tracing::warn!(
                    "Could not subscribe to changes for {}: {}; retrying in {:?}",
                    user_id,
                    e,
                    options.retry_delay
                );
                tokio::time::sleep(options.retry_delay).await;
                resubscribed = true;
                continue;
            }
        };
        tracing::debug!("Listening for changes to {}", user_id);
        if resubscribed {
            // Anything missed while disconnected.
            ledger.refresh().await;
        }

        let mut deadline: Option<Instant> = None;
        loop {
            let quiet = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                signal = signals.next() => match signal {
                    Some(_) => deadline = Some(Instant::now() + options.debounce),
                    None => break,
                },
                _ = quiet => {
                    deadline = None;
                    tracing::debug!("Remote change for {}; reconciling", user_id);
                    ledger.refresh().await;
                }
            }
        }

        if deadline.is_some() {
            ledger.refresh().await;
        }
        tracing::warn!(
            "Change feed for {} ended; resubscribing in {:?}",
            user_id,
            options.retry_delay
        );
        tokio::time::sleep(options.retry_delay).await;
        resubscribed = true;
    }
}

/// Owns the listener task.
pub struct FeedHandle {
    task: Option<JoinHandle<()>>,
}

impl FeedHandle {
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
