//! Per-user change notifications.
//!
//! Every successful write to a user's records is announced on that user's
//! channel; each connected change-feed socket holds one receiver.

use std::collections::HashMap;

use tokio::sync::{broadcast, RwLock};

/// A user's records changed; subscribers should re-read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Changed;

/// Tracks all feed subscribers for broadcasting changes.
pub struct FeedHub {
    /// Broadcast channels keyed by user id
    channels: RwLock<HashMap<String, broadcast::Sender<Changed>>>,
}

impl FeedHub {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribes to changes of a user's records.
    pub async fn subscribe(&self, user_id: &str) -> broadcast::Receiver<Changed> {
        let mut channels = self.channels.write().await;

        if let Some(sender) = channels.get(user_id) {
            sender.subscribe()
        } else {
            let (sender, receiver) = broadcast::channel(16);
            channels.insert(user_id.to_string(), sender);
            receiver
        }
    }

    /// Announces a change to every subscriber of `user_id`.
    pub async fn notify(&self, user_id: &str) {
        let stale = {
            let channels = self.channels.read().await;
            match channels.get(user_id) {
                // A send error means nobody listens any more.
                Some(sender) => sender.send(Changed).is_err(),
                None => false,
            }
        };

        if stale {
            let mut channels = self.channels.write().await;
            if channels
                .get(user_id)
                .is_some_and(|sender| sender.receiver_count() == 0)
            {
                channels.remove(user_id);
            }
        }
    }

    #[cfg(test)]
    async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn receiver_count(&self, user_id: &str) -> usize {
        self.channels
            .read()
            .await
            .get(user_id)
            .map_or(0, |sender| sender.receiver_count())
    }
}

impl Default for FeedHub {
    fn default() -> Self {
        Self::new()
    }
}
