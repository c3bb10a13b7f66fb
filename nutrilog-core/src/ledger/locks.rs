//! At most one in-flight mutation per item.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::models::ItemId;

type Slot = Arc<AsyncMutex<()>>;

/// Async mutexes keyed by item id, created on demand and dropped when idle.
#[derive(Default)]
pub(crate) struct ItemLocks {
    slots: Arc<Mutex<HashMap<ItemId, Slot>>>,
}

/// Held for the whole lifetime of one item mutation.
pub(crate) struct ItemGuard {
    id: ItemId,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Arc<Mutex<HashMap<ItemId, Slot>>>,
}

impl ItemLocks {
    /// Waits until no other mutation holds `id`, then holds it.
    pub(crate) async fn lock(&self, id: &ItemId) -> ItemGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.entry(id.clone()).or_default().clone()
        };
        let guard = slot.lock_owned().await;
        ItemGuard {
            id: id.clone(),
            guard: Some(guard),
            slots: Arc::clone(&self.slots),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for ItemGuard {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        self.guard.take();
        // Only the table's own reference left: nobody holds or waits on this slot.
        if slots
            .get(&self.id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.id);
        }
    }
}
