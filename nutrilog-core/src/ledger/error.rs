//! Ledger error types.

use std::fmt;

use thiserror::Error;

use crate::models::ItemId;
use crate::store::StoreError;

/// The four independent reads of a reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Day,
    Meals,
    Items,
    History,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Day => write!(f, "day totals"),
            Resource::Meals => write!(f, "meal totals"),
            Resource::Items => write!(f, "items"),
            Resource::History => write!(f, "history"),
        }
    }
}

/// Conditions surfaced by ledger operations.
///
/// None of these is fatal: after any of them the ledger holds either the
/// untouched or the rolled-back state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// Quantity was not a finite number greater than zero. Nothing changed.
    #[error("Invalid quantity {0}: must be a finite number greater than zero")]
    InvalidQuantity(f64),
    /// The target item is not in the local ledger.
    #[error("Item not found: {0}")]
    ItemNotFound(ItemId),
    /// The target item was never confirmed by the store and no add is in flight for it.
    #[error("Item {0} has not been saved yet")]
    NotYetStored(ItemId),
    #[error("Failed to add food: {0}")]
    AddFailed(#[source] StoreError),
    #[error("Failed to update item: {0}")]
    UpdateFailed(#[source] StoreError),
    #[error("Failed to delete item: {0}")]
    DeleteFailed(#[source] StoreError),
    /// One reconciliation read failed; the others were still applied.
    #[error("Failed to refresh {resource}: {source}")]
    PartialReadFailure {
        resource: Resource,
        #[source]
        source: StoreError,
    },
}

impl LedgerError {
    /// True for failures that rolled back an optimistic write.
    pub fn is_write_failure(&self) -> bool {
        matches!(
            self,
            LedgerError::AddFailed(_) | LedgerError::UpdateFailed(_) | LedgerError::DeleteFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            LedgerError::InvalidQuantity(-1.0).to_string(),
            "Invalid quantity -1: must be a finite number greater than zero"
        );
        assert_eq!(
            LedgerError::PartialReadFailure {
                resource: Resource::Meals,
                source: StoreError::Timeout,
            }
            .to_string(),
            "Failed to refresh meal totals: Request timed out"
        );
    }

    #[test]
    fn test_is_write_failure() {
        assert!(LedgerError::AddFailed(StoreError::Timeout).is_write_failure());
        assert!(!LedgerError::InvalidQuantity(0.0).is_write_failure());
    }
}
