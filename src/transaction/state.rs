// ============================================================================
// Transaction State Management
// ============================================================================
//
// Each transaction moves through defined states: Active -> Committed/Aborted.
// A terminal state is final; a second end request is an error.
//
// ============================================================================

use crate::core::{DbError, Result};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global transaction ID counter
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Generate a new unique transaction ID
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Transaction state
///
/// State transitions:
/// ```text
/// Active ──commit──> Committed
///   │
///   └──abort───> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is open and accepts reads and writes
    Active,

    /// Transaction has been successfully committed
    Committed,

    /// Transaction has been aborted and its writes discarded
    Aborted,
}

impl TransactionState {
    /// Check if transaction can execute operations
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    /// Check if transaction is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }

    /// Fails unless the transaction is still active.
    pub fn ensure_active(&self, id: TransactionId) -> Result<()> {
        if !self.is_active() {
            return Err(DbError::TransactionError(format!(
                "transaction {} is already {}",
                id, self
            )));
        }
        Ok(())
    }

    /// Moves to a terminal state: `Committed` when `failed` is false,
    /// `Aborted` otherwise.
    pub fn finish(&mut self, id: TransactionId, failed: bool) -> Result<TransactionState> {
        self.ensure_active(id)?;
        *self = if failed {
            TransactionState::Aborted
        } else {
            TransactionState::Committed
        };
        Ok(*self)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_id_generation() {
        let id1 = TransactionId::new();
        let id2 = TransactionId::new();
        assert!(id2.as_u64() > id1.as_u64());
    }

    #[test]
    fn test_transaction_lifecycle() {
        let id = TransactionId::new();
        let mut state = TransactionState::Active;
        assert!(state.is_active());
        assert!(!state.is_terminal());

        assert_eq!(state.finish(id, false).unwrap(), TransactionState::Committed);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_cannot_end_twice() {
        let id = TransactionId::new();
        let mut state = TransactionState::Active;

        state.finish(id, true).unwrap();
        assert_eq!(state, TransactionState::Aborted);
        assert!(matches!(
            state.finish(id, false),
            Err(DbError::TransactionError(_))
        ));
    }
}
