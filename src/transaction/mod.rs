// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Transaction identity and lifecycle shared by storage backends.
//
// ============================================================================

pub mod state;

pub use state::{TransactionId, TransactionState};
