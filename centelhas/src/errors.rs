//! Engine error types.

use thiserror::Error;

use crate::db::StoreError;
use crate::table::TableStatus;

/// Errors surfaced by every engine operation.
///
/// A rejected operation never leaves partial effects behind: the unit of
/// work it ran in is discarded before the error reaches the caller.
#[derive(Debug, Error)]
pub enum CentelhaError {
    /// Malformed input (non-positive bet, zero delta, wrong sign for a source kind...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Applying the delta would drive the membership balance negative
    #[error("Insufficient balance for membership {membership_id}: available {available}, required {required}")]
    InsufficientBalance {
        membership_id: i64,
        available: i64,
        required: i64,
    },

    /// Table lifecycle rule violated
    #[error("Invalid state transition for table {table_id} from {from}: {reason}")]
    InvalidStateTransition {
        table_id: i64,
        from: TableStatus,
        reason: String,
    },

    /// Concurrent modification detected; safe to retry
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Cached state diverges from the ledger; requires operator intervention
    #[error("Integrity fault: {0}")]
    IntegrityFault(String),

    /// Referenced entity is absent
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Attempt to modify or remove a committed ledger or audit row
    #[error("Append-only violation: {0}")]
    AppendOnlyViolation(String),

    /// Underlying storage failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl CentelhaError {
    /// Whether the caller may retry the operation unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, CentelhaError::Conflict(_))
    }

    /// Get a client-safe error message
    ///
    /// Storage errors are sanitized so that SQL details never leak to clients.
    pub fn client_message(&self) -> String {
        match self {
            CentelhaError::Storage(_) => "Internal server error".to_string(),
            CentelhaError::IntegrityFault(_) => "Balance integrity check failed".to_string(),
            CentelhaError::Conflict(_) => "Concurrent update, please retry".to_string(),
            _ => self.to_string(),
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: i64) -> Self {
        CentelhaError::NotFound { entity, id }
    }

    pub(crate) fn invalid_transition(
        table_id: i64,
        from: TableStatus,
        reason: impl Into<String>,
    ) -> Self {
        CentelhaError::InvalidStateTransition {
            table_id,
            from,
            reason: reason.into(),
        }
    }
}

impl From<StoreError> for CentelhaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => CentelhaError::Conflict(msg),
            StoreError::AppendOnly { collection, id } => CentelhaError::AppendOnlyViolation(
                format!("{collection} row {id} cannot be modified or removed"),
            ),
            StoreError::NotFound { entity, id } => CentelhaError::NotFound { entity, id },
            StoreError::UniqueViolation(msg) => CentelhaError::Validation(msg),
            StoreError::CheckViolation(msg) => CentelhaError::Validation(msg),
            StoreError::Database(e) => CentelhaError::Storage(e.to_string()),
            StoreError::Migration(e) => CentelhaError::Storage(e.to_string()),
            StoreError::Decode(msg) => CentelhaError::Storage(msg),
        }
    }
}

/// Result type for engine operations
pub type CentelhaResult<T> = Result<T, CentelhaError>;
