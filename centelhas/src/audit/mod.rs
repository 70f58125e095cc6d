//! Audit trail of privileged actions.
//!
//! Audit entries are append-only like ledger entries but live on a separate
//! channel: recording never gates a ledger operation and a ledger operation
//! never waits for its audit entry. Operations record after their own unit
//! of work has committed; a failed audit write is logged and dropped.

pub mod models;
pub mod recorder;

pub use models::{AuditLogEntry, AuditLogId, AuditRecord};
pub use recorder::AuditRecorder;
