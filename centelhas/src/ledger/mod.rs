//! Append-only ledger of balance movements.
//!
//! Every balance change in an event is a [`LedgerEntry`]. The ledger is the
//! source of truth: the balance cached on a membership is recomputed inside
//! the same unit of work as each append and can always be re-derived by
//! summing the membership's entries.
//!
//! ## Example
//!
//! ```no_run
//! use centelhas::db::MemoryStore;
//! use centelhas::ledger::{AppendRequest, LedgerEngine, SourceKind};
//! use centelhas::config::RetryPolicy;
//! use std::sync::Arc;
//!
//! # async fn example(event_id: i64, membership_id: i64) -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = LedgerEngine::new(Arc::new(MemoryStore::new()), RetryPolicy::default());
//!
//! let entry = ledger
//!     .append(AppendRequest::new(event_id, membership_id, SourceKind::BankPurchase, 200))
//!     .await?;
//! assert_eq!(ledger.recompute_balance(membership_id).await?, entry.balance_after.unwrap_or(0));
//! # Ok(())
//! # }
//! ```

pub mod manager;
pub mod models;

pub use manager::LedgerEngine;
pub use models::{AppendRequest, LedgerEntry, LedgerEntryId, NewLedgerEntry, SourceKind};
