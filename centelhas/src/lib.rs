//! # Centelhas
//!
//! Ledger-backed balance accounting for elimination-style card game events.
//!
//! Players join a time-boxed event with an allotment of centelhas, form
//! tables inside it, wager part of their balance and win it back through
//! eliminations and scoops. Every balance movement is an immutable ledger
//! entry; balances cached on memberships are derived from the ledger inside
//! the same unit of work and can always be re-derived from it.
//!
//! ## Core Modules
//!
//! - [`ledger`]: Append-only ledger and the [`LedgerEngine`]
//! - [`balance`]: Cached balance reads and reconciliation
//! - [`event`]: Events, players and memberships
//! - [`table`]: Table lifecycle, sessions and pot accounting
//! - [`audit`]: Append-only trail of privileged actions
//! - [`db`]: Storage traits, PostgreSQL and in-memory stores
//!
//! ## Example
//!
//! ```no_run
//! use centelhas::{Engine, EngineConfig};
//! use centelhas::event::{NewEvent, NewPlayer};
//!
//! # async fn example() -> Result<(), centelhas::CentelhaError> {
//! let engine = Engine::in_memory(EngineConfig::default());
//!
//! let event = engine
//!     .registry()
//!     .create_event(NewEvent {
//!         name: "Friday Commander".to_string(),
//!         starts_at: chrono::Utc::now(),
//!         ends_at: None,
//!         initial_centelhas: 1_000,
//!         created_by_admin_id: 1,
//!     })
//!     .await?;
//! let player = engine
//!     .registry()
//!     .register_player(NewPlayer {
//!         display_name: "Lia".to_string(),
//!         email: None,
//!     })
//!     .await?;
//! let membership = engine.registry().join_event(event.id, player.id).await?;
//!
//! assert_eq!(engine.balances().balance(membership.id).await?, 1_000);
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod balance;
pub mod config;
pub mod db;
pub mod engine;
pub mod errors;
pub mod event;
pub mod ledger;
pub mod retry;
pub mod table;

pub use audit::AuditRecorder;
pub use balance::{BalanceCache, ReconciliationReport};
pub use config::{EngineConfig, RetryPolicy};
pub use engine::{Conservation, Engine};
pub use errors::{CentelhaError, CentelhaResult};
pub use event::EventRegistry;
pub use ledger::LedgerEngine;
pub use table::TableManager;
