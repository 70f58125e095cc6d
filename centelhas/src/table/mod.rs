//! Tables: lifecycle state machine, sessions and pot accounting.
//!
//! A table moves through `draft -> started -> finished | rolled_back`, or
//! to `void` from either non-terminal status. Participants join with a bet
//! while the roster is open; the bet is debited as a `table_buy_in` entry
//! whose source is the new session. Centelhas leave the pot only through
//! elimination and scoop credits to other participants, or through
//! refunds when a participant leaves or the table is unwound.
//!
//! ## Example
//!
//! ```no_run
//! use centelhas::db::MemoryStore;
//! use centelhas::config::RetryPolicy;
//! use centelhas::table::{JoinTable, TableManager};
//! use std::sync::Arc;
//!
//! # async fn example(event_id: i64, creator: i64, a: i64, b: i64) -> Result<(), Box<dyn std::error::Error>> {
//! let tables = TableManager::new(Arc::new(MemoryStore::new()), RetryPolicy::default());
//!
//! let table = tables.create_table(event_id, creator).await?;
//! let alice = tables
//!     .join_table(JoinTable {
//!         table_id: table.id,
//!         membership_id: a,
//!         commander_name: "Atraxa".to_string(),
//!         bet_centelhas: 100,
//!     })
//!     .await?;
//! let bob = tables
//!     .join_table(JoinTable {
//!         table_id: table.id,
//!         membership_id: b,
//!         commander_name: "Krenko".to_string(),
//!         bet_centelhas: 100,
//!     })
//!     .await?;
//!
//! tables.lock_bets(table.id).await?;
//! tables.start_table(table.id).await?;
//! tables.eliminate(bob.id, alice.id).await?;
//! tables.scoop(bob.id).await?;
//! tables.finish_table(table.id).await?;
//! # Ok(())
//! # }
//! ```

pub mod lifecycle;
pub mod manager;
pub mod models;
pub mod pot;

pub use lifecycle::{MIN_PARTICIPANTS, Transition};
pub use manager::TableManager;
pub use models::{
    Elimination, JoinTable, NewTableSession, Scoop, SessionId, Table, TableId, TableSession,
    TableStatus, TransitionOutcome,
};
pub use pot::PotLedger;
