//! Storage trait definitions.
//!
//! The engine talks to storage only through [`Store`] and [`StoreTx`], so the
//! same accounting code runs against PostgreSQL in production and against
//! the in-memory store in tests and embedded use.
//!
//! A [`StoreTx`] is one atomic, isolated unit of work. Nothing it writes is
//! visible to anyone else until [`StoreTx::commit`]; dropping it or calling
//! [`StoreTx::rollback`] discards every write.
//!
//! Ledger and audit rows are append-only at this boundary: the update and
//! delete verbs exist so that tooling has somewhere to fail, and every
//! implementation must reject them for committed rows.

use async_trait::async_trait;
use thiserror::Error;

use crate::audit::{AuditLogEntry, AuditLogId, AuditRecord};
use crate::event::{
    Event, EventId, EventMembership, MembershipId, NewEvent, NewPlayer, Player, PlayerId,
};
use crate::ledger::{LedgerEntry, LedgerEntryId, NewLedgerEntry};
use crate::table::{NewTableSession, SessionId, Table, TableId, TableSession};

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Lock wait exceeded or serialization failure; retryable
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Write against an append-only collection
    #[error("{collection} is append-only (row {id})")]
    AppendOnly { collection: &'static str, id: i64 },

    /// Row not found
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Unique constraint violated
    #[error("Unique violation: {0}")]
    UniqueViolation(String),

    /// Check constraint violated
    #[error("Check violation: {0}")]
    CheckViolation(String),

    /// Stored value could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Entry point to a storage backend
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a new unit of work
    ///
    /// Fails with [`StoreError::Conflict`] when the backend cannot start
    /// one within its lock window.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;
}

/// One atomic unit of work against the store
#[async_trait]
pub trait StoreTx: Send {
    // events & players

    /// Insert an event
    async fn insert_event(&mut self, event: &NewEvent) -> StoreResult<Event>;

    /// Find event by ID
    async fn event(&mut self, event_id: EventId) -> StoreResult<Option<Event>>;

    /// Insert a player; duplicate emails are a unique violation
    async fn insert_player(&mut self, player: &NewPlayer) -> StoreResult<Player>;

    /// Find player by ID
    async fn player(&mut self, player_id: PlayerId) -> StoreResult<Option<Player>>;

    // memberships

    /// Insert a membership; one per (event, player)
    async fn insert_membership(
        &mut self,
        event_id: EventId,
        player_id: PlayerId,
    ) -> StoreResult<EventMembership>;

    /// Find membership by ID without locking it
    async fn membership(&mut self, membership_id: MembershipId)
    -> StoreResult<Option<EventMembership>>;

    /// Find the membership of a player in an event
    async fn membership_for_player(
        &mut self,
        event_id: EventId,
        player_id: PlayerId,
    ) -> StoreResult<Option<EventMembership>>;

    /// Lock membership rows for update in ascending ID order
    ///
    /// Returns the locked rows sorted by ID; unknown IDs are absent from the
    /// result.
    async fn lock_memberships(
        &mut self,
        membership_ids: &[MembershipId],
    ) -> StoreResult<Vec<EventMembership>>;

    /// All memberships of an event, ordered by ID
    async fn memberships_for_event(&mut self, event_id: EventId)
    -> StoreResult<Vec<EventMembership>>;

    /// Toggle the membership active flag
    async fn set_membership_active(
        &mut self,
        membership_id: MembershipId,
        is_active: bool,
    ) -> StoreResult<()>;

    /// Overwrite the cached balance
    async fn set_cached_balance(
        &mut self,
        membership_id: MembershipId,
        balance: i64,
    ) -> StoreResult<()>;

    // ledger

    /// Append a ledger entry
    async fn insert_ledger_entry(&mut self, entry: &NewLedgerEntry) -> StoreResult<LedgerEntry>;

    /// Most recent entry of a membership
    async fn latest_ledger_entry(
        &mut self,
        membership_id: MembershipId,
    ) -> StoreResult<Option<LedgerEntry>>;

    /// Entries of a membership, oldest first
    async fn ledger_entries_for_membership(
        &mut self,
        membership_id: MembershipId,
    ) -> StoreResult<Vec<LedgerEntry>>;

    /// Entries of an event, oldest first
    async fn ledger_entries_for_event(&mut self, event_id: EventId)
    -> StoreResult<Vec<LedgerEntry>>;

    /// Table-scoped entries whose source is one of `source_ids`, oldest first
    async fn ledger_entries_for_sessions(
        &mut self,
        source_ids: &[SessionId],
    ) -> StoreResult<Vec<LedgerEntry>>;

    /// Always rejected for committed rows
    async fn update_ledger_entry(&mut self, entry_id: LedgerEntryId, delta: i64)
    -> StoreResult<()>;

    /// Always rejected for committed rows
    async fn delete_ledger_entry(&mut self, entry_id: LedgerEntryId) -> StoreResult<()>;

    // tables

    /// Insert a draft table
    async fn insert_table(&mut self, event_id: EventId, created_by: PlayerId)
    -> StoreResult<Table>;

    /// Find table by ID without locking it
    async fn table(&mut self, table_id: TableId) -> StoreResult<Option<Table>>;

    /// Lock a table row so that its transitions are serialized
    async fn lock_table(&mut self, table_id: TableId) -> StoreResult<Option<Table>>;

    /// All tables of an event, ordered by ID
    async fn tables_for_event(&mut self, event_id: EventId) -> StoreResult<Vec<Table>>;

    /// Persist status and lifecycle timestamps
    async fn update_table(&mut self, table: &Table) -> StoreResult<()>;

    // table sessions

    /// Insert a session; one per (table, membership)
    async fn insert_session(&mut self, session: &NewTableSession) -> StoreResult<TableSession>;

    /// Find session by ID
    async fn session(&mut self, session_id: SessionId) -> StoreResult<Option<TableSession>>;

    /// Sessions of a table, ordered by ID
    async fn sessions_for_table(&mut self, table_id: TableId) -> StoreResult<Vec<TableSession>>;

    /// Persist elimination and scoop fields
    async fn update_session(&mut self, session: &TableSession) -> StoreResult<()>;

    // audit

    /// Append an audit log entry
    async fn insert_audit_log(&mut self, record: &AuditRecord) -> StoreResult<AuditLogEntry>;

    /// Audit entries of an event, oldest first
    async fn audit_logs_for_event(&mut self, event_id: EventId)
    -> StoreResult<Vec<AuditLogEntry>>;

    /// Always rejected for committed rows
    async fn update_audit_log(&mut self, log_id: AuditLogId, action: &str) -> StoreResult<()>;

    /// Always rejected for committed rows
    async fn delete_audit_log(&mut self, log_id: AuditLogId) -> StoreResult<()>;

    // completion

    /// Make every write of this unit visible
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Discard every write of this unit
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
