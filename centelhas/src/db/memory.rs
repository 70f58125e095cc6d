//! In-memory store.
//!
//! Every unit of work holds the whole store exclusively, so transactions are
//! trivially serializable. Writes go to a private working copy that replaces
//! the shared state only on commit. Lock acquisition is bounded: a caller
//! that cannot get the store within the lock window fails with
//! [`StoreError::Conflict`].

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;

use super::append_only::AppendOnlyLog;
use super::repository::{Store, StoreError, StoreResult, StoreTx};
use super::timeouts::DEFAULT_LOCK_TIMEOUT;
use crate::audit::{AuditLogEntry, AuditLogId, AuditRecord};
use crate::event::{
    Event, EventId, EventMembership, MembershipId, NewEvent, NewPlayer, Player, PlayerId,
};
use crate::ledger::{LedgerEntry, LedgerEntryId, NewLedgerEntry};
use crate::table::{NewTableSession, SessionId, Table, TableId, TableSession, TableStatus};

#[derive(Debug, Clone, Default)]
struct Sequences {
    events: i64,
    players: i64,
    memberships: i64,
    tables: i64,
    sessions: i64,
}

fn next(seq: &mut i64) -> i64 {
    *seq += 1;
    *seq
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    seq: Sequences,
    events: BTreeMap<EventId, Event>,
    players: BTreeMap<PlayerId, Player>,
    memberships: BTreeMap<MembershipId, EventMembership>,
    tables: BTreeMap<TableId, Table>,
    sessions: BTreeMap<SessionId, TableSession>,
    ledger: AppendOnlyLog<LedgerEntry>,
    audit: AppendOnlyLog<AuditLogEntry>,
}

/// In-memory [`Store`] implementation
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    lock_timeout: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store with the default lock window
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Create an empty store that gives up waiting for the store after `lock_timeout`
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            lock_timeout,
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = timeout(self.lock_timeout, Arc::clone(&self.state).lock_owned())
            .await
            .map_err(|_| {
                StoreError::Conflict(format!(
                    "store busy: lock not acquired within {:?}",
                    self.lock_timeout
                ))
            })?;
        let work = guard.clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
}

impl MemoryTx {
    fn membership_mut(&mut self, id: MembershipId) -> StoreResult<&mut EventMembership> {
        self.work
            .memberships
            .get_mut(&id)
            .ok_or(StoreError::NotFound {
                entity: "membership",
                id,
            })
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn insert_event(&mut self, event: &NewEvent) -> StoreResult<Event> {
        if event.initial_centelhas < 0 {
            return Err(StoreError::CheckViolation(
                "events_initial_centelhas_check".to_string(),
            ));
        }
        let now = Utc::now();
        let id = next(&mut self.work.seq.events);
        let row = Event {
            id,
            name: event.name.clone(),
            starts_at: event.starts_at,
            ends_at: event.ends_at,
            initial_centelhas: event.initial_centelhas,
            created_by_admin_id: event.created_by_admin_id,
            created_at: now,
            updated_at: now,
        };
        self.work.events.insert(id, row.clone());
        Ok(row)
    }

    async fn event(&mut self, event_id: EventId) -> StoreResult<Option<Event>> {
        Ok(self.work.events.get(&event_id).cloned())
    }

    async fn insert_player(&mut self, player: &NewPlayer) -> StoreResult<Player> {
        if let Some(email) = &player.email {
            if self
                .work
                .players
                .values()
                .any(|p| p.email.as_ref() == Some(email))
            {
                return Err(StoreError::UniqueViolation(format!(
                    "email {email} is already registered"
                )));
            }
        }
        let id = next(&mut self.work.seq.players);
        let row = Player {
            id,
            display_name: player.display_name.clone(),
            email: player.email.clone(),
            created_at: Utc::now(),
        };
        self.work.players.insert(id, row.clone());
        Ok(row)
    }

    async fn player(&mut self, player_id: PlayerId) -> StoreResult<Option<Player>> {
        Ok(self.work.players.get(&player_id).cloned())
    }

    async fn insert_membership(
        &mut self,
        event_id: EventId,
        player_id: PlayerId,
    ) -> StoreResult<EventMembership> {
        if !self.work.events.contains_key(&event_id) {
            return Err(StoreError::NotFound {
                entity: "event",
                id: event_id,
            });
        }
        if !self.work.players.contains_key(&player_id) {
            return Err(StoreError::NotFound {
                entity: "player",
                id: player_id,
            });
        }
        if self
            .work
            .memberships
            .values()
            .any(|m| m.event_id == event_id && m.player_id == player_id)
        {
            return Err(StoreError::UniqueViolation(format!(
                "player {player_id} already joined event {event_id}"
            )));
        }
        let id = next(&mut self.work.seq.memberships);
        let row = EventMembership {
            id,
            event_id,
            player_id,
            joined_at: Utc::now(),
            is_active: true,
            current_balance: None,
        };
        self.work.memberships.insert(id, row.clone());
        Ok(row)
    }

    async fn membership(
        &mut self,
        membership_id: MembershipId,
    ) -> StoreResult<Option<EventMembership>> {
        Ok(self.work.memberships.get(&membership_id).cloned())
    }

    async fn membership_for_player(
        &mut self,
        event_id: EventId,
        player_id: PlayerId,
    ) -> StoreResult<Option<EventMembership>> {
        Ok(self
            .work
            .memberships
            .values()
            .find(|m| m.event_id == event_id && m.player_id == player_id)
            .cloned())
    }

    async fn lock_memberships(
        &mut self,
        membership_ids: &[MembershipId],
    ) -> StoreResult<Vec<EventMembership>> {
        // the whole store is already held exclusively
        let mut ids = membership_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids
            .into_iter()
            .filter_map(|id| self.work.memberships.get(&id).cloned())
            .collect())
    }

    async fn memberships_for_event(
        &mut self,
        event_id: EventId,
    ) -> StoreResult<Vec<EventMembership>> {
        Ok(self
            .work
            .memberships
            .values()
            .filter(|m| m.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn set_membership_active(
        &mut self,
        membership_id: MembershipId,
        is_active: bool,
    ) -> StoreResult<()> {
        self.membership_mut(membership_id)?.is_active = is_active;
        Ok(())
    }

    async fn set_cached_balance(
        &mut self,
        membership_id: MembershipId,
        balance: i64,
    ) -> StoreResult<()> {
        self.membership_mut(membership_id)?.current_balance = Some(balance);
        Ok(())
    }

    async fn insert_ledger_entry(&mut self, entry: &NewLedgerEntry) -> StoreResult<LedgerEntry> {
        if entry.delta_centelhas == 0 {
            return Err(StoreError::CheckViolation(
                "ledger_entries_delta_check".to_string(),
            ));
        }
        if !self.work.events.contains_key(&entry.event_id) {
            return Err(StoreError::NotFound {
                entity: "event",
                id: entry.event_id,
            });
        }
        if !self.work.memberships.contains_key(&entry.event_player_id) {
            return Err(StoreError::NotFound {
                entity: "membership",
                id: entry.event_player_id,
            });
        }
        let now = Utc::now();
        let row = self.work.ledger.append(|id| LedgerEntry {
            id,
            event_id: entry.event_id,
            event_player_id: entry.event_player_id,
            source_type: entry.source_type,
            source_id: entry.source_id,
            delta_centelhas: entry.delta_centelhas,
            balance_after: Some(entry.balance_after),
            created_by_admin_id: entry.created_by_admin_id,
            created_at: now,
        });
        Ok(row.clone())
    }

    async fn latest_ledger_entry(
        &mut self,
        membership_id: MembershipId,
    ) -> StoreResult<Option<LedgerEntry>> {
        Ok(self
            .work
            .ledger
            .iter()
            .rev()
            .find(|e| e.event_player_id == membership_id)
            .cloned())
    }

    async fn ledger_entries_for_membership(
        &mut self,
        membership_id: MembershipId,
    ) -> StoreResult<Vec<LedgerEntry>> {
        Ok(self
            .work
            .ledger
            .iter()
            .filter(|e| e.event_player_id == membership_id)
            .cloned()
            .collect())
    }

    async fn ledger_entries_for_event(
        &mut self,
        event_id: EventId,
    ) -> StoreResult<Vec<LedgerEntry>> {
        Ok(self
            .work
            .ledger
            .iter()
            .filter(|e| e.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn ledger_entries_for_sessions(
        &mut self,
        source_ids: &[SessionId],
    ) -> StoreResult<Vec<LedgerEntry>> {
        Ok(self
            .work
            .ledger
            .iter()
            .filter(|e| {
                e.source_type.is_table_scoped()
                    && e.source_id.is_some_and(|id| source_ids.contains(&id))
            })
            .cloned()
            .collect())
    }

    async fn update_ledger_entry(
        &mut self,
        entry_id: LedgerEntryId,
        _delta: i64,
    ) -> StoreResult<()> {
        if self.work.ledger.contains(entry_id) {
            Err(StoreError::AppendOnly {
                collection: "ledger_entries",
                id: entry_id,
            })
        } else {
            Err(StoreError::NotFound {
                entity: "ledger entry",
                id: entry_id,
            })
        }
    }

    async fn delete_ledger_entry(&mut self, entry_id: LedgerEntryId) -> StoreResult<()> {
        self.update_ledger_entry(entry_id, 0).await
    }

    async fn insert_table(
        &mut self,
        event_id: EventId,
        created_by: PlayerId,
    ) -> StoreResult<Table> {
        if !self.work.events.contains_key(&event_id) {
            return Err(StoreError::NotFound {
                entity: "event",
                id: event_id,
            });
        }
        let now = Utc::now();
        let id = next(&mut self.work.seq.tables);
        let row = Table {
            id,
            event_id,
            created_by_player_id: created_by,
            status: TableStatus::Draft,
            bet_locked_at: None,
            started_at: None,
            finished_at: None,
            rolled_back_at: None,
            created_at: now,
            updated_at: now,
        };
        self.work.tables.insert(id, row.clone());
        Ok(row)
    }

    async fn table(&mut self, table_id: TableId) -> StoreResult<Option<Table>> {
        Ok(self.work.tables.get(&table_id).cloned())
    }

    async fn lock_table(&mut self, table_id: TableId) -> StoreResult<Option<Table>> {
        self.table(table_id).await
    }

    async fn tables_for_event(&mut self, event_id: EventId) -> StoreResult<Vec<Table>> {
        Ok(self
            .work
            .tables
            .values()
            .filter(|t| t.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn update_table(&mut self, table: &Table) -> StoreResult<()> {
        if !table.timestamps_consistent() {
            return Err(StoreError::CheckViolation("tables_status_check".to_string()));
        }
        let row = self
            .work
            .tables
            .get_mut(&table.id)
            .ok_or(StoreError::NotFound {
                entity: "table",
                id: table.id,
            })?;
        *row = table.clone();
        Ok(())
    }

    async fn insert_session(&mut self, session: &NewTableSession) -> StoreResult<TableSession> {
        if session.bet_centelhas <= 0 {
            return Err(StoreError::CheckViolation(
                "table_players_bet_centelhas_check".to_string(),
            ));
        }
        if !self.work.tables.contains_key(&session.table_id) {
            return Err(StoreError::NotFound {
                entity: "table",
                id: session.table_id,
            });
        }
        if self
            .work
            .sessions
            .values()
            .any(|s| s.table_id == session.table_id && s.event_player_id == session.event_player_id)
        {
            return Err(StoreError::UniqueViolation(format!(
                "membership {} already joined table {}",
                session.event_player_id, session.table_id
            )));
        }
        let id = next(&mut self.work.seq.sessions);
        let row = TableSession {
            id,
            table_id: session.table_id,
            event_player_id: session.event_player_id,
            commander_name: session.commander_name.clone(),
            bet_centelhas: session.bet_centelhas,
            eliminator_table_player_id: None,
            is_scoop: false,
            joined_at: Utc::now(),
            eliminated_at: None,
        };
        self.work.sessions.insert(id, row.clone());
        Ok(row)
    }

    async fn session(&mut self, session_id: SessionId) -> StoreResult<Option<TableSession>> {
        Ok(self.work.sessions.get(&session_id).cloned())
    }

    async fn sessions_for_table(&mut self, table_id: TableId) -> StoreResult<Vec<TableSession>> {
        Ok(self
            .work
            .sessions
            .values()
            .filter(|s| s.table_id == table_id)
            .cloned()
            .collect())
    }

    async fn update_session(&mut self, session: &TableSession) -> StoreResult<()> {
        if let Some(eliminator) = session.eliminator_table_player_id {
            if !self.work.sessions.contains_key(&eliminator) {
                return Err(StoreError::NotFound {
                    entity: "table session",
                    id: eliminator,
                });
            }
        }
        let row = self
            .work
            .sessions
            .get_mut(&session.id)
            .ok_or(StoreError::NotFound {
                entity: "table session",
                id: session.id,
            })?;
        *row = session.clone();
        Ok(())
    }

    async fn insert_audit_log(&mut self, record: &AuditRecord) -> StoreResult<AuditLogEntry> {
        let now = Utc::now();
        let row = self.work.audit.append(|id| AuditLogEntry {
            id,
            admin_id: record.admin_id,
            event_id: record.event_id,
            action: record.action.clone(),
            entity_type: record.entity_type.clone(),
            entity_id: record.entity_id,
            details_json: record.details.clone(),
            created_at: now,
        });
        Ok(row.clone())
    }

    async fn audit_logs_for_event(
        &mut self,
        event_id: EventId,
    ) -> StoreResult<Vec<AuditLogEntry>> {
        Ok(self
            .work
            .audit
            .iter()
            .filter(|a| a.event_id == Some(event_id))
            .cloned()
            .collect())
    }

    async fn update_audit_log(&mut self, log_id: AuditLogId, _action: &str) -> StoreResult<()> {
        if self.work.audit.contains(log_id) {
            Err(StoreError::AppendOnly {
                collection: "audit_logs",
                id: log_id,
            })
        } else {
            Err(StoreError::NotFound {
                entity: "audit log",
                id: log_id,
            })
        }
    }

    async fn delete_audit_log(&mut self, log_id: AuditLogId) -> StoreResult<()> {
        self.update_audit_log(log_id, "").await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
