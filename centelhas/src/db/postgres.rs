//! PostgreSQL store.
//!
//! Every unit of work runs at `SERIALIZABLE` isolation with a bounded
//! `lock_timeout`. Row locks are taken with `SELECT ... FOR UPDATE`;
//! membership rows are always locked in ascending ID order. Serialization
//! failures, deadlocks and lock timeouts surface as
//! [`StoreError::Conflict`] so that callers can retry.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;

use super::repository::{Store, StoreError, StoreResult, StoreTx};
use super::timeouts::{DEFAULT_LOCK_TIMEOUT, with_lock_window};
use crate::audit::{AuditLogEntry, AuditLogId, AuditRecord};
use crate::event::{
    Event, EventId, EventMembership, MembershipId, NewEvent, NewPlayer, Player, PlayerId,
};
use crate::ledger::{LedgerEntry, LedgerEntryId, NewLedgerEntry, SourceKind};
use crate::table::{NewTableSession, SessionId, Table, TableId, TableSession};

const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const LOCK_NOT_AVAILABLE: &str = "55P03";
const UNIQUE_VIOLATION: &str = "23505";
const CHECK_VIOLATION: &str = "23514";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const RAISE_EXCEPTION: &str = "P0001";

const LEDGER_COLUMNS: &str = "id, event_id, event_player_id, source_type, source_id, \
     delta_centelhas, balance_after, created_by_admin_id, created_at";
const TABLE_COLUMNS: &str = "id, event_id, created_by_player_id, status, bet_locked_at, \
     started_at, finished_at, rolled_back_at, created_at, updated_at";
const SESSION_COLUMNS: &str = "id, table_id, event_player_id, commander_name, bet_centelhas, \
     eliminator_table_player_id, is_scoop, joined_at, eliminated_at";
const MEMBERSHIP_COLUMNS: &str = "id, event_id, player_id, joined_at, is_active, current_balance";
const AUDIT_COLUMNS: &str =
    "id, admin_id, event_id, action, entity_type, entity_id, details_json, created_at";

/// Classify a database error by SQLSTATE
fn classify(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED | LOCK_NOT_AVAILABLE) => {
                return StoreError::Conflict(db.message().to_string());
            }
            Some(UNIQUE_VIOLATION) => return StoreError::UniqueViolation(db.message().to_string()),
            Some(CHECK_VIOLATION) => return StoreError::CheckViolation(db.message().to_string()),
            _ => {}
        }
    }
    StoreError::Database(err)
}

/// Classify an error raised while touching an append-only row
fn classify_append_only(err: sqlx::Error, collection: &'static str, id: i64) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(RAISE_EXCEPTION) && db.message().contains("append-only") {
            return StoreError::AppendOnly { collection, id };
        }
    }
    classify(err)
}

/// Classify an insert error, reporting a missing parent as not found
fn classify_insert(err: sqlx::Error, entity: &'static str, id: i64) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) {
            return StoreError::NotFound { entity, id };
        }
    }
    classify(err)
}

fn event_from_row(row: &PgRow) -> StoreResult<Event> {
    Ok(Event {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        starts_at: row.try_get("starts_at")?,
        ends_at: row.try_get("ends_at")?,
        initial_centelhas: row.try_get("initial_centelhas")?,
        created_by_admin_id: row.try_get("created_by_admin_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn player_from_row(row: &PgRow) -> StoreResult<Player> {
    Ok(Player {
        id: row.try_get("id")?,
        display_name: row.try_get("display_name")?,
        email: row.try_get("email")?,
        created_at: row.try_get("created_at")?,
    })
}

fn membership_from_row(row: &PgRow) -> StoreResult<EventMembership> {
    Ok(EventMembership {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        player_id: row.try_get("player_id")?,
        joined_at: row.try_get("joined_at")?,
        is_active: row.try_get("is_active")?,
        current_balance: row.try_get("current_balance")?,
    })
}

fn ledger_from_row(row: &PgRow) -> StoreResult<LedgerEntry> {
    let source_type: String = row.try_get("source_type")?;
    Ok(LedgerEntry {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        event_player_id: row.try_get("event_player_id")?,
        source_type: source_type
            .parse::<SourceKind>()
            .map_err(|e| StoreError::Decode(e.to_string()))?,
        source_id: row.try_get("source_id")?,
        delta_centelhas: row.try_get("delta_centelhas")?,
        balance_after: row.try_get("balance_after")?,
        created_by_admin_id: row.try_get("created_by_admin_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn table_from_row(row: &PgRow) -> StoreResult<Table> {
    let status: String = row.try_get("status")?;
    Ok(Table {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        created_by_player_id: row.try_get("created_by_player_id")?,
        status: status
            .parse()
            .map_err(|e: crate::errors::CentelhaError| StoreError::Decode(e.to_string()))?,
        bet_locked_at: row.try_get("bet_locked_at")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        rolled_back_at: row.try_get("rolled_back_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn session_from_row(row: &PgRow) -> StoreResult<TableSession> {
    Ok(TableSession {
        id: row.try_get("id")?,
        table_id: row.try_get("table_id")?,
        event_player_id: row.try_get("event_player_id")?,
        commander_name: row.try_get("commander_name")?,
        bet_centelhas: row.try_get("bet_centelhas")?,
        eliminator_table_player_id: row.try_get("eliminator_table_player_id")?,
        is_scoop: row.try_get("is_scoop")?,
        joined_at: row.try_get("joined_at")?,
        eliminated_at: row.try_get("eliminated_at")?,
    })
}

fn audit_from_row(row: &PgRow) -> StoreResult<AuditLogEntry> {
    Ok(AuditLogEntry {
        id: row.try_get("id")?,
        admin_id: row.try_get("admin_id")?,
        event_id: row.try_get("event_id")?,
        action: row.try_get("action")?,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        details_json: row.try_get("details_json")?,
        created_at: row.try_get("created_at")?,
    })
}

fn collect<T>(rows: Vec<PgRow>, decode: fn(&PgRow) -> StoreResult<T>) -> StoreResult<Vec<T>> {
    rows.iter().map(decode).collect()
}

/// PostgreSQL-backed [`Store`]
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgStore {
    /// Create a store over an existing pool with the default lock window
    pub fn new(pool: PgPool) -> Self {
        Self::with_lock_timeout(pool, DEFAULT_LOCK_TIMEOUT)
    }

    /// Create a store whose units of work give up on locks after `lock_timeout`
    pub fn with_lock_timeout(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Underlying connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let pool = &self.pool;
        let mut tx = with_lock_window(self.lock_timeout, "acquire connection", async {
            pool.begin().await.map_err(classify)
        })
        .await?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        // SET does not accept bind parameters
        let millis = self.lock_timeout.as_millis();
        sqlx::query(&format!("SET LOCAL lock_timeout = '{millis}ms'"))
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        Ok(Box::new(PgTx { tx }))
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl PgTx {
    async fn fetch_all(&mut self, sql: &str, id: i64) -> StoreResult<Vec<PgRow>> {
        sqlx::query(sql)
            .bind(id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(classify)
    }

    async fn fetch_optional(&mut self, sql: &str, id: i64) -> StoreResult<Option<PgRow>> {
        sqlx::query(sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(classify)
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn insert_event(&mut self, event: &NewEvent) -> StoreResult<Event> {
        let row = sqlx::query(
            r#"
            INSERT INTO events (name, starts_at, ends_at, initial_centelhas, created_by_admin_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, starts_at, ends_at, initial_centelhas, created_by_admin_id, created_at, updated_at
            "#,
        )
        .bind(&event.name)
        .bind(event.starts_at)
        .bind(event.ends_at)
        .bind(event.initial_centelhas)
        .bind(event.created_by_admin_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| classify_insert(e, "admin", event.created_by_admin_id))?;

        event_from_row(&row)
    }

    async fn event(&mut self, event_id: EventId) -> StoreResult<Option<Event>> {
        self.fetch_optional(
            "SELECT id, name, starts_at, ends_at, initial_centelhas, created_by_admin_id, created_at, updated_at
             FROM events WHERE id = $1",
            event_id,
        )
        .await?
        .as_ref()
        .map(event_from_row)
        .transpose()
    }

    async fn insert_player(&mut self, player: &NewPlayer) -> StoreResult<Player> {
        let row = sqlx::query(
            "INSERT INTO players (display_name, email) VALUES ($1, $2)
             RETURNING id, display_name, email, created_at",
        )
        .bind(&player.display_name)
        .bind(&player.email)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(classify)?;

        player_from_row(&row)
    }

    async fn player(&mut self, player_id: PlayerId) -> StoreResult<Option<Player>> {
        self.fetch_optional(
            "SELECT id, display_name, email, created_at FROM players WHERE id = $1",
            player_id,
        )
        .await?
        .as_ref()
        .map(player_from_row)
        .transpose()
    }

    async fn insert_membership(
        &mut self,
        event_id: EventId,
        player_id: PlayerId,
    ) -> StoreResult<EventMembership> {
        let row = sqlx::query(&format!(
            "INSERT INTO event_players (event_id, player_id) VALUES ($1, $2)
             RETURNING {MEMBERSHIP_COLUMNS}"
        ))
        .bind(event_id)
        .bind(player_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| classify_insert(e, "event or player", event_id))?;

        membership_from_row(&row)
    }

    async fn membership(
        &mut self,
        membership_id: MembershipId,
    ) -> StoreResult<Option<EventMembership>> {
        self.fetch_optional(
            &format!("SELECT {MEMBERSHIP_COLUMNS} FROM event_players WHERE id = $1"),
            membership_id,
        )
        .await?
        .as_ref()
        .map(membership_from_row)
        .transpose()
    }

    async fn membership_for_player(
        &mut self,
        event_id: EventId,
        player_id: PlayerId,
    ) -> StoreResult<Option<EventMembership>> {
        sqlx::query(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM event_players WHERE event_id = $1 AND player_id = $2"
        ))
        .bind(event_id)
        .bind(player_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(classify)?
        .as_ref()
        .map(membership_from_row)
        .transpose()
    }

    async fn lock_memberships(
        &mut self,
        membership_ids: &[MembershipId],
    ) -> StoreResult<Vec<EventMembership>> {
        let mut ids = membership_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let rows = sqlx::query(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM event_players
             WHERE id = ANY($1)
             ORDER BY id ASC
             FOR UPDATE"
        ))
        .bind(&ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(classify)?;

        collect(rows, membership_from_row)
    }

    async fn memberships_for_event(
        &mut self,
        event_id: EventId,
    ) -> StoreResult<Vec<EventMembership>> {
        let rows = self
            .fetch_all(
                &format!(
                    "SELECT {MEMBERSHIP_COLUMNS} FROM event_players WHERE event_id = $1 ORDER BY id ASC"
                ),
                event_id,
            )
            .await?;
        collect(rows, membership_from_row)
    }

    async fn set_membership_active(
        &mut self,
        membership_id: MembershipId,
        is_active: bool,
    ) -> StoreResult<()> {
        let result = sqlx::query("UPDATE event_players SET is_active = $1 WHERE id = $2")
            .bind(is_active)
            .bind(membership_id)
            .execute(&mut *self.tx)
            .await
            .map_err(classify)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "membership",
                id: membership_id,
            });
        }
        Ok(())
    }

    async fn set_cached_balance(
        &mut self,
        membership_id: MembershipId,
        balance: i64,
    ) -> StoreResult<()> {
        let result = sqlx::query("UPDATE event_players SET current_balance = $1 WHERE id = $2")
            .bind(balance)
            .bind(membership_id)
            .execute(&mut *self.tx)
            .await
            .map_err(classify)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "membership",
                id: membership_id,
            });
        }
        Ok(())
    }

    async fn insert_ledger_entry(&mut self, entry: &NewLedgerEntry) -> StoreResult<LedgerEntry> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO ledger_entries
                (event_id, event_player_id, source_type, source_id, delta_centelhas, balance_after, created_by_admin_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {LEDGER_COLUMNS}
            "#
        ))
        .bind(entry.event_id)
        .bind(entry.event_player_id)
        .bind(entry.source_type.as_str())
        .bind(entry.source_id)
        .bind(entry.delta_centelhas)
        .bind(entry.balance_after)
        .bind(entry.created_by_admin_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| classify_insert(e, "membership", entry.event_player_id))?;

        ledger_from_row(&row)
    }

    async fn latest_ledger_entry(
        &mut self,
        membership_id: MembershipId,
    ) -> StoreResult<Option<LedgerEntry>> {
        self.fetch_optional(
            &format!(
                "SELECT {LEDGER_COLUMNS} FROM ledger_entries
                 WHERE event_player_id = $1
                 ORDER BY id DESC
                 LIMIT 1"
            ),
            membership_id,
        )
        .await?
        .as_ref()
        .map(ledger_from_row)
        .transpose()
    }

    async fn ledger_entries_for_membership(
        &mut self,
        membership_id: MembershipId,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let rows = self
            .fetch_all(
                &format!(
                    "SELECT {LEDGER_COLUMNS} FROM ledger_entries WHERE event_player_id = $1 ORDER BY id ASC"
                ),
                membership_id,
            )
            .await?;
        collect(rows, ledger_from_row)
    }

    async fn ledger_entries_for_event(
        &mut self,
        event_id: EventId,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let rows = self
            .fetch_all(
                &format!(
                    "SELECT {LEDGER_COLUMNS} FROM ledger_entries WHERE event_id = $1 ORDER BY id ASC"
                ),
                event_id,
            )
            .await?;
        collect(rows, ledger_from_row)
    }

    async fn ledger_entries_for_sessions(
        &mut self,
        source_ids: &[SessionId],
    ) -> StoreResult<Vec<LedgerEntry>> {
        let kinds: Vec<String> = SourceKind::TABLE_SCOPED
            .iter()
            .map(|k| k.as_str().to_string())
            .collect();
        let rows = sqlx::query(&format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_entries
             WHERE source_type = ANY($1) AND source_id = ANY($2)
             ORDER BY id ASC"
        ))
        .bind(&kinds)
        .bind(source_ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(classify)?;

        collect(rows, ledger_from_row)
    }

    async fn update_ledger_entry(
        &mut self,
        entry_id: LedgerEntryId,
        delta: i64,
    ) -> StoreResult<()> {
        let result = sqlx::query("UPDATE ledger_entries SET delta_centelhas = $1 WHERE id = $2")
            .bind(delta)
            .bind(entry_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| classify_append_only(e, "ledger_entries", entry_id))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "ledger entry",
                id: entry_id,
            });
        }
        // only reachable if the append-only trigger was dropped
        Err(StoreError::AppendOnly {
            collection: "ledger_entries",
            id: entry_id,
        })
    }

    async fn delete_ledger_entry(&mut self, entry_id: LedgerEntryId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM ledger_entries WHERE id = $1")
            .bind(entry_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| classify_append_only(e, "ledger_entries", entry_id))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "ledger entry",
                id: entry_id,
            });
        }
        Err(StoreError::AppendOnly {
            collection: "ledger_entries",
            id: entry_id,
        })
    }

    async fn insert_table(
        &mut self,
        event_id: EventId,
        created_by: PlayerId,
    ) -> StoreResult<Table> {
        let row = sqlx::query(&format!(
            "INSERT INTO tables (event_id, created_by_player_id) VALUES ($1, $2)
             RETURNING {TABLE_COLUMNS}"
        ))
        .bind(event_id)
        .bind(created_by)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| classify_insert(e, "event", event_id))?;

        table_from_row(&row)
    }

    async fn table(&mut self, table_id: TableId) -> StoreResult<Option<Table>> {
        self.fetch_optional(
            &format!("SELECT {TABLE_COLUMNS} FROM tables WHERE id = $1"),
            table_id,
        )
        .await?
        .as_ref()
        .map(table_from_row)
        .transpose()
    }

    async fn lock_table(&mut self, table_id: TableId) -> StoreResult<Option<Table>> {
        self.fetch_optional(
            &format!("SELECT {TABLE_COLUMNS} FROM tables WHERE id = $1 FOR UPDATE"),
            table_id,
        )
        .await?
        .as_ref()
        .map(table_from_row)
        .transpose()
    }

    async fn tables_for_event(&mut self, event_id: EventId) -> StoreResult<Vec<Table>> {
        let rows = self
            .fetch_all(
                &format!("SELECT {TABLE_COLUMNS} FROM tables WHERE event_id = $1 ORDER BY id ASC"),
                event_id,
            )
            .await?;
        collect(rows, table_from_row)
    }

    async fn update_table(&mut self, table: &Table) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tables
            SET status = $1, bet_locked_at = $2, started_at = $3, finished_at = $4,
                rolled_back_at = $5, updated_at = $6
            WHERE id = $7
            "#,
        )
        .bind(table.status.as_str())
        .bind(table.bet_locked_at)
        .bind(table.started_at)
        .bind(table.finished_at)
        .bind(table.rolled_back_at)
        .bind(table.updated_at)
        .bind(table.id)
        .execute(&mut *self.tx)
        .await
        .map_err(classify)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "table",
                id: table.id,
            });
        }
        Ok(())
    }

    async fn insert_session(&mut self, session: &NewTableSession) -> StoreResult<TableSession> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO table_players (table_id, event_player_id, commander_name, bet_centelhas)
            VALUES ($1, $2, $3, $4)
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(session.table_id)
        .bind(session.event_player_id)
        .bind(&session.commander_name)
        .bind(session.bet_centelhas)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| classify_insert(e, "table", session.table_id))?;

        session_from_row(&row)
    }

    async fn session(&mut self, session_id: SessionId) -> StoreResult<Option<TableSession>> {
        self.fetch_optional(
            &format!("SELECT {SESSION_COLUMNS} FROM table_players WHERE id = $1"),
            session_id,
        )
        .await?
        .as_ref()
        .map(session_from_row)
        .transpose()
    }

    async fn sessions_for_table(&mut self, table_id: TableId) -> StoreResult<Vec<TableSession>> {
        let rows = self
            .fetch_all(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM table_players WHERE table_id = $1 ORDER BY id ASC"
                ),
                table_id,
            )
            .await?;
        collect(rows, session_from_row)
    }

    async fn update_session(&mut self, session: &TableSession) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE table_players
            SET eliminator_table_player_id = $1, is_scoop = $2, eliminated_at = $3
            WHERE id = $4
            "#,
        )
        .bind(session.eliminator_table_player_id)
        .bind(session.is_scoop)
        .bind(session.eliminated_at)
        .bind(session.id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            classify_insert(
                e,
                "table session",
                session.eliminator_table_player_id.unwrap_or(session.id),
            )
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "table session",
                id: session.id,
            });
        }
        Ok(())
    }

    async fn insert_audit_log(&mut self, record: &AuditRecord) -> StoreResult<AuditLogEntry> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO audit_logs (admin_id, event_id, action, entity_type, entity_id, details_json)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {AUDIT_COLUMNS}
            "#
        ))
        .bind(record.admin_id)
        .bind(record.event_id)
        .bind(&record.action)
        .bind(&record.entity_type)
        .bind(record.entity_id)
        .bind(&record.details)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| classify_insert(e, "admin", record.admin_id))?;

        audit_from_row(&row)
    }

    async fn audit_logs_for_event(
        &mut self,
        event_id: EventId,
    ) -> StoreResult<Vec<AuditLogEntry>> {
        let rows = self
            .fetch_all(
                &format!("SELECT {AUDIT_COLUMNS} FROM audit_logs WHERE event_id = $1 ORDER BY id ASC"),
                event_id,
            )
            .await?;
        collect(rows, audit_from_row)
    }

    async fn update_audit_log(&mut self, log_id: AuditLogId, action: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE audit_logs SET action = $1 WHERE id = $2")
            .bind(action)
            .bind(log_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| classify_append_only(e, "audit_logs", log_id))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "audit log",
                id: log_id,
            });
        }
        Err(StoreError::AppendOnly {
            collection: "audit_logs",
            id: log_id,
        })
    }

    async fn delete_audit_log(&mut self, log_id: AuditLogId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM audit_logs WHERE id = $1")
            .bind(log_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| classify_append_only(e, "audit_logs", log_id))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "audit log",
                id: log_id,
            });
        }
        Err(StoreError::AppendOnly {
            collection: "audit_logs",
            id: log_id,
        })
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(classify)
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await.map_err(classify)
    }
}
