//! Table manager: lifecycle transitions, sessions and their ledger effects.

use chrono::Utc;
use log::{error, info};
use serde_json::json;
use std::sync::Arc;

use super::lifecycle::{self, Transition};
use super::models::{
    Elimination, JoinTable, NewTableSession, Scoop, SessionId, Table, TableId, TableSession,
    TransitionOutcome,
};
use super::pot::PotLedger;
use crate::audit::{AuditRecord, AuditRecorder};
use crate::config::RetryPolicy;
use crate::db::{Store, StoreTx};
use crate::errors::{CentelhaError, CentelhaResult};
use crate::event::{AdminId, EventId, PlayerId};
use crate::ledger::{AppendRequest, LedgerEngine, LedgerEntry, SourceKind};
use crate::retry::with_retry;

async fn locked_table(tx: &mut dyn StoreTx, table_id: TableId) -> CentelhaResult<Table> {
    tx.lock_table(table_id)
        .await?
        .ok_or_else(|| CentelhaError::not_found("table", table_id))
}

async fn load_session(tx: &mut dyn StoreTx, session_id: SessionId) -> CentelhaResult<TableSession> {
    tx.session(session_id)
        .await?
        .ok_or_else(|| CentelhaError::not_found("table session", session_id))
}

async fn load_pot(tx: &mut dyn StoreTx, sessions: &[TableSession]) -> CentelhaResult<PotLedger> {
    let ids: Vec<SessionId> = sessions.iter().map(|s| s.id).collect();
    let entries = tx.ledger_entries_for_sessions(&ids).await?;
    Ok(PotLedger::from_entries(sessions, &entries))
}

/// Lock every membership touched by `requests` in ascending ID order, then append
async fn append_all(
    tx: &mut dyn StoreTx,
    requests: &[AppendRequest],
) -> CentelhaResult<Vec<LedgerEntry>> {
    let ids: Vec<i64> = requests.iter().map(|r| r.membership_id).collect();
    tx.lock_memberships(&ids).await?;

    let mut entries = Vec::with_capacity(requests.len());
    for req in requests {
        entries.push(LedgerEngine::append_in(tx, req).await?);
    }
    Ok(entries)
}

/// Table manager
#[derive(Clone)]
pub struct TableManager {
    store: Arc<dyn Store>,
    retry: RetryPolicy,
    audit: AuditRecorder,
}

impl TableManager {
    /// Create a new table manager
    ///
    /// # Arguments
    ///
    /// * `store` - Storage backend
    /// * `retry` - Retry policy for conflicting units of work
    pub fn new(store: Arc<dyn Store>, retry: RetryPolicy) -> Self {
        let audit = AuditRecorder::new(Arc::clone(&store));
        Self {
            store,
            retry,
            audit,
        }
    }

    /// Create a draft table
    ///
    /// # Arguments
    ///
    /// * `event_id` - Event hosting the table
    /// * `created_by` - Player creating the table; must be an active member
    ///
    /// # Errors
    ///
    /// * `CentelhaError::NotFound` - unknown event
    /// * `CentelhaError::Validation` - creator is not an active member, or the event has ended
    pub async fn create_table(&self, event_id: EventId, created_by: PlayerId) -> CentelhaResult<Table> {
        let table = with_retry(&self.retry, "create table", move || async move {
            let mut tx = self.store.begin().await?;
            let event = tx
                .event(event_id)
                .await?
                .ok_or_else(|| CentelhaError::not_found("event", event_id))?;
            if event.has_ended_at(Utc::now()) {
                return Err(CentelhaError::Validation(format!(
                    "event {event_id} has already ended"
                )));
            }
            match tx.membership_for_player(event_id, created_by).await? {
                Some(m) if m.is_active => {}
                _ => {
                    return Err(CentelhaError::Validation(format!(
                        "player {created_by} is not an active member of event {event_id}"
                    )));
                }
            }

            let table = tx.insert_table(event_id, created_by).await?;
            tx.commit().await?;
            Ok(table)
        })
        .await?;

        info!("Player {created_by} created table {} in event {event_id}", table.id);
        Ok(table)
    }

    /// Join a draft table with a bet
    ///
    /// Creates the session and debits the bet as a `table_buy_in` entry
    /// whose source is the new session, in one unit of work.
    ///
    /// # Errors
    ///
    /// * `CentelhaError::Validation` - non-positive bet, blank commander,
    ///   inactive membership, membership of another event, already joined
    /// * `CentelhaError::InvalidStateTransition` - roster closed
    /// * `CentelhaError::InsufficientBalance` - bet exceeds the balance
    pub async fn join_table(&self, join: JoinTable) -> CentelhaResult<TableSession> {
        join.validate()?;
        let join = &join;

        let session = with_retry(&self.retry, "join table", move || async move {
            let mut tx = self.store.begin().await?;
            let table = locked_table(tx.as_mut(), join.table_id).await?;
            lifecycle::check_roster_open(&table)?;

            let membership = tx
                .membership(join.membership_id)
                .await?
                .ok_or_else(|| CentelhaError::not_found("membership", join.membership_id))?;
            if membership.event_id != table.event_id {
                return Err(CentelhaError::Validation(format!(
                    "membership {} belongs to another event",
                    membership.id
                )));
            }
            if !membership.is_active {
                return Err(CentelhaError::Validation(format!(
                    "membership {} is inactive",
                    membership.id
                )));
            }
            let event = tx
                .event(table.event_id)
                .await?
                .ok_or_else(|| CentelhaError::not_found("event", table.event_id))?;
            if event.has_ended_at(Utc::now()) {
                return Err(CentelhaError::Validation(format!(
                    "event {} has already ended",
                    event.id
                )));
            }

            let session = tx
                .insert_session(&NewTableSession {
                    table_id: table.id,
                    event_player_id: membership.id,
                    commander_name: join.commander_name.trim().to_string(),
                    bet_centelhas: join.bet_centelhas,
                })
                .await?;

            LedgerEngine::append_in(
                tx.as_mut(),
                &AppendRequest::new(
                    table.event_id,
                    membership.id,
                    SourceKind::TableBuyIn,
                    -join.bet_centelhas,
                )
                .with_source(session.id),
            )
            .await?;

            tx.commit().await?;
            Ok(session)
        })
        .await?;

        info!(
            "Membership {} joined table {} as {} betting {}",
            session.event_player_id, session.table_id, session.commander_name, session.bet_centelhas
        );
        Ok(session)
    }

    /// Leave a draft table before bets are locked
    ///
    /// The bet is refunded with a `table_rollback` entry and the session is
    /// closed without an eliminator. The session row stays, so the
    /// membership cannot join the same table again.
    pub async fn leave_table(&self, session_id: SessionId) -> CentelhaResult<TableSession> {
        let left = with_retry(&self.retry, "leave table", move || async move {
            let mut tx = self.store.begin().await?;
            let mut leaving = load_session(tx.as_mut(), session_id).await?;
            let table = locked_table(tx.as_mut(), leaving.table_id).await?;
            lifecycle::check_roster_open(&table)?;
            if !leaving.is_active() {
                return Err(CentelhaError::Validation(format!(
                    "session {session_id} already left the table"
                )));
            }

            let sessions = tx.sessions_for_table(table.id).await?;
            let pot = load_pot(tx.as_mut(), &sessions).await?;
            if let Some(refund) = pot.leave_refund(table.event_id, &leaving) {
                LedgerEngine::append_in(tx.as_mut(), &refund).await?;
            }

            leaving.eliminated_at = Some(Utc::now());
            tx.update_session(&leaving).await?;
            tx.commit().await?;
            Ok(leaving)
        })
        .await?;

        info!("Session {session_id} left table {}", left.table_id);
        Ok(left)
    }

    /// Close the roster of a draft table
    pub async fn lock_bets(&self, table_id: TableId) -> CentelhaResult<Table> {
        Ok(self.transition(table_id, Transition::LockBets, None).await?.table)
    }

    /// Start a locked draft table with at least two active participants
    pub async fn start_table(&self, table_id: TableId) -> CentelhaResult<Table> {
        Ok(self.transition(table_id, Transition::Start, None).await?.table)
    }

    /// Finish a started table whose last participant has scooped
    ///
    /// # Errors
    ///
    /// * `CentelhaError::InvalidStateTransition` - not started or unresolved
    /// * `CentelhaError::IntegrityFault` - the pot is not empty after the scoop
    pub async fn finish_table(&self, table_id: TableId) -> CentelhaResult<Table> {
        Ok(self.transition(table_id, Transition::Finish, None).await?.table)
    }

    /// Roll back a started table, refunding buy-ins and reversing payouts
    ///
    /// # Errors
    ///
    /// * `CentelhaError::InvalidStateTransition` - the table is not started
    /// * `CentelhaError::InsufficientBalance` - a payout cannot be clawed
    ///   back; nothing is changed
    pub async fn rollback_table(
        &self,
        table_id: TableId,
        admin_id: AdminId,
    ) -> CentelhaResult<TransitionOutcome> {
        self.transition(table_id, Transition::Rollback, Some(admin_id))
            .await
    }

    /// Abort a draft or started table, unwinding it like a rollback
    pub async fn void_table(
        &self,
        table_id: TableId,
        admin_id: AdminId,
    ) -> CentelhaResult<TransitionOutcome> {
        self.transition(table_id, Transition::Void, Some(admin_id))
            .await
    }

    async fn transition(
        &self,
        table_id: TableId,
        transition: Transition,
        admin_id: Option<AdminId>,
    ) -> CentelhaResult<TransitionOutcome> {
        let action = transition.action();
        let outcome = with_retry(&self.retry, action, move || async move {
            let mut tx = self.store.begin().await?;
            let mut table = locked_table(tx.as_mut(), table_id).await?;
            let sessions = tx.sessions_for_table(table_id).await?;
            lifecycle::check(&table, &sessions, transition)?;

            let mut entries = Vec::new();
            match transition {
                Transition::Finish => {
                    let pot = load_pot(tx.as_mut(), &sessions).await?;
                    if pot.total() != 0 {
                        error!(
                            "Table {table_id} holds {} centelhas after its scoop",
                            pot.total()
                        );
                        return Err(CentelhaError::IntegrityFault(format!(
                            "table {table_id} pot is {} after scoop, expected 0",
                            pot.total()
                        )));
                    }
                }
                t if t.reverses_buy_ins() => {
                    let pot = load_pot(tx.as_mut(), &sessions).await?;
                    let reversal = pot.reversal(table.event_id, &sessions);
                    entries = append_all(tx.as_mut(), &reversal).await?;
                }
                _ => {}
            }

            lifecycle::apply(&mut table, transition, Utc::now());
            tx.update_table(&table).await?;
            tx.commit().await?;
            Ok(TransitionOutcome { table, entries })
        })
        .await?;

        info!(
            "Table {table_id} -> {} ({} compensating entries)",
            outcome.table.status,
            outcome.entries.len()
        );

        if let Some(admin_id) = admin_id {
            let refunded: i64 = outcome
                .entries
                .iter()
                .filter(|e| e.delta_centelhas > 0)
                .map(|e| e.delta_centelhas)
                .sum();
            self.audit
                .observe(
                    AuditRecord::new(admin_id, action, "table", Some(table_id))
                        .in_event(outcome.table.event_id)
                        .with_details(json!({
                            "status": outcome.table.status,
                            "ledger_entry_ids": outcome.entries.iter().map(|e| e.id).collect::<Vec<_>>(),
                            "credited": refunded,
                        })),
                )
                .await;
        }

        Ok(outcome)
    }

    /// Record that `eliminator` knocked out `eliminated`
    ///
    /// The eliminator is credited the eliminated session's full outstanding
    /// stake with `source_id` = the eliminated session; the debit leg is the
    /// buy-in already carrying that source id.
    ///
    /// # Errors
    ///
    /// * `CentelhaError::Validation` - self-elimination, sessions on
    ///   different tables, either session no longer active
    /// * `CentelhaError::InvalidStateTransition` - the table is not started
    pub async fn eliminate(
        &self,
        eliminator_id: SessionId,
        eliminated_id: SessionId,
    ) -> CentelhaResult<Elimination> {
        if eliminator_id == eliminated_id {
            return Err(CentelhaError::Validation(format!(
                "session {eliminated_id} cannot eliminate itself"
            )));
        }

        let outcome = with_retry(&self.retry, "eliminate", move || async move {
            let mut tx = self.store.begin().await?;
            let eliminator = load_session(tx.as_mut(), eliminator_id).await?;
            let mut eliminated = load_session(tx.as_mut(), eliminated_id).await?;
            if eliminator.table_id != eliminated.table_id {
                return Err(CentelhaError::Validation(format!(
                    "sessions {eliminator_id} and {eliminated_id} are on different tables"
                )));
            }

            let table = locked_table(tx.as_mut(), eliminated.table_id).await?;
            lifecycle::check_in_play(&table)?;
            // re-read under the table lock
            let sessions = tx.sessions_for_table(table.id).await?;
            for s in &sessions {
                if s.id == eliminator_id || s.id == eliminated_id {
                    if !s.is_active() {
                        return Err(CentelhaError::Validation(format!(
                            "session {} is no longer active",
                            s.id
                        )));
                    }
                    if s.id == eliminated_id {
                        eliminated = s.clone();
                    }
                }
            }

            tx.lock_memberships(&[eliminator.event_player_id, eliminated.event_player_id])
                .await?;
            let pot = load_pot(tx.as_mut(), &sessions).await?;
            let credit = match pot.elimination_credit(table.event_id, &eliminator, &eliminated) {
                Some(req) => Some(LedgerEngine::append_in(tx.as_mut(), &req).await?),
                None => None,
            };

            eliminated.eliminator_table_player_id = Some(eliminator.id);
            eliminated.eliminated_at = Some(Utc::now());
            tx.update_session(&eliminated).await?;
            tx.commit().await?;

            Ok(Elimination { eliminated, credit })
        })
        .await?;

        info!(
            "Session {eliminator_id} eliminated session {eliminated_id} on table {} for {}",
            outcome.eliminated.table_id,
            outcome.credit.as_ref().map_or(0, |e| e.delta_centelhas)
        );
        Ok(outcome)
    }

    /// Pay the pot to the last active participant
    ///
    /// One `scoop_transfer` entry is written per session whose stake is
    /// still outstanding, including the winner's own. Afterwards the pot is
    /// empty and the table may finish.
    ///
    /// # Errors
    ///
    /// * `CentelhaError::InvalidStateTransition` - the table is not started,
    ///   more than one participant is active, or the winner already scooped
    /// * `CentelhaError::Validation` - the winner is not active
    pub async fn scoop(&self, winner_id: SessionId) -> CentelhaResult<Scoop> {
        let outcome = with_retry(&self.retry, "scoop", move || async move {
            let mut tx = self.store.begin().await?;
            let winner = load_session(tx.as_mut(), winner_id).await?;
            let table = locked_table(tx.as_mut(), winner.table_id).await?;
            lifecycle::check_in_play(&table)?;

            let sessions = tx.sessions_for_table(table.id).await?;
            let active: Vec<&TableSession> = sessions.iter().filter(|s| s.is_active()).collect();
            let mut winner = match active.as_slice() {
                [only] if only.id == winner_id => (*only).clone(),
                [_] => {
                    return Err(CentelhaError::Validation(format!(
                        "session {winner_id} is not the last active participant"
                    )));
                }
                _ => {
                    return Err(CentelhaError::invalid_transition(
                        table.id,
                        table.status,
                        format!("scoop needs exactly one active participant, have {}", active.len()),
                    ));
                }
            };
            if winner.is_scoop {
                return Err(CentelhaError::invalid_transition(
                    table.id,
                    table.status,
                    format!("session {winner_id} already scooped"),
                ));
            }

            let pot = load_pot(tx.as_mut(), &sessions).await?;
            let credits = append_all(
                tx.as_mut(),
                &pot.scoop_credits(table.event_id, &winner, &sessions),
            )
            .await?;

            winner.is_scoop = true;
            tx.update_session(&winner).await?;
            tx.commit().await?;

            Ok(Scoop { winner, credits })
        })
        .await?;

        info!(
            "Session {winner_id} scooped table {} for {}",
            outcome.winner.table_id,
            outcome.total()
        );
        Ok(outcome)
    }

    /// Get a table
    pub async fn table(&self, table_id: TableId) -> CentelhaResult<Table> {
        let mut tx = self.store.begin().await?;
        let table = tx.table(table_id).await?;
        tx.commit().await?;
        table.ok_or_else(|| CentelhaError::not_found("table", table_id))
    }

    /// Tables of an event
    pub async fn tables_for_event(&self, event_id: EventId) -> CentelhaResult<Vec<Table>> {
        let mut tx = self.store.begin().await?;
        let tables = tx.tables_for_event(event_id).await?;
        tx.commit().await?;
        Ok(tables)
    }

    /// Get a table session
    pub async fn session(&self, session_id: SessionId) -> CentelhaResult<TableSession> {
        let mut tx = self.store.begin().await?;
        let found = load_session(tx.as_mut(), session_id).await?;
        tx.commit().await?;
        Ok(found)
    }

    /// Sessions of a table, including closed ones
    pub async fn sessions(&self, table_id: TableId) -> CentelhaResult<Vec<TableSession>> {
        let mut tx = self.store.begin().await?;
        let sessions = tx.sessions_for_table(table_id).await?;
        tx.commit().await?;
        Ok(sessions)
    }

    /// Current pot of a table
    pub async fn pot(&self, table_id: TableId) -> CentelhaResult<PotLedger> {
        let mut tx = self.store.begin().await?;
        tx.table(table_id)
            .await?
            .ok_or_else(|| CentelhaError::not_found("table", table_id))?;
        let sessions = tx.sessions_for_table(table_id).await?;
        let pot = load_pot(tx.as_mut(), &sessions).await?;
        tx.commit().await?;
        Ok(pot)
    }
}
