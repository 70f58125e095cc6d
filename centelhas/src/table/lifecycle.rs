//! Table lifecycle state machine.
//!
//! ```text
//! draft ──lock bets──▶ draft (locked) ──start──▶ started ──finish──▶ finished
//!   │                                              │
//!   │                                              └──rollback──▶ rolled_back
//!   └──────────────void (draft or started)──────────────────────▶ void
//! ```
//!
//! The functions here are pure: they look at a table and its roster and
//! either accept a transition or explain why it is illegal. Persisting the
//! result and moving centelhas is the job of [`super::TableManager`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::models::{Table, TableSession, TableStatus};
use crate::errors::{CentelhaError, CentelhaResult};

/// Minimum active participants for a table to start
pub const MIN_PARTICIPANTS: usize = 2;

/// Lifecycle transitions a caller can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    /// Close the roster; the table stays in draft
    LockBets,
    /// draft -> started
    Start,
    /// started -> finished
    Finish,
    /// started -> rolled_back
    Rollback,
    /// draft | started -> void
    Void,
}

impl Transition {
    /// Status the table ends up in
    pub fn target(&self) -> TableStatus {
        match self {
            Transition::LockBets => TableStatus::Draft,
            Transition::Start => TableStatus::Started,
            Transition::Finish => TableStatus::Finished,
            Transition::Rollback => TableStatus::RolledBack,
            Transition::Void => TableStatus::Void,
        }
    }

    /// Whether the transition refunds buy-ins
    pub fn reverses_buy_ins(&self) -> bool {
        matches!(self, Transition::Rollback | Transition::Void)
    }

    /// Audit action name
    pub fn action(&self) -> &'static str {
        match self {
            Transition::LockBets => "table.lock_bets",
            Transition::Start => "table.start",
            Transition::Finish => "table.finish",
            Transition::Rollback => "table.rollback",
            Transition::Void => "table.void",
        }
    }
}

/// Count participants still in contention
pub fn active_count(sessions: &[TableSession]) -> usize {
    sessions.iter().filter(|s| s.is_active()).count()
}

/// Accept or reject a transition for `table` given its roster
///
/// # Errors
///
/// * `CentelhaError::InvalidStateTransition` - the transition is illegal
///   from the current status or its preconditions are not met
pub fn check(table: &Table, sessions: &[TableSession], transition: Transition) -> CentelhaResult<()> {
    let reject = |reason: String| Err(CentelhaError::invalid_transition(table.id, table.status, reason));

    if table.status.is_terminal() {
        return reject(format!("table is already {}", table.status));
    }

    match transition {
        Transition::LockBets => {
            if table.status != TableStatus::Draft {
                return reject("bets can only be locked on a draft table".to_string());
            }
            if table.bet_locked_at.is_some() {
                return reject("bets are already locked".to_string());
            }
        }
        Transition::Start => {
            if table.status != TableStatus::Draft {
                return reject("only a draft table can start".to_string());
            }
            if table.bet_locked_at.is_none() {
                return reject("bets must be locked before starting".to_string());
            }
            let active = active_count(sessions);
            if active < MIN_PARTICIPANTS {
                return reject(format!(
                    "need {MIN_PARTICIPANTS}+ active participants, have {active}"
                ));
            }
        }
        Transition::Finish => {
            if table.status != TableStatus::Started {
                return reject("only a started table can finish".to_string());
            }
            let active: Vec<&TableSession> = sessions.iter().filter(|s| s.is_active()).collect();
            match active.as_slice() {
                [winner] if winner.is_scoop => {}
                [_] => return reject("the last participant has not scooped yet".to_string()),
                _ => {
                    return reject(format!(
                        "table is unresolved: {} participants still active",
                        active.len()
                    ));
                }
            }
        }
        Transition::Rollback => {
            if table.status != TableStatus::Started {
                return reject("only a started table can be rolled back".to_string());
            }
        }
        Transition::Void => {
            // draft and started are the only non-terminal statuses
        }
    }

    Ok(())
}

/// Apply an accepted transition to `table`
pub fn apply(table: &mut Table, transition: Transition, now: DateTime<Utc>) {
    match transition {
        Transition::LockBets => table.bet_locked_at = Some(now),
        Transition::Start => table.started_at = Some(now),
        Transition::Finish => table.finished_at = Some(now),
        Transition::Rollback => table.rolled_back_at = Some(now),
        Transition::Void => {}
    }
    table.status = transition.target();
    table.updated_at = now;
}

/// Participants may join or leave
///
/// # Errors
///
/// * `CentelhaError::InvalidStateTransition` - the table is past draft or
///   its bets are locked
pub fn check_roster_open(table: &Table) -> CentelhaResult<()> {
    if table.roster_open() {
        Ok(())
    } else if table.status == TableStatus::Draft {
        Err(CentelhaError::invalid_transition(
            table.id,
            table.status,
            "bets are locked",
        ))
    } else {
        Err(CentelhaError::invalid_transition(
            table.id,
            table.status,
            "table is no longer accepting participants",
        ))
    }
}

/// Eliminations and scoops may be recorded
///
/// # Errors
///
/// * `CentelhaError::InvalidStateTransition` - the table is not started
pub fn check_in_play(table: &Table) -> CentelhaResult<()> {
    if table.status == TableStatus::Started {
        Ok(())
    } else {
        Err(CentelhaError::invalid_transition(
            table.id,
            table.status,
            "table is not in play",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        let now = Utc::now();
        Table {
            id: 10,
            event_id: 1,
            created_by_player_id: 1,
            status: TableStatus::Draft,
            bet_locked_at: None,
            started_at: None,
            finished_at: None,
            rolled_back_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn session(id: i64) -> TableSession {
        TableSession {
            id,
            table_id: 10,
            event_player_id: id,
            commander_name: format!("Commander {id}"),
            bet_centelhas: 100,
            eliminator_table_player_id: None,
            is_scoop: false,
            joined_at: Utc::now(),
            eliminated_at: None,
        }
    }

    fn assert_rejected(result: CentelhaResult<()>) {
        assert!(
            matches!(result, Err(CentelhaError::InvalidStateTransition { .. })),
            "expected state conflict, got {result:?}"
        );
    }

    #[test]
    fn test_start_requires_lock_and_two_participants() {
        let mut t = table();
        let roster = vec![session(1), session(2)];

        assert_rejected(check(&t, &roster, Transition::Start));

        check(&t, &roster, Transition::LockBets).unwrap();
        apply(&mut t, Transition::LockBets, Utc::now());
        assert_eq!(t.status, TableStatus::Draft);
        assert!(t.bet_locked_at.is_some());

        assert_rejected(check(&t, &roster[..1], Transition::Start));
        check(&t, &roster, Transition::Start).unwrap();
        apply(&mut t, Transition::Start, Utc::now());
        assert_eq!(t.status, TableStatus::Started);
        assert!(t.timestamps_consistent());
    }

    #[test]
    fn test_left_participants_do_not_count_towards_start() {
        let mut t = table();
        apply(&mut t, Transition::LockBets, Utc::now());
        let mut left = session(2);
        left.eliminated_at = Some(Utc::now());
        assert_rejected(check(&t, &[session(1), left], Transition::Start));
    }

    #[test]
    fn test_lock_twice_rejected() {
        let mut t = table();
        apply(&mut t, Transition::LockBets, Utc::now());
        assert_rejected(check(&t, &[], Transition::LockBets));
    }

    #[test]
    fn test_finish_only_from_started_with_scooped_winner() {
        let mut t = table();
        let mut roster = vec![session(1), session(2)];
        assert_rejected(check(&t, &roster, Transition::Finish));

        apply(&mut t, Transition::LockBets, Utc::now());
        apply(&mut t, Transition::Start, Utc::now());
        assert_rejected(check(&t, &roster, Transition::Finish));

        roster[1].eliminated_at = Some(Utc::now());
        roster[1].eliminator_table_player_id = Some(1);
        assert_rejected(check(&t, &roster, Transition::Finish));

        roster[0].is_scoop = true;
        check(&t, &roster, Transition::Finish).unwrap();
        apply(&mut t, Transition::Finish, Utc::now());
        assert_eq!(t.status, TableStatus::Finished);
        assert!(t.finished_at.is_some());
    }

    #[test]
    fn test_rollback_only_from_started() {
        let mut t = table();
        assert_rejected(check(&t, &[], Transition::Rollback));
        apply(&mut t, Transition::LockBets, Utc::now());
        apply(&mut t, Transition::Start, Utc::now());
        check(&t, &[], Transition::Rollback).unwrap();
        apply(&mut t, Transition::Rollback, Utc::now());
        assert_eq!(t.status, TableStatus::RolledBack);
        assert!(t.rolled_back_at.is_some());
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        for terminal in [TableStatus::Finished, TableStatus::RolledBack, TableStatus::Void] {
            let mut t = table();
            t.status = terminal;
            for transition in [
                Transition::LockBets,
                Transition::Start,
                Transition::Finish,
                Transition::Rollback,
                Transition::Void,
            ] {
                assert_rejected(check(&t, &[], transition));
            }
        }
    }

    #[test]
    fn test_void_from_draft_and_started() {
        let t = table();
        check(&t, &[], Transition::Void).unwrap();

        let mut t = table();
        apply(&mut t, Transition::LockBets, Utc::now());
        apply(&mut t, Transition::Start, Utc::now());
        check(&t, &[], Transition::Void).unwrap();
        apply(&mut t, Transition::Void, Utc::now());
        assert_eq!(t.status, TableStatus::Void);
        assert!(t.timestamps_consistent());
    }

    #[test]
    fn test_roster_and_play_gates() {
        let mut t = table();
        assert!(check_roster_open(&t).is_ok());
        assert_rejected(check_in_play(&t));

        apply(&mut t, Transition::LockBets, Utc::now());
        assert_rejected(check_roster_open(&t));

        apply(&mut t, Transition::Start, Utc::now());
        assert_rejected(check_roster_open(&t));
        assert!(check_in_play(&t).is_ok());
    }
}
