//! Table and table session data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::errors::{CentelhaError, CentelhaResult};
use crate::event::{EventId, MembershipId, PlayerId};
use crate::ledger::LedgerEntry;

/// Table ID type
pub type TableId = i64;

/// Table session (`table_players.id`) type
pub type SessionId = i64;

/// Table lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    /// Accepting participants
    Draft,
    /// Game in progress
    Started,
    /// Resolved and paid out
    Finished,
    /// Reversed after start
    RolledBack,
    /// Administratively aborted
    Void,
}

impl TableStatus {
    /// Column value in `tables.status`
    pub fn as_str(&self) -> &'static str {
        match self {
            TableStatus::Draft => "draft",
            TableStatus::Started => "started",
            TableStatus::Finished => "finished",
            TableStatus::RolledBack => "rolled_back",
            TableStatus::Void => "void",
        }
    }

    /// Terminal statuses accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TableStatus::Finished | TableStatus::RolledBack | TableStatus::Void
        )
    }
}

impl std::fmt::Display for TableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TableStatus {
    type Err = CentelhaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(TableStatus::Draft),
            "started" => Ok(TableStatus::Started),
            "finished" => Ok(TableStatus::Finished),
            "rolled_back" => Ok(TableStatus::RolledBack),
            "void" => Ok(TableStatus::Void),
            other => Err(CentelhaError::Validation(format!(
                "unknown table status: {other}"
            ))),
        }
    }
}

/// A single sub-game instance inside an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: TableId,
    pub event_id: EventId,
    pub created_by_player_id: PlayerId,
    pub status: TableStatus,
    pub bet_locked_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub rolled_back_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Table {
    /// Status/timestamp pairing enforced by the `tables_status_check` constraint
    pub fn timestamps_consistent(&self) -> bool {
        match self.status {
            TableStatus::Draft => self.started_at.is_none(),
            TableStatus::Started => self.started_at.is_some(),
            TableStatus::Finished => self.finished_at.is_some(),
            TableStatus::RolledBack => self.rolled_back_at.is_some(),
            TableStatus::Void => true,
        }
    }

    /// Whether participants may still join or leave
    pub fn roster_open(&self) -> bool {
        self.status == TableStatus::Draft && self.bet_locked_at.is_none()
    }
}

/// A membership's participation in one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSession {
    pub id: SessionId,
    pub table_id: TableId,
    pub event_player_id: MembershipId,
    pub commander_name: String,
    pub bet_centelhas: i64,
    pub eliminator_table_player_id: Option<SessionId>,
    pub is_scoop: bool,
    pub joined_at: DateTime<Utc>,
    pub eliminated_at: Option<DateTime<Utc>>,
}

impl TableSession {
    /// Still in contention at the table
    pub fn is_active(&self) -> bool {
        self.eliminated_at.is_none()
    }

    /// Left the table during draft (inactive without an eliminator)
    pub fn has_left(&self) -> bool {
        self.eliminated_at.is_some() && self.eliminator_table_player_id.is_none()
    }
}

/// Join request for [`crate::table::TableManager::join_table`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinTable {
    pub table_id: TableId,
    pub membership_id: MembershipId,
    pub commander_name: String,
    pub bet_centelhas: i64,
}

impl JoinTable {
    /// Check the join request before anything is written
    ///
    /// # Errors
    ///
    /// * `CentelhaError::Validation` - non-positive bet or blank commander name
    pub fn validate(&self) -> CentelhaResult<()> {
        if self.bet_centelhas <= 0 {
            return Err(CentelhaError::Validation(format!(
                "bet must be > 0, got {}",
                self.bet_centelhas
            )));
        }
        if self.commander_name.trim().is_empty() {
            return Err(CentelhaError::Validation(
                "commander name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Row payload for a new table session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTableSession {
    pub table_id: TableId,
    pub event_player_id: MembershipId,
    pub commander_name: String,
    pub bet_centelhas: i64,
}

/// Outcome of an elimination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Elimination {
    /// The eliminated session with `eliminated_at` set
    pub eliminated: TableSession,
    /// Credit to the eliminator; `None` when no stake was outstanding
    pub credit: Option<LedgerEntry>,
}

/// Outcome of a scoop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scoop {
    /// The winning session with `is_scoop` set
    pub winner: TableSession,
    /// One credit per session whose stake was still in the pot
    pub credits: Vec<LedgerEntry>,
}

impl Scoop {
    /// Total paid to the winner
    pub fn total(&self) -> i64 {
        self.credits.iter().map(|e| e.delta_centelhas).sum()
    }
}

/// Outcome of a lifecycle transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    /// The table after the transition
    pub table: Table,
    /// Compensating entries written by rollback or void
    pub entries: Vec<LedgerEntry>,
}
