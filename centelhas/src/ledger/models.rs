//! Ledger data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::errors::{CentelhaError, CentelhaResult};
use crate::event::{AdminId, EventId, MembershipId};

/// Ledger entry ID type
pub type LedgerEntryId = i64;

/// What caused a balance movement
///
/// The taxonomy is fixed; each kind carries its own sign and reference
/// preconditions, checked by [`SourceKind::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    EventInitialBalance,
    TableBuyIn,
    EliminationTransfer,
    ScoopTransfer,
    TableRollback,
    BankPurchase,
    AdminAdjustment,
    PrizeWithdrawal,
}

impl SourceKind {
    /// Every kind, in schema order
    pub const ALL: [SourceKind; 8] = [
        SourceKind::EventInitialBalance,
        SourceKind::TableBuyIn,
        SourceKind::EliminationTransfer,
        SourceKind::ScoopTransfer,
        SourceKind::TableRollback,
        SourceKind::BankPurchase,
        SourceKind::AdminAdjustment,
        SourceKind::PrizeWithdrawal,
    ];

    /// Kinds whose `source_id` points at a table session
    pub const TABLE_SCOPED: [SourceKind; 4] = [
        SourceKind::TableBuyIn,
        SourceKind::EliminationTransfer,
        SourceKind::ScoopTransfer,
        SourceKind::TableRollback,
    ];

    /// Column value in `ledger_entries.source_type`
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::EventInitialBalance => "event_initial_balance",
            SourceKind::TableBuyIn => "table_buy_in",
            SourceKind::EliminationTransfer => "elimination_transfer",
            SourceKind::ScoopTransfer => "scoop_transfer",
            SourceKind::TableRollback => "table_rollback",
            SourceKind::BankPurchase => "bank_purchase",
            SourceKind::AdminAdjustment => "admin_adjustment",
            SourceKind::PrizeWithdrawal => "prize_withdrawal",
        }
    }

    /// Whether the kind moves centelhas between players of the event
    ///
    /// Gameplay entries never create or destroy currency: once every table
    /// of an event is resolved they sum to zero.
    pub fn is_gameplay(&self) -> bool {
        Self::TABLE_SCOPED.contains(self)
    }

    /// Whether the kind references a table session through `source_id`
    pub fn is_table_scoped(&self) -> bool {
        self.is_gameplay()
    }

    /// Check the sign and reference rules for this kind
    ///
    /// # Errors
    ///
    /// * `CentelhaError::Validation` - zero delta, wrong sign, missing
    ///   source id or missing acting admin
    pub fn check(
        &self,
        delta: i64,
        source_id: Option<i64>,
        acting_admin: Option<AdminId>,
    ) -> CentelhaResult<()> {
        if delta == 0 {
            return Err(CentelhaError::Validation(format!(
                "{self} entry must have a non-zero delta"
            )));
        }

        let sign_ok = match self {
            SourceKind::EventInitialBalance
            | SourceKind::TableRollback
            | SourceKind::BankPurchase => delta > 0,
            SourceKind::TableBuyIn | SourceKind::PrizeWithdrawal => delta < 0,
            // negative legs are rollback compensations
            SourceKind::EliminationTransfer
            | SourceKind::ScoopTransfer
            | SourceKind::AdminAdjustment => true,
        };
        if !sign_ok {
            return Err(CentelhaError::Validation(format!(
                "{self} entry cannot carry delta {delta}"
            )));
        }

        if self.is_table_scoped() && source_id.is_none() {
            return Err(CentelhaError::Validation(format!(
                "{self} entry must reference a table session"
            )));
        }

        if *self == SourceKind::AdminAdjustment && acting_admin.is_none() {
            return Err(CentelhaError::Validation(
                "admin adjustment requires an acting admin".to_string(),
            ));
        }

        Ok(())
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = CentelhaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CentelhaError::Validation(format!("unknown source type: {s}")))
    }
}

/// An immutable, atomic balance movement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub event_id: EventId,
    pub event_player_id: MembershipId,
    pub source_type: SourceKind,
    pub source_id: Option<i64>,
    pub delta_centelhas: i64,
    pub balance_after: Option<i64>,
    pub created_by_admin_id: Option<AdminId>,
    pub created_at: DateTime<Utc>,
}

/// Append request for [`crate::ledger::LedgerEngine::append`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendRequest {
    pub event_id: EventId,
    pub membership_id: MembershipId,
    pub kind: SourceKind,
    pub source_id: Option<i64>,
    pub delta: i64,
    pub acting_admin: Option<AdminId>,
}

impl AppendRequest {
    /// Build a request with no source id and no acting admin
    pub fn new(event_id: EventId, membership_id: MembershipId, kind: SourceKind, delta: i64) -> Self {
        Self {
            event_id,
            membership_id,
            kind,
            source_id: None,
            delta,
            acting_admin: None,
        }
    }

    /// Attach the id of the record that caused the movement
    pub fn with_source(mut self, source_id: i64) -> Self {
        self.source_id = Some(source_id);
        self
    }

    /// Attach the admin performing the movement
    pub fn by_admin(mut self, admin_id: AdminId) -> Self {
        self.acting_admin = Some(admin_id);
        self
    }
}

/// Row payload handed to the store once the resulting balance is known
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLedgerEntry {
    pub event_id: EventId,
    pub event_player_id: MembershipId,
    pub source_type: SourceKind,
    pub source_id: Option<i64>,
    pub delta_centelhas: i64,
    pub balance_after: i64,
    pub created_by_admin_id: Option<AdminId>,
}
