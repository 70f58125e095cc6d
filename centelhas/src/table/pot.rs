//! Pot accounting for a table.
//!
//! The pot is never stored. It is the negated sum of every table-scoped
//! ledger entry whose `source_id` names one of the table's sessions: a
//! buy-in moves a stake in, elimination and scoop credits move it out to
//! the winner, refunds move it back to its owner. A session's
//! *outstanding stake* is what is still in the pot on its behalf.

use std::collections::BTreeMap;

use super::models::{SessionId, TableSession};
use crate::event::MembershipId;
use crate::ledger::{AppendRequest, LedgerEntry, SourceKind};

/// Outstanding stake per session, computed from the table's ledger entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PotLedger {
    outstanding: BTreeMap<SessionId, i64>,
    buy_ins: BTreeMap<SessionId, i64>,
    refunds: BTreeMap<SessionId, i64>,
    // net credit per (recipient membership, kind, source session)
    payouts: BTreeMap<(MembershipId, SourceKind, SessionId), i64>,
}

impl PotLedger {
    /// Fold `entries` into per-session stakes
    ///
    /// Entries that are not table-scoped or that reference a session not in
    /// `sessions` are ignored.
    pub fn from_entries(sessions: &[TableSession], entries: &[LedgerEntry]) -> Self {
        let mut pot = PotLedger {
            outstanding: sessions.iter().map(|s| (s.id, 0)).collect(),
            ..Default::default()
        };

        for entry in entries {
            let Some(session_id) = entry.source_id else {
                continue;
            };
            if !entry.source_type.is_table_scoped() || !pot.outstanding.contains_key(&session_id) {
                continue;
            }

            *pot.outstanding.entry(session_id).or_default() -= entry.delta_centelhas;
            match entry.source_type {
                SourceKind::TableBuyIn => {
                    *pot.buy_ins.entry(session_id).or_default() -= entry.delta_centelhas;
                }
                SourceKind::TableRollback => {
                    *pot.refunds.entry(session_id).or_default() += entry.delta_centelhas;
                }
                kind => {
                    *pot.payouts
                        .entry((entry.event_player_id, kind, session_id))
                        .or_default() += entry.delta_centelhas;
                }
            }
        }

        pot
    }

    /// Stake still in the pot on behalf of `session_id`
    pub fn outstanding(&self, session_id: SessionId) -> i64 {
        self.outstanding.get(&session_id).copied().unwrap_or(0)
    }

    /// Total centelhas currently held by the table
    pub fn total(&self) -> i64 {
        self.outstanding.values().sum()
    }

    /// Sum of all buy-ins recorded for the table
    pub fn total_buy_ins(&self) -> i64 {
        self.buy_ins.values().sum()
    }

    /// Elimination credit owed to the eliminator of `eliminated`
    pub fn elimination_credit(
        &self,
        event_id: i64,
        eliminator: &TableSession,
        eliminated: &TableSession,
    ) -> Option<AppendRequest> {
        let amount = self.outstanding(eliminated.id);
        (amount > 0).then(|| {
            AppendRequest::new(
                event_id,
                eliminator.event_player_id,
                SourceKind::EliminationTransfer,
                amount,
            )
            .with_source(eliminated.id)
        })
    }

    /// Scoop credits: one entry per session whose stake is still outstanding
    pub fn scoop_credits(
        &self,
        event_id: i64,
        winner: &TableSession,
        sessions: &[TableSession],
    ) -> Vec<AppendRequest> {
        sessions
            .iter()
            .filter_map(|s| {
                let amount = self.outstanding(s.id);
                (amount > 0).then(|| {
                    AppendRequest::new(
                        event_id,
                        winner.event_player_id,
                        SourceKind::ScoopTransfer,
                        amount,
                    )
                    .with_source(s.id)
                })
            })
            .collect()
    }

    /// Refund for a participant leaving during draft
    pub fn leave_refund(&self, event_id: i64, session: &TableSession) -> Option<AppendRequest> {
        let owed = self.buy_in_owed(session.id);
        (owed > 0).then(|| {
            AppendRequest::new(
                event_id,
                session.event_player_id,
                SourceKind::TableRollback,
                owed,
            )
            .with_source(session.id)
        })
    }

    /// Compensating entries that unwind the table
    ///
    /// Refunds come first so that a participant receiving a refund and
    /// losing a credit never dips below zero in between. Every refund
    /// together with the refunds already paid to leavers totals the negated
    /// buy-ins; every payout is matched by an equal negative entry of the
    /// same kind and source.
    pub fn reversal(&self, event_id: i64, sessions: &[TableSession]) -> Vec<AppendRequest> {
        let refunds = sessions.iter().filter_map(|s| self.leave_refund(event_id, s));

        let clawbacks = self
            .payouts
            .iter()
            .filter(|(_, net)| **net != 0)
            .map(|(&(membership_id, kind, session_id), &net)| {
                AppendRequest::new(event_id, membership_id, kind, -net).with_source(session_id)
            });

        refunds.chain(clawbacks).collect()
    }

    fn buy_in_owed(&self, session_id: SessionId) -> i64 {
        let paid = self.buy_ins.get(&session_id).copied().unwrap_or(0);
        let refunded = self.refunds.get(&session_id).copied().unwrap_or(0);
        paid - refunded
    }
}
