//! Balance cache.
//!
//! `event_players.current_balance` is a projection of the ledger. It is only
//! ever written by the ledger engine's append path, inside the
//! same unit of work as the entry it reflects. This module reads it and
//! checks it against the ledger; it never corrects it.

use log::{error, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::Store;
use crate::errors::{CentelhaError, CentelhaResult};
use crate::event::{EventId, MembershipId};
use crate::ledger::manager::sum_deltas;

/// Cached and recomputed balance of one membership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceCheck {
    pub membership_id: MembershipId,
    pub cached: i64,
    pub recomputed: i64,
}

impl BalanceCheck {
    /// Whether the cache disagrees with the ledger
    pub fn drifted(&self) -> bool {
        self.cached != self.recomputed
    }
}

/// Reconciliation result for a whole event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub event_id: EventId,
    pub memberships: Vec<BalanceCheck>,
}

impl ReconciliationReport {
    /// Memberships whose cache disagrees with the ledger
    pub fn drifted(&self) -> impl Iterator<Item = &BalanceCheck> {
        self.memberships.iter().filter(|c| c.drifted())
    }

    /// Whether every cached balance matches the ledger
    pub fn is_clean(&self) -> bool {
        self.drifted().next().is_none()
    }
}

/// Read side of the cached balances
#[derive(Clone)]
pub struct BalanceCache {
    store: Arc<dyn Store>,
}

impl BalanceCache {
    /// Create a cache reader over a store
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Cached balance of a membership; a never-credited membership reads 0
    ///
    /// # Errors
    ///
    /// * `CentelhaError::NotFound` - unknown membership
    pub async fn balance(&self, membership_id: MembershipId) -> CentelhaResult<i64> {
        let mut tx = self.store.begin().await?;
        let membership = tx
            .membership(membership_id)
            .await?
            .ok_or_else(|| CentelhaError::not_found("membership", membership_id))?;
        tx.commit().await?;
        Ok(membership.cached_balance())
    }

    /// Compare the cached balance of a membership with its ledger sum
    ///
    /// # Errors
    ///
    /// * `CentelhaError::IntegrityFault` - the cache has drifted
    /// * `CentelhaError::NotFound` - unknown membership
    pub async fn verify(&self, membership_id: MembershipId) -> CentelhaResult<BalanceCheck> {
        let mut tx = self.store.begin().await?;
        let membership = tx
            .membership(membership_id)
            .await?
            .ok_or_else(|| CentelhaError::not_found("membership", membership_id))?;
        let entries = tx.ledger_entries_for_membership(membership_id).await?;
        tx.commit().await?;

        let check = BalanceCheck {
            membership_id,
            cached: membership.cached_balance(),
            recomputed: sum_deltas(&entries)?,
        };

        if check.drifted() {
            error!(
                "Balance drift on membership {membership_id}: cached {}, ledger {}",
                check.cached, check.recomputed
            );
            return Err(CentelhaError::IntegrityFault(format!(
                "membership {membership_id} cached balance {} differs from ledger sum {}",
                check.cached, check.recomputed
            )));
        }
        Ok(check)
    }

    /// Check every membership of an event in one consistent snapshot
    ///
    /// Drift is reported, not raised, so that an operator sees every
    /// affected membership at once.
    pub async fn reconcile_event(&self, event_id: EventId) -> CentelhaResult<ReconciliationReport> {
        let mut tx = self.store.begin().await?;
        tx.event(event_id)
            .await?
            .ok_or_else(|| CentelhaError::not_found("event", event_id))?;
        let memberships = tx.memberships_for_event(event_id).await?;
        let entries = tx.ledger_entries_for_event(event_id).await?;
        tx.commit().await?;

        let checks = memberships
            .iter()
            .map(|m| {
                Ok(BalanceCheck {
                    membership_id: m.id,
                    cached: m.cached_balance(),
                    recomputed: sum_deltas(
                        entries.iter().filter(|e| e.event_player_id == m.id),
                    )?,
                })
            })
            .collect::<CentelhaResult<Vec<_>>>()?;

        let report = ReconciliationReport {
            event_id,
            memberships: checks,
        };
        let drifted = report.drifted().count();
        if drifted > 0 {
            error!(
                "Event {event_id}: {drifted} of {} memberships drifted from the ledger",
                report.memberships.len()
            );
        } else {
            info!(
                "Event {event_id}: {} memberships reconciled",
                report.memberships.len()
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::db::MemoryStore;
    use crate::event::{NewEvent, NewPlayer};
    use crate::ledger::{AppendRequest, LedgerEngine, NewLedgerEntry, SourceKind};
    use chrono::Utc;

    async fn setup() -> (Arc<MemoryStore>, BalanceCache, EventId, MembershipId) {
        let store = Arc::new(MemoryStore::new());
        let mut tx = store.begin().await.unwrap();
        let event = tx
            .insert_event(&NewEvent {
                name: "Liga".to_string(),
                starts_at: Utc::now(),
                ends_at: None,
                initial_centelhas: 0,
                created_by_admin_id: 1,
            })
            .await
            .unwrap();
        let player = tx
            .insert_player(&NewPlayer {
                display_name: "Bia".to_string(),
                email: None,
            })
            .await
            .unwrap();
        let membership = tx.insert_membership(event.id, player.id).await.unwrap();
        tx.commit().await.unwrap();

        LedgerEngine::new(store.clone(), RetryPolicy::no_retry())
            .append(AppendRequest::new(
                event.id,
                membership.id,
                SourceKind::BankPurchase,
                60,
            ))
            .await
            .unwrap();

        (store.clone(), BalanceCache::new(store), event.id, membership.id)
    }

    #[tokio::test]
    async fn test_clean_membership_verifies() {
        let (_, cache, event_id, membership_id) = setup().await;
        assert_eq!(cache.balance(membership_id).await.unwrap(), 60);
        assert!(!cache.verify(membership_id).await.unwrap().drifted());
        assert!(cache.reconcile_event(event_id).await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_drift_is_surfaced_not_corrected() {
        let (store, cache, event_id, membership_id) = setup().await;
        let mut tx = store.begin().await.unwrap();
        tx.set_cached_balance(membership_id, 61).await.unwrap();
        tx.commit().await.unwrap();

        assert!(matches!(
            cache.verify(membership_id).await,
            Err(CentelhaError::IntegrityFault(_))
        ));

        let report = cache.reconcile_event(event_id).await.unwrap();
        assert!(!report.is_clean());
        let drifted: Vec<_> = report.drifted().collect();
        assert_eq!(drifted.len(), 1);
        assert_eq!(drifted[0].cached, 61);
        assert_eq!(drifted[0].recomputed, 60);

        // still drifted: reconciliation never writes
        assert_eq!(cache.balance(membership_id).await.unwrap(), 61);
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let (_, cache, _, _) = setup().await;
        assert!(matches!(
            cache.balance(77).await,
            Err(CentelhaError::NotFound { .. })
        ));
        assert!(matches!(
            cache.reconcile_event(77).await,
            Err(CentelhaError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_overflowing_ledger_is_an_integrity_fault() {
        let (store, cache, event_id, membership_id) = setup().await;
        let mut tx = store.begin().await.unwrap();
        tx.insert_ledger_entry(&NewLedgerEntry {
            event_id,
            event_player_id: membership_id,
            source_type: SourceKind::BankPurchase,
            source_id: None,
            delta_centelhas: i64::MAX,
            balance_after: i64::MAX,
            created_by_admin_id: None,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert!(matches!(
            cache.verify(membership_id).await,
            Err(CentelhaError::IntegrityFault(_))
        ));
        assert!(matches!(
            cache.reconcile_event(event_id).await,
            Err(CentelhaError::IntegrityFault(_))
        ));
    }
}
