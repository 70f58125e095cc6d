//! Ledger engine implementation.

use log::{error, info};
use serde_json::json;
use std::sync::Arc;

use super::models::{AppendRequest, LedgerEntry, LedgerEntryId, NewLedgerEntry, SourceKind};
use crate::audit::{AuditRecord, AuditRecorder};
use crate::config::RetryPolicy;
use crate::db::{Store, StoreTx};
use crate::errors::{CentelhaError, CentelhaResult};
use crate::event::{AdminId, EventId, MembershipId};
use crate::retry::with_retry;

/// Sum of entry deltas; overflow is an integrity fault
pub(crate) fn sum_deltas<'a>(
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
) -> CentelhaResult<i64> {
    entries.into_iter().try_fold(0i64, |acc, e| {
        acc.checked_add(e.delta_centelhas).ok_or_else(|| {
            CentelhaError::IntegrityFault(format!("ledger sum overflows at entry {}", e.id))
        })
    })
}

/// Ledger engine
#[derive(Clone)]
pub struct LedgerEngine {
    store: Arc<dyn Store>,
    retry: RetryPolicy,
    audit: AuditRecorder,
}

impl LedgerEngine {
    /// Create a new ledger engine
    ///
    /// # Arguments
    ///
    /// * `store` - Storage backend
    /// * `retry` - Retry policy for conflicting appends
    pub fn new(store: Arc<dyn Store>, retry: RetryPolicy) -> Self {
        let audit = AuditRecorder::new(Arc::clone(&store));
        Self {
            store,
            retry,
            audit,
        }
    }

    /// Append one entry in its own unit of work
    ///
    /// Retried on conflict according to the engine's [`RetryPolicy`].
    ///
    /// # Arguments
    ///
    /// * `req` - Event, membership, kind, optional source id, delta and acting admin
    ///
    /// # Returns
    ///
    /// * `CentelhaResult<LedgerEntry>` - The committed entry with its `balance_after`
    ///
    /// # Errors
    ///
    /// * `CentelhaError::Validation` - zero delta, sign or reference rule
    ///   broken, membership outside the event, second initial allotment,
    ///   or a table-scoped kind (those are written by [`crate::TableManager`])
    /// * `CentelhaError::InsufficientBalance` - the balance would go negative
    /// * `CentelhaError::NotFound` - unknown membership
    /// * `CentelhaError::IntegrityFault` - cached balance disagrees with the ledger
    /// * `CentelhaError::Conflict` - retries exhausted
    pub async fn append(&self, req: AppendRequest) -> CentelhaResult<LedgerEntry> {
        if req.kind.is_table_scoped() {
            return Err(CentelhaError::Validation(format!(
                "{} entries are written by table operations only",
                req.kind.as_str()
            )));
        }
        let req = &req;
        with_retry(&self.retry, "ledger append", move || self.append_once(req)).await
    }

    async fn append_once(&self, req: &AppendRequest) -> CentelhaResult<LedgerEntry> {
        let mut tx = self.store.begin().await?;
        let entry = Self::append_in(tx.as_mut(), req).await?;
        tx.commit().await?;
        Ok(entry)
    }

    /// Append one entry inside a caller-owned unit of work
    ///
    /// Locks the membership row, reads its latest recorded balance, writes
    /// the entry with the resulting balance and refreshes the cached
    /// balance. Nothing is visible until the caller commits. Table-scoped
    /// kinds only arrive here from the table manager, which has already
    /// checked the session they reference.
    pub(crate) async fn append_in(
        tx: &mut dyn StoreTx,
        req: &AppendRequest,
    ) -> CentelhaResult<LedgerEntry> {
        req.kind.check(req.delta, req.source_id, req.acting_admin)?;

        let membership = tx
            .lock_memberships(&[req.membership_id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CentelhaError::not_found("membership", req.membership_id))?;

        if membership.event_id != req.event_id {
            return Err(CentelhaError::Validation(format!(
                "membership {} does not belong to event {}",
                membership.id, req.event_id
            )));
        }

        let balance = match tx.latest_ledger_entry(membership.id).await? {
            Some(LedgerEntry {
                balance_after: Some(balance),
                ..
            }) => balance,
            // rows written without a running balance: derive it
            Some(_) => sum_deltas(&tx.ledger_entries_for_membership(membership.id).await?)?,
            None => 0,
        };

        if req.kind == SourceKind::EventInitialBalance {
            let history = tx.ledger_entries_for_membership(membership.id).await?;
            if history
                .iter()
                .any(|e| e.source_type == SourceKind::EventInitialBalance)
            {
                return Err(CentelhaError::Validation(format!(
                    "membership {} already received its initial allotment",
                    membership.id
                )));
            }
        }

        let cached = membership.cached_balance();
        if cached != balance {
            error!(
                "Balance drift on membership {}: cached {cached}, ledger {balance}",
                membership.id
            );
            return Err(CentelhaError::IntegrityFault(format!(
                "membership {} cached balance {cached} differs from ledger balance {balance}",
                membership.id
            )));
        }

        let balance_after = balance.checked_add(req.delta).ok_or_else(|| {
            CentelhaError::Validation(format!("delta {} overflows the balance", req.delta))
        })?;
        if balance_after < 0 {
            return Err(CentelhaError::InsufficientBalance {
                membership_id: membership.id,
                available: balance,
                required: req.delta.saturating_neg(),
            });
        }

        let entry = tx
            .insert_ledger_entry(&NewLedgerEntry {
                event_id: req.event_id,
                event_player_id: membership.id,
                source_type: req.kind,
                source_id: req.source_id,
                delta_centelhas: req.delta,
                balance_after,
                created_by_admin_id: req.acting_admin,
            })
            .await?;
        tx.set_cached_balance(membership.id, balance_after).await?;

        Ok(entry)
    }

    /// Re-derive a membership balance by summing all of its entries
    ///
    /// # Errors
    ///
    /// * `CentelhaError::NotFound` - unknown membership
    pub async fn recompute_balance(&self, membership_id: MembershipId) -> CentelhaResult<i64> {
        let mut tx = self.store.begin().await?;
        tx.membership(membership_id)
            .await?
            .ok_or_else(|| CentelhaError::not_found("membership", membership_id))?;
        let entries = tx.ledger_entries_for_membership(membership_id).await?;
        tx.commit().await?;
        sum_deltas(&entries)
    }

    /// Entries of a membership, oldest first
    pub async fn entries_for_membership(
        &self,
        membership_id: MembershipId,
    ) -> CentelhaResult<Vec<LedgerEntry>> {
        let mut tx = self.store.begin().await?;
        let entries = tx.ledger_entries_for_membership(membership_id).await?;
        tx.commit().await?;
        Ok(entries)
    }

    /// Entries of an event, oldest first
    pub async fn entries_for_event(&self, event_id: EventId) -> CentelhaResult<Vec<LedgerEntry>> {
        let mut tx = self.store.begin().await?;
        let entries = tx.ledger_entries_for_event(event_id).await?;
        tx.commit().await?;
        Ok(entries)
    }

    /// Sum of gameplay deltas in an event
    ///
    /// Gameplay only moves centelhas between players and table pots, so
    /// this equals the negated sum of every open pot and is zero once all
    /// tables of the event are resolved.
    pub async fn gameplay_sum(&self, event_id: EventId) -> CentelhaResult<i64> {
        let entries = self.entries_for_event(event_id).await?;
        sum_deltas(entries.iter().filter(|e| e.source_type.is_gameplay()))
    }

    /// Manual balance correction by an admin
    ///
    /// # Arguments
    ///
    /// * `admin_id` - Acting admin
    /// * `event_id` - Event
    /// * `membership_id` - Membership to correct
    /// * `delta` - Signed amount
    /// * `reason` - Free-form reason kept in the audit trail
    pub async fn adjust_balance(
        &self,
        admin_id: AdminId,
        event_id: EventId,
        membership_id: MembershipId,
        delta: i64,
        reason: &str,
    ) -> CentelhaResult<LedgerEntry> {
        let entry = self
            .append(
                AppendRequest::new(event_id, membership_id, SourceKind::AdminAdjustment, delta)
                    .by_admin(admin_id),
            )
            .await?;

        info!(
            "Admin {admin_id} adjusted membership {membership_id} by {delta} (balance {:?})",
            entry.balance_after
        );
        self.audit
            .observe(
                AuditRecord::new(
                    admin_id,
                    "ledger.admin_adjustment",
                    "event_player",
                    Some(membership_id),
                )
                .in_event(event_id)
                .with_details(json!({
                    "ledger_entry_id": entry.id,
                    "delta": delta,
                    "balance_after": entry.balance_after,
                    "reason": reason,
                })),
            )
            .await;

        Ok(entry)
    }

    /// Credit centelhas bought outside the event
    ///
    /// # Arguments
    ///
    /// * `event_id` - Event
    /// * `membership_id` - Buyer
    /// * `amount` - Positive amount purchased
    /// * `reference` - Optional external purchase id
    /// * `admin_id` - Admin registering the purchase, if any
    pub async fn record_purchase(
        &self,
        event_id: EventId,
        membership_id: MembershipId,
        amount: i64,
        reference: Option<i64>,
        admin_id: Option<AdminId>,
    ) -> CentelhaResult<LedgerEntry> {
        let mut req = AppendRequest::new(event_id, membership_id, SourceKind::BankPurchase, amount);
        req.source_id = reference;
        req.acting_admin = admin_id;
        let entry = self.append(req).await?;

        if let Some(admin_id) = admin_id {
            self.audit
                .observe(
                    AuditRecord::new(
                        admin_id,
                        "ledger.bank_purchase",
                        "event_player",
                        Some(membership_id),
                    )
                    .in_event(event_id)
                    .with_details(json!({
                        "ledger_entry_id": entry.id,
                        "amount": amount,
                        "reference": reference,
                    })),
                )
                .await;
        }

        Ok(entry)
    }

    /// Pay out a prize and close the membership
    ///
    /// The withdrawal and the deactivation commit together.
    pub async fn withdraw_prize(
        &self,
        event_id: EventId,
        membership_id: MembershipId,
        amount: i64,
        admin_id: Option<AdminId>,
    ) -> CentelhaResult<LedgerEntry> {
        if amount <= 0 {
            return Err(CentelhaError::Validation(format!(
                "prize withdrawal must be > 0, got {amount}"
            )));
        }
        let mut req = AppendRequest::new(
            event_id,
            membership_id,
            SourceKind::PrizeWithdrawal,
            -amount,
        );
        req.acting_admin = admin_id;

        let req = &req;
        let entry = with_retry(&self.retry, "prize withdrawal", move || async move {
            let mut tx = self.store.begin().await?;
            let entry = Self::append_in(tx.as_mut(), req).await?;
            tx.set_membership_active(membership_id, false).await?;
            tx.commit().await?;
            Ok(entry)
        })
        .await?;

        info!("Membership {membership_id} withdrew {amount} centelhas and was closed");
        if let Some(admin_id) = admin_id {
            self.audit
                .observe(
                    AuditRecord::new(
                        admin_id,
                        "ledger.prize_withdrawal",
                        "event_player",
                        Some(membership_id),
                    )
                    .in_event(event_id)
                    .with_details(json!({ "ledger_entry_id": entry.id, "amount": amount })),
                )
                .await;
        }

        Ok(entry)
    }

    /// Attempt to change a committed entry
    ///
    /// Always rejected by the store, whatever the caller: `AppendOnlyViolation`
    /// for an existing entry, `NotFound` otherwise. The only remediation for
    /// a wrong entry is a compensating one.
    pub async fn amend_entry(&self, entry_id: LedgerEntryId, delta: i64) -> CentelhaResult<()> {
        let mut tx = self.store.begin().await?;
        let result = tx.update_ledger_entry(entry_id, delta).await;
        tx.rollback().await?;
        result.map_err(Into::into)
    }

    /// Attempt to remove a committed entry; always rejected like [`LedgerEngine::amend_entry`]
    pub async fn remove_entry(&self, entry_id: LedgerEntryId) -> CentelhaResult<()> {
        let mut tx = self.store.begin().await?;
        let result = tx.delete_ledger_entry(entry_id).await;
        tx.rollback().await?;
        result.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::event::{NewEvent, NewPlayer};
    use chrono::Utc;

    async fn setup() -> (LedgerEngine, Arc<MemoryStore>, EventId, MembershipId) {
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
                display_name: "Ana".to_string(),
                email: None,
            })
            .await
            .unwrap();
        let membership = tx.insert_membership(event.id, player.id).await.unwrap();
        tx.commit().await.unwrap();

        let ledger = LedgerEngine::new(store.clone(), RetryPolicy::no_retry());
        (ledger, store, event.id, membership.id)
    }

    #[tokio::test]
    async fn test_append_tracks_running_balance() {
        let (ledger, store, event_id, membership_id) = setup().await;

        let first = ledger
            .append(AppendRequest::new(
                event_id,
                membership_id,
                SourceKind::EventInitialBalance,
                100,
            ))
            .await
            .unwrap();
        assert_eq!(first.balance_after, Some(100));

        let mut tx = store.begin().await.unwrap();
        let second = LedgerEngine::append_in(
            tx.as_mut(),
            &AppendRequest::new(event_id, membership_id, SourceKind::TableBuyIn, -30)
                .with_source(1),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(second.balance_after, Some(70));
        assert_eq!(ledger.recompute_balance(membership_id).await.unwrap(), 70);
    }

    #[tokio::test]
    async fn test_overdraft_rejected_without_entry() {
        let (ledger, _, event_id, membership_id) = setup().await;
        ledger
            .append(AppendRequest::new(
                event_id,
                membership_id,
                SourceKind::BankPurchase,
                20,
            ))
            .await
            .unwrap();

        let result = ledger
            .append(
                AppendRequest::new(event_id, membership_id, SourceKind::PrizeWithdrawal, -21),
            )
            .await;
        match result {
            Err(CentelhaError::InsufficientBalance {
                available,
                required,
                ..
            }) => {
                assert_eq!(available, 20);
                assert_eq!(required, 21);
            }
            other => panic!("expected insufficient balance, got {other:?}"),
        }
        assert_eq!(
            ledger.entries_for_membership(membership_id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_table_scoped_kinds_refused_outside_tables() {
        let (ledger, _, event_id, membership_id) = setup().await;
        ledger
            .append(AppendRequest::new(
                event_id,
                membership_id,
                SourceKind::BankPurchase,
                100,
            ))
            .await
            .unwrap();

        for (kind, delta) in [
            (SourceKind::TableRollback, 5_000),
            (SourceKind::EliminationTransfer, 700),
            (SourceKind::ScoopTransfer, 300),
            (SourceKind::TableBuyIn, -10),
        ] {
            let result = ledger
                .append(AppendRequest::new(event_id, membership_id, kind, delta).with_source(9_999))
                .await;
            assert!(
                matches!(result, Err(CentelhaError::Validation(_))),
                "{kind} append should be refused, got {result:?}"
            );
        }
        assert_eq!(
            ledger.entries_for_membership(membership_id).await.unwrap().len(),
            1
        );
        assert_eq!(ledger.recompute_balance(membership_id).await.unwrap(), 100);
        assert_eq!(ledger.gameplay_sum(event_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_initial_allotment_only_once() {
        let (ledger, _, event_id, membership_id) = setup().await;
        let req = AppendRequest::new(event_id, membership_id, SourceKind::EventInitialBalance, 50);
        ledger.append(req.clone()).await.unwrap();
        assert!(matches!(
            ledger.append(req).await,
            Err(CentelhaError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_membership_must_belong_to_event() {
        let (ledger, _, event_id, membership_id) = setup().await;
        let result = ledger
            .append(AppendRequest::new(
                event_id + 1,
                membership_id,
                SourceKind::BankPurchase,
                10,
            ))
            .await;
        assert!(matches!(result, Err(CentelhaError::Validation(_))));

        let result = ledger
            .append(AppendRequest::new(event_id, 404, SourceKind::BankPurchase, 10))
            .await;
        assert!(matches!(result, Err(CentelhaError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_cache_drift_is_an_integrity_fault() {
        let (ledger, store, event_id, membership_id) = setup().await;
        ledger
            .append(AppendRequest::new(
                event_id,
                membership_id,
                SourceKind::BankPurchase,
                40,
            ))
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.set_cached_balance(membership_id, 1_000).await.unwrap();
        tx.commit().await.unwrap();

        let result = ledger
            .append(AppendRequest::new(
                event_id,
                membership_id,
                SourceKind::BankPurchase,
                5,
            ))
            .await;
        assert!(matches!(result, Err(CentelhaError::IntegrityFault(_))));
    }

    #[tokio::test]
    async fn test_withdrawal_closes_membership() {
        let (ledger, store, event_id, membership_id) = setup().await;
        ledger
            .record_purchase(event_id, membership_id, 80, Some(555), Some(1))
            .await
            .unwrap();
        let entry = ledger
            .withdraw_prize(event_id, membership_id, 80, Some(1))
            .await
            .unwrap();
        assert_eq!(entry.balance_after, Some(0));

        let mut tx = store.begin().await.unwrap();
        let membership = tx.membership(membership_id).await.unwrap().unwrap();
        assert!(!membership.is_active);
        let audit = tx.audit_logs_for_event(event_id).await.unwrap();
        assert_eq!(audit.len(), 2);
    }

    #[tokio::test]
    async fn test_admin_adjustment_is_audited() {
        let (ledger, store, event_id, membership_id) = setup().await;
        ledger
            .adjust_balance(9, event_id, membership_id, 15, "tie-break prize")
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        let audit = tx.audit_logs_for_event(event_id).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].admin_id, 9);
        assert_eq!(audit[0].action, "ledger.admin_adjustment");
        assert_eq!(ledger_balance(&mut tx, membership_id).await, 15);
    }

    async fn ledger_balance(tx: &mut Box<dyn StoreTx>, membership_id: MembershipId) -> i64 {
        tx.membership(membership_id)
            .await
            .unwrap()
            .unwrap()
            .cached_balance()
    }

    #[tokio::test]
    async fn test_entries_cannot_be_amended_or_removed() {
        let (ledger, _, event_id, membership_id) = setup().await;
        let entry = ledger
            .append(AppendRequest::new(
                event_id,
                membership_id,
                SourceKind::BankPurchase,
                10,
            ))
            .await
            .unwrap();

        assert!(matches!(
            ledger.amend_entry(entry.id, 1_000).await,
            Err(CentelhaError::AppendOnlyViolation(_))
        ));
        assert!(matches!(
            ledger.remove_entry(entry.id).await,
            Err(CentelhaError::AppendOnlyViolation(_))
        ));
        assert_eq!(ledger.recompute_balance(membership_id).await.unwrap(), 10);
    }
}
