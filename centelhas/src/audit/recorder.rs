//! Audit recorder implementation.

use log::{debug, warn};
use std::sync::Arc;

use super::models::{AuditLogEntry, AuditLogId, AuditRecord};
use crate::db::{Store, StoreTx};
use crate::errors::{CentelhaError, CentelhaResult};
use crate::event::EventId;

/// Records privileged actions
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn Store>,
}

impl AuditRecorder {
    /// Create a recorder over a store
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Record a privileged action in its own unit of work
    ///
    /// # Errors
    ///
    /// * `CentelhaError::Validation` - blank action or entity type
    /// * `CentelhaError::Conflict` - store busy
    pub async fn record(&self, record: AuditRecord) -> CentelhaResult<AuditLogEntry> {
        let mut tx = self.store.begin().await?;
        let entry = Self::record_in(tx.as_mut(), &record).await?;
        tx.commit().await?;
        Ok(entry)
    }

    /// Record inside a caller-owned unit of work
    pub async fn record_in(
        tx: &mut dyn StoreTx,
        record: &AuditRecord,
    ) -> CentelhaResult<AuditLogEntry> {
        if record.action.trim().is_empty() || record.entity_type.trim().is_empty() {
            return Err(CentelhaError::Validation(
                "audit action and entity type must not be empty".to_string(),
            ));
        }
        let entry = tx.insert_audit_log(record).await?;
        debug!(
            "audit #{}: admin {} {} {}:{:?}",
            entry.id, entry.admin_id, entry.action, entry.entity_type, entry.entity_id
        );
        Ok(entry)
    }

    /// Record after the audited operation has committed
    ///
    /// Failures are logged and swallowed; the audited operation already
    /// happened and must not be reported as failed.
    pub async fn observe(&self, record: AuditRecord) {
        let action = record.action.clone();
        if let Err(e) = self.record(record).await {
            warn!("Failed to record audit entry for {action}: {e}");
        }
    }

    /// Audit entries of an event, oldest first
    pub async fn logs_for_event(&self, event_id: EventId) -> CentelhaResult<Vec<AuditLogEntry>> {
        let mut tx = self.store.begin().await?;
        let logs = tx.audit_logs_for_event(event_id).await?;
        tx.commit().await?;
        Ok(logs)
    }

    /// Attempt to rewrite the action of a committed entry
    ///
    /// Always rejected by the store: `AppendOnlyViolation` for an existing
    /// entry, `NotFound` otherwise.
    pub async fn amend(&self, log_id: AuditLogId, action: &str) -> CentelhaResult<()> {
        let mut tx = self.store.begin().await?;
        let result = tx.update_audit_log(log_id, action).await;
        tx.rollback().await?;
        result.map_err(Into::into)
    }

    /// Attempt to remove a committed entry; always rejected like [`AuditRecorder::amend`]
    pub async fn remove(&self, log_id: AuditLogId) -> CentelhaResult<()> {
        let mut tx = self.store.begin().await?;
        let result = tx.delete_audit_log(log_id).await;
        tx.rollback().await?;
        result.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::event::NewEvent;
    use chrono::Utc;
    use serde_json::json;

    async fn recorder_with_event() -> (AuditRecorder, EventId) {
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
        tx.commit().await.unwrap();
        (AuditRecorder::new(store), event.id)
    }

    #[tokio::test]
    async fn test_record_and_list() {
        let (audit, event_id) = recorder_with_event().await;
        let entry = audit
            .record(
                AuditRecord::new(1, "ledger.admin_adjustment", "event_player", Some(3))
                    .in_event(event_id)
                    .with_details(json!({ "delta": -20 })),
            )
            .await
            .unwrap();
        assert_eq!(entry.details_json, Some(json!({ "delta": -20 })));

        let logs = audit.logs_for_event(event_id).await.unwrap();
        assert_eq!(logs, vec![entry]);
    }

    #[tokio::test]
    async fn test_blank_action_rejected() {
        let (audit, _) = recorder_with_event().await;
        let result = audit.record(AuditRecord::new(1, " ", "table", None)).await;
        assert!(matches!(result, Err(CentelhaError::Validation(_))));
    }

    #[tokio::test]
    async fn test_committed_entries_are_immutable() {
        let (audit, event_id) = recorder_with_event().await;
        let entry = audit
            .record(AuditRecord::new(1, "table.void", "table", Some(1)).in_event(event_id))
            .await
            .unwrap();

        assert!(matches!(
            audit.amend(entry.id, "table.start").await,
            Err(CentelhaError::AppendOnlyViolation(_))
        ));
        assert!(matches!(
            audit.remove(entry.id).await,
            Err(CentelhaError::AppendOnlyViolation(_))
        ));
        assert!(matches!(
            audit.remove(999).await,
            Err(CentelhaError::NotFound { .. })
        ));
        assert_eq!(audit.logs_for_event(event_id).await.unwrap().len(), 1);
    }
}
