//! Audit log data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{AdminId, EventId};

/// Audit log entry ID type
pub type AuditLogId = i64;

/// An immutable record of a privileged action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: AuditLogId,
    pub admin_id: AdminId,
    pub event_id: Option<EventId>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<i64>,
    pub details_json: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A privileged action about to be recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub admin_id: AdminId,
    pub event_id: Option<EventId>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<i64>,
    pub details: Option<serde_json::Value>,
}

impl AuditRecord {
    /// Start a record for `action` on an entity
    pub fn new(admin_id: AdminId, action: &str, entity_type: &str, entity_id: Option<i64>) -> Self {
        Self {
            admin_id,
            event_id: None,
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id,
            details: None,
        }
    }

    /// Scope the record to an event
    pub fn in_event(mut self, event_id: EventId) -> Self {
        self.event_id = Some(event_id);
        self
    }

    /// Attach a structured payload
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}
