//! Event, player and membership data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{CentelhaError, CentelhaResult};

/// Event ID type
pub type EventId = i64;

/// Player ID type
pub type PlayerId = i64;

/// Event membership (`event_players.id`) type
pub type MembershipId = i64;

/// Admin user ID type (admins live in the external `users` table)
pub type AdminId = i64;

/// A bounded game period with a currency pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub name: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    /// Centelhas granted to every player on joining
    pub initial_centelhas: i64,
    pub created_by_admin_id: AdminId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Whether the event has already ended at `now`
    pub fn has_ended_at(&self, now: DateTime<Utc>) -> bool {
        self.ends_at.is_some_and(|end| now > end)
    }
}

/// Event creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub name: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub initial_centelhas: i64,
    pub created_by_admin_id: AdminId,
}

impl NewEvent {
    /// Check the event invariants before anything is written
    ///
    /// # Errors
    ///
    /// * `CentelhaError::Validation` - empty name, negative allotment or
    ///   an end time before the start time
    pub fn validate(&self) -> CentelhaResult<()> {
        if self.name.trim().is_empty() {
            return Err(CentelhaError::Validation(
                "event name must not be empty".to_string(),
            ));
        }
        if self.initial_centelhas < 0 {
            return Err(CentelhaError::Validation(format!(
                "initial allotment must be >= 0, got {}",
                self.initial_centelhas
            )));
        }
        match self.ends_at {
            Some(ends_at) if ends_at < self.starts_at => {
                return Err(CentelhaError::Validation(format!(
                    "event ends at {ends_at} before it starts at {}",
                    self.starts_at
                )));
            }
            _ => {}
        }
        Ok(())
    }
}

/// A person who may join events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub display_name: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Player registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPlayer {
    pub display_name: String,
    pub email: Option<String>,
}

impl NewPlayer {
    /// Normalize and check the registration
    ///
    /// Emails are trimmed and lowercased so uniqueness is case-insensitive.
    ///
    /// # Errors
    ///
    /// * `CentelhaError::Validation` - blank display name or malformed email
    pub fn normalized(self) -> CentelhaResult<Self> {
        let display_name = self.display_name.trim().to_string();
        if display_name.is_empty() {
            return Err(CentelhaError::Validation(
                "display name must not be empty".to_string(),
            ));
        }

        let email = match self.email {
            Some(email) => {
                let email = email.trim().to_lowercase();
                if email.is_empty() {
                    None
                } else if !email.contains('@') {
                    return Err(CentelhaError::Validation(format!(
                        "invalid email address: {email}"
                    )));
                } else {
                    Some(email)
                }
            }
            None => None,
        };

        Ok(Self {
            display_name,
            email,
        })
    }
}

/// A player's presence in one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMembership {
    pub id: MembershipId,
    pub event_id: EventId,
    pub player_id: PlayerId,
    pub joined_at: DateTime<Utc>,
    pub is_active: bool,
    /// Cached balance, maintained only by ledger appends
    pub current_balance: Option<i64>,
}

impl EventMembership {
    /// Cached balance, treating a never-seeded cache as zero
    pub fn cached_balance(&self) -> i64 {
        self.current_balance.unwrap_or(0)
    }
}
