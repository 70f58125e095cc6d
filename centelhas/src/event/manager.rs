//! Event and player registry.

use chrono::Utc;
use log::info;
use serde_json::json;
use std::sync::Arc;

use super::models::{
    AdminId, Event, EventId, EventMembership, MembershipId, NewEvent, NewPlayer, Player, PlayerId,
};
use crate::audit::{AuditRecord, AuditRecorder};
use crate::config::RetryPolicy;
use crate::db::Store;
use crate::errors::{CentelhaError, CentelhaResult};
use crate::ledger::{AppendRequest, LedgerEngine, SourceKind};
use crate::retry::with_retry;

/// Registry of events, players and memberships
#[derive(Clone)]
pub struct EventRegistry {
    store: Arc<dyn Store>,
    retry: RetryPolicy,
    audit: AuditRecorder,
}

impl EventRegistry {
    /// Create a new registry
    pub fn new(store: Arc<dyn Store>, retry: RetryPolicy) -> Self {
        let audit = AuditRecorder::new(Arc::clone(&store));
        Self {
            store,
            retry,
            audit,
        }
    }

    /// Create an event
    ///
    /// # Errors
    ///
    /// * `CentelhaError::Validation` - empty name, negative allotment or
    ///   inverted time window
    pub async fn create_event(&self, new_event: NewEvent) -> CentelhaResult<Event> {
        new_event.validate()?;

        let new_event = &new_event;
        let event = with_retry(&self.retry, "create event", move || async move {
            let mut tx = self.store.begin().await?;
            let event = tx.insert_event(new_event).await?;
            tx.commit().await?;
            Ok(event)
        })
        .await?;

        info!(
            "Admin {} created event {} ({}) with allotment {}",
            event.created_by_admin_id, event.id, event.name, event.initial_centelhas
        );
        self.audit
            .observe(
                AuditRecord::new(event.created_by_admin_id, "event.create", "event", Some(event.id))
                    .in_event(event.id)
                    .with_details(json!({
                        "name": event.name,
                        "initial_centelhas": event.initial_centelhas,
                        "starts_at": event.starts_at,
                        "ends_at": event.ends_at,
                    })),
            )
            .await;

        Ok(event)
    }

    /// Register a player
    ///
    /// # Errors
    ///
    /// * `CentelhaError::Validation` - blank name, malformed or already
    ///   registered email
    pub async fn register_player(&self, new_player: NewPlayer) -> CentelhaResult<Player> {
        let new_player = new_player.normalized()?;
        let new_player = &new_player;

        let player = with_retry(&self.retry, "register player", move || async move {
            let mut tx = self.store.begin().await?;
            let player = tx.insert_player(new_player).await?;
            tx.commit().await?;
            Ok(player)
        })
        .await?;

        info!("Registered player {} ({})", player.id, player.display_name);
        Ok(player)
    }

    /// Add a player to an event and seed the initial allotment
    ///
    /// The membership, its zeroed cache and the allotment entry commit
    /// together. No entry is written for a zero allotment.
    ///
    /// # Errors
    ///
    /// * `CentelhaError::NotFound` - unknown event or player
    /// * `CentelhaError::Validation` - already a member, or the event has ended
    pub async fn join_event(
        &self,
        event_id: EventId,
        player_id: PlayerId,
    ) -> CentelhaResult<EventMembership> {
        let membership = with_retry(&self.retry, "join event", move || async move {
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
            tx.player(player_id)
                .await?
                .ok_or_else(|| CentelhaError::not_found("player", player_id))?;

            let mut membership = tx.insert_membership(event_id, player_id).await?;
            tx.set_cached_balance(membership.id, 0).await?;

            let mut balance = 0;
            if event.initial_centelhas > 0 {
                let entry = LedgerEngine::append_in(
                    tx.as_mut(),
                    &AppendRequest::new(
                        event_id,
                        membership.id,
                        SourceKind::EventInitialBalance,
                        event.initial_centelhas,
                    ),
                )
                .await?;
                balance = entry.balance_after.unwrap_or(event.initial_centelhas);
            }
            tx.commit().await?;

            membership.current_balance = Some(balance);
            Ok(membership)
        })
        .await?;

        info!(
            "Player {player_id} joined event {event_id} as membership {} with {:?} centelhas",
            membership.id, membership.current_balance
        );
        Ok(membership)
    }

    /// Activate or deactivate a membership
    ///
    /// Inactive memberships cannot join tables; their balance is untouched.
    pub async fn set_membership_active(
        &self,
        admin_id: AdminId,
        membership_id: MembershipId,
        is_active: bool,
    ) -> CentelhaResult<EventMembership> {
        let membership = with_retry(&self.retry, "set membership active", move || async move {
            let mut tx = self.store.begin().await?;
            let mut membership = tx
                .lock_memberships(&[membership_id])
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| CentelhaError::not_found("membership", membership_id))?;
            tx.set_membership_active(membership_id, is_active).await?;
            tx.commit().await?;
            membership.is_active = is_active;
            Ok(membership)
        })
        .await?;

        info!("Admin {admin_id} set membership {membership_id} active={is_active}");
        self.audit
            .observe(
                AuditRecord::new(
                    admin_id,
                    if is_active {
                        "membership.activate"
                    } else {
                        "membership.deactivate"
                    },
                    "event_player",
                    Some(membership_id),
                )
                .in_event(membership.event_id),
            )
            .await;

        Ok(membership)
    }

    /// Get an event
    pub async fn event(&self, event_id: EventId) -> CentelhaResult<Event> {
        let mut tx = self.store.begin().await?;
        let event = tx.event(event_id).await?;
        tx.commit().await?;
        event.ok_or_else(|| CentelhaError::not_found("event", event_id))
    }

    /// Get a player
    pub async fn player(&self, player_id: PlayerId) -> CentelhaResult<Player> {
        let mut tx = self.store.begin().await?;
        let player = tx.player(player_id).await?;
        tx.commit().await?;
        player.ok_or_else(|| CentelhaError::not_found("player", player_id))
    }

    /// Get a membership
    pub async fn membership(&self, membership_id: MembershipId) -> CentelhaResult<EventMembership> {
        let mut tx = self.store.begin().await?;
        let membership = tx.membership(membership_id).await?;
        tx.commit().await?;
        membership.ok_or_else(|| CentelhaError::not_found("membership", membership_id))
    }

    /// Membership of a player in an event
    pub async fn membership_for_player(
        &self,
        event_id: EventId,
        player_id: PlayerId,
    ) -> CentelhaResult<EventMembership> {
        let mut tx = self.store.begin().await?;
        let membership = tx.membership_for_player(event_id, player_id).await?;
        tx.commit().await?;
        membership.ok_or_else(|| CentelhaError::not_found("membership", player_id))
    }

    /// All memberships of an event
    pub async fn memberships(&self, event_id: EventId) -> CentelhaResult<Vec<EventMembership>> {
        let mut tx = self.store.begin().await?;
        let memberships = tx.memberships_for_event(event_id).await?;
        tx.commit().await?;
        Ok(memberships)
    }
}
