//! Events, players and event memberships.

pub mod manager;
pub mod models;

pub use manager::EventRegistry;
pub use models::{
    AdminId, Event, EventId, EventMembership, MembershipId, NewEvent, NewPlayer, Player, PlayerId,
};
