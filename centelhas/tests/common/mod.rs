//! Shared fixtures for integration tests.

#![allow(dead_code)]

use centelhas::event::{Event, EventMembership, NewEvent, NewPlayer};
use centelhas::table::{JoinTable, Table, TableSession};
use centelhas::{Engine, EngineConfig, RetryPolicy};
use chrono::{Duration, Utc};

pub const ADMIN: i64 = 1;

/// Engine over a fresh in-memory store with fast retries
pub fn engine() -> Engine {
    Engine::in_memory(EngineConfig {
        retry: RetryPolicy {
            max_retries: 3,
            base_backoff: std::time::Duration::from_millis(1),
        },
        ..EngineConfig::default()
    })
}

/// Event with `players` members, each seeded with `initial` centelhas
pub async fn event_with_members(
    engine: &Engine,
    players: usize,
    initial: i64,
) -> (Event, Vec<EventMembership>) {
    let event = engine
        .registry()
        .create_event(NewEvent {
            name: "Commander League".to_string(),
            starts_at: Utc::now() - Duration::hours(1),
            ends_at: Some(Utc::now() + Duration::hours(6)),
            initial_centelhas: initial,
            created_by_admin_id: ADMIN,
        })
        .await
        .expect("create event");

    let mut memberships = Vec::with_capacity(players);
    for i in 0..players {
        let player = engine
            .registry()
            .register_player(NewPlayer {
                display_name: format!("Player {i}"),
                email: Some(format!("player{i}@example.com")),
            })
            .await
            .expect("register player");
        memberships.push(
            engine
                .registry()
                .join_event(event.id, player.id)
                .await
                .expect("join event"),
        );
    }
    (event, memberships)
}

/// Draft table with every membership joined at the given bets
pub async fn table_with_bets(
    engine: &Engine,
    event: &Event,
    memberships: &[EventMembership],
    bets: &[i64],
) -> (Table, Vec<TableSession>) {
    let table = engine
        .tables()
        .create_table(event.id, memberships[0].player_id)
        .await
        .expect("create table");

    let mut sessions = Vec::with_capacity(bets.len());
    for (membership, bet) in memberships.iter().zip(bets) {
        sessions.push(
            engine
                .tables()
                .join_table(JoinTable {
                    table_id: table.id,
                    membership_id: membership.id,
                    commander_name: format!("Commander {}", membership.id),
                    bet_centelhas: *bet,
                })
                .await
                .expect("join table"),
        );
    }
    (table, sessions)
}

/// Started table with every membership joined at the given bets
pub async fn started_table(
    engine: &Engine,
    event: &Event,
    memberships: &[EventMembership],
    bets: &[i64],
) -> (Table, Vec<TableSession>) {
    let (table, sessions) = table_with_bets(engine, event, memberships, bets).await;
    engine.tables().lock_bets(table.id).await.expect("lock bets");
    let table = engine.tables().start_table(table.id).await.expect("start");
    (table, sessions)
}

pub async fn balance(engine: &Engine, membership: &EventMembership) -> i64 {
    engine
        .balances()
        .balance(membership.id)
        .await
        .expect("balance")
}
