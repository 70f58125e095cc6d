//! Events, players and memberships.

mod common;

use centelhas::CentelhaError;
use centelhas::event::{NewEvent, NewPlayer};
use chrono::{Duration, Utc};
use common::{ADMIN, engine, event_with_members};

fn player(name: &str, email: Option<&str>) -> NewPlayer {
    NewPlayer {
        display_name: name.to_string(),
        email: email.map(str::to_string),
    }
}

#[tokio::test]
async fn test_event_creation_is_audited() {
    let engine = engine();
    let (event, _) = event_with_members(&engine, 0, 250).await;

    assert_eq!(engine.registry().event(event.id).await.unwrap(), event);
    let logs = engine.audit().logs_for_event(event.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, "event.create");
    assert_eq!(logs[0].admin_id, ADMIN);
}

#[tokio::test]
async fn test_invalid_events_rejected() {
    let engine = engine();
    let now = Utc::now();

    let negative = NewEvent {
        name: "Negative".to_string(),
        starts_at: now,
        ends_at: None,
        initial_centelhas: -1,
        created_by_admin_id: ADMIN,
    };
    let backwards = NewEvent {
        name: "Backwards".to_string(),
        starts_at: now,
        ends_at: Some(now - Duration::hours(1)),
        initial_centelhas: 10,
        created_by_admin_id: ADMIN,
    };
    let unnamed = NewEvent {
        name: "   ".to_string(),
        starts_at: now,
        ends_at: None,
        initial_centelhas: 10,
        created_by_admin_id: ADMIN,
    };

    for bad in [negative, backwards, unnamed] {
        assert!(matches!(
            engine.registry().create_event(bad).await,
            Err(CentelhaError::Validation(_))
        ));
    }
}

#[tokio::test]
async fn test_player_email_normalized_and_unique() {
    let engine = engine();
    let first = engine
        .registry()
        .register_player(player("  Jace  ", Some(" Jace@Example.COM ")))
        .await
        .unwrap();
    assert_eq!(first.display_name, "Jace");
    assert_eq!(first.email.as_deref(), Some("jace@example.com"));

    let duplicate = engine
        .registry()
        .register_player(player("Other Jace", Some("jace@example.com")))
        .await;
    assert!(matches!(duplicate, Err(CentelhaError::Validation(_))));

    // players without email never collide
    engine.registry().register_player(player("Anon", None)).await.unwrap();
    engine.registry().register_player(player("Anon", None)).await.unwrap();
}

#[tokio::test]
async fn test_join_event_twice_rejected() {
    let engine = engine();
    let (event, members) = event_with_members(&engine, 1, 100).await;

    let again = engine
        .registry()
        .join_event(event.id, members[0].player_id)
        .await;
    assert!(matches!(again, Err(CentelhaError::Validation(_))));
    assert_eq!(
        engine
            .ledger()
            .entries_for_membership(members[0].id)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_join_unknown_event_or_player() {
    let engine = engine();
    let (event, _) = event_with_members(&engine, 0, 100).await;
    let p = engine
        .registry()
        .register_player(player("Chandra", None))
        .await
        .unwrap();

    assert!(matches!(
        engine.registry().join_event(77, p.id).await,
        Err(CentelhaError::NotFound { entity: "event", id: 77 })
    ));
    assert!(matches!(
        engine.registry().join_event(event.id, 78).await,
        Err(CentelhaError::NotFound { entity: "player", id: 78 })
    ));
}

#[tokio::test]
async fn test_ended_event_closed_to_new_members_and_tables() {
    let engine = engine();
    let event = engine
        .registry()
        .create_event(NewEvent {
            name: "Yesterday".to_string(),
            starts_at: Utc::now() - Duration::days(2),
            ends_at: Some(Utc::now() - Duration::days(1)),
            initial_centelhas: 100,
            created_by_admin_id: ADMIN,
        })
        .await
        .unwrap();

    let p = engine
        .registry()
        .register_player(player("Liliana", None))
        .await
        .unwrap();
    assert!(matches!(
        engine.registry().join_event(event.id, p.id).await,
        Err(CentelhaError::Validation(_))
    ));
    assert!(matches!(
        engine.tables().create_table(event.id, p.id).await,
        Err(CentelhaError::Validation(_))
    ));
}

#[tokio::test]
async fn test_non_member_cannot_create_table() {
    let engine = engine();
    let (event, _) = event_with_members(&engine, 1, 100).await;
    let outsider = engine
        .registry()
        .register_player(player("Outsider", None))
        .await
        .unwrap();

    assert!(matches!(
        engine.tables().create_table(event.id, outsider.id).await,
        Err(CentelhaError::Validation(_))
    ));
}

#[tokio::test]
async fn test_membership_toggle_is_audited() {
    let engine = engine();
    let (event, members) = event_with_members(&engine, 1, 100).await;

    let off = engine
        .registry()
        .set_membership_active(ADMIN, members[0].id, false)
        .await
        .unwrap();
    assert!(!off.is_active);
    let on = engine
        .registry()
        .set_membership_active(ADMIN, members[0].id, true)
        .await
        .unwrap();
    assert!(on.is_active);
    assert_eq!(on.current_balance, Some(100));

    let actions: Vec<String> = engine
        .audit()
        .logs_for_event(event.id)
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.action)
        .collect();
    assert!(actions.contains(&"membership.deactivate".to_string()));
    assert!(actions.contains(&"membership.activate".to_string()));
}

#[tokio::test]
async fn test_lookup_membership_by_player() {
    let engine = engine();
    let (event, members) = event_with_members(&engine, 3, 100).await;

    let found = engine
        .registry()
        .membership_for_player(event.id, members[2].player_id)
        .await
        .unwrap();
    assert_eq!(found.id, members[2].id);
    assert_eq!(engine.registry().memberships(event.id).await.unwrap().len(), 3);
}
