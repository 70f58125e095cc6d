//! Property-based checks over random operation sequences
//!
//! Whatever mix of joins, leaves, eliminations, scoops, rollbacks, voids
//! and admin movements is thrown at an event, these must hold after every
//! step:
//! - no cached balance drifts from its ledger
//! - no balance goes negative
//! - gameplay moves centelhas only between players and open pots

mod common;

use centelhas::{CentelhaError, Engine};
use centelhas::event::{Event, EventMembership};
use centelhas::table::{JoinTable, TableStatus};
use common::{ADMIN, engine, event_with_members};
use proptest::prelude::*;

const PLAYERS: usize = 4;

#[derive(Debug, Clone)]
enum Op {
    NewTable,
    Join { member: usize, bet: i64 },
    Leave { seat: usize },
    LockAndStart,
    Eliminate { by: usize, target: usize },
    Scoop { seat: usize },
    Finish,
    Rollback,
    Void,
    Purchase { member: usize, amount: i64 },
    Adjust { member: usize, delta: i64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        1 => Just(Op::NewTable),
        4 => (0..PLAYERS, 1i64..=400).prop_map(|(member, bet)| Op::Join { member, bet }),
        1 => (0..PLAYERS).prop_map(|seat| Op::Leave { seat }),
        2 => Just(Op::LockAndStart),
        4 => (0..PLAYERS, 0..PLAYERS).prop_map(|(by, target)| Op::Eliminate { by, target }),
        2 => (0..PLAYERS).prop_map(|seat| Op::Scoop { seat }),
        2 => Just(Op::Finish),
        1 => Just(Op::Rollback),
        1 => Just(Op::Void),
        1 => (0..PLAYERS, 1i64..=200).prop_map(|(member, amount)| Op::Purchase { member, amount }),
        1 => (0..PLAYERS, -200i64..=200)
            .prop_filter("non-zero", |(_, d)| *d != 0)
            .prop_map(|(member, delta)| Op::Adjust { member, delta }),
    ]
}

struct World {
    engine: Engine,
    event: Event,
    members: Vec<EventMembership>,
    table: Option<i64>,
}

impl World {
    async fn session_id(&self, seat: usize) -> Option<i64> {
        let table = self.table?;
        let sessions = self.engine.tables().sessions(table).await.ok()?;
        sessions.get(seat).map(|s| s.id)
    }

    /// Apply one operation; rejections are expected and ignored
    async fn apply(&mut self, op: &Op) {
        let tables = self.engine.tables();
        let result = match op {
            Op::NewTable => {
                match tables
                    .create_table(self.event.id, self.members[0].player_id)
                    .await
                {
                    Ok(table) => self.table = Some(table.id),
                    Err(e) => panic!("create table failed: {e}"),
                }
                Ok(())
            }
            Op::Join { member, bet } => match self.table {
                Some(table_id) => tables
                    .join_table(JoinTable {
                        table_id,
                        membership_id: self.members[*member].id,
                        commander_name: format!("Commander {member}"),
                        bet_centelhas: *bet,
                    })
                    .await
                    .map(drop),
                None => Ok(()),
            },
            Op::Leave { seat } => match self.session_id(*seat).await {
                Some(id) => tables.leave_table(id).await.map(drop),
                None => Ok(()),
            },
            Op::LockAndStart => match self.table {
                Some(id) => {
                    let _ = tables.lock_bets(id).await;
                    tables.start_table(id).await.map(drop)
                }
                None => Ok(()),
            },
            Op::Eliminate { by, target } => {
                match (self.session_id(*by).await, self.session_id(*target).await) {
                    (Some(by), Some(target)) => tables.eliminate(by, target).await.map(drop),
                    _ => Ok(()),
                }
            }
            Op::Scoop { seat } => match self.session_id(*seat).await {
                Some(id) => tables.scoop(id).await.map(drop),
                None => Ok(()),
            },
            Op::Finish => match self.table {
                Some(id) => tables.finish_table(id).await.map(drop),
                None => Ok(()),
            },
            Op::Rollback => match self.table {
                Some(id) => tables.rollback_table(id, ADMIN).await.map(drop),
                None => Ok(()),
            },
            Op::Void => match self.table {
                Some(id) => tables.void_table(id, ADMIN).await.map(drop),
                None => Ok(()),
            },
            Op::Purchase { member, amount } => self
                .engine
                .ledger()
                .record_purchase(self.event.id, self.members[*member].id, *amount, None, None)
                .await
                .map(drop),
            Op::Adjust { member, delta } => self
                .engine
                .ledger()
                .adjust_balance(ADMIN, self.event.id, self.members[*member].id, *delta, "prop")
                .await
                .map(drop),
        };
        if let Err(e) = result {
            assert!(
                !matches!(e, CentelhaError::IntegrityFault(_)),
                "{op:?} raised an integrity fault: {e}"
            );
        }
    }

    async fn check_invariants(&self) {
        let report = self
            .engine
            .balances()
            .reconcile_event(self.event.id)
            .await
            .unwrap();
        assert!(report.is_clean(), "drift: {report:?}");
        for check in &report.memberships {
            assert!(check.recomputed >= 0, "negative balance: {check:?}");
        }

        let totals = self.engine.conservation(self.event.id).await.unwrap();
        assert!(totals.holds(), "conservation broken: {totals:?}");

        for table in self
            .engine
            .tables()
            .tables_for_event(self.event.id)
            .await
            .unwrap()
        {
            let pot = self.engine.tables().pot(table.id).await.unwrap();
            assert!(pot.total() >= 0);
            if table.status.is_terminal() {
                assert_eq!(pot.total(), 0, "table {} left {} in its pot", table.id, pot.total());
            }
            assert!(table.timestamps_consistent());
            if table.status == TableStatus::RolledBack || table.status == TableStatus::Void {
                assert_eq!(pot.total(), 0);
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_random_operations_preserve_invariants(
        ops in prop::collection::vec(op_strategy(), 1..40)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let engine = engine();
            let (event, members) = event_with_members(&engine, PLAYERS, 500).await;
            let mut world = World { engine, event, members, table: None };
            world.apply(&Op::NewTable).await;

            for op in &ops {
                world.apply(op).await;
                world.check_invariants().await;
            }
        });
    }

    #[test]
    fn test_rollback_restores_pre_table_balances(
        bets in prop::collection::vec(1i64..=300, 2..=PLAYERS),
        knockouts in prop::collection::vec((0usize..PLAYERS, 0usize..PLAYERS), 0..6),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let engine = engine();
            let (event, members) = event_with_members(&engine, bets.len(), 500).await;
            let (table, sessions) =
                common::started_table(&engine, &event, &members, &bets).await;

            for (by, target) in &knockouts {
                if let (Some(by), Some(target)) = (sessions.get(*by), sessions.get(*target)) {
                    let _ = engine.tables().eliminate(by.id, target.id).await;
                }
            }

            // every player still holds at least their refund, so clawbacks fit
            let outcome = engine.tables().rollback_table(table.id, ADMIN).await.unwrap();
            assert_eq!(outcome.table.status, TableStatus::RolledBack);
            for member in &members {
                assert_eq!(common::balance(&engine, member).await, 500);
            }
            let totals = engine.verify_conservation(event.id).await.unwrap();
            assert_eq!(totals.gameplay_sum, 0);
        });
    }
}
