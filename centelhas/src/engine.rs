//! Engine facade bundling every component over one store.

use log::error;
use std::sync::Arc;

use crate::audit::AuditRecorder;
use crate::balance::BalanceCache;
use crate::config::EngineConfig;
use crate::db::{Database, MemoryStore, Store};
use crate::errors::{CentelhaError, CentelhaResult};
use crate::event::{EventId, EventRegistry};
use crate::ledger::LedgerEngine;
use crate::table::TableManager;

/// Gameplay totals of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conservation {
    /// Sum of every gameplay delta in the event
    pub gameplay_sum: i64,
    /// Centelhas held by tables that are not terminal
    pub open_pots: i64,
}

impl Conservation {
    /// Gameplay neither creates nor destroys centelhas
    pub fn holds(&self) -> bool {
        self.gameplay_sum + self.open_pots == 0
    }
}

/// All engine components sharing one store
#[derive(Clone)]
pub struct Engine {
    config: EngineConfig,
    registry: EventRegistry,
    ledger: LedgerEngine,
    balances: BalanceCache,
    tables: TableManager,
    audit: AuditRecorder,
}

impl Engine {
    /// Build an engine over any store
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        Self {
            registry: EventRegistry::new(Arc::clone(&store), config.retry),
            ledger: LedgerEngine::new(Arc::clone(&store), config.retry),
            balances: BalanceCache::new(Arc::clone(&store)),
            tables: TableManager::new(Arc::clone(&store), config.retry),
            audit: AuditRecorder::new(store),
            config,
        }
    }

    /// Build an engine over a fresh in-memory store
    pub fn in_memory(config: EngineConfig) -> Self {
        let store = MemoryStore::with_lock_timeout(config.lock_timeout);
        Self::new(Arc::new(store), config)
    }

    /// Build an engine over a PostgreSQL pool
    pub fn postgres(db: &Database, config: EngineConfig) -> Self {
        let store = db.store(config.lock_timeout);
        Self::new(Arc::new(store), config)
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Events, players and memberships
    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    /// Ledger
    pub fn ledger(&self) -> &LedgerEngine {
        &self.ledger
    }

    /// Cached balances
    pub fn balances(&self) -> &BalanceCache {
        &self.balances
    }

    /// Tables and sessions
    pub fn tables(&self) -> &TableManager {
        &self.tables
    }

    /// Audit trail
    pub fn audit(&self) -> &AuditRecorder {
        &self.audit
    }

    /// Gameplay totals of an event
    pub async fn conservation(&self, event_id: EventId) -> CentelhaResult<Conservation> {
        let gameplay_sum = self.ledger.gameplay_sum(event_id).await?;
        let mut open_pots = 0;
        for table in self.tables.tables_for_event(event_id).await? {
            if !table.status.is_terminal() {
                open_pots += self.tables.pot(table.id).await?.total();
            }
        }
        Ok(Conservation {
            gameplay_sum,
            open_pots,
        })
    }

    /// Check that gameplay in an event conserves centelhas
    ///
    /// Reads are not taken in one snapshot; run it on a quiescent event.
    ///
    /// # Errors
    ///
    /// * `CentelhaError::IntegrityFault` - gameplay created or destroyed centelhas
    pub async fn verify_conservation(&self, event_id: EventId) -> CentelhaResult<Conservation> {
        let totals = self.conservation(event_id).await?;
        if !totals.holds() {
            error!(
                "Event {event_id} gameplay sum {} does not offset open pots {}",
                totals.gameplay_sum, totals.open_pots
            );
            return Err(CentelhaError::IntegrityFault(format!(
                "event {event_id}: gameplay sum {} + open pots {} != 0",
                totals.gameplay_sum, totals.open_pots
            )));
        }
        Ok(totals)
    }
}
