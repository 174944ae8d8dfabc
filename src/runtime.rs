//! Process-wide engine runtime
//!
//! Exactly one record store is built at startup and shared by every handler;
//! [`EngineRuntime::shutdown`] releases it at process stop.

use std::sync::Arc;
use tracing::info;

use crate::config::{Args, StoreBackend};
use crate::db::{MemoryStore, MongoStore, RecordStore};
use crate::engine::{
    AccessPolicy, ClassOwnership, Clock, EngineConfig, SystemClock, UpdateEngine,
};
use crate::services::RosterService;
use crate::types::{EngineError, Result};

/// Store, engine and roster service wired together
pub struct EngineRuntime {
    store: Arc<dyn RecordStore>,
    pub engine: UpdateEngine,
    pub roster: RosterService,
    pub config: EngineConfig,
}

impl EngineRuntime {
    /// Connect the configured backend and build the engine on top of it
    pub async fn start(args: &Args) -> Result<Self> {
        args.validate().map_err(EngineError::Config)?;

        let store: Arc<dyn RecordStore> = match args.store_backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Mongo => {
                Arc::new(MongoStore::connect(&args.mongodb_uri, &args.mongodb_db).await?)
            }
        };

        let runtime = Self::with_store(
            store,
            Arc::new(ClassOwnership),
            Arc::new(SystemClock),
            args.engine_config(),
        );

        info!(
            backend = runtime.backend(),
            sub_batch_size = runtime.config.sub_batch_size,
            txn_rate_per_sec = runtime.config.txn_rate_per_sec,
            membership = %runtime.config.membership_strategy,
            "Engine runtime started"
        );

        Ok(runtime)
    }

    /// Build around an existing store (tests, embedding)
    pub fn with_store(
        store: Arc<dyn RecordStore>,
        policy: Arc<dyn AccessPolicy>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let engine = UpdateEngine::new(store.clone(), policy.clone(), clock.clone(), &config);
        let roster = RosterService::new(store.clone(), policy, clock, engine.membership().clone());

        Self {
            store,
            engine,
            roster,
            config,
        }
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Release the store
    pub async fn shutdown(&self) -> Result<()> {
        info!(backend = self.backend(), "Shutting down engine runtime");
        self.store.shutdown().await
    }
}
