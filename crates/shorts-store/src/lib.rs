//! Job record store.
//!
//! Provides:
//! - The `JobStore` contract: job rows, artifact rows, and the atomic
//!   compare-and-set status transition
//! - A PostgreSQL backend (`PgJobStore`)
//! - An in-memory backend (`MemoryJobStore`)

pub mod config;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

use std::sync::Arc;

pub use config::{StoreBackend, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;
pub use store::{AttachOutcome, JobStore};

/// Build the configured store backend, running migrations when enabled.
pub async fn connect(config: &StoreConfig) -> StoreResult<Arc<dyn JobStore>> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory job store; state is lost on restart");
            Ok(Arc::new(MemoryJobStore::new()))
        }
        StoreBackend::Postgres => {
            let store = PgJobStore::connect(config).await?;
            if config.run_migrations {
                store.migrate().await?;
            }
            Ok(Arc::new(store))
        }
    }
}
