//! Application state.

use std::sync::Arc;

use anyhow::Context;

use shorts_queue::{QueueBackend, QueueConfig, TaskQueue};
use shorts_storage::{UploadBroker, UploadPolicy, UrlSigner};
use shorts_store::{JobStore, StoreConfig};

use crate::config::ApiConfig;
use crate::services::{QueueDispatcher, StatusReader};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub broker: UploadBroker,
    pub dispatcher: QueueDispatcher,
    pub status_reader: StatusReader,
}

impl AppState {
    /// Connect every collaborator from environment variables.
    pub async fn new(config: ApiConfig, queue_backend: QueueBackend) -> anyhow::Result<Self> {
        let store_config = StoreConfig::from_env().context("invalid store configuration")?;
        let store = shorts_store::connect(&store_config)
            .await
            .context("failed to connect job store")?;

        let queue = shorts_queue::connect(queue_backend, QueueConfig::from_env())
            .await
            .context("failed to connect task queue")?;

        let signer = shorts_storage::signer_from_env().context("failed to configure storage signer")?;

        Ok(Self::from_parts(config, store, queue, signer, UploadPolicy::from_env()))
    }

    /// Assemble state from already-built collaborators.
    pub fn from_parts(
        config: ApiConfig,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn TaskQueue>,
        signer: Arc<dyn UrlSigner>,
        policy: UploadPolicy,
    ) -> Self {
        let broker = UploadBroker::new(signer, policy);
        let dispatcher = QueueDispatcher::new(Arc::clone(&store), Arc::clone(&queue));
        let status_reader = StatusReader::new(Arc::clone(&store), broker.clone());

        Self {
            config,
            store,
            queue,
            broker,
            dispatcher,
            status_reader,
        }
    }
}
