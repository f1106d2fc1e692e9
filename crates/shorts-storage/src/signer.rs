//! URL signing capability.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageResult;

/// Mints time-limited URLs for direct client access to a single object.
#[async_trait]
pub trait UrlSigner: Send + Sync {
    /// Signed PUT URL. Content type and exact byte length are bound into the
    /// signature, so only a matching upload succeeds.
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        content_length: u64,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Signed read-only GET URL.
    async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String>;

    /// Check the backing storage is reachable.
    async fn check_connectivity(&self) -> StorageResult<()>;
}
