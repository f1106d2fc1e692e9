//! Object storage collaborator.
//!
//! This crate provides:
//! - The `UrlSigner` capability (presigned PUT/GET)
//! - An S3-compatible signer (R2, MinIO) and an HMAC signer for local runs
//! - The upload broker: key naming, filename sanitizing, upload policy

pub mod client;
pub mod error;
pub mod hmac_signer;
pub mod signer;
pub mod upload;

use std::sync::Arc;

pub use client::{S3Client, S3Config};
pub use error::{StorageError, StorageResult};
pub use hmac_signer::{HmacSignerConfig, HmacUrlSigner};
pub use signer::UrlSigner;
pub use upload::{build_input_key, sanitize_filename, PresignedUpload, UploadBroker, UploadPolicy};

/// Build the signer selected by `STORAGE_BACKEND` (`s3` by default, or `hmac`).
pub fn signer_from_env() -> StorageResult<Arc<dyn UrlSigner>> {
    let backend = std::env::var("STORAGE_BACKEND").unwrap_or_else(|_| "s3".to_string());
    match backend.to_ascii_lowercase().as_str() {
        "s3" | "r2" => Ok(Arc::new(S3Client::from_env()?)),
        "hmac" | "local" => Ok(Arc::new(HmacUrlSigner::from_env()?)),
        other => Err(StorageError::config_error(format!(
            "unknown STORAGE_BACKEND: {}",
            other
        ))),
    }
}
