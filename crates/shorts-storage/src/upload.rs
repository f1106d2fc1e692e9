//! Upload broker: key naming, upload policy, and signed transfer URLs.
//!
//! The broker never touches object bytes. Clients PUT directly to storage with
//! the URL minted here, then attach the returned key to their job.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use shorts_models::JobToken;

use crate::error::{StorageError, StorageResult};
use crate::signer::UrlSigner;

/// Default presign expiry (10 minutes).
pub const DEFAULT_PRESIGN_EXPIRY_SECS: u64 = 600;

/// Default maximum upload size (2 GiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Maximum length of the sanitized filename component of a key.
pub const MAX_FILENAME_LEN: usize = 100;

/// Filename used when sanitizing leaves nothing.
pub const FALLBACK_FILENAME: &str = "upload";

/// Prefix of every input key.
const UPLOAD_PREFIX: &str = "uploads";

/// Upload policy.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// Largest accepted declared size
    pub max_upload_bytes: u64,
    /// Accepted content types (exact match, lowercase)
    pub allowed_content_types: Vec<String>,
    /// PUT URL lifetime
    pub put_expiry: Duration,
    /// GET URL lifetime
    pub get_expiry: Duration,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_content_types: vec![
                "video/mp4".to_string(),
                "video/quicktime".to_string(),
                "video/webm".to_string(),
                "video/x-matroska".to_string(),
            ],
            put_expiry: Duration::from_secs(DEFAULT_PRESIGN_EXPIRY_SECS),
            get_expiry: Duration::from_secs(DEFAULT_PRESIGN_EXPIRY_SECS),
        }
    }
}

impl UploadPolicy {
    /// Create policy from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_upload_bytes: std::env::var("MAX_UPLOAD_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_upload_bytes),
            allowed_content_types: std::env::var("ALLOWED_CONTENT_TYPES")
                .map(|s| {
                    s.split(',')
                        .map(|t| t.trim().to_ascii_lowercase())
                        .filter(|t| !t.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.allowed_content_types),
            put_expiry: std::env::var("PRESIGN_PUT_EXPIRY_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.put_expiry),
            get_expiry: std::env::var("PRESIGN_GET_EXPIRY_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.get_expiry),
        }
    }

    /// Check a declared upload against the policy.
    pub fn check(&self, content_type: &str, size_bytes: u64) -> StorageResult<()> {
        let content_type = content_type.trim().to_ascii_lowercase();
        if !self.allowed_content_types.iter().any(|t| *t == content_type) {
            return Err(StorageError::invalid_upload(format!(
                "content type '{}' is not allowed",
                content_type
            )));
        }
        if size_bytes == 0 {
            return Err(StorageError::invalid_upload("sizeBytes must be at least 1"));
        }
        if size_bytes > self.max_upload_bytes {
            return Err(StorageError::invalid_upload(format!(
                "sizeBytes {} exceeds maximum of {}",
                size_bytes, self.max_upload_bytes
            )));
        }
        Ok(())
    }
}

/// A signed upload target handed to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUpload {
    /// Storage key to attach to the job once the upload completes
    pub key: String,
    pub upload_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Sanitize a caller-supplied filename for embedding in a storage key.
///
/// Drops path separators and dot segments, keeps `[A-Za-z0-9._-]`, strips
/// leading dots, and truncates to [`MAX_FILENAME_LEN`].
pub fn sanitize_filename(name: &str) -> String {
    let joined: String = name
        .split(|c| c == '/' || c == '\\')
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .collect::<Vec<_>>()
        .join("");

    let sanitized: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_' || *c == '.')
        .collect::<String>()
        .trim_start_matches('.')
        .chars()
        .take(MAX_FILENAME_LEN)
        .collect();

    if sanitized.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        sanitized
    }
}

/// Build a fresh input key: `uploads/{jobToken|unassigned}/{uuid}-{filename}`.
pub fn build_input_key(filename: &str, job_token: Option<&JobToken>) -> String {
    let owner = job_token.map(JobToken::as_str).unwrap_or("unassigned");
    format!(
        "{}/{}/{}-{}",
        UPLOAD_PREFIX,
        owner,
        Uuid::new_v4().simple(),
        sanitize_filename(filename)
    )
}

/// Mints signed upload and download URLs under an upload policy.
#[derive(Clone)]
pub struct UploadBroker {
    signer: Arc<dyn UrlSigner>,
    policy: UploadPolicy,
}

impl UploadBroker {
    pub fn new(signer: Arc<dyn UrlSigner>, policy: UploadPolicy) -> Self {
        Self { signer, policy }
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    pub fn signer(&self) -> &Arc<dyn UrlSigner> {
        &self.signer
    }

    /// Validate a declared upload and mint a PUT URL for a new key.
    pub async fn presign_upload(
        &self,
        filename: &str,
        content_type: &str,
        size_bytes: u64,
        job_token: Option<&JobToken>,
    ) -> StorageResult<PresignedUpload> {
        self.policy.check(content_type, size_bytes)?;

        let key = build_input_key(filename, job_token);
        let content_type = content_type.trim().to_ascii_lowercase();
        let upload_url = self
            .signer
            .presign_put(&key, &content_type, size_bytes, self.policy.put_expiry)
            .await?;

        debug!(key = %key, size_bytes, "Minted upload URL");

        Ok(PresignedUpload {
            key,
            upload_url,
            expires_at: expiry_from_now(self.policy.put_expiry),
        })
    }

    /// Mint a read-only URL for an existing key.
    pub async fn presign_download(&self, key: &str) -> StorageResult<String> {
        self.signer.presign_get(key, self.policy.get_expiry).await
    }
}

fn expiry_from_now(expires_in: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::seconds(expires_in.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hmac_signer::{HmacSignerConfig, HmacUrlSigner};
    use std::collections::HashSet;

    fn broker() -> UploadBroker {
        let signer = HmacUrlSigner::new(HmacSignerConfig {
            base_url: "http://storage.local".to_string(),
            secret: "secret".to_string(),
        })
        .unwrap();
        UploadBroker::new(Arc::new(signer), UploadPolicy::default())
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("video.mp4"), "video.mp4");
        assert_eq!(sanitize_filename("my video (1).mp4"), "myvideo1.mp4");
        assert_eq!(sanitize_filename("../../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\clip.mov"), "CUsersmeclip.mov");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename(""), FALLBACK_FILENAME);
        assert_eq!(sanitize_filename("////"), FALLBACK_FILENAME);
        assert_eq!(sanitize_filename("日本語"), FALLBACK_FILENAME);
        assert_eq!(sanitize_filename(&"a".repeat(300)).len(), MAX_FILENAME_LEN);
    }

    #[test]
    fn test_input_keys_are_unique_per_attempt() {
        let token = JobToken::generate();
        let keys: HashSet<String> = (0..100)
            .map(|_| build_input_key("video.mp4", Some(&token)))
            .collect();
        assert_eq!(keys.len(), 100);

        for key in &keys {
            assert!(key.starts_with(&format!("uploads/{}/", token)));
            assert!(key.ends_with("-video.mp4"));
        }

        assert!(build_input_key("x.mp4", None).starts_with("uploads/unassigned/"));
    }

    #[test]
    fn test_policy_checks() {
        let policy = UploadPolicy {
            max_upload_bytes: 1000,
            ..Default::default()
        };
        assert!(policy.check("video/mp4", 1000).is_ok());
        assert!(policy.check("Video/MP4", 1).is_ok());
        assert!(policy.check("video/mp4", 0).is_err());
        assert!(policy.check("video/mp4", 1001).is_err());
        assert!(matches!(
            policy.check("application/x-sh", 10),
            Err(StorageError::InvalidUpload(_))
        ));
    }

    #[tokio::test]
    async fn test_presign_upload() {
        let broker = broker();
        let token = JobToken::generate();
        let upload = broker
            .presign_upload("video.mp4", "video/mp4", 1000, Some(&token))
            .await
            .unwrap();

        assert!(upload.key.starts_with(&format!("uploads/{}/", token)));
        assert!(upload.upload_url.contains("method=PUT"));
        assert!(upload.upload_url.contains("contentLength=1000"));
        assert!(upload.expires_at > Utc::now());

        let json = serde_json::to_value(&upload).unwrap();
        assert!(json.get("uploadUrl").is_some());
        assert!(json.get("expiresAt").is_some());
    }

    #[tokio::test]
    async fn test_presign_upload_rejects_disallowed_type() {
        let broker = broker();
        let err = broker
            .presign_upload("run.sh", "text/x-shellscript", 10, None)
            .await
            .unwrap_err();
        assert!(err.is_client_error());
    }
}
