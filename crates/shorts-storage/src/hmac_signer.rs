//! HMAC-signed URLs for local and test deployments.
//!
//! URLs point at a storage endpoint that shares the secret and checks requests
//! with [`HmacUrlSigner::verify_url`]:
//!
//! ```text
//! {base_url}/{key}?method=PUT&expires=1700000000&contentType=video%2Fmp4&contentLength=1000&signature=...
//! ```
//!
//! The signature covers method, key, expiry and, for PUT, content type and
//! length.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{StorageError, StorageResult};
use crate::signer::UrlSigner;

type HmacSha256 = Hmac<Sha256>;

/// Signer configuration.
#[derive(Debug, Clone)]
pub struct HmacSignerConfig {
    /// Public base URL of the storage endpoint
    pub base_url: String,
    /// Shared signing secret
    pub secret: String,
}

impl HmacSignerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            base_url: std::env::var("LOCAL_STORAGE_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:9000/storage".to_string()),
            secret: std::env::var("LOCAL_STORAGE_SECRET")
                .map_err(|_| StorageError::config_error("LOCAL_STORAGE_SECRET not set"))?,
        })
    }
}

/// Signs URLs with HMAC-SHA256 over a canonical request description.
#[derive(Clone)]
pub struct HmacUrlSigner {
    base_url: String,
    secret: String,
}

impl HmacUrlSigner {
    pub fn new(config: HmacSignerConfig) -> StorageResult<Self> {
        if config.secret.is_empty() {
            return Err(StorageError::config_error("signing secret must not be empty"));
        }
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret: config.secret,
        })
    }

    pub fn from_env() -> StorageResult<Self> {
        Self::new(HmacSignerConfig::from_env()?)
    }

    fn sign(&self, canonical: &str) -> StorageResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| StorageError::config_error(format!("Invalid HMAC key: {}", e)))?;
        mac.update(canonical.as_bytes());
        Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    fn signed_url(
        &self,
        method: &str,
        key: &str,
        upload: Option<(&str, u64)>,
        expires_in: Duration,
    ) -> StorageResult<String> {
        if key.is_empty() || key.split('/').any(|s| s.is_empty() || s == "." || s == "..") {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        let expires = Utc::now().timestamp() + expires_in.as_secs() as i64;
        let (content_type, content_length) = match upload {
            Some((ct, len)) => (ct.to_string(), len.to_string()),
            None => (String::new(), String::new()),
        };
        let signature = self.sign(&canonical(method, key, expires, &content_type, &content_length))?;

        let mut url = format!(
            "{}/{}?method={}&expires={}",
            self.base_url,
            encode_key(key),
            method,
            expires
        );
        if upload.is_some() {
            url.push_str(&format!(
                "&contentType={}&contentLength={}",
                urlencoding::encode(&content_type),
                content_length
            ));
        }
        url.push_str(&format!("&signature={}", signature));
        Ok(url)
    }

    /// Check a request against a URL minted by this signer.
    ///
    /// `content_type` and `content_length` are what the client actually sent;
    /// for PUT they must equal the signed values. Returns `Ok(false)` for any
    /// mismatch, tampering or expiry.
    pub fn verify_url(
        &self,
        url: &str,
        method: &str,
        content_type: Option<&str>,
        content_length: Option<u64>,
    ) -> StorageResult<bool> {
        let Some(rest) = url.strip_prefix(&self.base_url) else {
            return Ok(false);
        };
        let Some((path, query)) = rest.trim_start_matches('/').split_once('?') else {
            return Ok(false);
        };

        let key = match decode_key(path) {
            Some(key) => key,
            None => return Ok(false),
        };
        let params = parse_query(query);

        let signed_method = params.get("method").map(String::as_str).unwrap_or_default();
        if signed_method != method {
            return Ok(false);
        }

        let expires: i64 = match params.get("expires").and_then(|e| e.parse().ok()) {
            Some(expires) => expires,
            None => return Ok(false),
        };
        if Utc::now().timestamp() >= expires {
            return Ok(false);
        }

        let signed_type = params.get("contentType").cloned().unwrap_or_default();
        let signed_length = params.get("contentLength").cloned().unwrap_or_default();
        if method == "PUT" {
            let actual_length = content_length.map(|l| l.to_string()).unwrap_or_default();
            if content_type.unwrap_or_default() != signed_type || actual_length != signed_length {
                return Ok(false);
            }
        }

        let Some(signature) = params.get("signature") else {
            return Ok(false);
        };
        let Ok(signature) = URL_SAFE_NO_PAD.decode(signature) else {
            return Ok(false);
        };

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| StorageError::config_error(format!("Invalid HMAC key: {}", e)))?;
        mac.update(canonical(method, &key, expires, &signed_type, &signed_length).as_bytes());
        Ok(mac.verify_slice(&signature).is_ok())
    }
}

fn canonical(method: &str, key: &str, expires: i64, content_type: &str, content_length: &str) -> String {
    format!("{}\n{}\n{}\n{}\n{}", method, key, expires, content_type, content_length)
}

fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn decode_key(path: &str) -> Option<String> {
    let segments: Option<Vec<String>> = path
        .split('/')
        .map(|segment| urlencoding::decode(segment).ok().map(|s| s.into_owned()))
        .collect();
    segments.map(|s| s.join("/"))
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter_map(|(k, v)| Some((k.to_string(), urlencoding::decode(v).ok()?.into_owned())))
        .collect()
}

#[async_trait]
impl UrlSigner for HmacUrlSigner {
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        content_length: u64,
        expires_in: Duration,
    ) -> StorageResult<String> {
        self.signed_url("PUT", key, Some((content_type, content_length)), expires_in)
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        self.signed_url("GET", key, None, expires_in)
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        Ok(())
    }
}
