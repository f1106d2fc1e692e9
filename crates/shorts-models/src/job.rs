//! Job record and identifiers.

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::job_status::JobStatus;

/// Number of random bytes behind a public token (22 URL-safe chars).
const TOKEN_BYTES: usize = 16;

/// Internal identifier for a job. Never exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Errors returned when parsing a client-supplied token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobTokenError {
    #[error("token length {0} is outside 16..=64")]
    InvalidLength(usize),

    #[error("token contains characters outside [A-Za-z0-9_-]")]
    InvalidCharacters,
}

/// Public, URL-safe identifier handed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobToken(String);

impl JobToken {
    /// Generate a fresh random token.
    pub fn generate() -> Self {
        let bytes: [u8; TOKEN_BYTES] = rand::random();
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Parse a token received from a client.
    ///
    /// Only checks shape; existence is the store's concern.
    pub fn parse(raw: &str) -> Result<Self, JobTokenError> {
        if raw.len() < 16 || raw.len() > 64 {
            return Err(JobTokenError::InvalidLength(raw.len()));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(JobTokenError::InvalidCharacters);
        }
        Ok(Self(raw.to_string()))
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unit of work tracked from creation to a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Internal identifier
    pub id: JobId,
    /// Public identifier
    pub token: JobToken,
    /// Current lifecycle status
    pub status: JobStatus,
    /// Storage key of the uploaded input (set once)
    pub input_key: Option<String>,
    /// Failure reason, present only while `failed`
    pub error: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last write timestamp
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new job in the `created` state.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            token: JobToken::generate(),
            status: JobStatus::Created,
            input_key: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether an input object has been attached.
    pub fn has_input(&self) -> bool {
        self.input_key.is_some()
    }

    /// Seconds since the last write.
    pub fn idle_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.updated_at).num_seconds()
    }
}

impl Default for Job {
    fn default() -> Self {
        Self::new()
    }
}
