//! API-key validation: format gate, hashed verdict cache, live probe.
//!
//! The key itself is never persisted — only a SHA-256 of it keys the cache.

use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::store::{Store, StoreError};

use super::client::OpenRouterClient;
use super::LlmError;

/// Expected key format prefix for OpenRouter credentials.
pub const KEY_PREFIX: &str = "sk-or-";
/// Verdicts live this long, invalid outcomes included.
pub const CACHE_TTL: Duration = Duration::from_secs(3600);
/// Budget for the live probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KeyErrorCode {
    #[serde(rename = "INVALID_KEY")]
    InvalidKey,
    #[serde(rename = "INSUFFICIENT_PERMISSIONS")]
    InsufficientPermissions,
    #[serde(rename = "RATE_LIMITED")]
    RateLimited,
    #[serde(rename = "NETWORK_ERROR")]
    NetworkError,
    #[serde(rename = "VALIDATION_FAILED")]
    ValidationFailed,
}

impl KeyErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyErrorCode::InvalidKey => "INVALID_KEY",
            KeyErrorCode::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            KeyErrorCode::RateLimited => "RATE_LIMITED",
            KeyErrorCode::NetworkError => "NETWORK_ERROR",
            KeyErrorCode::ValidationFailed => "VALIDATION_FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INVALID_KEY" => Some(KeyErrorCode::InvalidKey),
            "INSUFFICIENT_PERMISSIONS" => Some(KeyErrorCode::InsufficientPermissions),
            "RATE_LIMITED" => Some(KeyErrorCode::RateLimited),
            "NETWORK_ERROR" => Some(KeyErrorCode::NetworkError),
            "VALIDATION_FAILED" => Some(KeyErrorCode::ValidationFailed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyVerdict {
    pub valid: bool,
    pub model_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<KeyErrorCode>,
    /// True when the verdict came from the cache rather than a fresh probe.
    pub cached: bool,
}

impl KeyVerdict {
    fn invalid(code: KeyErrorCode) -> Self {
        Self {
            valid: false,
            model_count: 0,
            error_code: Some(code),
            cached: false,
        }
    }
}

pub struct KeyValidator {
    store: Store,
    client: OpenRouterClient,
}

impl KeyValidator {
    pub fn new(store: Store, client: OpenRouterClient) -> Self {
        Self { store, client }
    }

    pub fn hash_key(key: &str) -> String {
        let digest = Sha256::digest(key.as_bytes());
        format!("{digest:x}")
    }

    fn map_probe_error(e: &LlmError) -> KeyErrorCode {
        match e {
            LlmError::InvalidKey => KeyErrorCode::InvalidKey,
            LlmError::Provider { status: 403, .. } => KeyErrorCode::InsufficientPermissions,
            LlmError::RateLimited => KeyErrorCode::RateLimited,
            LlmError::Network(_) => KeyErrorCode::NetworkError,
            _ => KeyErrorCode::ValidationFailed,
        }
    }

    /// Validate a candidate key: format gate, cache consult, live probe.
    /// Probe verdicts (valid or not) are cached for an hour.
    pub async fn validate(&self, key: &str) -> Result<KeyVerdict, StoreError> {
        if !key.starts_with(KEY_PREFIX) {
            return Ok(KeyVerdict::invalid(KeyErrorCode::InvalidKey));
        }

        let hash = Self::hash_key(key);
        if let Some(hit) = self.store.lookup_key_validation(&hash).await? {
            tracing::debug!(key_hash = %&hash[..12], "key validation cache hit");
            return Ok(KeyVerdict {
                valid: hit.is_valid,
                model_count: hit.model_count,
                error_code: hit.error_code.as_deref().and_then(KeyErrorCode::parse),
                cached: true,
            });
        }

        let probe = tokio::time::timeout(PROBE_TIMEOUT, self.client.list_models(key)).await;
        let verdict = match probe {
            Ok(Ok(models)) => KeyVerdict {
                valid: true,
                model_count: models.len() as i64,
                error_code: None,
                cached: false,
            },
            Ok(Err(e)) => KeyVerdict::invalid(Self::map_probe_error(&e)),
            Err(_) => KeyVerdict::invalid(KeyErrorCode::NetworkError),
        };

        self.store
            .cache_key_validation(
                &hash,
                verdict.valid,
                verdict.model_count,
                verdict.error_code.map(KeyErrorCode::as_str),
                CACHE_TTL,
            )
            .await?;

        Ok(verdict)
    }
}
