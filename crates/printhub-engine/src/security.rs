//! # Security Gate
//!
//! Shared-secret check in front of every control-plane operation.
//!
//! A key is valid when it equals the provisioned `api_key`, or, while no
//! key is provisioned, the configured `default_api_key`. Rotation and reset
//! go through the [`ConfigStore`] so they are persisted like any other
//! setting.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use printhub_core::validation::validate_api_key;

use crate::config::{ConfigResult, ConfigStore};
use crate::error::EngineResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("API key is required")]
    Missing,

    #[error("API key is invalid")]
    Invalid,
}

/// Which key is currently in force.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyInfo {
    pub api_key: String,
    /// True while no key has been provisioned.
    pub is_default: bool,
}

/// Validates caller credentials against the current config.
#[derive(Debug, Clone)]
pub struct SecurityGate {
    config: Arc<ConfigStore>,
}

impl SecurityGate {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        SecurityGate { config }
    }

    /// Checks a caller-supplied key.
    pub async fn authorize(&self, presented: Option<&str>) -> Result<(), AuthError> {
        let presented = match presented.map(str::trim) {
            Some(key) if !key.is_empty() => key,
            _ => {
                warn!("Rejected request without API key");
                return Err(AuthError::Missing);
            }
        };

        let expected = self.get_api_key().await.api_key;
        if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            Ok(())
        } else {
            warn!("Rejected request with invalid API key");
            Err(AuthError::Invalid)
        }
    }

    pub async fn get_api_key(&self) -> ApiKeyInfo {
        let config = self.config.get().await;
        match config.security.api_key {
            Some(key) => ApiKeyInfo {
                api_key: key,
                is_default: false,
            },
            None => ApiKeyInfo {
                api_key: config.security.default_api_key,
                is_default: true,
            },
        }
    }

    /// Provisions a new key. The previous key stops working immediately.
    pub async fn update_api_key(&self, new_key: &str) -> EngineResult<ApiKeyInfo> {
        validate_api_key(new_key)?;
        let key = new_key.to_string();
        self.config
            .update(move |c| c.security.api_key = Some(key))
            .await?;
        info!("API key rotated");
        Ok(self.get_api_key().await)
    }

    /// Drops the provisioned key, reverting to the default key.
    pub async fn reset_api_key(&self) -> ConfigResult<ApiKeyInfo> {
        self.config.update(|c| c.security.api_key = None).await?;
        info!("API key reset to default");
        Ok(self.get_api_key().await)
    }
}

/// Compares without an early exit on the first differing byte. The loop
/// always walks the whole expected key, whatever length was presented.
fn constant_time_eq(presented: &[u8], expected: &[u8]) -> bool {
    let mut diff = u8::from(presented.len() != expected.len());
    for (i, y) in expected.iter().enumerate() {
        let x = presented.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0
}
