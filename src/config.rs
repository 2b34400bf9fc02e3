//! Engine configuration.
//!
//! The gateway key pair and the JWT signing secret are the only externally
//! supplied trust anchors. They are loaded from the environment, wrapped in a
//! zeroizing [`Secret`], and redacted from all `Debug` output; they must
//! never reach logs.

use std::env;
use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use zeroize::Zeroize;

use crate::error::{EngineError, Result};

/// Environment variable holding the gateway key id.
const ENV_GATEWAY_KEY_ID: &str = "RAZORPAY_KEY_ID";
/// Environment variable holding the gateway key secret.
const ENV_GATEWAY_KEY_SECRET: &str = "RAZORPAY_KEY_SECRET";
/// Environment variable holding the JWT signing secret.
const ENV_JWT_SECRET: &str = "JWT_SECRET";
/// Environment variable overriding the gateway base URL.
const ENV_GATEWAY_BASE_URL: &str = "GATEWAY_BASE_URL";

/// A secret value that is zeroized on drop and redacted from `Debug`.
///
/// # Examples
///
/// ```
/// use leafpro_entitlements::config::Secret;
///
/// let secret = Secret::new("hunter2");
/// assert_eq!(secret.expose(), "hunter2");
/// assert_eq!(format!("{secret:?}"), "Secret(****)");
/// ```
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wraps a secret string.
    #[must_use]
    #[allow(
        clippy::impl_trait_in_params,
        reason = "impl Into<String> is idiomatic for constructors"
    )]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the secret material.
    ///
    /// The explicit name makes accidental logging grep-able.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns true when no material is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Payment gateway connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Public key id used as the HTTP basic-auth username.
    pub key_id: String,
    /// Key secret: basic-auth password and HMAC signing key.
    pub key_secret: Secret,
    /// Gateway API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Total request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.razorpay.com".to_owned()
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

impl GatewayConfig {
    /// Validates configuration values are within acceptable bounds.
    ///
    /// # Errors
    ///
    /// Returns error if credentials are empty, the base URL is not HTTPS, or
    /// timeout values are outside valid ranges:
    /// - `timeout_secs`: must be 1-300 seconds
    /// - `connect_timeout_secs`: must be 1-60 seconds
    pub fn validate(&self) -> Result<()> {
        if self.key_id.is_empty() {
            return Err(EngineError::Config("gateway key_id must not be empty".to_owned()));
        }
        if self.key_secret.is_empty() {
            return Err(EngineError::Config("gateway key_secret must not be empty".to_owned()));
        }
        if !self.base_url.starts_with("https://") {
            return Err(EngineError::Config("gateway base_url must use HTTPS".to_owned()));
        }
        if self.timeout_secs == 0 || self.timeout_secs > 300 {
            return Err(EngineError::Config("timeout_secs must be between 1 and 300".to_owned()));
        }
        if self.connect_timeout_secs == 0 || self.connect_timeout_secs > 60 {
            return Err(EngineError::Config(
                "connect_timeout_secs must be between 1 and 60".to_owned(),
            ));
        }
        Ok(())
    }

    /// Returns the request timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns the connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Payment gateway settings.
    pub gateway: GatewayConfig,
    /// JWT signing secret consumed by the upstream auth layer.
    ///
    /// The engine never reads tokens itself; the secret is carried here so
    /// the whole trust-anchor surface lives behind one redacted config.
    pub jwt_secret: Secret,
}

impl EngineConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] when a required variable is missing
    /// or a value fails [`GatewayConfig::validate`].
    pub fn from_env() -> Result<Self> {
        let key_id = require_env(ENV_GATEWAY_KEY_ID)?;
        let key_secret = Secret::new(require_env(ENV_GATEWAY_KEY_SECRET)?);
        let jwt_secret = Secret::new(require_env(ENV_JWT_SECRET)?);
        let base_url = env::var(ENV_GATEWAY_BASE_URL).unwrap_or_else(|_| default_base_url());

        let config = Self {
            gateway: GatewayConfig {
                key_id,
                key_secret,
                base_url,
                timeout_secs: default_timeout_secs(),
                connect_timeout_secs: default_connect_timeout_secs(),
            },
            jwt_secret,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates all sections.
    ///
    /// # Errors
    ///
    /// Returns error when any section fails validation.
    pub fn validate(&self) -> Result<()> {
        self.gateway.validate()?;
        if self.jwt_secret.is_empty() {
            return Err(EngineError::Config("jwt_secret must not be empty".to_owned()));
        }
        Ok(())
    }
}

fn require_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| EngineError::Config(format!("{name} must be set")))
}
