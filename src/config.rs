//! Client configuration

use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::{B2Error, Result};

/// Account credentials for `b2_authorize_account`
#[derive(Clone)]
pub struct Credentials {
    /// Application key ID
    pub key_id: String,
    /// Application key secret
    pub application_key: String,
}

impl Credentials {
    /// Create credentials from an application key pair
    pub fn new(key_id: impl Into<String>, application_key: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            application_key: application_key.into(),
        }
    }

    /// Read the conventional `B2_KEY_ID` / `B2_APPLICATION_KEY` variables.
    /// This is the only place the crate touches the environment.
    pub fn from_env() -> Result<Self> {
        let key_id = std::env::var("B2_KEY_ID")
            .map_err(|_| B2Error::Config("B2_KEY_ID is not set".to_string()))?;
        let application_key = std::env::var("B2_APPLICATION_KEY")
            .map_err(|_| B2Error::Config("B2_APPLICATION_KEY is not set".to_string()))?;
        Ok(Self {
            key_id,
            application_key,
        })
    }

    /// Basic authorization header value for the authorize call
    pub(crate) fn basic_auth(&self) -> String {
        let pair = format!("{}:{}", self.key_id, self.application_key);
        format!("Basic {}", STANDARD.encode(pair))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key_id", &self.key_id)
            .field("application_key", &"<redacted>")
            .finish()
    }
}

/// Client configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Endpoint for `b2_authorize_account`; every other URL comes back from
    /// the authorize response
    pub auth_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// User agent string
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth_url: "https://api.backblazeb2.com".to_string(),
            timeout: Duration::from_secs(30),
            user_agent: format!("b2-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Config {
    /// Create a new config with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the authorize call somewhere else (test servers)
    pub fn with_auth_url(mut self, auth_url: impl Into<String>) -> Self {
        self.auth_url = auth_url.into();
        self
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
