// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::time::Duration;

use crate::timeout::TimeoutSettings;

/// Used by the CLI when no config file is given.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";
pub const DEFAULT_CHAT_PATH: &str = "/chat";
pub const DEFAULT_CONTEXT_PATH: &str = "/context-status";
pub const DEFAULT_VALIDATE_KEY_PATH: &str = "/validate-key";
pub const DEFAULT_WARNING_SECS: u64 = 60;
pub const DEFAULT_HARD_SECS: u64 = 120;
pub const DEFAULT_ARTIFACT_GRACE_SECS: u64 = 180;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Parsed and validated chatstream config.
#[derive(Debug, Clone)]
pub struct Config {
    /// Schema version. Always "v1".
    pub version: String,
    pub transport: TransportConfig,
    pub auth: AuthConfig,
    pub timeouts: TimeoutConfig,
    /// SHA256 of the raw YAML: "sha256:{hex}".
    pub contract_hash: String,
}

impl Config {
    /// Defaults for everything except the server address.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            version: "v1".to_string(),
            transport: TransportConfig::new(base_url),
            auth: AuthConfig::default(),
            timeouts: TimeoutConfig::default(),
            contract_hash: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Scheme and authority, no trailing slash.
    pub base_url: String,
    pub chat_path: String,
    pub context_path: String,
    pub validate_key_path: String,
    pub connect_timeout_ms: Option<u64>,
}

impl TransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            chat_path: DEFAULT_CHAT_PATH.to_string(),
            context_path: DEFAULT_CONTEXT_PATH.to_string(),
            validate_key_path: DEFAULT_VALIDATE_KEY_PATH.to_string(),
            connect_timeout_ms: None,
        }
    }

    pub fn chat_url(&self) -> String {
        format!("{}{}", self.base_url, self.chat_path)
    }

    pub fn context_url(&self) -> String {
        format!("{}{}", self.base_url, self.context_path)
    }

    pub fn validate_key_url(&self) -> String {
        format!("{}{}", self.base_url, self.validate_key_path)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthConfig {
    /// Refuse to send until an API key is set.
    pub require_api_key: bool,
    pub api_key: Option<String>,
}

// Keeps the key out of logs.
impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("require_api_key", &self.require_api_key)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    pub warning_secs: u64,
    pub hard_secs: u64,
    pub artifact_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            warning_secs: DEFAULT_WARNING_SECS,
            hard_secs: DEFAULT_HARD_SECS,
            artifact_grace_secs: DEFAULT_ARTIFACT_GRACE_SECS,
        }
    }
}

impl From<TimeoutConfig> for TimeoutSettings {
    fn from(config: TimeoutConfig) -> Self {
        TimeoutSettings {
            warning: Duration::from_secs(config.warning_secs),
            hard: Duration::from_secs(config.hard_secs),
            artifact_grace: Duration::from_secs(config.artifact_grace_secs),
        }
    }
}
