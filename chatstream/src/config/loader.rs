// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

use sha2::{Digest, Sha256};

use super::error::ConfigError;
use super::interpolation::resolve_variables;
use super::raw;
use super::source::ConfigSource;
use super::types::*;

/// The only config schema version this client understands.
const CONFIG_VERSION: &str = "v1";

/// Load and validate a chatstream config from the given source.
///
/// Steps:
/// 1. Read raw YAML from source
/// 2. Compute SHA256 contract hash
/// 3. Parse YAML into raw deserialization types
/// 4. Resolve variable interpolation in string fields
/// 5. Apply defaults and validate
pub fn load_config(source: &dyn ConfigSource) -> Result<Config, ConfigError> {
    let raw_yaml = source.load()?;
    let contract_hash = compute_hash(&raw_yaml);

    let raw: raw::RawConfig = serde_yaml::from_str(&raw_yaml)?;

    if raw.chatstream != CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion {
            found: raw.chatstream,
            expected: CONFIG_VERSION,
        });
    }

    let transport = build_transport_config(raw.transport)?;
    let auth = build_auth_config(raw.auth)?;
    let timeouts = build_timeout_config(raw.timeouts)?;

    tracing::debug!(
        source = %source.describe(),
        contract_hash = %contract_hash,
        base_url = %transport.base_url,
        "config loaded"
    );

    Ok(Config {
        version: raw.chatstream,
        transport,
        auth,
        timeouts,
        contract_hash,
    })
}

pub fn compute_hash(raw_yaml: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_yaml.as_bytes());
    let hash = hasher.finalize();
    format!("sha256:{:x}", hash)
}

fn build_transport_config(raw: raw::RawTransportConfig) -> Result<TransportConfig, ConfigError> {
    let base_url = resolve_variables(raw.base_url.trim())?;
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(ConfigError::Validation(format!(
            "transport.base_url \"{base_url}\" must start with http:// or https://"
        )));
    }

    let mut config = TransportConfig::new(base_url);
    config.chat_path = build_path("chat_path", raw.chat_path, DEFAULT_CHAT_PATH)?;
    config.context_path = build_path("context_path", raw.context_path, DEFAULT_CONTEXT_PATH)?;
    config.validate_key_path = build_path(
        "validate_key_path",
        raw.validate_key_path,
        DEFAULT_VALIDATE_KEY_PATH,
    )?;

    if raw.connect_timeout_ms == Some(0) {
        return Err(ConfigError::Validation(
            "transport.connect_timeout_ms must be greater than 0".to_string(),
        ));
    }
    config.connect_timeout_ms = raw.connect_timeout_ms;

    Ok(config)
}

fn build_path(field: &str, raw: Option<String>, default: &str) -> Result<String, ConfigError> {
    let path = match raw {
        Some(p) => resolve_variables(&p)?,
        None => return Ok(default.to_string()),
    };
    if !path.starts_with('/') {
        return Err(ConfigError::Validation(format!(
            "transport.{field} \"{path}\" must start with '/'"
        )));
    }
    Ok(path)
}

fn build_auth_config(raw: Option<raw::RawAuthConfig>) -> Result<AuthConfig, ConfigError> {
    let Some(raw) = raw else {
        return Ok(AuthConfig::default());
    };

    let api_key = match raw.api_key {
        Some(key) => {
            let resolved = resolve_variables(&key)?;
            let trimmed = resolved.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        None => None,
    };

    Ok(AuthConfig {
        require_api_key: raw.require_api_key.unwrap_or(false),
        api_key,
    })
}

fn build_timeout_config(raw: Option<raw::RawTimeoutConfig>) -> Result<TimeoutConfig, ConfigError> {
    let defaults = TimeoutConfig::default();
    let Some(raw) = raw else {
        return Ok(defaults);
    };

    let config = TimeoutConfig {
        warning_secs: raw.warning_secs.unwrap_or(defaults.warning_secs),
        hard_secs: raw.hard_secs.unwrap_or(defaults.hard_secs),
        artifact_grace_secs: raw
            .artifact_grace_secs
            .unwrap_or(defaults.artifact_grace_secs),
    };

    for (name, value) in [
        ("warning_secs", config.warning_secs),
        ("hard_secs", config.hard_secs),
        ("artifact_grace_secs", config.artifact_grace_secs),
    ] {
        if value == 0 {
            return Err(ConfigError::Validation(format!(
                "timeouts.{name} must be greater than 0"
            )));
        }
    }

    if config.warning_secs >= config.hard_secs {
        return Err(ConfigError::Validation(format!(
            "timeouts.warning_secs ({}) must be less than timeouts.hard_secs ({})",
            config.warning_secs, config.hard_secs
        )));
    }

    Ok(config)
}
