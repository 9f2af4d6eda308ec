// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Raw YAML deserialization types (internal)
// Kept apart from the public Config structs: interpolation, defaults and
// validation happen between the two.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub chatstream: String,
    pub transport: RawTransportConfig,
    pub auth: Option<RawAuthConfig>,
    pub timeouts: Option<RawTimeoutConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTransportConfig {
    pub base_url: String,
    pub chat_path: Option<String>,
    pub context_path: Option<String>,
    pub validate_key_path: Option<String>,
    pub connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawAuthConfig {
    pub require_api_key: Option<bool>,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTimeoutConfig {
    pub warning_secs: Option<u64>,
    pub hard_secs: Option<u64>,
    pub artifact_grace_secs: Option<u64>,
}
