// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Environment references in config strings
//
// `${NAME}` is replaced by the variable's value and must be set.
// `${NAME:-fallback}` uses `fallback` when the variable is unset or empty,
// so a config can default the server address and still be overridden.
// Anything that is not a well-formed reference is copied through.

use super::error::ConfigError;

const OPEN: &str = "${";
const DEFAULT_SEP: &str = ":-";

/// Resolve `${NAME}` and `${NAME:-fallback}` references from the process
/// environment.
pub fn resolve_variables(input: &str) -> Result<String, ConfigError> {
    resolve_with(input, |name| std::env::var(name).ok())
}

/// Same as `resolve_variables`, with an explicit lookup.
pub fn resolve_with<F>(input: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len()..];

        let Some(end) = after.find('}') else {
            // Unterminated: the remainder is literal.
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let body = &after[..end];
        rest = &after[end + 1..];

        let (name, fallback) = match body.split_once(DEFAULT_SEP) {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (body, None),
        };
        if !is_variable_name(name) {
            out.push_str(OPEN);
            out.push_str(body);
            out.push('}');
            continue;
        }

        match (lookup(name).filter(|v| fallback.is_none() || !v.is_empty()), fallback) {
            (Some(value), _) => out.push_str(&value),
            (None, Some(fallback)) => out.push_str(fallback),
            (None, None) => {
                return Err(ConfigError::UndefinedVariable {
                    name: name.to_string(),
                })
            }
        }
    }

    out.push_str(rest);
    Ok(out)
}

fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
