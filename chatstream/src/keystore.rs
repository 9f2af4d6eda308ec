// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// API key storage at rest
//
// The key is sealed with AES-256-GCM under a key derived from a
// passphrase with SHA-256. Nonce and ciphertext are stored base64 encoded
// next to an expiry. The passphrase usually ships with the client, so this
// keeps the key out of plain sight; it does not protect it from someone
// holding the binary.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const NONCE_SIZE: usize = 12;
const KEY_SALT: &[u8] = b"chatstream-api-key-v1";

/// Default lifetime of a stored key.
pub const DEFAULT_KEY_TTL_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("stored {field} is not valid base64: {reason}")]
    InvalidEncoding { field: &'static str, reason: String },

    #[error("stored nonce has {0} bytes, expected 12")]
    InvalidNonce(usize),

    #[error("could not seal key")]
    Encryption,

    /// Wrong passphrase, or the stored data was altered.
    #[error("could not open stored key")]
    Decryption,

    #[error("stored key did not decode to UTF-8 text")]
    InvalidData,

    #[error("stored key expired at {0}")]
    Expired(DateTime<Utc>),
}

/// A sealed key: base64 nonce and base64 ciphertext (with GCM tag).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedKey {
    pub nonce: String,
    pub ciphertext: String,
}

fn cipher_for(passphrase: &str) -> Aes256Gcm {
    let mut hasher = Sha256::new();
    hasher.update(KEY_SALT);
    hasher.update(passphrase.as_bytes());
    let digest = hasher.finalize();
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(digest.as_slice()))
}

/// Seal `plaintext` under `passphrase` with a fresh random nonce.
pub fn encrypt(plaintext: &str, passphrase: &str) -> Result<EncryptedKey, KeyError> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher_for(passphrase)
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
        .map_err(|_| KeyError::Encryption)?;

    Ok(EncryptedKey {
        nonce: BASE64.encode(nonce_bytes),
        ciphertext: BASE64.encode(ciphertext),
    })
}

/// Reverse `encrypt`.
pub fn decrypt(sealed: &EncryptedKey, passphrase: &str) -> Result<String, KeyError> {
    let nonce_bytes = BASE64
        .decode(sealed.nonce.trim())
        .map_err(|e| KeyError::InvalidEncoding {
            field: "nonce",
            reason: e.to_string(),
        })?;
    if nonce_bytes.len() != NONCE_SIZE {
        return Err(KeyError::InvalidNonce(nonce_bytes.len()));
    }

    let ciphertext = BASE64
        .decode(sealed.ciphertext.trim())
        .map_err(|e| KeyError::InvalidEncoding {
            field: "ciphertext",
            reason: e.to_string(),
        })?;

    let plaintext = cipher_for(passphrase)
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
        .map_err(|_| KeyError::Decryption)?;

    String::from_utf8(plaintext).map_err(|_| KeyError::InvalidData)
}

/// A persisted key with its expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredKey {
    #[serde(flatten)]
    pub sealed: EncryptedKey,
    pub expires_at: DateTime<Utc>,
}

impl StoredKey {
    pub fn seal(
        api_key: &str,
        passphrase: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self, KeyError> {
        Ok(Self {
            sealed: encrypt(api_key, passphrase)?,
            expires_at: now + ttl,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Recover the key, refusing once it has expired.
    pub fn open(&self, passphrase: &str, now: DateTime<Utc>) -> Result<String, KeyError> {
        if self.is_expired(now) {
            return Err(KeyError::Expired(self.expires_at));
        }
        decrypt(&self.sealed, passphrase)
    }
}
