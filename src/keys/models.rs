//! Key material and the subset of Signal's config.json we consume

use serde::Deserialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::{ArchiveError, Result};

/// Fields of Signal Desktop's `config.json` relevant to unlocking the database.
///
/// Older installs carry a literal `key`; newer ones wrap it with the OS
/// credential store and carry `encryptedKey` + `safeStorageBackend` instead.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalConfig {
    /// Plain 64-character hex SQLCipher key
    #[serde(default)]
    pub key: Option<String>,
    /// Hex of `v11` + AES-128-CBC ciphertext of the hex key
    #[serde(default)]
    pub encrypted_key: Option<String>,
    /// Which credential store holds the wrapping secret
    #[serde(default)]
    pub safe_storage_backend: Option<String>,
}

impl SignalConfig {
    /// Parse config.json contents
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(ArchiveError::ConfigParse)
    }
}

/// Credential stores Signal Desktop may use for `safeStorageBackend`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafeStorageBackend {
    /// GNOME keyring / any Secret Service provider, accessed through libsecret
    GnomeLibsecret,
}

impl SafeStorageBackend {
    /// Map the config value onto a supported backend
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim() {
            "gnome_libsecret" => Ok(Self::GnomeLibsecret),
            other => Err(ArchiveError::UnsupportedBackend(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GnomeLibsecret => "gnome_libsecret",
        }
    }
}

/// Raw SQLCipher key with secure memory handling
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DatabaseKey {
    key: Vec<u8>,
}

impl DatabaseKey {
    /// Wrap raw key bytes; an empty key is never valid
    pub fn new(key: Vec<u8>) -> Result<Self> {
        if key.is_empty() {
            return Err(ArchiveError::KeyUnwrapFailed("resolved key is empty".to_string()));
        }
        Ok(Self { key })
    }

    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }

    /// Lowercase hex, as used in `PRAGMA key = "x'...'"`
    pub fn to_hex(&self) -> String {
        hex::encode(&self.key)
    }
}

impl std::fmt::Debug for DatabaseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseKey")
            .field("len", &self.key.len())
            .field("key", &"[REDACTED]")
            .finish()
    }
}
