//! Resolves the raw SQLCipher key from Signal's config.json

use std::path::Path;

use super::keyring::{unwrap_encrypted_key, CredentialStore};
use super::models::{DatabaseKey, SignalConfig};
use crate::errors::{ArchiveError, KeyFormatIssue, Result};

/// Length of a hex-encoded 32-byte key
pub const KEY_HEX_LEN: usize = 64;

/// Validate and decode a literal `key` value
pub fn parse_hex_key(raw: &str) -> Result<DatabaseKey> {
    let key_hex = raw.trim();

    if let Some((position, character)) = key_hex
        .chars()
        .enumerate()
        .find(|(_, c)| !c.is_ascii_hexdigit())
    {
        return Err(ArchiveError::InvalidKeyFormat(
            KeyFormatIssue::InvalidCharacter { character, position },
        ));
    }

    if key_hex.len() != KEY_HEX_LEN {
        return Err(ArchiveError::InvalidKeyFormat(KeyFormatIssue::InvalidLength {
            length: key_hex.len(),
        }));
    }

    let bytes = hex::decode(key_hex).map_err(|_| {
        ArchiveError::InvalidKeyFormat(KeyFormatIssue::InvalidLength {
            length: key_hex.len(),
        })
    })?;
    DatabaseKey::new(bytes)
}

/// Resolve the key from parsed config values
pub fn resolve_config(config: &SignalConfig, store: &dyn CredentialStore) -> Result<DatabaseKey> {
    // An empty `key` counts as absent
    if let Some(key) = config.key.as_deref().filter(|k| !k.trim().is_empty()) {
        let key = parse_hex_key(key)?;
        log::info!("Extracted plain encryption key from config.json");
        return Ok(key);
    }

    match (&config.encrypted_key, &config.safe_storage_backend) {
        (Some(encrypted), Some(backend)) => {
            log::info!("Encrypted key format detected ({})", backend);
            unwrap_encrypted_key(encrypted, backend, store)
        }
        _ => Err(ArchiveError::MissingKeyField),
    }
}

/// Resolve the key from raw config.json contents
pub fn resolve_key(config_content: &str, store: &dyn CredentialStore) -> Result<DatabaseKey> {
    let config = SignalConfig::from_json(config_content)?;
    resolve_config(&config, store)
}

/// Read config.json from disk and resolve its key
pub fn resolve_key_file(path: &Path, store: &dyn CredentialStore) -> Result<DatabaseKey> {
    if !path.is_file() {
        return Err(ArchiveError::FileNotFound {
            what: "config.json",
            path: path.to_path_buf(),
        });
    }
    let content = std::fs::read_to_string(path)?;
    resolve_key(&content, store)
}
