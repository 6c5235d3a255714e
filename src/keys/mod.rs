//! Key resolution for Signal Desktop databases
//!
//! This module provides:
//! - Parsing of Signal's config.json
//! - Validation of literal hex keys
//! - Unwrapping of keyring-protected `encryptedKey` values

pub mod keyring;
pub mod models;
pub mod resolver;

pub use keyring::{
    derive_wrapping_key, unwrap_encrypted_key, CredentialStore, LibsecretStore,
    StaticCredentialStore,
};
pub use models::{DatabaseKey, SafeStorageBackend, SignalConfig};
pub use resolver::{parse_hex_key, resolve_config, resolve_key, resolve_key_file};
