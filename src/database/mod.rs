//! Database module for unlocking Signal's SQLCipher store
//!
//! This module provides:
//! - SQLCipher keying with Signal's cipher parameters
//! - In-memory (backup) and exported (dump/replay) decrypted copies
//! - Rewriting of Signal's private full-text tokenizer
//! - A session type that owns the decrypted copy and its temp storage

pub mod cipher;
pub mod decryptor;
pub mod dump;
pub mod store;
pub mod tokenizer;

pub use cipher::{open_encrypted, CipherParams, SIGNAL_CIPHER};
pub use decryptor::{decrypt_database, DecryptedSession, Decryptor, KeyedDecryptor, OpenedDatabase};
pub use store::{
    BackupStore, EncryptedStore, ExportStore, ReplayReport, StoreKind, StoreProbe,
    DEFAULT_TEMP_PREFIX, EXPORT_FILE_NAME,
};
pub use tokenizer::{references_vendor_tokenizer, rewrite_tokenizer};
