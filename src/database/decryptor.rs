//! Decryption pipeline for a Signal Desktop database.
//!
//! The steps are separate types so each stage only exposes what is valid:
//! `Decryptor` (no key) → `KeyedDecryptor` → `OpenedDatabase` → `DecryptedSession`.

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tempfile::TempDir;

use super::cipher::{open_encrypted, CipherParams, SIGNAL_CIPHER};
use super::store::{StoreKind, StoreProbe, DEFAULT_TEMP_PREFIX};
use crate::errors::{ArchiveError, Result};
use crate::keys::DatabaseKey;

/// Entry point of the pipeline, before a key is known
#[derive(Debug, Clone)]
pub struct Decryptor {
    params: CipherParams,
    temp_prefix: String,
}

impl Default for Decryptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Decryptor {
    pub fn new() -> Self {
        Self {
            params: SIGNAL_CIPHER,
            temp_prefix: DEFAULT_TEMP_PREFIX.to_string(),
        }
    }

    /// Use a different prefix for exported temp directories
    pub fn with_temp_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.temp_prefix = prefix.into();
        self
    }

    pub fn with_key(self, key: DatabaseKey) -> KeyedDecryptor {
        KeyedDecryptor {
            key,
            params: self.params,
            temp_prefix: self.temp_prefix,
        }
    }
}

/// Holds the key; no file has been touched yet
pub struct KeyedDecryptor {
    key: DatabaseKey,
    params: CipherParams,
    temp_prefix: String,
}

impl KeyedDecryptor {
    /// Open the encrypted file read-only and check the key against it.
    ///
    /// The key is dropped (and zeroized) once the file is open.
    pub fn open(self, path: &Path) -> Result<OpenedDatabase> {
        let conn = open_encrypted(path, &self.key, &self.params)?;
        let probe = StoreProbe::run(&conn).map_err(|e| match e {
            ArchiveError::Sqlite(err) => ArchiveError::WrongKeyOrCorrupt(err.to_string()),
            other => other,
        })?;

        Ok(OpenedDatabase {
            conn,
            probe,
            temp_prefix: self.temp_prefix,
            path: path.to_path_buf(),
        })
    }
}

/// An encrypted database whose key has been verified
pub struct OpenedDatabase {
    conn: Connection,
    probe: StoreProbe,
    temp_prefix: String,
    path: PathBuf,
}

impl OpenedDatabase {
    pub fn probe(&self) -> &StoreProbe {
        &self.probe
    }

    /// The keyed connection to the encrypted file
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Produce a readable copy, falling back to the next store when an
    /// in-memory copy is refused.
    pub fn materialize(self) -> Result<DecryptedSession> {
        let mut last_error = None;

        for store in self.probe.stores(&self.temp_prefix) {
            log::debug!("Materializing {:?} as {}", self.path, store.kind());
            match store.materialize(&self.conn) {
                Ok(session) => {
                    log::info!("Decrypted {:?} ({})", self.path, session.kind());
                    return Ok(session);
                }
                Err(ArchiveError::BackupFailed(reason)) => {
                    log::warn!("In-memory copy failed, falling back to export: {}", reason);
                    last_error = Some(ArchiveError::BackupFailed(reason));
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| ArchiveError::ExportFailed("no store available".into())))
    }
}

/// A decrypted, read-only database plus the temporary storage backing it
pub struct DecryptedSession {
    conn: Option<Connection>,
    temp_dir: Option<TempDir>,
    kind: StoreKind,
}

impl DecryptedSession {
    pub(crate) fn in_memory(conn: Connection) -> Self {
        Self {
            conn: Some(conn),
            temp_dir: None,
            kind: StoreKind::InMemory,
        }
    }

    pub(crate) fn exported(conn: Connection, temp_dir: TempDir) -> Self {
        Self {
            conn: Some(conn),
            temp_dir: Some(temp_dir),
            kind: StoreKind::Exported,
        }
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    /// The open connection, or `SessionClosed` after `close()`
    pub fn connection(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(ArchiveError::SessionClosed)
    }

    /// Temporary directory owned by this session, if any
    pub fn storage_path(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(|dir| dir.path())
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    /// Close the connection and delete temporary storage. Safe to call twice.
    pub fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_, e)) = conn.close() {
                log::warn!("Error closing decrypted database: {}", e);
            }
        }

        // The connection must be gone before its file is removed
        if let Some(dir) = self.temp_dir.take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => log::info!("Removed temporary storage {:?}", path),
                Err(e) => log::warn!("Failed to remove temporary storage {:?}: {}", path, e),
            }
        }
    }
}

impl Drop for DecryptedSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Run the whole pipeline for one database file
pub fn decrypt_database(path: &Path, key: DatabaseKey) -> Result<DecryptedSession> {
    Decryptor::new().with_key(key).open(path)?.materialize()
}
