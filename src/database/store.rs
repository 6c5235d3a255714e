//! Strategies for turning an opened encrypted database into a readable one

use std::borrow::Cow;
use std::path::Path;
use std::time::Duration;

use rusqlite::backup::Backup;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;

use super::decryptor::DecryptedSession;
use super::dump::{
    for_each_statement, is_transaction_boundary, is_virtual_table_declaration, SchemaSnapshot,
};
use super::tokenizer::{references_vendor_tokenizer, rewrite_tokenizer};
use crate::errors::{ArchiveError, Result};

/// Prefix of the temporary directory holding an exported database
pub const DEFAULT_TEMP_PREFIX: &str = "signal_archive_";

/// File name of the exported database inside its temporary directory
pub const EXPORT_FILE_NAME: &str = "decrypted.db";

/// Pages copied per backup step
const BACKUP_PAGES_PER_STEP: i32 = 256;

/// Where the decrypted copy of a session lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    InMemory,
    Exported,
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InMemory => write!(f, "in-memory"),
            Self::Exported => write!(f, "exported"),
        }
    }
}

/// A way of materializing a decrypted, read-only copy of an open database
pub trait EncryptedStore: Send + Sync {
    fn kind(&self) -> StoreKind;

    /// Copy everything readable from `source` into a new session
    fn materialize(&self, source: &Connection) -> Result<DecryptedSession>;
}

/// Page-level copy into a fresh in-memory database
#[derive(Debug, Default, Clone, Copy)]
pub struct BackupStore;

impl EncryptedStore for BackupStore {
    fn kind(&self) -> StoreKind {
        StoreKind::InMemory
    }

    fn materialize(&self, source: &Connection) -> Result<DecryptedSession> {
        let failed = |e: rusqlite::Error| ArchiveError::BackupFailed(e.to_string());

        let mut target = Connection::open_in_memory().map_err(failed)?;
        {
            let backup = Backup::new(source, &mut target).map_err(failed)?;
            backup
                .run_to_completion(BACKUP_PAGES_PER_STEP, Duration::ZERO, None)
                .map_err(failed)?;
        }

        // An empty copy means the engine refused to hand out plaintext pages
        let objects: i64 = target
            .query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get(0))
            .map_err(failed)?;
        let source_objects: i64 = source
            .query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get(0))
            .map_err(failed)?;
        if objects != source_objects {
            return Err(ArchiveError::BackupFailed(format!(
                "copied {} of {} schema objects",
                objects, source_objects
            )));
        }

        target
            .execute_batch("PRAGMA query_only = ON;")
            .map_err(failed)?;

        log::info!("Copied database into memory ({} schema objects)", objects);
        Ok(DecryptedSession::in_memory(target))
    }
}

/// Counts from a dump replay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Statements executed against the target
    pub applied: usize,
    /// Statements dropped because they touch a rewritten full-text table
    pub skipped: usize,
}

/// Textual dump replayed into a plaintext file in a temporary directory
#[derive(Debug, Clone)]
pub struct ExportStore {
    temp_prefix: String,
}

impl Default for ExportStore {
    fn default() -> Self {
        Self::new(DEFAULT_TEMP_PREFIX)
    }
}

impl ExportStore {
    pub fn new(temp_prefix: impl Into<String>) -> Self {
        Self {
            temp_prefix: temp_prefix.into(),
        }
    }

    /// Replay the dump of `source` into `target`.
    ///
    /// Virtual table declarations are passed through the tokenizer rewrite;
    /// every other statement, row data included, is replayed verbatim. A
    /// failing statement is tolerated only when it names a full-text table
    /// whose declaration was rewritten; any other failure aborts the replay.
    pub fn replay(&self, source: &Connection, target: &Connection) -> Result<ReplayReport> {
        let snapshot = SchemaSnapshot::read(source)?;
        let rewritten: Vec<String> = snapshot
            .virtual_tables()
            .filter(|entry| references_vendor_tokenizer(&entry.sql))
            .map(|entry| entry.name.to_lowercase())
            .collect();

        let mut report = ReplayReport::default();
        target.execute_batch("BEGIN;")?;

        for_each_statement(source, &snapshot, |statement| {
            if is_transaction_boundary(statement) {
                return Ok(());
            }

            let statement = if is_virtual_table_declaration(statement) {
                rewrite_tokenizer(statement)
            } else {
                Cow::Borrowed(statement)
            };
            match target.execute_batch(&statement) {
                Ok(()) => report.applied += 1,
                Err(e) if mentions_any(&statement, &rewritten) => {
                    log::warn!(
                        "Skipping statement on rewritten full-text table: {} ({})",
                        preview(&statement),
                        e
                    );
                    report.skipped += 1;
                }
                Err(e) => {
                    return Err(ArchiveError::ExportFailed(format!(
                        "{} while executing {}",
                        e,
                        preview(&statement)
                    )))
                }
            }
            Ok(())
        })?;

        target.execute_batch("COMMIT;")?;
        Ok(report)
    }
}

impl EncryptedStore for ExportStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Exported
    }

    fn materialize(&self, source: &Connection) -> Result<DecryptedSession> {
        let temp_dir = tempfile::Builder::new()
            .prefix(&self.temp_prefix)
            .tempdir()
            .map_err(|e| ArchiveError::ExportFailed(format!("cannot create temp dir: {}", e)))?;
        let db_path = temp_dir.path().join(EXPORT_FILE_NAME);

        let report = {
            let target = Connection::open(&db_path).map_err(export_failed)?;
            self.replay(source, &target).map_err(export_failed_from)?
        };

        log::info!(
            "Exported decrypted database to {:?} ({} statements, {} skipped)",
            db_path,
            report.applied,
            report.skipped
        );

        let conn = open_read_only(&db_path).map_err(export_failed)?;
        Ok(DecryptedSession::exported(conn, temp_dir))
    }
}

fn open_read_only(path: &Path) -> rusqlite::Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
}

fn export_failed(e: rusqlite::Error) -> ArchiveError {
    ArchiveError::ExportFailed(e.to_string())
}

fn export_failed_from(e: ArchiveError) -> ArchiveError {
    match e {
        ArchiveError::ExportFailed(_) => e,
        other => ArchiveError::ExportFailed(other.to_string()),
    }
}

fn mentions_any(statement: &str, tables: &[String]) -> bool {
    if tables.is_empty() {
        return false;
    }
    let lowered = statement.to_lowercase();
    tables.iter().any(|table| lowered.contains(table.as_str()))
}

fn preview(statement: &str) -> String {
    const MAX: usize = 80;
    match statement.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &statement[..idx]),
        None => statement.to_string(),
    }
}

/// What the catalog of an opened database says about how to copy it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreProbe {
    /// Some table is declared with Signal's private tokenizer
    pub vendor_tokenizer: bool,
}

impl StoreProbe {
    pub fn run(conn: &Connection) -> Result<Self> {
        let snapshot = SchemaSnapshot::read(conn)?;
        let vendor_tokenizer = snapshot
            .entries
            .iter()
            .any(|entry| references_vendor_tokenizer(&entry.sql));
        Ok(Self { vendor_tokenizer })
    }

    /// Stores to try, most preferred first.
    ///
    /// A page copy would carry the vendor tokenizer declaration along, leaving
    /// a full-text table nothing outside Signal can open, so such databases
    /// always go through the export.
    pub fn stores(&self, temp_prefix: &str) -> Vec<Box<dyn EncryptedStore>> {
        let export: Box<dyn EncryptedStore> = Box::new(ExportStore::new(temp_prefix));
        if self.vendor_tokenizer {
            vec![export]
        } else {
            vec![Box::new(BackupStore), export]
        }
    }
}
