//! SQLCipher parameters used by Signal Desktop and the keyed open

use std::path::Path;

use rusqlite::{Connection, OpenFlags};
use zeroize::Zeroize;

use crate::errors::{ArchiveError, Result};
use crate::keys::DatabaseKey;

/// Cipher settings applied before the first read of an encrypted database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherParams {
    pub page_size: u32,
    pub kdf_iter: u32,
    pub hmac_algorithm: &'static str,
    pub kdf_algorithm: &'static str,
}

/// Signal Desktop's SQLCipher 4 configuration
pub const SIGNAL_CIPHER: CipherParams = CipherParams {
    page_size: 4096,
    kdf_iter: 64000,
    hmac_algorithm: "HMAC_SHA512",
    kdf_algorithm: "PBKDF2_HMAC_SHA512",
};

impl CipherParams {
    /// Key the connection with a raw (hex) key and apply the cipher settings
    pub fn apply(&self, conn: &Connection, key: &DatabaseKey) -> rusqlite::Result<()> {
        let mut key_pragma = format!("PRAGMA key = \"x'{}'\";", key.to_hex());
        let keyed = conn.execute_batch(&key_pragma);
        key_pragma.zeroize();
        keyed?;

        conn.execute_batch(&format!(
            "PRAGMA cipher_page_size = {};
             PRAGMA kdf_iter = {};
             PRAGMA cipher_hmac_algorithm = {};
             PRAGMA cipher_kdf_algorithm = {};",
            self.page_size, self.kdf_iter, self.hmac_algorithm, self.kdf_algorithm
        ))
    }
}

/// Open an encrypted database read-only and prove the key is right.
///
/// The catalog count is the only correctness check SQLCipher offers: with a
/// wrong key the first page fails to decrypt and the engine reports
/// "file is not a database".
pub fn open_encrypted(path: &Path, key: &DatabaseKey, params: &CipherParams) -> Result<Connection> {
    if !path.is_file() {
        return Err(ArchiveError::FileNotFound {
            what: "db.sqlite",
            path: path.to_path_buf(),
        });
    }

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;

    params
        .apply(&conn, key)
        .map_err(|e| ArchiveError::WrongKeyOrCorrupt(e.to_string()))?;

    let object_count: i64 = conn
        .query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get(0))
        .map_err(|e| ArchiveError::WrongKeyOrCorrupt(e.to_string()))?;

    log::info!(
        "Opened encrypted database {:?} ({} schema objects)",
        path,
        object_count
    );
    Ok(conn)
}
