//! Error types shared by key resolution, decryption and querying

use std::path::PathBuf;

use thiserror::Error;

/// Why a literal `key` field was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFormatIssue {
    /// A character outside `[0-9a-fA-F]` at the given (0-based) position
    InvalidCharacter { character: char, position: usize },
    /// Hex string was not exactly 64 characters long
    InvalidLength { length: usize },
}

impl std::fmt::Display for KeyFormatIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCharacter { character, position } => write!(
                f,
                "key must be hexadecimal (0-9, a-f), found {:?} at position {}",
                character, position
            ),
            Self::InvalidLength { length } => write!(
                f,
                "expected 64 hex characters, got {}",
                length
            ),
        }
    }
}

/// Errors that can occur while unlocking and reading a Signal archive
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Invalid JSON in config.json: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("No 'key' or 'encryptedKey'/'safeStorageBackend' field found in config.json. This may not be a valid Signal Desktop config file.")]
    MissingKeyField,

    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(KeyFormatIssue),

    #[error("Unsupported safe storage backend '{0}'. Only gnome_libsecret is supported; extract the key on the Signal host and use a plain 'key' field instead.")]
    UnsupportedBackend(String),

    #[error("The credential store returned an empty secret for Signal")]
    EmptyCredential,

    #[error("Could not read the Signal secret from the credential store ({0}). The store is local to the machine running Signal Desktop and is usually unreachable from containers or other isolated environments. Extract the key on that machine and write a config.json with a literal 'key' field instead.")]
    CredentialStoreUnavailable(String),

    #[error("Encrypted key is missing the 'v11' version prefix")]
    MissingVersionPrefix,

    #[error("Failed to unwrap encrypted key: {0}")]
    KeyUnwrapFailed(String),

    #[error("Failed to decrypt database. Ensure the database and key are correct: {0}")]
    WrongKeyOrCorrupt(String),

    #[error("In-memory copy failed: {0}")]
    BackupFailed(String),

    #[error("Export of decrypted database failed: {0}")]
    ExportFailed(String),

    #[error("{} not found at {}", .what, .path.display())]
    FileNotFound { what: &'static str, path: PathBuf },

    #[error("Unsupported Signal database schema: {0}")]
    SchemaMismatch(String),

    #[error("Database session was closed")]
    SessionClosed,

    #[error("Database not initialized. Upload files or initialize from volume first.")]
    NotInitialized,

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    /// True when the failure stems from the files or key the caller supplied
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigParse(_)
                | Self::MissingKeyField
                | Self::InvalidKeyFormat(_)
                | Self::UnsupportedBackend(_)
                | Self::EmptyCredential
                | Self::CredentialStoreUnavailable(_)
                | Self::MissingVersionPrefix
                | Self::KeyUnwrapFailed(_)
                | Self::WrongKeyOrCorrupt(_)
                | Self::SchemaMismatch(_)
                | Self::InvalidRequest(_)
        )
    }

    /// True when there is no usable session behind the request
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::SessionClosed | Self::NotInitialized)
    }
}

impl From<ArchiveError> for String {
    fn from(err: ArchiveError) -> Self {
        err.to_string()
    }
}

/// Result type alias for archive operations
pub type Result<T> = std::result::Result<T, ArchiveError>;
