//! Process-wide decrypted session and its lifecycle.
//!
//! At most one database is unlocked at a time. Re-initialization and logout
//! are serialized by an async mutex; queries clone the current session under
//! a short read lock and run on the blocking pool, so a query racing a logout
//! either finishes against the old session or sees `SessionClosed`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;

use crate::database::{DecryptedSession, Decryptor, StoreKind, DEFAULT_TEMP_PREFIX};
use crate::errors::{ArchiveError, Result};
use crate::keys::{resolve_key_file, CredentialStore};
use crate::queries::{SchemaContract, SignalArchive};

/// How the current database was provided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Upload,
    Volume,
}

/// Location of Signal's `config.json` and encrypted database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalPaths {
    pub config: PathBuf,
    pub database: PathBuf,
}

impl SignalPaths {
    /// Paths inside a Signal Desktop data directory
    pub fn from_dir(dir: &Path) -> Self {
        Self {
            config: dir.join("config.json"),
            database: dir.join("sql").join("db.sqlite"),
        }
    }

    /// Fail with `FileNotFound` for the first missing file
    pub fn ensure_exist(&self) -> Result<()> {
        if !self.config.is_file() {
            return Err(ArchiveError::FileNotFound {
                what: "config.json",
                path: self.config.clone(),
            });
        }
        if !self.database.is_file() {
            return Err(ArchiveError::FileNotFound {
                what: "db.sqlite",
                path: self.database.clone(),
            });
        }
        Ok(())
    }
}

/// Snapshot returned by the status endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub initialized: bool,
    pub mode: Option<SessionMode>,
    pub conversation_count: Option<i64>,
}

impl SessionStatus {
    fn uninitialized() -> Self {
        Self {
            initialized: false,
            mode: None,
            conversation_count: None,
        }
    }
}

/// An unlocked database together with its schema mapping
pub struct ActiveSession {
    mode: SessionMode,
    schema: SchemaContract,
    kind: StoreKind,
    storage_path: Option<PathBuf>,
    session: Mutex<DecryptedSession>,
}

impl std::fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSession")
            .field("mode", &self.mode)
            .field("schema", &self.schema)
            .field("kind", &self.kind)
            .field("storage_path", &self.storage_path)
            .finish_non_exhaustive()
    }
}

impl ActiveSession {
    /// Resolve the key, decrypt the database and check its schema.
    ///
    /// Blocking; run it off the async runtime.
    pub fn open(
        mode: SessionMode,
        paths: &SignalPaths,
        credentials: &dyn CredentialStore,
        temp_prefix: &str,
    ) -> Result<Self> {
        paths.ensure_exist()?;

        let key = resolve_key_file(&paths.config, credentials)?;
        let session = Decryptor::new()
            .with_temp_prefix(temp_prefix)
            .with_key(key)
            .open(&paths.database)?
            .materialize()?;

        // Dropping `session` on error releases its temp storage
        let schema = SchemaContract::detect(session.connection()?)?;

        Ok(Self {
            mode,
            schema,
            kind: session.kind(),
            storage_path: session.storage_path().map(Path::to_path_buf),
            session: Mutex::new(session),
        })
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    /// Temporary directory backing an exported session
    pub fn storage_path(&self) -> Option<&Path> {
        self.storage_path.as_deref()
    }

    /// Run `f` against the archive while holding the connection lock
    pub fn with_archive<T>(&self, f: impl FnOnce(&SignalArchive<'_>) -> Result<T>) -> Result<T> {
        let guard = self
            .session
            .lock()
            .map_err(|_| ArchiveError::Internal("session lock poisoned".into()))?;
        let archive = SignalArchive::new(guard.connection()?, self.schema);
        f(&archive)
    }

    /// Close the connection and delete temp storage; waits for a running query
    pub fn close(&self) {
        match self.session.lock() {
            Ok(mut session) => session.close(),
            Err(poisoned) => poisoned.into_inner().close(),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self.session.lock() {
            Ok(session) => session.is_closed(),
            Err(poisoned) => poisoned.into_inner().is_closed(),
        }
    }
}

fn join_error(e: tokio::task::JoinError) -> ArchiveError {
    ArchiveError::Internal(format!("blocking task failed: {}", e))
}

/// Owner of the single process-wide session
pub struct SessionManager {
    active: RwLock<Option<Arc<ActiveSession>>>,
    init_lock: tokio::sync::Mutex<()>,
    credentials: Arc<dyn CredentialStore>,
    temp_prefix: String,
}

impl SessionManager {
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            active: RwLock::new(None),
            init_lock: tokio::sync::Mutex::new(()),
            credentials,
            temp_prefix: DEFAULT_TEMP_PREFIX.to_string(),
        }
    }

    /// Use a different prefix for exported temp directories
    pub fn with_temp_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.temp_prefix = prefix.into();
        self
    }

    /// The installed session, if any
    pub fn current(&self) -> Option<Arc<ActiveSession>> {
        match self.active.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn take_current(&self) -> Option<Arc<ActiveSession>> {
        match self.active.write() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn install(&self, session: Arc<ActiveSession>) {
        match self.active.write() {
            Ok(mut slot) => *slot = Some(session),
            Err(poisoned) => *poisoned.into_inner() = Some(session),
        }
    }

    /// Unset the slot and close what was in it. Returns whether a session existed.
    async fn release_current(&self) -> bool {
        let Some(previous) = self.take_current() else {
            return false;
        };

        let closing = previous.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || closing.close()).await {
            log::warn!("Closing previous session failed: {}", e);
            previous.close();
        }
        true
    }

    /// Replace any current session with a new one decrypted from `paths`.
    ///
    /// On failure no session is installed.
    pub async fn initialize(&self, mode: SessionMode, paths: SignalPaths) -> Result<Arc<ActiveSession>> {
        let _guard = self.init_lock.lock().await;

        if self.release_current().await {
            log::info!("Released previous session before re-initialization");
        }

        let credentials = Arc::clone(&self.credentials);
        let temp_prefix = self.temp_prefix.clone();
        let session = tokio::task::spawn_blocking(move || {
            ActiveSession::open(mode, &paths, credentials.as_ref(), &temp_prefix)
        })
        .await
        .map_err(join_error)??;

        let session = Arc::new(session);
        self.install(Arc::clone(&session));
        log::info!("Session initialized ({:?}, {})", mode, session.kind());
        Ok(session)
    }

    /// Close the current session, if any. Idempotent.
    pub async fn logout(&self) -> bool {
        let _guard = self.init_lock.lock().await;
        let released = self.release_current().await;
        if released {
            log::info!("Session closed");
        }
        released
    }

    /// Run a read-only query against the current session on the blocking pool
    pub async fn query<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&SignalArchive<'_>) -> Result<T> + Send + 'static,
    {
        let session = self.current().ok_or(ArchiveError::NotInitialized)?;
        tokio::task::spawn_blocking(move || session.with_archive(f))
            .await
            .map_err(join_error)?
    }

    pub async fn status(&self) -> SessionStatus {
        let Some(session) = self.current() else {
            return SessionStatus::uninitialized();
        };

        let mode = session.mode();
        match tokio::task::spawn_blocking(move || session.with_archive(|a| a.conversation_count())).await {
            Ok(Ok(count)) => SessionStatus {
                initialized: true,
                mode: Some(mode),
                conversation_count: Some(count),
            },
            Ok(Err(ArchiveError::SessionClosed)) => SessionStatus::uninitialized(),
            Ok(Err(e)) => {
                log::warn!("Counting conversations failed: {}", e);
                SessionStatus {
                    initialized: true,
                    mode: Some(mode),
                    conversation_count: None,
                }
            }
            Err(e) => {
                log::warn!("Status query failed: {}", e);
                SessionStatus::uninitialized()
            }
        }
    }
}
