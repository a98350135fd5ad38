//! The connection handle
//!
//! A [`Connection`] is one open database. It owns the session pool, the
//! collaborating subsystems, plugins and extensions, and the files the
//! connection holds open. Only [`ConnectionShared`] is visible to server
//! threads; everything else is touched solely by the thread that owns the
//! `Connection`.
//!
//! Lifecycle:
//!
//! ```text
//! open_with ── validate ── lock file ── connection_open ── start_workers ──▶ running
//!                                                                             │
//!                       (any failure) ──────────────▶ shutdown ◀── close ─────┘
//! ```

mod close;
pub mod config;
pub mod files;
pub mod history_store;
mod open;
mod workers;

pub use config::{
    CapacityConfig, CheckpointConfig, ConnectionConfig, EvictionConfig, FileManagerConfig,
    LogConfig, StatisticsLogConfig, CONFIG_FILE_NAME,
};
pub use files::{BackupState, FileId, LOCK_FILE_NAME};
pub use history_store::HistoryStoreState;
pub use open::{open, open_home, open_with};

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use strata_core::{StrataError, StrataResult};
use tracing::{error, info};

use crate::extension::{ExtensionRegistry, LoadedExtension, Plugin, PluginKind, PluginRegistry};
use crate::flags::ConnFlag;
use crate::session::{Session, SessionPool};
use crate::shared::ConnectionShared;
use crate::subsystem::Subsystems;
use files::{FileRegistry, OpTracker};

/// One open database.
pub struct Connection {
    shared: Arc<ConnectionShared>,
    config: ConnectionConfig,
    sessions: SessionPool,
    default_session: Session,
    subsystems: Subsystems,
    plugins: PluginRegistry,
    extensions: ExtensionRegistry,
    lock_file: Option<File>,
    optrack: Option<OpTracker>,
    backup: Option<BackupState>,
    files: FileRegistry,
    history_store: Option<HistoryStoreState>,
    closed: bool,
}

impl Connection {
    /// Create an unopened handle.
    ///
    /// Nothing is allocated: the session pool is empty and the default
    /// session is the placeholder. Shutdown is safe from this state.
    pub fn new(config: ConnectionConfig, subsystems: Subsystems) -> Self {
        let shared = Arc::new(ConnectionShared::new(config.home.clone()));
        if config.salvage {
            shared.flags().set(ConnFlag::Salvage);
        }
        if config.leak_memory {
            shared.flags().set(ConnFlag::LeakMemory);
        }
        let default_session = Session::dummy(Arc::clone(&shared));
        Self {
            shared,
            config,
            sessions: SessionPool::empty(),
            default_session,
            subsystems,
            plugins: PluginRegistry::default(),
            extensions: ExtensionRegistry::default(),
            lock_file: None,
            optrack: None,
            backup: None,
            files: FileRegistry::default(),
            history_store: None,
            closed: false,
        }
    }

    /// State visible to server threads.
    pub fn shared(&self) -> &Arc<ConnectionShared> {
        &self.shared
    }

    /// Configuration the connection was opened with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Session used for lifecycle operations.
    pub fn default_session(&self) -> &Session {
        &self.default_session
    }

    /// The session pool.
    pub fn sessions(&self) -> &SessionPool {
        &self.sessions
    }

    /// Log directory. Available whether or not logging is enabled.
    pub fn log_path(&self) -> PathBuf {
        self.config.log_dir()
    }

    /// What the history store precheck found, once it has run.
    pub fn history_store_state(&self) -> Option<HistoryStoreState> {
        self.history_store
    }

    /// True while the lock file is held.
    pub fn holds_lock(&self) -> bool {
        self.lock_file.is_some()
    }

    /// Register a plugin of `kind`.
    pub fn add_plugin(
        &mut self,
        kind: PluginKind,
        name: impl Into<String>,
        plugin: Box<dyn Plugin>,
    ) -> StrataResult<()> {
        self.refuse_if_closing("register a plugin")?;
        self.plugins.add(kind, name, plugin)
    }

    /// Plugins registered of `kind`.
    pub fn plugin_count(&self, kind: PluginKind) -> usize {
        self.plugins.count(kind)
    }

    /// Register an extension. Extensions unload in reverse order at close.
    pub fn load_extension(&mut self, extension: LoadedExtension) -> StrataResult<()> {
        self.refuse_if_closing("load an extension")?;
        info!(target: "strata::conn", extension = extension.name(), "Loaded extension");
        self.extensions.push(extension);
        Ok(())
    }

    /// Names of loaded extensions, in load order.
    pub fn extension_names(&self) -> Vec<&str> {
        self.extensions.names()
    }

    /// Open a file under the home directory on behalf of the connection.
    pub fn open_file(&mut self, name: &str) -> StrataResult<FileId> {
        self.files.open(&self.shared, name)
    }

    /// Close a file opened with [`open_file`](Self::open_file).
    pub fn close_file(&mut self, id: FileId) -> bool {
        self.files.close(id)
    }

    /// Files opened through the connection and still open.
    pub fn open_file_count(&self) -> usize {
        self.files.len()
    }

    /// Start a hot backup pinning `files`.
    ///
    /// # Errors
    ///
    /// Returns `Busy` if a backup is already running.
    pub fn begin_backup(&mut self, files: Vec<String>) -> StrataResult<uuid::Uuid> {
        self.refuse_if_closing("start a backup")?;
        if let Some(active) = &self.backup {
            return Err(StrataError::Busy(format!(
                "backup {} is already in progress",
                active.id()
            )));
        }
        let backup = BackupState::new(files);
        let id = backup.id();
        self.backup = Some(backup);
        Ok(id)
    }

    /// Finish the running backup.
    pub fn end_backup(&mut self) -> Option<BackupState> {
        self.backup.take()
    }

    /// Append to the operation-tracking file, if tracking is on.
    pub fn track_operation(&mut self, op: &str) -> StrataResult<()> {
        match self.optrack.as_mut() {
            Some(track) => track.record(op),
            None => Ok(()),
        }
    }

    fn refuse_if_closing(&self, what: &str) -> StrataResult<()> {
        if self.shared.is_closing() {
            return Err(StrataError::Closing(format!("cannot {} while closing", what)));
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.shutdown() {
            error!(target: "strata::conn", home = %self.config.home.display(), error = %e, "Connection dropped without close; shutdown failed");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("shared", &self.shared)
            .field("default_session", &self.default_session)
            .field("sessions", &self.sessions.len())
            .field("history_store", &self.history_store)
            .field("closed", &self.closed)
            .finish()
    }
}
