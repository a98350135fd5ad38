//! Collaborator contracts driven by the lifecycle controller
//!
//! The connection owns one boxed implementation of each trait. The controller
//! only sequences create/open/destroy calls; what each subsystem does inside
//! them is its own business.
//!
//! Every `destroy`/`stop` must be safe to call when the matching
//! `create`/`start` never ran or failed, because shutdown also unwinds
//! failed startups.

use strata_core::StrataResult;

use crate::builtin;
use crate::connection::ConnectionConfig;
use crate::session::Session;

/// Page cache.
pub trait Cache: Send {
    /// Allocate the cache.
    fn create(&mut self, session: &Session, config: &ConnectionConfig) -> StrataResult<()>;

    /// Leave any process-wide shared cache pool. Runs before `destroy`.
    fn disconnect_shared_pool(&mut self, session: &Session) -> StrataResult<()>;

    /// Release the cache.
    fn destroy(&mut self, session: &Session) -> StrataResult<()>;
}

/// Global transaction state and crash recovery.
pub trait TxnGlobal: Send {
    /// Initialize global transaction state.
    fn global_init(&mut self, session: &Session, config: &ConnectionConfig) -> StrataResult<()>;

    /// Run recovery. Rollback-to-stable for tables is skipped when the
    /// history store was absent before recovery.
    fn recover(
        &mut self,
        session: &Session,
        config: &ConnectionConfig,
        history_store_present: bool,
    ) -> StrataResult<()>;

    /// Release global transaction state. Cannot fail.
    fn global_destroy(&mut self, session: &Session);
}

/// Write-ahead log manager.
pub trait LogManager: Send {
    /// Structural setup; the log is not yet writable.
    fn create(&mut self, session: &Session, config: &ConnectionConfig) -> StrataResult<()>;

    /// Start logging for real.
    fn open(&mut self, session: &Session) -> StrataResult<()>;

    /// Append a checkpoint record; `is_shutdown` marks a clean close.
    fn write_checkpoint_marker(&mut self, session: &Session, is_shutdown: bool)
        -> StrataResult<()>;

    /// Tear down the log manager.
    fn destroy(&mut self, session: &Session) -> StrataResult<()>;
}

/// Eviction workers.
pub trait Eviction: Send {
    /// Start eviction threads.
    fn start(&mut self, session: &Session) -> StrataResult<()>;

    /// Stop eviction threads and wait for them to exit.
    fn stop(&mut self, session: &Session) -> StrataResult<()>;
}

/// A maintenance server thread: statistics, sweep, capacity, or checkpoint.
pub trait Server: Send {
    /// Server name for logs.
    fn name(&self) -> &'static str;

    /// Start the server if the configuration asks for it.
    fn create(&mut self, session: &Session, config: &ConnectionConfig) -> StrataResult<()>;

    /// Stop the server and wait for its thread to exit.
    fn destroy(&mut self, session: &Session) -> StrataResult<()>;
}

/// Cursor over the metadata table.
pub trait MetadataCursor: Send {
    /// Position on `key`, returning its value if present.
    fn search(&mut self, key: &str) -> StrataResult<Option<String>>;

    /// Remove the entry the cursor is positioned on.
    fn remove(&mut self) -> StrataResult<()>;

    /// Close the cursor.
    fn close(self: Box<Self>) -> StrataResult<()>;
}

/// Metadata table, metadata tracking, and data handles.
pub trait Catalog: Send {
    /// Open a cursor over the metadata table.
    fn metadata_cursor(&mut self, session: &Session) -> StrataResult<Box<dyn MetadataCursor>>;

    /// Start metadata tracking; required before creating tables.
    fn track_init(&mut self, session: &Session) -> StrataResult<()>;

    /// Stop metadata tracking.
    fn track_destroy(&mut self, session: &Session) -> StrataResult<()>;

    /// Close every open data handle.
    fn discard_handles(&mut self, session: &Session) -> StrataResult<()>;
}

/// The history store table.
pub trait HistoryStore: Send {
    /// Open and validate the history store; failure indicates corruption.
    fn configure(&mut self, session: &Session, config: &ConnectionConfig) -> StrataResult<()>;

    /// Salvage the table at `uri`.
    fn salvage(&mut self, session: &Session, uri: &str) -> StrataResult<()>;

    /// Drop the legacy lookaside table if it still exists.
    fn cleanup_lookaside(&mut self, session: &Session) -> StrataResult<()>;

    /// Create the history store. No-op when a valid one already exists.
    fn create(&mut self, session: &Session, config: &ConnectionConfig) -> StrataResult<()>;
}

/// File existence checks against the database home.
pub trait FileSystem: Send {
    /// True if `name` exists in the home directory.
    fn exists(&self, session: &Session, name: &str) -> StrataResult<bool>;
}

/// Optional custom storage backend with a termination hook.
pub trait StorageBackend: Send {
    /// Release the backend.
    fn terminate(&mut self, session: &Session) -> StrataResult<()>;
}

/// The full set of collaborators a connection drives.
pub struct Subsystems {
    /// Page cache
    pub cache: Box<dyn Cache>,
    /// Transactions and recovery
    pub txn: Box<dyn TxnGlobal>,
    /// Write-ahead log
    pub log: Box<dyn LogManager>,
    /// Eviction workers
    pub eviction: Box<dyn Eviction>,
    /// Statistics logging server
    pub statistics: Box<dyn Server>,
    /// Handle sweep server
    pub sweep: Box<dyn Server>,
    /// Capacity throttling server
    pub capacity: Box<dyn Server>,
    /// Checkpoint server
    pub checkpoint: Box<dyn Server>,
    /// Metadata and data handles
    pub catalog: Box<dyn Catalog>,
    /// History store table
    pub history_store: Box<dyn HistoryStore>,
    /// File existence checks
    pub file_system: Box<dyn FileSystem>,
    /// Custom storage backend, if any
    pub storage_backend: Option<Box<dyn StorageBackend>>,
}

impl Subsystems {
    /// The in-process implementations rooted at `config.home`.
    pub fn builtin(config: &ConnectionConfig) -> Self {
        builtin::subsystems(config)
    }

    /// Attach a custom storage backend.
    pub fn with_storage_backend(mut self, backend: Box<dyn StorageBackend>) -> Self {
        self.storage_backend = Some(backend);
        self
    }
}
