//! Recording, fault-injecting implementations of every collaborator.

use strata_core::{StrataError, StrataResult};

use super::{Faults, Harness, Journal, SharedStore};
use crate::connection::history_store::{HS_FILE, HS_URI, LAS_URI};
use crate::connection::ConnectionConfig;
use crate::extension::{Plugin, Terminate, Unload};
use crate::session::Session;
use crate::shared::ConnectionShared;
use crate::subsystem::{
    Cache, Catalog, Eviction, FileSystem, HistoryStore, LogManager, MetadataCursor, Server,
    StorageBackend, TxnGlobal,
};

#[derive(Debug, Clone)]
struct Recorder {
    journal: Journal,
    faults: Faults,
    store: SharedStore,
}

impl Recorder {
    fn new(harness: &Harness) -> Self {
        let (journal, faults, store) = harness.parts();
        Self {
            journal,
            faults,
            store,
        }
    }

    /// Journal `call`, then fail if it is set to.
    fn call(&self, subsystem: &'static str, call: &str) -> StrataResult<()> {
        self.journal.record(call);
        self.faults.check(subsystem, call)
    }
}

macro_rules! recorder_ctor {
    ($ty:ident) => {
        impl $ty {
            /// Record into `harness`.
            pub fn new(harness: &Harness) -> Self {
                Self {
                    rec: Recorder::new(harness),
                }
            }
        }
    };
}

/// Journals `cache.*`.
#[derive(Debug)]
pub struct RecordingCache {
    rec: Recorder,
}
recorder_ctor!(RecordingCache);

impl Cache for RecordingCache {
    fn create(&mut self, _session: &Session, _config: &ConnectionConfig) -> StrataResult<()> {
        self.rec.call("cache", "cache.create")
    }

    fn disconnect_shared_pool(&mut self, _session: &Session) -> StrataResult<()> {
        self.rec.call("cache", "cache.disconnect_shared_pool")
    }

    fn destroy(&mut self, _session: &Session) -> StrataResult<()> {
        self.rec.call("cache", "cache.destroy")
    }
}

/// Journals `txn.*` and remembers the recovery argument.
#[derive(Debug)]
pub struct RecordingTxn {
    rec: Recorder,
}
recorder_ctor!(RecordingTxn);

impl TxnGlobal for RecordingTxn {
    fn global_init(&mut self, _session: &Session, _config: &ConnectionConfig) -> StrataResult<()> {
        self.rec.call("txn", "txn.global_init")
    }

    fn recover(
        &mut self,
        _session: &Session,
        _config: &ConnectionConfig,
        history_store_present: bool,
    ) -> StrataResult<()> {
        self.rec.store.lock().last_recover = Some(history_store_present);
        self.rec.call("recovery", "txn.recover")
    }

    fn global_destroy(&mut self, _session: &Session) {
        self.rec.journal.record("txn.global_destroy");
    }
}

/// Journals `log.*`.
#[derive(Debug)]
pub struct RecordingLog {
    rec: Recorder,
}
recorder_ctor!(RecordingLog);

impl LogManager for RecordingLog {
    fn create(&mut self, _session: &Session, _config: &ConnectionConfig) -> StrataResult<()> {
        self.rec.call("log", "log.create")
    }

    fn open(&mut self, _session: &Session) -> StrataResult<()> {
        self.rec.call("log", "log.open")
    }

    fn write_checkpoint_marker(&mut self, _session: &Session, is_shutdown: bool) -> StrataResult<()> {
        let call = if is_shutdown {
            "log.write_checkpoint_marker(shutdown)"
        } else {
            "log.write_checkpoint_marker"
        };
        self.rec.call("log", call)
    }

    fn destroy(&mut self, _session: &Session) -> StrataResult<()> {
        self.rec.call("log", "log.destroy")
    }
}

/// Journals `eviction.*`.
#[derive(Debug)]
pub struct RecordingEviction {
    rec: Recorder,
}
recorder_ctor!(RecordingEviction);

impl Eviction for RecordingEviction {
    fn start(&mut self, _session: &Session) -> StrataResult<()> {
        self.rec.call("eviction", "eviction.start")
    }

    fn stop(&mut self, _session: &Session) -> StrataResult<()> {
        self.rec.call("eviction", "eviction.stop")
    }
}

/// Journals `<name>.create` and `<name>.destroy`.
#[derive(Debug)]
pub struct RecordingServer {
    rec: Recorder,
    name: &'static str,
}

impl RecordingServer {
    /// Record into `harness` under `name`.
    pub fn new(harness: &Harness, name: &'static str) -> Self {
        Self {
            rec: Recorder::new(harness),
            name,
        }
    }
}

impl Server for RecordingServer {
    fn name(&self) -> &'static str {
        self.name
    }

    fn create(&mut self, _session: &Session, _config: &ConnectionConfig) -> StrataResult<()> {
        self.rec.call(self.name, &format!("{}.create", self.name))
    }

    fn destroy(&mut self, _session: &Session) -> StrataResult<()> {
        self.rec.call(self.name, &format!("{}.destroy", self.name))
    }
}

/// Journals `catalog.*` over the fake metadata.
#[derive(Debug)]
pub struct RecordingCatalog {
    rec: Recorder,
}
recorder_ctor!(RecordingCatalog);

impl Catalog for RecordingCatalog {
    fn metadata_cursor(&mut self, session: &Session) -> StrataResult<Box<dyn MetadataCursor>> {
        self.rec.call("catalog", "catalog.metadata_cursor")?;
        session.connection().check_open_allowed("a metadata cursor")?;
        Ok(Box::new(RecordingCursor {
            rec: self.rec.clone(),
            positioned: None,
        }))
    }

    fn track_init(&mut self, _session: &Session) -> StrataResult<()> {
        self.rec.call("catalog", "catalog.track_init")?;
        self.rec.store.lock().tracking = true;
        Ok(())
    }

    fn track_destroy(&mut self, _session: &Session) -> StrataResult<()> {
        self.rec.store.lock().tracking = false;
        self.rec.call("catalog", "catalog.track_destroy")
    }

    fn discard_handles(&mut self, _session: &Session) -> StrataResult<()> {
        self.rec.call("catalog", "catalog.discard_handles")
    }
}

#[derive(Debug)]
struct RecordingCursor {
    rec: Recorder,
    positioned: Option<String>,
}

impl MetadataCursor for RecordingCursor {
    fn search(&mut self, key: &str) -> StrataResult<Option<String>> {
        self.rec.call("cursor", "cursor.search")?;
        let value = self.rec.store.lock().metadata.get(key).cloned();
        self.positioned = value.as_ref().map(|_| key.to_string());
        Ok(value)
    }

    fn remove(&mut self) -> StrataResult<()> {
        self.rec.call("cursor", "cursor.remove")?;
        let key = self
            .positioned
            .take()
            .ok_or_else(|| StrataError::NotFound("cursor is not positioned".to_string()))?;
        self.rec.store.lock().metadata.remove(&key);
        Ok(())
    }

    fn close(self: Box<Self>) -> StrataResult<()> {
        self.rec.call("cursor", "cursor.close")
    }
}

/// Journals `hs.*` over the fake store.
#[derive(Debug)]
pub struct RecordingHistoryStore {
    rec: Recorder,
}
recorder_ctor!(RecordingHistoryStore);

impl HistoryStore for RecordingHistoryStore {
    fn configure(&mut self, _session: &Session, _config: &ConnectionConfig) -> StrataResult<()> {
        self.rec.call("history store", "hs.configure")?;
        if self.rec.store.lock().history_store_corrupt {
            return Err(StrataError::corruption(format!("{}: bad header", HS_FILE)));
        }
        Ok(())
    }

    fn salvage(&mut self, _session: &Session, uri: &str) -> StrataResult<()> {
        self.rec.call("history store", "hs.salvage")?;
        if uri != HS_URI {
            return Err(StrataError::NotFound(uri.to_string()));
        }
        let mut store = self.rec.store.lock();
        store.history_store_corrupt = false;
        store.add_history_store();
        Ok(())
    }

    fn cleanup_lookaside(&mut self, _session: &Session) -> StrataResult<()> {
        self.rec.call("history store", "hs.cleanup_lookaside")?;
        self.rec.store.lock().metadata.remove(LAS_URI);
        Ok(())
    }

    fn create(&mut self, _session: &Session, _config: &ConnectionConfig) -> StrataResult<()> {
        self.rec.call("history store", "hs.create")?;
        let mut store = self.rec.store.lock();
        if !store.tracking {
            return Err(StrataError::internal(
                "history store created before metadata tracking started",
            ));
        }
        let valid = store.has_history_store_entry()
            && store.files.contains(HS_FILE)
            && !store.history_store_corrupt;
        if !valid {
            store.add_history_store();
            store.history_store_corrupt = false;
            store.history_store_creates += 1;
        }
        Ok(())
    }
}

/// Journals `fs.exists` against the fake file set.
#[derive(Debug)]
pub struct RecordingFileSystem {
    rec: Recorder,
}
recorder_ctor!(RecordingFileSystem);

impl FileSystem for RecordingFileSystem {
    fn exists(&self, _session: &Session, name: &str) -> StrataResult<bool> {
        self.rec.call("file system", "fs.exists")?;
        Ok(self.rec.store.lock().files.contains(name))
    }
}

/// Journals `backend.terminate`.
#[derive(Debug)]
pub struct RecordingBackend {
    rec: Recorder,
}
recorder_ctor!(RecordingBackend);

impl StorageBackend for RecordingBackend {
    fn terminate(&mut self, _session: &Session) -> StrataResult<()> {
        self.rec.call("storage backend", "backend.terminate")
    }
}

/// Journals `plugin.terminate:<name>`.
#[derive(Debug)]
pub struct RecordingPlugin {
    rec: Recorder,
    call: String,
}

impl RecordingPlugin {
    /// Record into `harness` under `name`.
    pub fn new(harness: &Harness, name: &str) -> Self {
        Self {
            rec: Recorder::new(harness),
            call: format!("plugin.terminate:{}", name),
        }
    }
}

impl Plugin for RecordingPlugin {
    fn terminate(&mut self, _session: &Session) -> StrataResult<()> {
        self.rec.call("plugin", &self.call)
    }
}

#[derive(Debug)]
pub(crate) struct RecordingLibrary {
    rec: Recorder,
    call: String,
}

impl RecordingLibrary {
    pub(crate) fn new(harness: &Harness, name: &str) -> Self {
        Self {
            rec: Recorder::new(harness),
            call: format!("extension.unload:{}", name),
        }
    }
}

impl Unload for RecordingLibrary {
    fn unload(self: Box<Self>) -> StrataResult<()> {
        self.rec.call("extension", &self.call)
    }
}

#[derive(Debug)]
pub(crate) struct RecordingTerminate {
    rec: Recorder,
    call: String,
}

impl RecordingTerminate {
    pub(crate) fn new(harness: &Harness, name: &str) -> Self {
        Self {
            rec: Recorder::new(harness),
            call: format!("extension.terminate:{}", name),
        }
    }
}

impl Terminate for RecordingTerminate {
    fn terminate(&mut self, _conn: &ConnectionShared) -> StrataResult<()> {
        self.rec.call("extension", &self.call)
    }
}
