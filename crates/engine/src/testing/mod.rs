//! Testing utilities for the connection lifecycle
//!
//! - **Journal**: ordered record of every collaborator call, for checking
//!   startup and shutdown ordering
//! - **Faults**: make any named call fail, for exercising error paths
//! - **FakeStore**: in-memory metadata and file presence behind the
//!   recording catalog, history store, and file system
//!
//! Call names are `"<subsystem>.<operation>"`, e.g. `"cache.create"`,
//! `"sweep.destroy"`, `"hs.create"`, `"cursor.close"`. Extension and plugin
//! calls carry the registered name: `"extension.unload:<name>"`.
//!
//! # Example
//!
//! ```ignore
//! use strata_engine::testing::Harness;
//!
//! let harness = Harness::new();
//! harness.faults().fail("eviction.start");
//! let err = strata_engine::open_with(config, harness.subsystems()).unwrap_err();
//! assert!(harness.journal().contains("eviction.stop"));
//! ```

mod recording;

pub use recording::{
    RecordingBackend, RecordingCache, RecordingCatalog, RecordingEviction, RecordingFileSystem,
    RecordingHistoryStore, RecordingLog, RecordingPlugin, RecordingServer, RecordingTxn,
};

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use strata_core::{StrataError, StrataResult};

use crate::connection::history_store::{HS_FILE, HS_URI};
use crate::extension::{LoadedExtension, Plugin};
use crate::subsystem::{StorageBackend, Subsystems};
use recording::{RecordingLibrary, RecordingTerminate};

/// Ordered log of collaborator calls.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    /// Append a call.
    pub fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Index of the first occurrence of `call`.
    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls.lock().iter().position(|c| c == call)
    }

    /// True if `call` was made.
    pub fn contains(&self, call: &str) -> bool {
        self.position(call).is_some()
    }

    /// How many times `call` was made.
    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    /// Forget all calls.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

/// Calls that should fail.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    failing: Arc<Mutex<HashSet<String>>>,
}

impl Faults {
    /// Make `call` fail from now on.
    pub fn fail(&self, call: &str) {
        self.failing.lock().insert(call.to_string());
    }

    /// Let `call` succeed again.
    pub fn heal(&self, call: &str) {
        self.failing.lock().remove(call);
    }

    /// The injected error for `call`, if it is set to fail.
    pub fn check(&self, subsystem: &'static str, call: &str) -> StrataResult<()> {
        if self.failing.lock().contains(call) {
            return Err(StrataError::subsystem(
                subsystem,
                format!("injected failure in {}", call),
            ));
        }
        Ok(())
    }
}

/// Metadata and on-disk state seen by the recording collaborators.
#[derive(Debug, Default)]
pub struct FakeStore {
    /// Metadata table
    pub metadata: BTreeMap<String, String>,
    /// Files present in the home directory
    pub files: BTreeSet<String>,
    /// The history store file fails validation
    pub history_store_corrupt: bool,
    /// Times the history store was actually materialized
    pub history_store_creates: usize,
    /// Metadata tracking is active
    pub tracking: bool,
    /// The `history_store_present` argument of the last recovery
    pub last_recover: Option<bool>,
}

impl FakeStore {
    /// Register a history store in the metadata and on disk.
    pub fn add_history_store(&mut self) {
        self.metadata.insert(HS_URI.to_string(), "{}".to_string());
        self.files.insert(HS_FILE.to_string());
    }

    /// True if the metadata has a history store entry.
    pub fn has_history_store_entry(&self) -> bool {
        self.metadata.contains_key(HS_URI)
    }
}

/// Shared handle to a [`FakeStore`].
pub type SharedStore = Arc<Mutex<FakeStore>>;

/// Journal, faults, and store shared by one set of recording collaborators.
#[derive(Debug, Clone, Default)]
pub struct Harness {
    journal: Journal,
    faults: Faults,
    store: SharedStore,
}

impl Harness {
    /// A harness with an empty store and no faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// The call journal.
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Fault injection.
    pub fn faults(&self) -> &Faults {
        &self.faults
    }

    /// Lock the fake store.
    pub fn store(&self) -> MutexGuard<'_, FakeStore> {
        self.store.lock()
    }

    /// A fresh set of recording collaborators over this harness.
    ///
    /// Collaborators from separate calls share the store, so a second
    /// connection sees what the first one left behind.
    pub fn subsystems(&self) -> Subsystems {
        Subsystems {
            cache: Box::new(RecordingCache::new(self)),
            txn: Box::new(RecordingTxn::new(self)),
            log: Box::new(RecordingLog::new(self)),
            eviction: Box::new(RecordingEviction::new(self)),
            statistics: Box::new(RecordingServer::new(self, "statistics")),
            sweep: Box::new(RecordingServer::new(self, "sweep")),
            capacity: Box::new(RecordingServer::new(self, "capacity")),
            checkpoint: Box::new(RecordingServer::new(self, "checkpoint")),
            catalog: Box::new(RecordingCatalog::new(self)),
            history_store: Box::new(RecordingHistoryStore::new(self)),
            file_system: Box::new(RecordingFileSystem::new(self)),
            storage_backend: None,
        }
    }

    /// A storage backend whose terminate is journaled as `"backend.terminate"`.
    pub fn backend(&self) -> Box<dyn StorageBackend> {
        Box::new(RecordingBackend::new(self))
    }

    /// An extension journaled as `"extension.terminate:<name>"` and
    /// `"extension.unload:<name>"`.
    pub fn extension(&self, name: &str, with_terminate: bool) -> LoadedExtension {
        let ext = LoadedExtension::new(name, Box::new(RecordingLibrary::new(self, name)));
        if with_terminate {
            ext.with_terminate(Box::new(RecordingTerminate::new(self, name)))
        } else {
            ext
        }
    }

    /// A plugin journaled as `"plugin.terminate:<name>"`.
    pub fn plugin(&self, name: &str) -> Box<dyn Plugin> {
        Box::new(RecordingPlugin::new(self, name))
    }

    pub(crate) fn parts(&self) -> (Journal, Faults, SharedStore) {
        (
            self.journal.clone(),
            self.faults.clone(),
            Arc::clone(&self.store),
        )
    }
}
