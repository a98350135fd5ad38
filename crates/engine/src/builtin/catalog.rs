//! File-backed metadata table and data handle registry.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use strata_core::{StrataError, StrataResult};
use tracing::debug;

use crate::session::Session;
use crate::subsystem::{Catalog, MetadataCursor};

/// Metadata file name in the home directory.
pub const METADATA_FILE: &str = "metadata.json";

/// Metadata entries plus the catalog's runtime state.
///
/// Shared between the catalog, its cursors, and the history store.
#[derive(Debug)]
pub struct CatalogState {
    path: PathBuf,
    entries: Option<BTreeMap<String, String>>,
    tracking: bool,
    handles: BTreeSet<String>,
}

/// Handle to the catalog state shared by the built-in subsystems.
pub type SharedCatalog = Arc<Mutex<CatalogState>>;

impl CatalogState {
    /// State backed by the file at `path`, loaded on first use.
    pub fn shared(path: PathBuf) -> SharedCatalog {
        Arc::new(Mutex::new(Self {
            path,
            entries: None,
            tracking: false,
            handles: BTreeSet::new(),
        }))
    }

    fn entries(&mut self) -> StrataResult<&mut BTreeMap<String, String>> {
        if self.entries.is_none() {
            let loaded = match std::fs::read(&self.path) {
                Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                    StrataError::corruption(format!("{}: {}", self.path.display(), e))
                })?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
                Err(e) => return Err(e.into()),
            };
            self.entries = Some(loaded);
        }
        match self.entries.as_mut() {
            Some(entries) => Ok(entries),
            None => Err(StrataError::internal("metadata failed to load")),
        }
    }

    /// Value stored under `key`.
    pub fn get(&mut self, key: &str) -> StrataResult<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    /// Insert or replace `key` and persist.
    pub fn insert(&mut self, key: &str, value: String) -> StrataResult<()> {
        self.entries()?.insert(key.to_string(), value);
        self.persist()
    }

    /// Remove `key` and persist. Returns whether it existed.
    pub fn remove(&mut self, key: &str) -> StrataResult<bool> {
        let existed = self.entries()?.remove(key).is_some();
        if existed {
            self.persist()?;
        }
        Ok(existed)
    }

    fn persist(&self) -> StrataResult<()> {
        let Some(entries) = &self.entries else {
            return Ok(());
        };
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// True between `track_init` and `track_destroy`.
    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// Record an open data handle for `uri`.
    pub fn open_handle(&mut self, uri: &str) {
        self.handles.insert(uri.to_string());
    }

    /// Open data handles.
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }
}

/// The built-in [`Catalog`].
pub struct FileCatalog {
    state: SharedCatalog,
}

impl FileCatalog {
    /// Catalog over `state`.
    pub fn new(state: SharedCatalog) -> Self {
        Self { state }
    }
}

impl Catalog for FileCatalog {
    fn metadata_cursor(&mut self, session: &Session) -> StrataResult<Box<dyn MetadataCursor>> {
        session.connection().check_open_allowed("a metadata cursor")?;
        Ok(Box::new(FileMetadataCursor {
            state: Arc::clone(&self.state),
            positioned: None,
        }))
    }

    fn track_init(&mut self, _session: &Session) -> StrataResult<()> {
        self.state.lock().tracking = true;
        Ok(())
    }

    fn track_destroy(&mut self, _session: &Session) -> StrataResult<()> {
        self.state.lock().tracking = false;
        Ok(())
    }

    fn discard_handles(&mut self, _session: &Session) -> StrataResult<()> {
        let discarded = std::mem::take(&mut self.state.lock().handles);
        if !discarded.is_empty() {
            debug!(target: "strata::conn", count = discarded.len(), "Discarded data handles");
        }
        Ok(())
    }
}

struct FileMetadataCursor {
    state: SharedCatalog,
    positioned: Option<String>,
}

impl MetadataCursor for FileMetadataCursor {
    fn search(&mut self, key: &str) -> StrataResult<Option<String>> {
        let value = self.state.lock().get(key)?;
        self.positioned = value.as_ref().map(|_| key.to_string());
        Ok(value)
    }

    fn remove(&mut self) -> StrataResult<()> {
        let key = self
            .positioned
            .take()
            .ok_or_else(|| StrataError::NotFound("cursor is not positioned".to_string()))?;
        if !self.state.lock().remove(&key)? {
            return Err(StrataError::NotFound(key));
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> StrataResult<()> {
        Ok(())
    }
}
