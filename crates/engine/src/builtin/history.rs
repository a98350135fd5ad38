//! File-backed history store.
//!
//! The file starts with an 8-byte magic and a little-endian format version.
//! Anything else is treated as corruption.

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use strata_core::{StrataError, StrataResult};
use tracing::{debug, info, warn};

use super::catalog::SharedCatalog;
use crate::connection::history_store::{HS_FILE, HS_URI, LAS_FILE, LAS_URI};
use crate::connection::ConnectionConfig;
use crate::session::Session;
use crate::subsystem::HistoryStore;

const MAGIC: &[u8; 8] = b"STRATAHS";
const FORMAT_VERSION: u32 = 1;

/// Metadata value stored under the history store key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryStoreMeta {
    /// Format version the file was created with
    pub version: u32,
    /// Creation time, RFC 3339
    pub created: String,
    /// Distinguishes one creation from another
    pub nonce: uuid::Uuid,
}

/// The built-in [`HistoryStore`].
pub struct FileHistoryStore {
    home: PathBuf,
    catalog: SharedCatalog,
}

impl FileHistoryStore {
    /// History store under `home`, registered in `catalog`.
    pub fn new(home: PathBuf, catalog: SharedCatalog) -> Self {
        Self { home, catalog }
    }

    fn path(&self) -> PathBuf {
        self.home.join(HS_FILE)
    }

    fn validate(&self) -> StrataResult<()> {
        let path = self.path();
        let mut file = File::open(&path)?;
        let mut magic = [0u8; 8];
        let version = file
            .read_exact(&mut magic)
            .and_then(|_| file.read_u32::<LittleEndian>())
            .map_err(|_| {
                StrataError::corruption(format!("{}: truncated header", path.display()))
            })?;
        if &magic != MAGIC {
            return Err(StrataError::corruption(format!(
                "{}: bad magic",
                path.display()
            )));
        }
        if version != FORMAT_VERSION {
            return Err(StrataError::corruption(format!(
                "{}: unsupported format version {}",
                path.display(),
                version
            )));
        }
        Ok(())
    }

    fn write_file(&self) -> StrataResult<()> {
        let mut file = File::create(self.path())?;
        file.write_all(MAGIC)?;
        file.write_u32::<LittleEndian>(FORMAT_VERSION)?;
        file.sync_all()?;
        Ok(())
    }

    fn write_meta(&self) -> StrataResult<()> {
        let meta = HistoryStoreMeta {
            version: FORMAT_VERSION,
            created: chrono::Utc::now().to_rfc3339(),
            nonce: uuid::Uuid::new_v4(),
        };
        self.catalog
            .lock()
            .insert(HS_URI, serde_json::to_string(&meta)?)
    }
}

impl HistoryStore for FileHistoryStore {
    fn configure(&mut self, _session: &Session, _config: &ConnectionConfig) -> StrataResult<()> {
        self.validate()?;
        self.catalog.lock().open_handle(HS_URI);
        Ok(())
    }

    fn salvage(&mut self, session: &Session, uri: &str) -> StrataResult<()> {
        if uri != HS_URI {
            return Err(StrataError::NotFound(format!("no salvage support for {}", uri)));
        }
        session.connection().check_open_allowed(uri)?;
        // Version history is disposable; salvage keeps the table, not its contents.
        self.write_file()?;
        self.write_meta()?;
        warn!(target: "strata::conn", uri, "History store salvaged, prior contents discarded");
        Ok(())
    }

    fn cleanup_lookaside(&mut self, _session: &Session) -> StrataResult<()> {
        let had_entry = self.catalog.lock().remove(LAS_URI)?;
        let path = self.home.join(LAS_FILE);
        let had_file = path.try_exists()?;
        if had_file {
            std::fs::remove_file(&path)?;
        }
        if had_entry || had_file {
            info!(target: "strata::conn", "Removed legacy lookaside table");
        }
        Ok(())
    }

    fn create(&mut self, session: &Session, _config: &ConnectionConfig) -> StrataResult<()> {
        if !self.catalog.lock().is_tracking() {
            return Err(StrataError::internal(
                "history store created before metadata tracking started",
            ));
        }
        let registered = self.catalog.lock().get(HS_URI)?.is_some();
        if registered && self.path().try_exists()? && self.validate().is_ok() {
            debug!(target: "strata::conn", "History store already exists");
            self.catalog.lock().open_handle(HS_URI);
            return Ok(());
        }

        session.connection().check_open_allowed(HS_URI)?;
        self.write_file()?;
        self.write_meta()?;
        self.catalog.lock().open_handle(HS_URI);
        info!(target: "strata::conn", uri = HS_URI, "Created history store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::catalog::{CatalogState, FileCatalog, METADATA_FILE};
    use crate::shared::ConnectionShared;
    use crate::subsystem::Catalog;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (FileHistoryStore, SharedCatalog, Session, ConnectionConfig) {
        let catalog = CatalogState::shared(dir.path().join(METADATA_FILE));
        let hs = FileHistoryStore::new(dir.path().to_path_buf(), Arc::clone(&catalog));
        let session = Session::dummy(Arc::new(ConnectionShared::new(dir.path())));
        (hs, catalog, session, ConnectionConfig::new(dir.path()))
    }

    fn meta(catalog: &SharedCatalog) -> HistoryStoreMeta {
        let raw = catalog.lock().get(HS_URI).unwrap().unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn test_create_requires_tracking() {
        let dir = TempDir::new().unwrap();
        let (mut hs, _catalog, session, config) = setup(&dir);
        let err = hs.create(&session, &config).unwrap_err();
        assert_eq!(err.kind(), strata_core::ErrorKind::Internal);
    }

    #[test]
    fn test_create_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (mut hs, catalog, session, config) = setup(&dir);
        FileCatalog::new(Arc::clone(&catalog)).track_init(&session).unwrap();

        hs.create(&session, &config).unwrap();
        let first = meta(&catalog);
        hs.create(&session, &config).unwrap();
        assert_eq!(meta(&catalog), first);
        hs.configure(&session, &config).unwrap();
    }

    #[test]
    fn test_bad_header_is_corruption_and_salvage_repairs() {
        let dir = TempDir::new().unwrap();
        let (mut hs, catalog, session, config) = setup(&dir);
        FileCatalog::new(Arc::clone(&catalog)).track_init(&session).unwrap();
        hs.create(&session, &config).unwrap();

        std::fs::write(dir.path().join(HS_FILE), b"garbage").unwrap();
        let err = hs.configure(&session, &config).unwrap_err();
        assert_eq!(err.kind(), strata_core::ErrorKind::Corruption);

        hs.salvage(&session, HS_URI).unwrap();
        hs.configure(&session, &config).unwrap();
        assert!(hs.salvage(&session, "file:other.sdb").is_err());
    }

    #[test]
    fn test_cleanup_lookaside() {
        let dir = TempDir::new().unwrap();
        let (mut hs, catalog, session, _config) = setup(&dir);
        catalog.lock().insert(LAS_URI, "{}".to_string()).unwrap();
        std::fs::write(dir.path().join(LAS_FILE), b"old").unwrap();

        hs.cleanup_lookaside(&session).unwrap();
        assert!(catalog.lock().get(LAS_URI).unwrap().is_none());
        assert!(!dir.path().join(LAS_FILE).exists());
        hs.cleanup_lookaside(&session).unwrap();
    }
}
