//! In-process subsystem implementations
//!
//! These back [`Subsystems::builtin`] and keep their state under the
//! database home: `metadata.json`, the history store file, the log
//! directory, and `strata.stat`.

mod cache;
mod catalog;
mod history;
mod log;
mod servers;
mod txn;

pub use cache::{shared_pool_bytes, shared_pool_members, MemoryCache};
pub use catalog::{CatalogState, FileCatalog, SharedCatalog, METADATA_FILE};
pub use history::{FileHistoryStore, HistoryStoreMeta};
pub use log::{read_log, FileLogManager, LogRecord, LOG_FILE_NAME};
pub use servers::{EvictionPool, PeriodicServer, ServerKind, STATISTICS_FILE};
pub use txn::{GlobalTxnState, RecoveryOutcome};

use strata_core::StrataResult;

use crate::connection::ConnectionConfig;
use crate::session::Session;
use crate::subsystem::{FileSystem, Subsystems};

/// File checks against the connection's home directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn exists(&self, session: &Session, name: &str) -> StrataResult<bool> {
        Ok(session.connection().home().join(name).try_exists()?)
    }
}

pub(crate) fn subsystems(config: &ConnectionConfig) -> Subsystems {
    let catalog = CatalogState::shared(config.home.join(METADATA_FILE));
    Subsystems {
        cache: Box::new(MemoryCache::new()),
        txn: Box::new(GlobalTxnState::new()),
        log: Box::new(FileLogManager::new()),
        eviction: Box::new(EvictionPool::new(config.eviction.threads_min)),
        statistics: Box::new(PeriodicServer::new(ServerKind::Statistics)),
        sweep: Box::new(PeriodicServer::new(ServerKind::Sweep)),
        capacity: Box::new(PeriodicServer::new(ServerKind::Capacity)),
        checkpoint: Box::new(PeriodicServer::new(ServerKind::Checkpoint)),
        catalog: Box::new(FileCatalog::new(std::sync::Arc::clone(&catalog))),
        history_store: Box::new(FileHistoryStore::new(config.home.clone(), catalog)),
        file_system: Box::new(LocalFileSystem),
        storage_backend: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::ConnectionShared;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_local_file_system() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("present"), b"").unwrap();
        let session = Session::dummy(Arc::new(ConnectionShared::new(dir.path())));
        assert!(LocalFileSystem.exists(&session, "present").unwrap());
        assert!(!LocalFileSystem.exists(&session, "absent").unwrap());
    }
}
