//! Worker bootstrap
//!
//! Starts logging, recovery, the history store, and the server threads in
//! dependency order. The first failure stops the sequence; whatever already
//! started is left for shutdown to stop.

use strata_core::StrataResult;
use tracing::{debug, info};

use super::history_store::history_store_exists;
use super::Connection;
use crate::flags::{ConnFlag, LogFlag};

impl Connection {
    /// Start every background service, failing fast.
    pub fn start_workers(&mut self) -> StrataResult<()> {
        let session = self.default_session.clone();
        let config = &self.config;
        let shared = &self.shared;
        let subs = &mut self.subsystems;

        // Statistics first, so later services can record into it.
        subs.statistics.create(&session, config)?;

        subs.log.create(&session, config)?;
        if config.log.enabled {
            shared.log_flags().set(LogFlag::Enabled);
        }

        let salvage = shared.flags().is_set(ConnFlag::Salvage);
        let hs = history_store_exists(&mut self.sessions, &session, subs, config, salvage)?;
        self.history_store = Some(hs);

        subs.txn.recover(&session, config, hs.exists())?;
        shared.log_flags().set(LogFlag::RecoverDone);
        debug!(target: "strata::conn", history_store = ?hs, "Recovery complete");

        subs.catalog.track_init(&session)?;
        subs.history_store.cleanup_lookaside(&session)?;
        subs.history_store.create(&session, config)?;

        // Commits can block on a half-started log, so open it before
        // eviction or anything else that can commit.
        subs.log.open(&session)?;

        subs.eviction.start(&session)?;
        subs.sweep.create(&session, config)?;
        subs.capacity.create(&session, config)?;
        subs.checkpoint.create(&session, config)?;

        info!(target: "strata::conn", "Background services started");
        Ok(())
    }
}
