//! Global transaction state and recovery bookkeeping.

use strata_core::{StrataError, StrataResult};
use tracing::{debug, info};

use super::log::{read_log, LogRecord};
use crate::connection::ConnectionConfig;
use crate::session::Session;
use crate::subsystem::TxnGlobal;

/// What recovery found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoveryOutcome {
    /// Checkpoint records found in the log
    pub checkpoints: usize,
    /// The last record was written by a clean shutdown
    pub clean_shutdown: bool,
    /// Rollback-to-stable for tables was skipped because there was no
    /// history store
    pub skipped_rollback_to_stable: bool,
}

/// The built-in [`TxnGlobal`].
#[derive(Debug, Default)]
pub struct GlobalTxnState {
    initialized: bool,
    recovery: Option<RecoveryOutcome>,
}

impl GlobalTxnState {
    /// Uninitialized state.
    pub fn new() -> Self {
        Self::default()
    }

    /// True between `global_init` and `global_destroy`.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Outcome of the last recovery run.
    pub fn recovery(&self) -> Option<RecoveryOutcome> {
        self.recovery
    }
}

impl TxnGlobal for GlobalTxnState {
    fn global_init(&mut self, _session: &Session, _config: &ConnectionConfig) -> StrataResult<()> {
        self.initialized = true;
        Ok(())
    }

    fn recover(
        &mut self,
        _session: &Session,
        config: &ConnectionConfig,
        history_store_present: bool,
    ) -> StrataResult<()> {
        if !self.initialized {
            return Err(StrataError::subsystem(
                "recovery",
                "transaction state is not initialized",
            ));
        }

        let mut outcome = RecoveryOutcome {
            skipped_rollback_to_stable: !history_store_present,
            ..RecoveryOutcome::default()
        };
        if config.log.enabled {
            let records = read_log(&config.log_dir())?;
            outcome.checkpoints = records.len();
            outcome.clean_shutdown = matches!(
                records.last(),
                Some(LogRecord::Checkpoint { shutdown: true, .. })
            );
        }
        if outcome.skipped_rollback_to_stable {
            debug!(target: "strata::conn", "No history store, skipping rollback-to-stable for tables");
        }
        info!(
            target: "strata::conn",
            checkpoints = outcome.checkpoints,
            clean_shutdown = outcome.clean_shutdown,
            "Recovery complete"
        );
        self.recovery = Some(outcome);
        Ok(())
    }

    fn global_destroy(&mut self, _session: &Session) {
        self.initialized = false;
    }
}
