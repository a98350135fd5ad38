//! History store precheck
//!
//! Runs before recovery and answers whether the history store exists in the
//! metadata and on disk, and whether it is valid. Recovery may itself add the
//! history store to the metadata, so the answer must be taken first.

use strata_core::{StrataError, StrataResult};
use tracing::{debug, warn};

use super::{Connection, ConnectionConfig};
use crate::flags::{ConnFlag, SessionFlags};
use crate::session::{Session, SessionPool};
use crate::subsystem::{FileSystem, HistoryStore, MetadataCursor, Subsystems};

/// History store file name in the home directory.
pub const HS_FILE: &str = "StrataHS.sdb";
/// Metadata key of the history store.
pub const HS_URI: &str = "file:StrataHS.sdb";
/// Lookaside file left behind by versions without a history store.
pub const LAS_FILE: &str = "StrataLAS.sdb";
/// Metadata key of the legacy lookaside table.
pub const LAS_URI: &str = "file:StrataLAS.sdb";
/// Name of the metadata table.
pub const METADATA_URI: &str = "metadata:";

/// Purpose name of the precheck's private session.
pub const HS_EXISTS_SESSION_NAME: &str = "hs-exists";

/// Outcome of the history store precheck.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStoreState {
    /// No history store. Rollback-to-stable for tables is skipped.
    Absent,
    /// Present and valid.
    Present,
    /// Present but invalid, repaired by salvage.
    Salvaged,
}

impl HistoryStoreState {
    /// True unless the history store is absent.
    pub fn exists(self) -> bool {
        !matches!(self, HistoryStoreState::Absent)
    }
}

impl Connection {
    /// Run the history store precheck on a private session.
    pub fn history_store_exists(&mut self) -> StrataResult<HistoryStoreState> {
        let salvage = self.shared.flags().is_set(ConnFlag::Salvage);
        history_store_exists(
            &mut self.sessions,
            &self.default_session,
            &mut self.subsystems,
            &self.config,
            salvage,
        )
    }
}

/// Determine the state of the history store.
///
/// The private session and the metadata cursor are closed on every path.
pub(crate) fn history_store_exists(
    sessions: &mut SessionPool,
    ctx: &Session,
    subsystems: &mut Subsystems,
    config: &ConnectionConfig,
    salvage: bool,
) -> StrataResult<HistoryStoreState> {
    let session = sessions.open_internal(ctx, HS_EXISTS_SESSION_NAME, SessionFlags::NO_LOGGING)?;

    let probed = match subsystems.catalog.metadata_cursor(&session) {
        Ok(mut cursor) => {
            sessions.cache_cursor(&session, METADATA_URI);
            let probed = probe(
                &session,
                cursor.as_mut(),
                subsystems.history_store.as_mut(),
                subsystems.file_system.as_ref(),
                config,
                salvage,
            );
            keep_first(probed, cursor.close())
        }
        Err(e) => Err(e),
    };
    let state = keep_first(probed, sessions.close(session))?;

    debug!(target: "strata::conn", ?state, salvage, "History store precheck");
    Ok(state)
}

fn probe(
    session: &Session,
    cursor: &mut dyn MetadataCursor,
    history_store: &mut dyn HistoryStore,
    file_system: &dyn FileSystem,
    config: &ConnectionConfig,
    salvage: bool,
) -> StrataResult<HistoryStoreState> {
    if cursor.search(HS_URI)?.is_none() {
        return Ok(HistoryStoreState::Absent);
    }

    if file_system.exists(session, HS_FILE)? {
        return match history_store.configure(session, config) {
            Ok(()) => Ok(HistoryStoreState::Present),
            Err(e) if salvage => {
                warn!(target: "strata::conn", error = %e, "History store failed validation, salvaging");
                history_store.salvage(session, HS_URI)?;
                Ok(HistoryStoreState::Salvaged)
            }
            Err(e) => Err(e),
        };
    }

    if salvage {
        warn!(target: "strata::conn", uri = HS_URI, "History store file missing, removing its metadata entry");
        cursor.remove()?;
        return Ok(HistoryStoreState::Absent);
    }

    Err(StrataError::TrySalvage(format!(
        "metadata references {} but {} does not exist",
        HS_URI, HS_FILE
    )))
}

fn keep_first<T>(result: StrataResult<T>, cleanup: StrataResult<()>) -> StrataResult<T> {
    match (result, cleanup) {
        (Err(e), _) => Err(e),
        (Ok(_), Err(e)) => Err(e),
        (Ok(value), Ok(())) => Ok(value),
    }
}
