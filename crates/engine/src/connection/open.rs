//! Startup: allocate, publish, and bring up cache and transactions.

use std::path::Path;

use strata_core::StrataResult;
use tracing::{debug, info, warn};

use super::files::{acquire_lock_file, OpTracker};
use super::{Connection, ConnectionConfig};
use crate::flags::SessionFlags;
use crate::session::SessionPool;
use crate::subsystem::Subsystems;

/// Purpose name of the default session.
pub const CONNECTION_SESSION_NAME: &str = "connection";

/// Open the database at `home`, reading `<home>/strata.toml`.
pub fn open_home(home: impl AsRef<Path>) -> StrataResult<Connection> {
    open(ConnectionConfig::load(home)?)
}

/// Open a connection with the built-in subsystems.
pub fn open(config: ConnectionConfig) -> StrataResult<Connection> {
    let subsystems = Subsystems::builtin(&config);
    open_with(config, subsystems)
}

/// Open a connection driving `subsystems`.
///
/// On failure every step that ran is unwound by the shutdown sequence before
/// the startup error is returned.
pub fn open_with(config: ConnectionConfig, subsystems: Subsystems) -> StrataResult<Connection> {
    config.validate()?;
    let mut conn = Connection::new(config, subsystems);
    match conn.startup() {
        Ok(()) => {
            info!(
                target: "strata::conn",
                id = %conn.shared.id(),
                home = %conn.config.home.display(),
                sessions = conn.sessions.len(),
                "Connection open"
            );
            Ok(conn)
        }
        Err(e) => {
            warn!(target: "strata::conn", error = %e, "Open failed, unwinding");
            if let Err(close_err) = conn.shutdown() {
                warn!(target: "strata::conn", error = %close_err, "Shutdown after failed open also failed");
            }
            Err(e)
        }
    }
}

impl Connection {
    fn startup(&mut self) -> StrataResult<()> {
        self.lock_file = Some(acquire_lock_file(&self.config.home)?);
        if self.config.operation_tracking {
            self.optrack = Some(OpTracker::open(&self.config.home)?);
        }
        self.connection_open()?;
        self.start_workers()
    }

    /// Allocate the session pool, publish the handle, and create the cache
    /// and global transaction state.
    ///
    /// Any failure leaves the handle safe to pass to shutdown.
    pub fn connection_open(&mut self) -> StrataResult<()> {
        let size = self.config.session_size()?;
        self.sessions = SessionPool::allocate(size, self.config.hazard_max)?;

        // The current default session is the allocation context, never the
        // destination.
        let session = self.sessions.open_internal(
            &self.default_session,
            CONNECTION_SESSION_NAME,
            SessionFlags::NO_DATA_HANDLES,
        )?;
        self.default_session = session;

        self.shared
            .set_ckpt_most_recent(chrono::Utc::now().timestamp());

        self.shared.publish();
        debug!(target: "strata::conn", sessions = self.sessions.len(), "Connection published");

        self.subsystems
            .cache
            .create(&self.default_session, &self.config)?;
        self.subsystems
            .txn
            .global_init(&self.default_session, &self.config)?;
        Ok(())
    }
}
