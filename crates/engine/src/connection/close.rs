//! Shutdown
//!
//! Every step runs even after an earlier one fails. The first error is kept
//! and returned; later errors are logged and dropped.

use std::sync::Arc;

use strata_core::{FirstError, StrataError, StrataResult};
use tracing::{debug, info, warn};

use super::files::release_lock_file;
use super::Connection;
use crate::extension::PluginKind;
use crate::flags::{ConnFlag, LogFlag, SessionFlags};
use crate::session::Session;

fn record_step(first: &mut FirstError, step: &'static str, result: StrataResult<()>) {
    first.record_with(step, result, |step, e: &StrataError| {
        warn!(target: "strata::conn", step, error = %e, "Shutdown step failed");
    });
}

impl Connection {
    /// Close the connection, returning the first error any teardown step hit.
    pub fn close(mut self) -> StrataResult<()> {
        self.shutdown()
    }

    /// Run the teardown sequence. Safe on a connection whose open failed at
    /// any point.
    pub(crate) fn shutdown(&mut self) -> StrataResult<()> {
        // Set first so a failed assertion below does not re-enter from Drop.
        self.closed = true;
        let shared = Arc::clone(&self.shared);

        // A second panic while unwinding would abort the process.
        if !std::thread::panicking() {
            debug_assert!(
                !shared.flags().is_set(ConnFlag::ServerAsync),
                "async server must be stopped before the connection closes"
            );
            debug_assert!(
                !shared.flags().is_set(ConnFlag::ServerLsm),
                "LSM server must be stopped before the connection closes"
            );
        }

        debug!(target: "strata::conn", id = %shared.id(), "Closing connection");
        shared.flags().set_with_barrier(ConnFlag::Closing);
        shared.wake_servers();

        // Teardown uses the default session to reach data handles.
        self.default_session
            .clear_flags(SessionFlags::NO_DATA_HANDLES);

        let mut first = FirstError::new();
        let session = self.default_session.clone();
        let subs = &mut self.subsystems;

        // Servers that use handles or evictable pages stop before eviction.
        record_step(&mut first, "capacity server", subs.capacity.destroy(&session));
        record_step(&mut first, "checkpoint server", subs.checkpoint.destroy(&session));
        record_step(&mut first, "statistics server", subs.statistics.destroy(&session));
        record_step(&mut first, "sweep server", subs.sweep.destroy(&session));
        record_step(&mut first, "eviction", subs.eviction.stop(&session));

        shared.flags().set_with_barrier(ConnFlag::ClosingNoMoreOpens);

        record_step(&mut first, "data handles", subs.catalog.discard_handles(&session));
        record_step(&mut first, "metadata tracking", subs.catalog.track_destroy(&session));

        let log_flags = shared.log_flags();
        if !first.is_err()
            && log_flags.is_set(LogFlag::Enabled)
            && log_flags.is_set(LogFlag::RecoverDone)
        {
            record_step(
                &mut first,
                "shutdown checkpoint marker",
                subs.log.write_checkpoint_marker(&session, true),
            );
        }
        record_step(&mut first, "log manager", subs.log.destroy(&session));

        for kind in PluginKind::TEARDOWN_ORDER {
            record_step(&mut first, kind.as_str(), self.plugins.remove_kind(kind, &session));
        }

        record_step(
            &mut first,
            "shared cache disconnect",
            subs.cache.disconnect_shared_pool(&session),
        );
        record_step(&mut first, "cache", subs.cache.destroy(&session));
        subs.txn.global_destroy(&session);

        if let Some(lock) = self.lock_file.take() {
            record_step(&mut first, "lock file", release_lock_file(lock));
        }
        if let Some(track) = self.optrack.take() {
            record_step(&mut first, "operation tracking", track.close());
        }

        if let Some(backup) = self.backup.take() {
            debug!(target: "strata::conn", backup = %backup.id(), files = backup.files().len(), "Dropped backup state");
        }

        let leftover = self.files.close_all();
        if leftover > 0 {
            debug!(target: "strata::conn", leftover, "Closed connection file handles");
        }

        let default_session =
            std::mem::replace(&mut self.default_session, Session::dummy(Arc::clone(&shared)));
        if !default_session.is_dummy() {
            record_step(&mut first, "default session", self.sessions.close(default_session));
        }

        if shared.flags().is_set(ConnFlag::LeakMemory) {
            let leaked = self.sessions.leak_aux();
            debug!(target: "strata::conn", leaked, "Skipped freeing session structures");
        } else {
            self.sessions.discard_aux();
        }

        if let Some(mut backend) = subs.storage_backend.take() {
            record_step(
                &mut first,
                "storage backend",
                backend.terminate(&self.default_session),
            );
        }

        while let Some(extension) = self.extensions.pop() {
            record_step(&mut first, "extension", extension.shutdown(&shared));
        }

        match first.failed_step() {
            None => info!(target: "strata::conn", home = %self.config.home.display(), "Connection closed"),
            Some(step) => warn!(
                target: "strata::conn",
                home = %self.config.home.display(),
                step,
                discarded = first.discarded(),
                "Connection closed with errors"
            ),
        }
        first.into_result()
    }
}
