//! Connection state visible to background threads
//!
//! Everything a server thread may read while the controlling thread is
//! starting up or shutting down lives here, and every field is atomic or
//! immutable. The rest of the connection is owned by the controlling thread
//! and never shared.

use std::path::{Path, PathBuf};
use std::sync::atomic::{fence, AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use strata_core::{StrataError, StrataResult};
use uuid::Uuid;

use crate::flags::{ConnFlag, FlagSet, LogFlag};

/// Counters updated by server threads and read by the statistics server.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Sessions currently open in the pool
    pub sessions_open: AtomicU64,
    /// Eviction passes completed
    pub eviction_passes: AtomicU64,
    /// Handle-sweep passes completed
    pub sweep_passes: AtomicU64,
    /// Capacity throttling periods completed
    pub capacity_periods: AtomicU64,
    /// Checkpoint server wakeups that completed a checkpoint
    pub checkpoints: AtomicU64,
    /// Server threads spawned and not yet exited
    pub server_threads: AtomicU64,
}

/// Point-in-time copy of [`ConnectionStats`].
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Sessions currently open in the pool
    pub sessions_open: u64,
    /// Eviction passes completed
    pub eviction_passes: u64,
    /// Handle-sweep passes completed
    pub sweep_passes: u64,
    /// Capacity throttling periods completed
    pub capacity_periods: u64,
    /// Checkpoints completed
    pub checkpoints: u64,
    /// Server threads alive
    pub server_threads: u64,
}

impl ConnectionStats {
    /// Copy the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sessions_open: self.sessions_open.load(Ordering::Relaxed),
            eviction_passes: self.eviction_passes.load(Ordering::Relaxed),
            sweep_passes: self.sweep_passes.load(Ordering::Relaxed),
            capacity_periods: self.capacity_periods.load(Ordering::Relaxed),
            checkpoints: self.checkpoints.load(Ordering::Relaxed),
            server_threads: self.server_threads.load(Ordering::Acquire),
        }
    }
}

/// The part of a connection that server threads may observe.
pub struct ConnectionShared {
    id: Uuid,
    home: PathBuf,
    flags: FlagSet<ConnFlag>,
    log_flags: FlagSet<LogFlag>,
    published: AtomicBool,
    ckpt_most_recent: AtomicI64,
    stats: ConnectionStats,
    wake_lock: Mutex<()>,
    wake_cond: Condvar,
}

impl ConnectionShared {
    /// Create the empty shared state for a connection rooted at `home`.
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            home: home.into(),
            flags: FlagSet::new(),
            log_flags: FlagSet::new(),
            published: AtomicBool::new(false),
            ckpt_most_recent: AtomicI64::new(0),
            stats: ConnectionStats::default(),
            wake_lock: Mutex::new(()),
            wake_cond: Condvar::new(),
        }
    }

    /// Unique id of this connection instance.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Database home directory.
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Connection flags.
    pub fn flags(&self) -> &FlagSet<ConnFlag> {
        &self.flags
    }

    /// Logging flags.
    pub fn log_flags(&self) -> &FlagSet<LogFlag> {
        &self.log_flags
    }

    /// Server counters.
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// True once shutdown has started.
    pub fn is_closing(&self) -> bool {
        self.flags.is_set(ConnFlag::Closing)
    }

    /// Fail if new files may no longer be opened.
    pub fn check_open_allowed(&self, what: &str) -> StrataResult<()> {
        if self.flags.is_set(ConnFlag::ClosingNoMoreOpens) {
            return Err(StrataError::Closing(format!(
                "cannot open {} after shutdown closed data handles",
                what
            )));
        }
        Ok(())
    }

    /// Wall-clock seconds of the most recent checkpoint.
    pub fn ckpt_most_recent(&self) -> i64 {
        self.ckpt_most_recent.load(Ordering::Acquire)
    }

    /// Update the most recent checkpoint watermark.
    pub fn set_ckpt_most_recent(&self, secs: i64) {
        self.ckpt_most_recent.store(secs, Ordering::Release);
    }

    /// Publish the connection.
    ///
    /// All writes made before this call are visible to any thread that
    /// observes `is_published() == true`.
    pub(crate) fn publish(&self) {
        fence(Ordering::Release);
        self.published.store(true, Ordering::Release);
    }

    /// True once the startup sequence has published the handle.
    pub fn is_published(&self) -> bool {
        self.published.load(Ordering::Acquire)
    }

    /// Wake every server thread blocked in [`wait_for_wake`](Self::wait_for_wake).
    pub fn wake_servers(&self) {
        // Taking the lock orders this notify after any waiter's predicate check.
        let _guard = self.wake_lock.lock();
        self.wake_cond.notify_all();
    }

    /// Block for up to `timeout`, returning early once `exit` reports true.
    ///
    /// A timeout too large to represent as a deadline waits for a wakeup only.
    pub fn wait_for_wake<F: Fn() -> bool>(&self, timeout: Duration, exit: F) {
        let deadline = Instant::now().checked_add(timeout);
        let mut guard = self.wake_lock.lock();
        while !exit() {
            match deadline {
                Some(deadline) => {
                    if self.wake_cond.wait_until(&mut guard, deadline).timed_out() {
                        break;
                    }
                }
                None => self.wake_cond.wait(&mut guard),
            }
        }
    }
}

impl std::fmt::Debug for ConnectionShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionShared")
            .field("id", &self.id)
            .field("home", &self.home)
            .field("flags", &self.flags)
            .field("log_flags", &self.log_flags)
            .finish()
    }
}
