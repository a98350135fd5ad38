//! Background server threads.
//!
//! A [`ServerThread`] runs a periodic tick on a named OS thread until it is
//! stopped or, for servers that exit voluntarily, until the connection starts
//! closing. Stopping blocks until the thread has been joined, so a server's
//! destroy call returning means its thread is gone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use strata_core::{StrataError, StrataResult};
use tracing::{debug, error, warn};

use crate::shared::ConnectionShared;

/// When a server thread leaves its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPolicy {
    /// Exit as soon as the connection is closing, or when stopped.
    OnClosing,
    /// Exit only when stopped. Used by servers that must keep running
    /// while other servers shut down.
    OnStop,
}

/// Keeps [`ConnectionStats::server_threads`](crate::shared::ConnectionStats)
/// counting a thread until it exits, including by panic.
struct Alive(Arc<ConnectionShared>);

impl Alive {
    fn register(conn: Arc<ConnectionShared>) -> Self {
        conn.stats().server_threads.fetch_add(1, Ordering::AcqRel);
        Self(conn)
    }
}

impl Drop for Alive {
    fn drop(&mut self) {
        self.0.stats().server_threads.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Work performed on every wakeup.
pub type Tick = Box<dyn FnMut(&ConnectionShared) -> StrataResult<()> + Send>;

/// A named periodic server thread.
pub struct ServerThread {
    name: String,
    stop: Arc<AtomicBool>,
    conn: Arc<ConnectionShared>,
    handle: Option<JoinHandle<()>>,
}

impl ServerThread {
    /// Spawn `name`, running `tick` every `interval`.
    pub fn spawn(
        name: impl Into<String>,
        conn: Arc<ConnectionShared>,
        interval: Duration,
        policy: ExitPolicy,
        mut tick: Tick,
    ) -> StrataResult<Self> {
        let name = name.into();
        let stop = Arc::new(AtomicBool::new(false));

        let thread_stop = Arc::clone(&stop);
        let thread_conn = Arc::clone(&conn);
        let thread_name = name.clone();
        // Counted before the thread exists so a spawned server is never missed.
        let alive = Alive::register(Arc::clone(&conn));
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _alive = alive;
                let should_exit = || {
                    thread_stop.load(Ordering::Acquire)
                        || (policy == ExitPolicy::OnClosing && thread_conn.is_closing())
                };
                loop {
                    if should_exit() {
                        break;
                    }
                    thread_conn.wait_for_wake(interval, should_exit);
                    if should_exit() {
                        break;
                    }
                    if let Err(e) = tick(&thread_conn) {
                        warn!(target: "strata::server", server = %thread_name, error = %e, "Server pass failed");
                    }
                }
                debug!(target: "strata::server", server = %thread_name, "Server thread exiting");
            })
            .map_err(|e| {
                StrataError::subsystem("server", format!("failed to spawn {} thread: {}", name, e))
            })?;

        debug!(target: "strata::server", server = %name, ?interval, ?policy, "Server thread started");
        Ok(Self {
            name,
            stop,
            conn,
            handle: Some(handle),
        })
    }

    /// Thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True while the thread has not exited.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Signal the thread and wait for it to exit.
    pub fn stop(mut self) -> StrataResult<()> {
        self.signal_and_join()
    }

    fn signal_and_join(&mut self) -> StrataResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.stop.store(true, Ordering::Release);
        self.conn.wake_servers();
        handle.join().map_err(|_| {
            error!(target: "strata::server", server = %self.name, "Server thread panicked");
            StrataError::internal(format!("{} thread panicked", self.name))
        })
    }
}

impl Drop for ServerThread {
    fn drop(&mut self) {
        let _ = self.signal_and_join();
    }
}

impl std::fmt::Debug for ServerThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerThread")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}
