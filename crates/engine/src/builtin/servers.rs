//! Periodic maintenance servers and the eviction thread pool.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::Serialize;
use strata_core::{FirstError, StrataError, StrataResult};
use tracing::debug;

use crate::background::{ExitPolicy, ServerThread, Tick};
use crate::connection::ConnectionConfig;
use crate::session::Session;
use crate::shared::{ConnectionShared, StatsSnapshot};
use crate::subsystem::{Eviction, Server};

/// Statistics file name in the home directory.
pub const STATISTICS_FILE: &str = "strata.stat";

const CAPACITY_PERIOD: Duration = Duration::from_millis(100);
const EVICTION_PERIOD: Duration = Duration::from_millis(100);

/// Which maintenance server a [`PeriodicServer`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    /// Appends statistics snapshots to `strata.stat`.
    Statistics,
    /// Sweeps idle data handles.
    Sweep,
    /// Throttles write throughput.
    Capacity,
    /// Takes periodic checkpoints.
    Checkpoint,
}

impl ServerKind {
    fn name(self) -> &'static str {
        match self {
            ServerKind::Statistics => "statistics",
            ServerKind::Sweep => "sweep",
            ServerKind::Capacity => "capacity",
            ServerKind::Checkpoint => "checkpoint",
        }
    }

    /// Period for this server, or `None` when configured off.
    fn interval(self, config: &ConnectionConfig) -> Option<Duration> {
        match self {
            ServerKind::Statistics => config.statistics_interval(),
            ServerKind::Sweep => Some(config.sweep_interval()),
            ServerKind::Capacity => {
                (config.capacity.total_bytes_per_sec > 0).then_some(CAPACITY_PERIOD)
            }
            ServerKind::Checkpoint => config.checkpoint_interval(),
        }
    }

    fn tick(self) -> Tick {
        match self {
            ServerKind::Statistics => Box::new(|conn: &ConnectionShared| {
                write_statistics(conn.home(), conn.stats().snapshot())
            }),
            ServerKind::Sweep => Box::new(|conn: &ConnectionShared| {
                conn.stats().sweep_passes.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }),
            ServerKind::Capacity => Box::new(|conn: &ConnectionShared| {
                conn.stats().capacity_periods.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }),
            ServerKind::Checkpoint => Box::new(|conn: &ConnectionShared| {
                conn.stats().checkpoints.fetch_add(1, Ordering::Relaxed);
                conn.set_ckpt_most_recent(chrono::Utc::now().timestamp());
                Ok(())
            }),
        }
    }
}

#[derive(Serialize)]
struct StatisticsRecord {
    ts: String,
    #[serde(flatten)]
    stats: StatsSnapshot,
}

fn write_statistics(home: &Path, stats: StatsSnapshot) -> StrataResult<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(home.join(STATISTICS_FILE))?;
    let record = StatisticsRecord {
        ts: chrono::Utc::now().to_rfc3339(),
        stats,
    };
    let mut line = serde_json::to_vec(&record)?;
    line.push(b'\n');
    file.write_all(&line)?;
    Ok(())
}

/// The built-in [`Server`] for statistics, sweep, capacity, and checkpoint.
#[derive(Debug)]
pub struct PeriodicServer {
    kind: ServerKind,
    thread: Option<ServerThread>,
}

impl PeriodicServer {
    /// A stopped server of `kind`.
    pub fn new(kind: ServerKind) -> Self {
        Self { kind, thread: None }
    }

    /// True while the server thread is alive.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, ServerThread::is_running)
    }
}

impl Server for PeriodicServer {
    fn name(&self) -> &'static str {
        self.kind.name()
    }

    fn create(&mut self, session: &Session, config: &ConnectionConfig) -> StrataResult<()> {
        if self.thread.is_some() {
            return Err(StrataError::subsystem(self.kind.name(), "server already running"));
        }
        let Some(interval) = self.kind.interval(config) else {
            debug!(target: "strata::server", server = self.kind.name(), "Server disabled");
            return Ok(());
        };
        self.thread = Some(ServerThread::spawn(
            format!("strata-{}", self.kind.name()),
            std::sync::Arc::clone(session.connection()),
            interval,
            ExitPolicy::OnClosing,
            self.kind.tick(),
        )?);
        Ok(())
    }

    fn destroy(&mut self, _session: &Session) -> StrataResult<()> {
        match self.thread.take() {
            Some(thread) => thread.stop(),
            None => Ok(()),
        }
    }
}

/// The built-in [`Eviction`]: a fixed pool of eviction threads.
///
/// Eviction threads ignore `Closing` and run until stopped, since other
/// servers may still touch evictable pages while they shut down.
#[derive(Debug)]
pub struct EvictionPool {
    threads: usize,
    workers: Vec<ServerThread>,
}

impl EvictionPool {
    /// A stopped pool that starts `threads` workers.
    pub fn new(threads: usize) -> Self {
        Self {
            threads,
            workers: Vec::new(),
        }
    }

    /// Workers currently alive.
    pub fn running(&self) -> usize {
        self.workers.iter().filter(|w| w.is_running()).count()
    }
}

impl Eviction for EvictionPool {
    fn start(&mut self, session: &Session) -> StrataResult<()> {
        if !self.workers.is_empty() {
            return Err(StrataError::subsystem("eviction", "already started"));
        }
        for id in 0..self.threads {
            let worker = ServerThread::spawn(
                format!("strata-evict-{}", id),
                std::sync::Arc::clone(session.connection()),
                EVICTION_PERIOD,
                ExitPolicy::OnStop,
                Box::new(|conn: &ConnectionShared| {
                    conn.stats().eviction_passes.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }),
            )?;
            self.workers.push(worker);
        }
        debug!(target: "strata::server", threads = self.threads, "Eviction started");
        Ok(())
    }

    fn stop(&mut self, _session: &Session) -> StrataResult<()> {
        let mut first = FirstError::new();
        for worker in self.workers.drain(..) {
            first.record("eviction worker", worker.stop());
        }
        first.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn session(home: &Path) -> Session {
        Session::dummy(Arc::new(ConnectionShared::new(home)))
    }

    #[test]
    fn test_disabled_servers_do_not_spawn() {
        let dir = TempDir::new().unwrap();
        let s = session(dir.path());
        let config = ConnectionConfig::new(dir.path());
        for kind in [ServerKind::Statistics, ServerKind::Capacity, ServerKind::Checkpoint] {
            let mut server = PeriodicServer::new(kind);
            server.create(&s, &config).unwrap();
            assert!(!server.is_running(), "{} should be off", server.name());
            server.destroy(&s).unwrap();
        }
    }

    #[test]
    fn test_sweep_runs_and_stops() {
        let dir = TempDir::new().unwrap();
        let s = session(dir.path());
        let config = ConnectionConfig::new(dir.path());
        let mut sweep = PeriodicServer::new(ServerKind::Sweep);
        sweep.create(&s, &config).unwrap();
        assert!(sweep.is_running());
        assert!(sweep.create(&s, &config).is_err());
        sweep.destroy(&s).unwrap();
        assert!(!sweep.is_running());
        sweep.destroy(&s).unwrap();
    }

    #[test]
    fn test_statistics_file_written() {
        let dir = TempDir::new().unwrap();
        write_statistics(dir.path(), ConnectionShared::new(dir.path()).stats().snapshot()).unwrap();
        let content = std::fs::read_to_string(dir.path().join(STATISTICS_FILE)).unwrap();
        let v: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(v["sessions_open"], 0);
        assert!(v["ts"].is_string());
    }

    #[test]
    fn test_eviction_pool() {
        let dir = TempDir::new().unwrap();
        let s = session(dir.path());
        let mut pool = EvictionPool::new(3);
        pool.start(&s).unwrap();
        assert_eq!(pool.running(), 3);
        assert!(pool.start(&s).is_err());
        pool.stop(&s).unwrap();
        assert_eq!(pool.running(), 0);
        pool.stop(&s).unwrap();
    }
}
