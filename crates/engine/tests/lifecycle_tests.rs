//! Startup and shutdown ordering tests
//!
//! Drives connections over the recording collaborators and checks:
//! 1. Startup runs every step in dependency order
//! 2. Shutdown stops servers before eviction and eviction before handles
//! 3. A failure at any startup step still leaves a connection close can unwind
//! 4. Shutdown keeps going after failures and returns the first one

use strata_core::ErrorKind;
use strata_engine::connection::files::acquire_lock_file;
use strata_engine::testing::Harness;
use strata_engine::{open_with, ConnFlag, Connection, ConnectionConfig, PluginKind};
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

const STARTUP: &[&str] = &[
    "cache.create",
    "txn.global_init",
    "statistics.create",
    "log.create",
    "catalog.metadata_cursor",
    "cursor.search",
    "cursor.close",
    "txn.recover",
    "catalog.track_init",
    "hs.cleanup_lookaside",
    "hs.create",
    "log.open",
    "eviction.start",
    "sweep.create",
    "capacity.create",
    "checkpoint.create",
];

const SHUTDOWN: &[&str] = &[
    "capacity.destroy",
    "checkpoint.destroy",
    "statistics.destroy",
    "sweep.destroy",
    "eviction.stop",
    "catalog.discard_handles",
    "catalog.track_destroy",
    "log.destroy",
    "cache.disconnect_shared_pool",
    "cache.destroy",
    "txn.global_destroy",
];

fn config(dir: &TempDir) -> ConnectionConfig {
    ConnectionConfig::new(dir.path())
}

fn calls(harness: &Harness) -> Vec<String> {
    harness.journal().calls()
}

fn assert_in_order(harness: &Harness, expected: &[&str]) {
    let positions: Vec<usize> = expected
        .iter()
        .map(|call| {
            harness
                .journal()
                .position(call)
                .unwrap_or_else(|| panic!("{} was not called; journal: {:?}", call, calls(harness)))
        })
        .collect();
    assert!(
        positions.windows(2).all(|w| w[0] < w[1]),
        "out of order: {:?}",
        calls(harness)
    );
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_open_runs_startup_in_order() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new();
    let conn = open_with(config(&dir), harness.subsystems()).unwrap();
    assert_eq!(calls(&harness), STARTUP);
    assert!(conn.holds_lock());
    assert!(conn.shared().is_published());
    assert!(conn.shared().ckpt_most_recent() > 0);
    conn.close().unwrap();
}

#[test]
fn test_close_runs_shutdown_in_order() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new();
    let conn = open_with(config(&dir), harness.subsystems()).unwrap();
    harness.journal().clear();
    conn.close().unwrap();
    assert_eq!(calls(&harness), SHUTDOWN);
}

#[test]
fn test_eviction_stops_after_every_server() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new();
    let conn = open_with(config(&dir), harness.subsystems()).unwrap();
    conn.close().unwrap();

    let journal = harness.journal();
    let eviction = journal.position("eviction.stop").unwrap();
    for server in ["capacity", "checkpoint", "statistics", "sweep"] {
        let stop = journal.position(&format!("{}.destroy", server)).unwrap();
        assert!(stop < eviction, "{} stopped after eviction", server);
    }
    assert!(eviction < journal.position("catalog.discard_handles").unwrap());
}

#[test]
fn test_close_on_already_closing_connection_runs_every_step() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new();
    let conn = open_with(config(&dir), harness.subsystems()).unwrap();
    conn.shared().flags().set_with_barrier(ConnFlag::Closing);
    harness.journal().clear();
    conn.close().unwrap();
    assert_eq!(calls(&harness), SHUTDOWN);
}

#[test]
fn test_close_unopened_connection() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new();
    let conn = Connection::new(config(&dir), harness.subsystems());
    assert!(conn.default_session().is_dummy());
    assert!(conn.sessions().is_empty());
    conn.close().unwrap();
    assert_eq!(calls(&harness), SHUTDOWN);
}

// ============================================================================
// Failed startup
// ============================================================================

#[test]
fn test_failure_at_every_startup_step_is_unwound() {
    for (idx, step) in STARTUP.iter().enumerate() {
        let dir = TempDir::new().unwrap();
        let harness = Harness::new();
        harness.faults().fail(step);

        let err = open_with(config(&dir), harness.subsystems()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Subsystem, "failing {}", step);

        let journal = harness.journal();
        for later in &STARTUP[idx + 1..] {
            // The precheck closes its cursor even when the search fails.
            if *step == "cursor.search" && *later == "cursor.close" {
                assert!(journal.contains(later));
                continue;
            }
            assert!(!journal.contains(later), "{} ran after {} failed", later, step);
        }
        for teardown in SHUTDOWN {
            assert_eq!(journal.count(teardown), 1, "{} after {} failed", teardown, step);
        }

        // The lock is released by the unwinding shutdown.
        acquire_lock_file(dir.path()).unwrap();
    }
}

#[test]
fn test_config_error_before_any_state() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new();
    let mut cfg = config(&dir);
    cfg.session_max = 0;
    let err = open_with(cfg, harness.subsystems()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(calls(&harness).is_empty());
    assert!(!dir.path().join("strata.lock").exists());
}

#[test]
fn test_oversized_interval_rejected_before_any_state() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new();
    let mut cfg = config(&dir);
    cfg.checkpoint.wait_secs = u64::MAX;
    let err = open_with(cfg, harness.subsystems()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(calls(&harness).is_empty());
}

#[test]
fn test_session_pool_allocation_failure_then_close() {
    for session_max in [usize::MAX / 4, usize::MAX] {
        let dir = TempDir::new().unwrap();
        let harness = Harness::new();
        let mut cfg = config(&dir);
        cfg.session_max = session_max;

        let mut conn = Connection::new(cfg, harness.subsystems());
        let err = conn.connection_open().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        assert!(conn.sessions().is_empty());
        assert!(conn.default_session().is_dummy());
        assert!(!conn.shared().is_published());
        assert!(calls(&harness).is_empty());

        conn.close().unwrap();
        assert_eq!(calls(&harness), SHUTDOWN);
    }
}

#[test]
fn test_internal_session_failure_then_close() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new();
    let mut cfg = config(&dir);
    cfg.hazard_max = usize::MAX / 4;

    let mut conn = Connection::new(cfg, harness.subsystems());
    let err = conn.connection_open().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    assert!(!conn.sessions().is_empty());
    assert_eq!(conn.sessions().active_count(), 0);
    assert!(conn.default_session().is_dummy());
    assert!(!conn.shared().is_published());
    assert!(calls(&harness).is_empty());

    conn.close().unwrap();
    assert_eq!(calls(&harness), SHUTDOWN);
}

#[test]
fn test_busy_when_already_open() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new();
    let first = open_with(config(&dir), harness.subsystems()).unwrap();
    let err = open_with(config(&dir), harness.subsystems()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Busy);
    first.close().unwrap();
    open_with(config(&dir), harness.subsystems())
        .unwrap()
        .close()
        .unwrap();
}

// ============================================================================
// Error accumulation
// ============================================================================

#[test]
fn test_first_error_wins_and_later_steps_still_run() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new();
    let mut conn = open_with(config(&dir), harness.subsystems()).unwrap();
    conn.add_plugin(PluginKind::Compressor, "zstd", harness.plugin("zstd"))
        .unwrap();
    harness.faults().fail("plugin.terminate:zstd");
    harness.faults().fail("cache.destroy");

    let err = conn.close().unwrap_err();
    assert_eq!(
        err.to_string(),
        "plugin failed: injected failure in plugin.terminate:zstd"
    );
    let journal = harness.journal();
    assert!(journal.contains("cache.destroy"));
    assert!(journal.contains("txn.global_destroy"));
}

#[test]
fn test_every_step_runs_when_all_fail() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new();
    let conn = open_with(config(&dir), harness.subsystems()).unwrap();
    for call in SHUTDOWN {
        harness.faults().fail(call);
    }
    harness.journal().clear();

    let err = conn.close().unwrap_err();
    assert_eq!(
        err.to_string(),
        "capacity failed: injected failure in capacity.destroy"
    );
    assert_eq!(calls(&harness), SHUTDOWN);
}

// ============================================================================
// Log marker
// ============================================================================

#[test]
fn test_shutdown_marker_written_when_logging() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new();
    let mut cfg = config(&dir);
    cfg.log.enabled = true;
    let conn = open_with(cfg, harness.subsystems()).unwrap();
    assert_eq!(conn.log_path(), dir.path().join("log"));
    conn.close().unwrap();

    let journal = harness.journal();
    let marker = journal
        .position("log.write_checkpoint_marker(shutdown)")
        .unwrap();
    assert!(journal.position("catalog.track_destroy").unwrap() < marker);
    assert!(marker < journal.position("log.destroy").unwrap());
}

#[test]
fn test_no_marker_without_logging() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new();
    let conn = open_with(config(&dir), harness.subsystems()).unwrap();
    conn.close().unwrap();
    assert!(!harness
        .journal()
        .contains("log.write_checkpoint_marker(shutdown)"));
}

#[test]
fn test_no_marker_after_earlier_shutdown_error() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new();
    let mut cfg = config(&dir);
    cfg.log.enabled = true;
    let conn = open_with(cfg, harness.subsystems()).unwrap();
    harness.faults().fail("sweep.destroy");
    assert!(conn.close().is_err());

    let journal = harness.journal();
    assert!(!journal.contains("log.write_checkpoint_marker(shutdown)"));
    assert!(journal.contains("log.destroy"));
}

#[test]
fn test_no_marker_when_recovery_failed() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new();
    harness.faults().fail("txn.recover");
    let mut cfg = config(&dir);
    cfg.log.enabled = true;
    assert!(open_with(cfg, harness.subsystems()).is_err());

    let journal = harness.journal();
    assert!(!journal.contains("log.write_checkpoint_marker(shutdown)"));
    assert!(journal.contains("log.destroy"));
}

// ============================================================================
// Extensions, plugins, backend
// ============================================================================

#[test]
fn test_extensions_unload_lifo_after_backend() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new();
    let subsystems = harness.subsystems().with_storage_backend(harness.backend());
    let mut conn = open_with(config(&dir), subsystems).unwrap();
    conn.load_extension(harness.extension("first", true)).unwrap();
    conn.load_extension(harness.extension("second", false)).unwrap();
    conn.load_extension(harness.extension("third", true)).unwrap();
    assert_eq!(conn.extension_names(), vec!["first", "second", "third"]);
    harness.journal().clear();
    conn.close().unwrap();

    let calls = calls(&harness);
    let tail: Vec<&str> = calls[SHUTDOWN.len()..].iter().map(String::as_str).collect();
    assert_eq!(
        tail,
        vec![
            "backend.terminate",
            "extension.terminate:third",
            "extension.unload:third",
            "extension.unload:second",
            "extension.terminate:first",
            "extension.unload:first",
        ]
    );
}

#[test]
fn test_failing_extension_does_not_stop_the_rest() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new();
    let mut conn = open_with(config(&dir), harness.subsystems()).unwrap();
    conn.load_extension(harness.extension("a", true)).unwrap();
    conn.load_extension(harness.extension("b", true)).unwrap();
    harness.faults().fail("extension.terminate:b");

    let err = conn.close().unwrap_err();
    assert_eq!(
        err.to_string(),
        "extension failed: injected failure in extension.terminate:b"
    );
    let journal = harness.journal();
    assert!(journal.contains("extension.unload:b"));
    assert!(journal.contains("extension.unload:a"));
}

#[test]
fn test_plugins_released_by_kind_before_cache() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new();
    let mut conn = open_with(config(&dir), harness.subsystems()).unwrap();
    conn.add_plugin(PluginKind::Extractor, "x", harness.plugin("x"))
        .unwrap();
    conn.add_plugin(PluginKind::Collator, "c", harness.plugin("c"))
        .unwrap();
    conn.add_plugin(PluginKind::Encryptor, "e", harness.plugin("e"))
        .unwrap();
    assert_eq!(conn.plugin_count(PluginKind::Collator), 1);
    conn.close().unwrap();

    let journal = harness.journal();
    let c = journal.position("plugin.terminate:c").unwrap();
    let e = journal.position("plugin.terminate:e").unwrap();
    let x = journal.position("plugin.terminate:x").unwrap();
    assert!(journal.position("log.destroy").unwrap() < c);
    assert!(c < e && e < x);
    assert!(x < journal.position("cache.disconnect_shared_pool").unwrap());
}

// ============================================================================
// Connection-owned files
// ============================================================================

#[test]
fn test_leftover_files_and_backup_released() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new();
    let mut cfg = config(&dir);
    cfg.operation_tracking = true;
    let mut conn = open_with(cfg, harness.subsystems()).unwrap();

    let kept = conn.open_file("kept.dat").unwrap();
    let closed = conn.open_file("closed.dat").unwrap();
    assert!(conn.close_file(closed));
    assert_ne!(kept, closed);
    assert_eq!(conn.open_file_count(), 1);

    conn.begin_backup(vec!["kept.dat".to_string()]).unwrap();
    let err = conn.begin_backup(Vec::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Busy);
    conn.track_operation("insert").unwrap();
    conn.close().unwrap();

    let optrack = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .find(|e| e.file_name().to_string_lossy().starts_with("optrack-"))
        .unwrap();
    let content = std::fs::read_to_string(optrack.path()).unwrap();
    assert!(content.contains("\"insert\""));
}

#[test]
fn test_drop_without_close_runs_shutdown() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new();
    let conn = open_with(config(&dir), harness.subsystems()).unwrap();
    harness.journal().clear();
    drop(conn);
    assert_eq!(calls(&harness), SHUTDOWN);
    acquire_lock_file(dir.path()).unwrap();
}
