//! Connection configuration via `strata.toml`
//!
//! On first open a default `strata.toml` is written to the database home.
//! To change settings, edit the file and reopen.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use strata_core::{StrataError, StrataResult};

/// Config file name placed in the database home directory.
pub const CONFIG_FILE_NAME: &str = "strata.toml";

/// Session slots reserved for the engine's own sessions on top of `session_max`.
pub const EXTRA_INTERNAL_SESSIONS: usize = 20;

/// Upper bound on `session_max`.
pub const MAX_SESSIONS: usize = 64 * 1024;

/// Upper bound on eviction worker threads.
pub const MAX_EVICTION_THREADS: usize = 20;

/// Upper bound on any server wait interval, in seconds.
pub const MAX_WAIT_SECS: u64 = 100_000;

/// Smallest accepted `hazard_max`.
pub const MIN_HAZARD_MAX: usize = 15;

/// Write-ahead log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Enable write-ahead logging.
    pub enabled: bool,
    /// Log directory, relative to the home directory.
    pub path: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "log".to_string(),
        }
    }
}

/// Statistics logging server settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatisticsLogConfig {
    /// Seconds between statistics records; 0 disables the server.
    pub wait_secs: u64,
}

/// Checkpoint server settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Seconds between checkpoints; 0 disables the server.
    pub wait_secs: u64,
}

/// Capacity throttling settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CapacityConfig {
    /// Write throughput budget in bytes per second; 0 disables throttling.
    pub total_bytes_per_sec: u64,
}

/// Eviction worker settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvictionConfig {
    /// Threads started with the connection.
    pub threads_min: usize,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self { threads_min: 1 }
    }
}

/// Handle sweep settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileManagerConfig {
    /// Seconds between sweeps for idle data handles.
    pub close_scan_interval_secs: u64,
}

impl Default for FileManagerConfig {
    fn default() -> Self {
        Self {
            close_scan_interval_secs: 10,
        }
    }
}

/// Connection configuration loaded from `strata.toml`.
///
/// # Example
///
/// ```toml
/// session_max = 100
/// cache_size_mb = 100
/// salvage = false
///
/// [log]
/// enabled = true
/// path = "log"
///
/// [checkpoint]
/// wait_secs = 60
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Database home directory. Not persisted.
    #[serde(skip)]
    pub home: PathBuf,
    /// Maximum number of application sessions.
    pub session_max: usize,
    /// Hazard pointer slots allocated per session.
    pub hazard_max: usize,
    /// Cache size in megabytes.
    pub cache_size_mb: u64,
    /// Name of a process-wide shared cache pool to join.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_cache: Option<String>,
    /// Open in salvage mode.
    pub salvage: bool,
    /// Skip freeing per-session structures at close (diagnostic fast exit).
    pub leak_memory: bool,
    /// Record operation tracking output to a file in the home directory.
    pub operation_tracking: bool,
    /// Write-ahead log settings.
    pub log: LogConfig,
    /// Statistics logging server.
    pub statistics_log: StatisticsLogConfig,
    /// Checkpoint server.
    pub checkpoint: CheckpointConfig,
    /// Capacity throttling server.
    pub capacity: CapacityConfig,
    /// Eviction workers.
    pub eviction: EvictionConfig,
    /// Handle sweep server.
    pub file_manager: FileManagerConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            home: PathBuf::new(),
            session_max: 100,
            hazard_max: 1000,
            cache_size_mb: 100,
            shared_cache: None,
            salvage: false,
            leak_memory: false,
            operation_tracking: false,
            log: LogConfig::default(),
            statistics_log: StatisticsLogConfig::default(),
            checkpoint: CheckpointConfig::default(),
            capacity: CapacityConfig::default(),
            eviction: EvictionConfig::default(),
            file_manager: FileManagerConfig::default(),
        }
    }
}

impl ConnectionConfig {
    /// Default configuration rooted at `home`.
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            ..Self::default()
        }
    }

    /// Load `<home>/strata.toml`, writing the default file first if missing.
    pub fn load(home: impl AsRef<Path>) -> StrataResult<Self> {
        let home = home.as_ref();
        std::fs::create_dir_all(home)?;
        let path = home.join(CONFIG_FILE_NAME);
        Self::write_default_if_missing(&path)?;
        let mut cfg = Self::from_file(&path)?;
        cfg.home = home.to_path_buf();
        Ok(cfg)
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> StrataResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a config file. `home` is left empty.
    pub fn from_file(path: &Path) -> StrataResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Write this configuration to `path`.
    pub fn write_to_file(&self, path: &Path) -> StrataResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Write the commented default file if `path` does not exist yet.
    pub fn write_default_if_missing(path: &Path) -> StrataResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Strata connection configuration
#
# Maximum number of application sessions.
session_max = 100

# Hazard pointer slots per session.
hazard_max = 1000

# Cache size in megabytes.
cache_size_mb = 100

# Join a named process-wide cache pool instead of a private cache.
# shared_cache = "pool"

# Open in salvage mode: repair or drop a corrupt history store.
salvage = false

# Skip freeing per-session memory at close (diagnostic fast exit).
leak_memory = false

operation_tracking = false

[log]
enabled = false
path = "log"

# Server intervals are capped at 100000 seconds.
[statistics_log]
wait_secs = 0       # 0 disables the statistics server

[checkpoint]
wait_secs = 0       # 0 disables the checkpoint server

[capacity]
total_bytes_per_sec = 0

[eviction]
threads_min = 1

[file_manager]
close_scan_interval_secs = 10
"#
    }

    /// Reject invalid option values.
    ///
    /// Runs before any connection state is created.
    pub fn validate(&self) -> StrataResult<()> {
        if self.home.as_os_str().is_empty() {
            return Err(StrataError::config("home directory must be set"));
        }
        if self.session_max == 0 || self.session_max > MAX_SESSIONS {
            return Err(StrataError::config(format!(
                "session_max must be between 1 and {}, got {}",
                MAX_SESSIONS, self.session_max
            )));
        }
        if self.cache_size_mb == 0 {
            return Err(StrataError::config("cache_size_mb must be at least 1"));
        }
        if self.hazard_max < MIN_HAZARD_MAX {
            return Err(StrataError::config(format!(
                "hazard_max must be at least {}, got {}",
                MIN_HAZARD_MAX, self.hazard_max
            )));
        }
        let threads = self.eviction.threads_min;
        if threads == 0 || threads > MAX_EVICTION_THREADS {
            return Err(StrataError::config(format!(
                "eviction.threads_min must be between 1 and {}, got {}",
                MAX_EVICTION_THREADS, threads
            )));
        }
        if self.file_manager.close_scan_interval_secs == 0 {
            return Err(StrataError::config(
                "file_manager.close_scan_interval_secs must be at least 1",
            ));
        }
        for (name, value) in [
            ("statistics_log.wait_secs", self.statistics_log.wait_secs),
            ("checkpoint.wait_secs", self.checkpoint.wait_secs),
            (
                "file_manager.close_scan_interval_secs",
                self.file_manager.close_scan_interval_secs,
            ),
        ] {
            if value > MAX_WAIT_SECS {
                return Err(StrataError::config(format!(
                    "{} must be at most {}, got {}",
                    name, MAX_WAIT_SECS, value
                )));
            }
        }
        if self.log.path.is_empty() {
            return Err(StrataError::config("log.path must not be empty"));
        }
        if let Some(name) = &self.shared_cache {
            if name.is_empty() {
                return Err(StrataError::config("shared_cache name must not be empty"));
            }
        }
        Ok(())
    }

    /// Length of the session pool: application sessions plus internal reserve.
    ///
    /// # Errors
    ///
    /// Returns `ResourceExhausted` if the length does not fit in `usize`.
    pub fn session_size(&self) -> StrataResult<usize> {
        self.session_max
            .checked_add(EXTRA_INTERNAL_SESSIONS)
            .ok_or_else(|| {
                StrataError::ResourceExhausted(format!(
                    "session_max {} leaves no room for internal sessions",
                    self.session_max
                ))
            })
    }

    /// Cache size in bytes.
    pub fn cache_size_bytes(&self) -> u64 {
        self.cache_size_mb.saturating_mul(1024 * 1024)
    }

    /// Log directory. Derivable whether or not logging is enabled.
    pub fn log_dir(&self) -> PathBuf {
        self.home.join(&self.log.path)
    }

    /// Statistics server period, if enabled.
    pub fn statistics_interval(&self) -> Option<Duration> {
        secs(self.statistics_log.wait_secs)
    }

    /// Checkpoint server period, if enabled.
    pub fn checkpoint_interval(&self) -> Option<Duration> {
        secs(self.checkpoint.wait_secs)
    }

    /// Handle sweep period.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.file_manager.close_scan_interval_secs)
    }
}

fn secs(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_toml_parses_to_default() {
        let cfg = ConnectionConfig::from_toml_str(ConnectionConfig::default_toml()).unwrap();
        assert_eq!(cfg, ConnectionConfig::default());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let cfg = ConnectionConfig::from_toml_str("salvage = true\n[log]\nenabled = true\n").unwrap();
        assert!(cfg.salvage);
        assert!(cfg.log.enabled);
        assert_eq!(cfg.log.path, "log");
        assert_eq!(cfg.session_max, 100);
    }

    #[test]
    fn test_unknown_type_is_config_error() {
        let err = ConnectionConfig::from_toml_str("session_max = \"many\"").unwrap_err();
        assert_eq!(err.kind(), strata_core::ErrorKind::Configuration);
    }

    #[test]
    fn test_load_writes_default_file() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().join("db");
        let cfg = ConnectionConfig::load(&home).unwrap();
        assert!(home.join(CONFIG_FILE_NAME).exists());
        assert_eq!(cfg.home, home);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_write_and_reload() {
        let dir = TempDir::new().unwrap();
        let mut cfg = ConnectionConfig::new(dir.path());
        cfg.checkpoint.wait_secs = 30;
        cfg.shared_cache = Some("pool-a".to_string());
        let path = dir.path().join(CONFIG_FILE_NAME);
        cfg.write_to_file(&path).unwrap();
        let reloaded = ConnectionConfig::load(dir.path()).unwrap();
        assert_eq!(reloaded, cfg);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = ConnectionConfig::new("/tmp/strata");
        assert!(base.validate().is_ok());

        let mut cfg = base.clone();
        cfg.session_max = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.eviction.threads_min = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.eviction.threads_min = MAX_EVICTION_THREADS + 1;
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.hazard_max = MIN_HAZARD_MAX - 1;
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.home = PathBuf::new();
        assert!(cfg.validate().is_err());

        let mut cfg = base;
        cfg.shared_cache = Some(String::new());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_derived_values() {
        let mut cfg = ConnectionConfig::new("/tmp/strata");
        assert_eq!(cfg.session_size().unwrap(), 100 + EXTRA_INTERNAL_SESSIONS);
        assert_eq!(cfg.cache_size_bytes(), 100 * 1024 * 1024);
        assert_eq!(cfg.log_dir(), PathBuf::from("/tmp/strata/log"));
        assert!(cfg.statistics_interval().is_none());
        cfg.statistics_log.wait_secs = 5;
        assert_eq!(cfg.statistics_interval(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_intervals_are_bounded() {
        let base = ConnectionConfig::new("/tmp/strata");
        let mut cfg = base.clone();
        cfg.checkpoint.wait_secs = MAX_WAIT_SECS;
        cfg.statistics_log.wait_secs = MAX_WAIT_SECS;
        cfg.file_manager.close_scan_interval_secs = MAX_WAIT_SECS;
        cfg.validate().unwrap();

        let mut cfg = base.clone();
        cfg.checkpoint.wait_secs = u64::MAX;
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.kind(), strata_core::ErrorKind::Configuration);
        assert!(err.to_string().contains("checkpoint.wait_secs"));

        let mut cfg = base.clone();
        cfg.statistics_log.wait_secs = MAX_WAIT_SECS + 1;
        assert!(cfg.validate().is_err());

        let mut cfg = base;
        cfg.file_manager.close_scan_interval_secs = u64::MAX;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_session_size_overflow() {
        let mut cfg = ConnectionConfig::new("/tmp/strata");
        cfg.session_max = usize::MAX;
        let err = cfg.session_size().unwrap_err();
        assert_eq!(err.kind(), strata_core::ErrorKind::ResourceExhausted);
    }
}
