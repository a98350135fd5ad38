//! Write-ahead log manager that records checkpoint markers as JSON lines.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strata_core::{StrataError, StrataResult};
use tracing::{debug, info};
use uuid::Uuid;

use crate::connection::ConnectionConfig;
use crate::session::Session;
use crate::subsystem::LogManager;

/// Log file name inside the log directory.
pub const LOG_FILE_NAME: &str = "strata.log";

/// One record in the log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogRecord {
    /// A checkpoint completed.
    Checkpoint {
        /// Written by a clean shutdown
        shutdown: bool,
        /// Wall-clock time, RFC 3339
        ts: String,
        /// Connection that wrote the record
        connection: Uuid,
    },
}

/// Read every record in the log under `dir`. A missing log reads as empty.
pub fn read_log(dir: &Path) -> StrataResult<Vec<LogRecord>> {
    let path = dir.join(LOG_FILE_NAME);
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| {
            StrataError::corruption(format!("{}: {}", path.display(), e))
        })?;
        records.push(record);
    }
    Ok(records)
}

/// The built-in [`LogManager`].
#[derive(Debug, Default)]
pub struct FileLogManager {
    dir: Option<PathBuf>,
    enabled: bool,
    out: Option<BufWriter<File>>,
}

impl FileLogManager {
    /// A log manager that has not been created.
    pub fn new() -> Self {
        Self::default()
    }

    /// True once [`open`](LogManager::open) has made the log writable.
    pub fn is_open(&self) -> bool {
        self.out.is_some()
    }
}

impl LogManager for FileLogManager {
    fn create(&mut self, _session: &Session, config: &ConnectionConfig) -> StrataResult<()> {
        let dir = config.log_dir();
        self.enabled = config.log.enabled;
        if self.enabled {
            std::fs::create_dir_all(&dir)?;
        }
        debug!(target: "strata::conn", dir = %dir.display(), enabled = self.enabled, "Log manager created");
        self.dir = Some(dir);
        Ok(())
    }

    fn open(&mut self, _session: &Session) -> StrataResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let dir = self
            .dir
            .as_ref()
            .ok_or_else(|| StrataError::subsystem("log", "opened before it was created"))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(LOG_FILE_NAME))?;
        self.out = Some(BufWriter::new(file));
        info!(target: "strata::conn", dir = %dir.display(), "Logging started");
        Ok(())
    }

    fn write_checkpoint_marker(&mut self, session: &Session, is_shutdown: bool) -> StrataResult<()> {
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| StrataError::subsystem("log", "checkpoint marker written to a closed log"))?;
        let record = LogRecord::Checkpoint {
            shutdown: is_shutdown,
            ts: chrono::Utc::now().to_rfc3339(),
            connection: session.connection().id(),
        };
        serde_json::to_writer(&mut *out, &record)?;
        out.write_all(b"\n")?;
        out.flush()?;
        out.get_ref().sync_data()?;
        Ok(())
    }

    fn destroy(&mut self, _session: &Session) -> StrataResult<()> {
        let result = match self.out.take() {
            Some(mut out) => out.flush().map_err(StrataError::from),
            None => Ok(()),
        };
        self.dir = None;
        result
    }
}
