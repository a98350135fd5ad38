//! File handles owned by the connection
//!
//! The lock file, the operation-tracking file, hot-backup state, and any file
//! opened through the connection. All of these are released by shutdown.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use strata_core::{StrataError, StrataResult};
use tracing::{debug, warn};

use crate::shared::ConnectionShared;

/// Lock file name in the database home.
pub const LOCK_FILE_NAME: &str = "strata.lock";

/// Take the exclusive lock on `<home>/strata.lock`.
///
/// Holding the returned file keeps the database unavailable to other
/// connections, in this process or any other.
pub fn acquire_lock_file(home: &Path) -> StrataResult<File> {
    std::fs::create_dir_all(home)?;
    let path = home.join(LOCK_FILE_NAME);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&path)?;
    fs2::FileExt::try_lock_exclusive(&file).map_err(|_| {
        StrataError::Busy(format!(
            "database at '{}' is already in use",
            home.display()
        ))
    })?;
    debug!(target: "strata::conn", path = %path.display(), "Acquired lock file");
    Ok(file)
}

/// Release the lock taken by [`acquire_lock_file`] and close the file.
pub fn release_lock_file(file: File) -> StrataResult<()> {
    fs2::FileExt::unlock(&file)?;
    Ok(())
}

/// Identifier of a file opened through the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(u64);

struct OpenFile {
    name: String,
    _file: File,
}

/// Files opened through the connection and not yet closed.
#[derive(Default)]
pub struct FileRegistry {
    next_id: u64,
    open: BTreeMap<FileId, OpenFile>,
}

impl FileRegistry {
    /// Open (creating if needed) `name` under the home directory.
    ///
    /// # Errors
    ///
    /// Returns `Closing` once shutdown has stopped new opens.
    pub fn open(&mut self, shared: &ConnectionShared, name: &str) -> StrataResult<FileId> {
        shared.check_open_allowed(name)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(shared.home().join(name))?;
        self.next_id += 1;
        let id = FileId(self.next_id);
        self.open.insert(
            id,
            OpenFile {
                name: name.to_string(),
                _file: file,
            },
        );
        Ok(id)
    }

    /// Close a file. Returns false if `id` was not open.
    pub fn close(&mut self, id: FileId) -> bool {
        self.open.remove(&id).is_some()
    }

    /// Files still open.
    pub fn len(&self) -> usize {
        self.open.len()
    }

    /// True when nothing is open.
    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// Close everything still open, warning about each. Returns the count.
    pub fn close_all(&mut self) -> usize {
        let leftovers = std::mem::take(&mut self.open);
        for file in leftovers.values() {
            warn!(target: "strata::conn", file = %file.name, "Closing file handle left open at shutdown");
        }
        leftovers.len()
    }
}

#[derive(Serialize)]
struct TrackRecord<'a> {
    ts: String,
    op: &'a str,
}

/// Operation tracking output, one JSON record per line.
pub struct OpTracker {
    path: PathBuf,
    out: BufWriter<File>,
    recorded: u64,
}

impl OpTracker {
    /// Open `<home>/optrack-<pid>.log` for appending.
    pub fn open(home: &Path) -> StrataResult<Self> {
        let path = home.join(format!("optrack-{}.log", std::process::id()));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(target: "strata::conn", path = %path.display(), "Operation tracking enabled");
        Ok(Self {
            path,
            out: BufWriter::new(file),
            recorded: 0,
        })
    }

    /// Path of the tracking file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Operations recorded so far.
    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    /// Append one operation record.
    pub fn record(&mut self, op: &str) -> StrataResult<()> {
        let record = TrackRecord {
            ts: chrono::Utc::now().to_rfc3339(),
            op,
        };
        serde_json::to_writer(&mut self.out, &record)?;
        self.out.write_all(b"\n")?;
        self.recorded += 1;
        Ok(())
    }

    /// Flush and close the file.
    pub fn close(mut self) -> StrataResult<()> {
        self.out.flush()?;
        debug!(target: "strata::conn", recorded = self.recorded, "Operation tracking closed");
        Ok(())
    }
}

/// State of an in-progress hot backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupState {
    id: uuid::Uuid,
    files: Vec<String>,
}

impl BackupState {
    /// Start a backup of `files`.
    pub fn new(files: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            files,
        }
    }

    /// Backup id.
    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    /// Files pinned by the backup.
    pub fn files(&self) -> &[String] {
        &self.files
    }
}
