//! JSON-lines conflict log
//!
//! Append-only file sink, one serialized `ConflictLogEntry` per line.
//! Retention is left to whoever rotates the file.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::backend::ConflictLogSink;
use crate::error::Result;
use crate::types::ConflictLogEntry;

pub struct JsonlConflictLog {
    path: PathBuf,
    // serializes appends from one process
    write_lock: Mutex<()>,
}

impl JsonlConflictLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry back, skipping lines that fail to parse
    pub fn read_all(&self) -> Result<Vec<ConflictLogEntry>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

impl ConflictLogSink for JsonlConflictLog {
    fn append(&self, entries: &[ConflictLogEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut buffer = String::new();
        for entry in entries {
            buffer.push_str(&serde_json::to_string(entry)?);
            buffer.push('\n');
        }

        let _guard = self.write_lock.lock();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(buffer.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}
