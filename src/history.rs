//! Persistent log of finished practice sessions.
//!
//! The JSON store rewrites the whole file on every change. A missing or
//! unreadable file is treated as an empty history so a damaged file never
//! blocks practice; it is simply replaced on the next save.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Format of [`TestRecord::timestamp`]
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Summary of one practice session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestRecord {
    pub timestamp: String,
    /// Instantaneous rate at the end of the session, keystrokes per minute
    pub speed: f64,
    /// Seconds
    pub duration: f64,
    pub typed_chars: u64,
    pub total_keystrokes: u64,
    pub wpm_estimated: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("failed to write history file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize history: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub trait HistoryStore {
    fn save(&mut self, record: TestRecord) -> Result<(), HistoryError>;
    /// Up to `n` records, newest first
    fn recent(&self, n: usize) -> Vec<TestRecord>;
    fn clear(&mut self) -> Result<(), HistoryError>;
    fn count(&self) -> usize;
}

#[derive(Debug)]
pub struct JsonHistoryStore {
    path: PathBuf,
    records: Vec<TestRecord>,
}

impl JsonHistoryStore {
    /// Open the store at `path`, loading whatever history is already there.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let records = load_records(&path);
        Self { path, records }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), HistoryError> {
        let io_err = |source: io::Error| HistoryError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let data = serde_json::to_vec_pretty(&self.records)?;
        fs::write(&self.path, data).map_err(io_err)
    }
}

fn load_records(path: &Path) -> Vec<TestRecord> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no history file yet");
            return Vec::new();
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read history");
            return Vec::new();
        }
    };

    match serde_json::from_slice::<Vec<TestRecord>>(&bytes) {
        Ok(records) => {
            tracing::info!(count = records.len(), "loaded history");
            records
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "history file is corrupted, starting empty");
            Vec::new()
        }
    }
}

impl HistoryStore for JsonHistoryStore {
    fn save(&mut self, record: TestRecord) -> Result<(), HistoryError> {
        self.records.push(record);
        self.persist()
    }

    fn recent(&self, n: usize) -> Vec<TestRecord> {
        self.records.iter().rev().take(n).cloned().collect()
    }

    fn clear(&mut self) -> Result<(), HistoryError> {
        self.records.clear();
        self.persist()
    }

    fn count(&self) -> usize {
        self.records.len()
    }
}
