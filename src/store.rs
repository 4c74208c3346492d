//! Incrementally persisted analysis results (`responses.json`).

use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::models::AnalysisRecord;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid results file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Results accumulated during a run, rewritten to disk after every append.
#[derive(Debug)]
pub struct ResultStore {
    path: PathBuf,
    records: Vec<AnalysisRecord>,
    /// Records in memory that the file does not have yet.
    unsaved: bool,
}

impl ResultStore {
    /// Start a fresh results file, replacing any previous one.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            path: path.into(),
            records: Vec::new(),
            unsaved: false,
        };
        store.persist()?;
        Ok(store)
    }

    /// Open an existing results file.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let contents = std::fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let records: Vec<AnalysisRecord> =
            serde_json::from_str(&contents).map_err(|source| StoreError::Json {
                path: path.clone(),
                source,
            })?;
        debug!("Loaded {} records from {}", records.len(), path.display());
        Ok(Self {
            path,
            records,
            unsaved: false,
        })
    }

    /// Add a record and write the whole file.
    ///
    /// The record is kept in memory even if writing fails, so a later append
    /// can still persist it.
    pub fn append(&mut self, record: AnalysisRecord) -> Result<(), StoreError> {
        self.records.push(record);
        let result = self.persist();
        self.unsaved = result.is_err();
        result
    }

    /// Write the file again if an earlier append failed to.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        if self.unsaved {
            self.persist()?;
            self.unsaved = false;
        }
        Ok(())
    }

    /// Whether the file holds every record in memory.
    pub fn is_saved(&self) -> bool {
        !self.unsaved
    }

    pub fn records(&self) -> &[AnalysisRecord] {
        &self.records
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write to a temporary file next to the target, then rename over it.
    fn persist(&self) -> Result<(), StoreError> {
        let io_err = |source: std::io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(io_err)?;

        let json = serde_json::to_string_pretty(&self.records).map_err(|source| {
            StoreError::Json {
                path: self.path.clone(),
                source,
            }
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(json.as_bytes()).map_err(io_err)?;
        tmp.write_all(b"\n").map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        debug!("Saved {} records to {}", self.records.len(), self.path.display());
        Ok(())
    }
}
