use anyhow::{Context, Result};
use log::info;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::model::Batch;

/// Destination for flushed batches. A failed write ends the run.
pub trait Persistence {
    fn write(&mut self, name: &str, batch: &Batch) -> Result<PathBuf>;
}

/// Writes each batch as pretty-printed JSON into a data directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        JsonFileStore {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn read(&self, name: &str) -> Result<Batch> {
        let path = self.path_for(name);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read batch file: {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse batch JSON from {}", path.display()))
    }
}

impl Persistence for JsonFileStore {
    fn write(&mut self, name: &str, batch: &Batch) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create data directory: {}", self.dir.display()))?;

        let path = self.path_for(name);
        let json = serde_json::to_string_pretty(batch).context("Failed to serialize batch")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write JSON file: {}", path.display()))?;

        info!(
            "Saved batch '{}' ({} submissions, {} comments) to {}",
            batch.bucket_key,
            batch.submission_count,
            batch.comment_count,
            path.display()
        );
        Ok(path)
    }
}

/// Keeps batches in memory, keyed by name, for tests and embedding callers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub batches: BTreeMap<String, Batch>,
    /// Names in write order, duplicates included.
    pub writes: Vec<String>,
}

impl Persistence for MemoryStore {
    fn write(&mut self, name: &str, batch: &Batch) -> Result<PathBuf> {
        self.writes.push(name.to_string());
        self.batches.insert(name.to_string(), batch.clone());
        Ok(PathBuf::from(name))
    }
}
