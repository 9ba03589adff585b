//! File-per-unit checkpoint storage
//!
//! Layout under the checkpoint directory:
//!
//! ```text
//! <dir>/<unit file stem>.json      one CheckpointEntry per unit
//! <dir>/runs/<timestamp>-<id>.json one RunSummary per finished run
//! ```
//!
//! Writes go to a temporary sibling, are fsynced, then renamed over the
//! target, so a crash leaves either the old or the new entry.

use super::CheckpointStorage;
use crate::core::checkpoint::CheckpointEntry;
use crate::core::controller::RunSummary;
use crate::domain::{Result, SieveError, WorkUnitId};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const RUNS_DIR: &str = "runs";

/// Checkpoint storage backed by a directory of JSON files
pub struct FileCheckpointStorage {
    dir: PathBuf,
}

impl FileCheckpointStorage {
    /// Open (and create if needed) a checkpoint directory
    ///
    /// # Errors
    ///
    /// Returns [`SieveError::Checkpoint`] if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(dir.join(RUNS_DIR)).await.map_err(|e| {
            SieveError::Checkpoint(format!(
                "Failed to create checkpoint directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self { dir })
    }

    /// Checkpoint directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, unit_id: &WorkUnitId) -> PathBuf {
        self.dir.join(format!("{}.json", unit_id.file_stem()))
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        let io_err = |e: std::io::Error| {
            SieveError::Checkpoint(format!("Failed to write {}: {}", path.display(), e))
        };

        let mut file = fs::File::create(&tmp).await.map_err(io_err)?;
        file.write_all(bytes).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);

        fs::rename(&tmp, path).await.map_err(io_err)?;

        // Persist the rename itself where the platform allows opening directories
        if let Some(parent) = path.parent() {
            if let Ok(dir) = fs::File::open(parent).await {
                let _ = dir.sync_all().await;
            }
        }
        Ok(())
    }

    async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        match fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                SieveError::Checkpoint(format!("Corrupt checkpoint file {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SieveError::Checkpoint(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let mut entries = fs::read_dir(dir).await.map_err(|e| {
            SieveError::Checkpoint(format!("Failed to list {}: {}", dir.display(), e))
        })?;

        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            SieveError::Checkpoint(format!("Failed to list {}: {}", dir.display(), e))
        })? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") && path.is_file() {
                paths.push(path);
            }
        }

        paths.sort();
        Ok(paths)
    }
}

#[async_trait]
impl CheckpointStorage for FileCheckpointStorage {
    async fn load(&self, unit_id: &WorkUnitId) -> Result<Option<CheckpointEntry>> {
        let entry: Option<CheckpointEntry> = Self::read_json(&self.entry_path(unit_id)).await?;
        Ok(entry.filter(|e| &e.unit_id == unit_id))
    }

    async fn save(&self, entry: &CheckpointEntry) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(entry)?;
        self.write_atomic(&self.entry_path(&entry.unit_id), &bytes)
            .await
    }

    async fn load_all(&self) -> Result<Vec<CheckpointEntry>> {
        let mut all = Vec::new();
        for path in Self::json_files(&self.dir).await? {
            if let Some(entry) = Self::read_json::<CheckpointEntry>(&path).await? {
                all.push(entry);
            }
        }
        all.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));
        Ok(all)
    }

    async fn clear(&self) -> Result<usize> {
        let paths = Self::json_files(&self.dir).await?;
        let removed = paths.len();
        for path in paths {
            fs::remove_file(&path).await.map_err(|e| {
                SieveError::Checkpoint(format!("Failed to remove {}: {}", path.display(), e))
            })?;
        }
        Ok(removed)
    }

    async fn save_run(&self, summary: &RunSummary) -> Result<()> {
        let name = format!(
            "{}-{}.json",
            summary.started_at.format("%Y%m%dT%H%M%S"),
            summary.run_id
        );
        let bytes = serde_json::to_vec_pretty(summary)?;
        self.write_atomic(&self.dir.join(RUNS_DIR).join(name), &bytes)
            .await
    }

    async fn load_runs(&self) -> Result<Vec<RunSummary>> {
        let mut runs = Vec::new();
        for path in Self::json_files(&self.dir.join(RUNS_DIR)).await? {
            if let Some(run) = Self::read_json::<RunSummary>(&path).await? {
                runs.push(run);
            }
        }
        runs.sort_by_key(|r| r.started_at);
        Ok(runs)
    }
}
