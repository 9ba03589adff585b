//! Checkpoint storage backends
//!
//! The [`CheckpointStorage`] trait is the persistence seam behind
//! [`crate::core::checkpoint::CheckpointStore`]. Implementations must make
//! every `save` durable before returning.

pub mod file;
pub mod memory;

use crate::core::checkpoint::CheckpointEntry;
use crate::core::controller::RunSummary;
use crate::domain::{Result, WorkUnitId};
use async_trait::async_trait;

pub use file::FileCheckpointStorage;
pub use memory::MemoryCheckpointStorage;

/// Durable storage for checkpoint entries and run history
#[async_trait]
pub trait CheckpointStorage: Send + Sync {
    /// Point lookup by unit identifier
    ///
    /// # Errors
    ///
    /// Returns [`crate::domain::SieveError::Checkpoint`] if the entry exists
    /// but cannot be read.
    async fn load(&self, unit_id: &WorkUnitId) -> Result<Option<CheckpointEntry>>;

    /// Persist an entry, replacing any previous version atomically
    ///
    /// # Errors
    ///
    /// Returns [`crate::domain::SieveError::Checkpoint`] if the write cannot
    /// be made durable.
    async fn save(&self, entry: &CheckpointEntry) -> Result<()>;

    /// Full scan of all entries
    async fn load_all(&self) -> Result<Vec<CheckpointEntry>>;

    /// Remove every entry, returning how many were removed
    async fn clear(&self) -> Result<usize>;

    /// Persist a finalized run summary for audit
    async fn save_run(&self, summary: &RunSummary) -> Result<()>;

    /// All persisted run summaries, oldest first
    async fn load_runs(&self) -> Result<Vec<RunSummary>>;
}
