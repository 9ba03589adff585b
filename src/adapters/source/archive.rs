//! Archive directory source
//!
//! Every matching file under the configured root is one work unit. Units
//! are opened with the streaming archive reader; a chunk that takes longer
//! than the page timeout fails the unit.

use super::Source;
use crate::config::ArchiveSourceConfig;
use crate::core::enumerate::list_archive_units;
use crate::core::fetch::{stream_archive, with_chunk_timeout, FetchOptions, RecordStream};
use crate::domain::{Result, SieveError, UnitDescriptor, WorkUnit};
use async_trait::async_trait;
use std::path::PathBuf;

/// Directory of compressed archives
pub struct ArchiveSource {
    config: ArchiveSourceConfig,
}

impl ArchiveSource {
    /// Create the source
    pub fn new(config: ArchiveSourceConfig) -> Self {
        Self { config }
    }

    /// Root directory scanned for units
    pub fn root(&self) -> PathBuf {
        PathBuf::from(&self.config.root)
    }
}

#[async_trait]
impl Source for ArchiveSource {
    fn name(&self) -> &str {
        "archive"
    }

    async fn enumerate(&self) -> Result<Vec<WorkUnit>> {
        let units = list_archive_units(&self.root(), &self.config.extensions)?;
        tracing::info!(root = %self.config.root, units = units.len(), "Archive units listed");
        Ok(units)
    }

    fn open(&self, unit: &WorkUnit, options: &FetchOptions) -> Result<RecordStream> {
        let path = match &unit.descriptor {
            UnitDescriptor::ArchivePath(path) => path.clone(),
            _ => {
                return Err(SieveError::Validation(format!(
                    "Archive source cannot open unit {}",
                    unit.id
                )))
            }
        };

        let stream = stream_archive(unit.id.clone(), path, options.chunk_size);
        Ok(with_chunk_timeout(
            stream,
            options.page_timeout,
            format!("archive {}", unit.id),
        ))
    }
}
