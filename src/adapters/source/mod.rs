//! Source bindings
//!
//! A [`Source`] knows how to list its work units and how to open one as a
//! record stream. The engine never looks inside a unit descriptor itself.

pub mod archive;
pub mod http;

use crate::config::{SourceConfig, SourceKind};
use crate::core::fetch::{FetchOptions, RecordStream};
use crate::domain::{Result, SieveError, WorkUnit};
use async_trait::async_trait;
use std::sync::Arc;

pub use archive::ArchiveSource;
pub use http::{HttpPageClient, HttpSource};

/// A bulk source split into independently fetchable work units
#[async_trait]
pub trait Source: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// List every unit in a stable order
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be listed at all.
    async fn enumerate(&self) -> Result<Vec<WorkUnit>>;

    /// Open one unit as a lazy record stream
    ///
    /// # Errors
    ///
    /// Returns an error if the unit's descriptor does not belong to this
    /// source.
    fn open(&self, unit: &WorkUnit, options: &FetchOptions) -> Result<RecordStream>;
}

/// Build the configured source
///
/// # Errors
///
/// Returns an error if the section for the selected kind is missing or the
/// HTTP client cannot be built.
pub fn create_source(config: &SourceConfig) -> Result<Arc<dyn Source>> {
    match config.kind {
        SourceKind::Http => {
            let http = config.http.as_ref().ok_or_else(|| {
                SieveError::Configuration(
                    "source.kind is http but [source.http] is missing".to_string(),
                )
            })?;
            Ok(Arc::new(HttpSource::new(http.clone())?))
        }
        SourceKind::Archive => {
            let archive = config.archive.as_ref().ok_or_else(|| {
                SieveError::Configuration(
                    "source.kind is archive but [source.archive] is missing".to_string(),
                )
            })?;
            Ok(Arc::new(ArchiveSource::new(archive.clone())))
        }
    }
}
