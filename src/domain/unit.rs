//! Work units
//!
//! A work unit pairs its stable identifier with a descriptor telling the
//! source binding how to open it. Units are enumerated fresh on each run and
//! never mutated; completion lives only in the checkpoint store.

use super::ids::WorkUnitId;
use chrono::NaiveDate;
use std::path::PathBuf;

/// What a work unit refers to in the underlying source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitDescriptor {
    /// Half-open calendar range `[from, to)`
    DateRange { from: NaiveDate, to: NaiveDate },
    /// A compressed container on disk
    ArchivePath(PathBuf),
    /// A named partition with no further structure
    Partition(String),
}

/// An independently fetchable, checkpointable slice of the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    /// Stable identifier, used as the checkpoint key
    pub id: WorkUnitId,
    /// How to open the unit
    pub descriptor: UnitDescriptor,
}

impl WorkUnit {
    /// Create a unit covering the date range `[from, to)`
    ///
    /// The identifier is `YYYY-MM-DD..YYYY-MM-DD`.
    pub fn date_range(from: NaiveDate, to: NaiveDate) -> Self {
        let id = WorkUnitId::from_formatted(format!(
            "{}..{}",
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        ));
        Self {
            id,
            descriptor: UnitDescriptor::DateRange { from, to },
        }
    }

    /// Create a unit for an archive identified by its path relative to the source root
    pub fn archive(relative: &str, absolute: PathBuf) -> Result<Self, String> {
        Ok(Self {
            id: WorkUnitId::new(relative)?,
            descriptor: UnitDescriptor::ArchivePath(absolute),
        })
    }

    /// Create a unit for a named partition
    pub fn partition(name: &str) -> Result<Self, String> {
        Ok(Self {
            id: WorkUnitId::new(name)?,
            descriptor: UnitDescriptor::Partition(name.to_string()),
        })
    }
}
