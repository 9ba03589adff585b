//! Work unit enumeration
//!
//! Pure functions of configuration: the same inputs always yield the same
//! ordered units, so checkpoint lookups stay meaningful across runs.

use crate::config::Partition;
use crate::domain::{Result, SieveError, WorkUnit};
use chrono::{Datelike, NaiveDate};
use std::path::{Path, PathBuf};

/// Split `[start, end)` into calendar-aligned date-range units, oldest first
///
/// The first and last units are clipped to the range, so a range starting
/// mid-month yields a short first unit.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use sieve::config::Partition;
/// use sieve::core::enumerate::date_range_units;
///
/// let start = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
/// let end = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
/// let units = date_range_units(start, end, Partition::Month);
///
/// assert_eq!(units.len(), 2);
/// assert_eq!(units[0].id.as_str(), "2024-01-15..2024-02-01");
/// assert_eq!(units[1].id.as_str(), "2024-02-01..2024-03-01");
/// ```
pub fn date_range_units(start: NaiveDate, end: NaiveDate, partition: Partition) -> Vec<WorkUnit> {
    let mut units = Vec::new();
    let mut from = start;

    while from < end {
        let to = match next_boundary(from, partition) {
            Some(boundary) if boundary < end => boundary,
            _ => end,
        };
        units.push(WorkUnit::date_range(from, to));
        from = to;
    }

    units
}

fn next_boundary(date: NaiveDate, partition: Partition) -> Option<NaiveDate> {
    match partition {
        Partition::Day => date.succ_opt(),
        Partition::Month => {
            let (year, month) = if date.month() == 12 {
                (date.year() + 1, 1)
            } else {
                (date.year(), date.month() + 1)
            };
            NaiveDate::from_ymd_opt(year, month, 1)
        }
        Partition::Year => NaiveDate::from_ymd_opt(date.year() + 1, 1, 1),
    }
}

/// List archive files under `root` whose names end with one of `extensions`
///
/// The walk is recursive and the result is sorted by relative path, which
/// also serves as the unit identifier.
///
/// # Errors
///
/// Returns [`SieveError::Configuration`] if `root` is not a readable directory.
pub fn list_archive_units(root: &Path, extensions: &[String]) -> Result<Vec<WorkUnit>> {
    if !root.is_dir() {
        return Err(SieveError::Configuration(format!(
            "Archive root is not a directory: {}",
            root.display()
        )));
    }

    let mut files = Vec::new();
    collect_files(root, &mut files)?;

    let mut units = Vec::new();
    for path in files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !extensions
            .iter()
            .any(|ext| name.ends_with(&ext.to_ascii_lowercase()))
        {
            continue;
        }

        let relative = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        units.push(WorkUnit::archive(&relative, path.clone()).map_err(SieveError::Validation)?);
    }

    units.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(units)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        SieveError::Configuration(format!("Failed to list {}: {}", dir.display(), e))
    })?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(&path, out)?;
        } else if file_type.is_file() {
            out.push(path);
        }
    }
    Ok(())
}
