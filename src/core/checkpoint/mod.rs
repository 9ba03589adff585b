//! Checkpoint management
//!
//! Whole-unit completion tracking. Partial progress inside a unit is never
//! trusted: a unit is either `complete` and skipped, or processed from the
//! start.

pub mod entry;
pub mod store;

pub use entry::{CheckpointEntry, UnitCounters, UnitStatus};
pub use store::CheckpointStore;
