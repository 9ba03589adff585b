//! Domain models and types for Sieve.
//!
//! # Overview
//!
//! The domain layer provides:
//! - **Strongly-typed identifiers** ([`WorkUnitId`], [`NaturalKey`])
//! - **Work units and records** ([`WorkUnit`], [`RawRecord`], [`AcceptedRecord`])
//! - **Error types** ([`SieveError`], [`SourceError`], [`DestinationError`])
//! - **Result type alias** ([`Result`])
//!
//! # Error Handling
//!
//! All fallible operations return [`Result<T, SieveError>`]. Each error knows
//! its [`ErrorSeverity`], which decides whether it loses a record, fails a
//! unit, or aborts the run:
//!
//! ```rust
//! use sieve::domain::{ErrorSeverity, SieveError, SourceError};
//!
//! let err: SieveError = SourceError::Unreachable("dns".to_string()).into();
//! assert_eq!(err.severity(), ErrorSeverity::FatalUnit);
//! ```

pub mod errors;
pub mod ids;
pub mod record;
pub mod result;
pub mod unit;

pub use errors::{DestinationError, ErrorSeverity, SieveError, SourceError};
pub use ids::{NaturalKey, WorkUnitId};
pub use record::{AcceptedRecord, Annotations, RawRecord, Revision};
pub use result::Result;
pub use unit::{UnitDescriptor, WorkUnit};
