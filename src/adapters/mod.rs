//! External system integrations
//!
//! - [`source`] - HTTP paginated APIs and compressed archive trees
//! - [`destination`] - PostgreSQL and in-memory record stores
//! - [`checkpoint`] - File-backed and in-memory checkpoint storage
//!
//! Each integration sits behind a trait so the engine can be exercised
//! against in-memory implementations.
//!
//! ```rust,no_run
//! use sieve::adapters::destination::{Destination, MemoryDestination};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let destination: Arc<dyn Destination> = Arc::new(MemoryDestination::new());
//! destination.prepare().await?;
//! assert_eq!(destination.count().await?, 0);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod destination;
pub mod source;
