//! Result type alias for Sieve

use super::errors::SieveError;

/// Result type alias for Sieve operations
///
/// # Examples
///
/// ```
/// use sieve::domain::result::Result;
/// use sieve::domain::errors::SieveError;
///
/// fn failing_function() -> Result<()> {
///     Err(SieveError::Validation("Invalid input".to_string()))
/// }
/// assert!(failing_function().is_err());
/// ```
pub type Result<T> = std::result::Result<T, SieveError>;
