//! Domain identifier types with validation
//!
//! Newtype wrappers for work unit identifiers and natural keys, so the two
//! can never be mixed up.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Work unit identifier newtype wrapper
///
/// A stable, opaque identifier for an independently fetchable slice of the
/// source: a date range, an archive path, a partition name.
///
/// # Examples
///
/// ```
/// use sieve::domain::ids::WorkUnitId;
/// use std::str::FromStr;
///
/// let unit = WorkUnitId::from_str("2024-01-01..2024-02-01").unwrap();
/// assert_eq!(unit.as_str(), "2024-01-01..2024-02-01");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkUnitId(String);

impl WorkUnitId {
    /// Creates a new WorkUnitId, rejecting blank identifiers
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err("Work unit ID cannot be empty".to_string());
        }
        Ok(Self(id))
    }

    /// Wraps an identifier the caller formatted itself and knows is non-blank
    pub(crate) fn from_formatted(id: String) -> Self {
        debug_assert!(!id.trim().is_empty());
        Self(id)
    }

    /// Returns the work unit ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes self and returns the inner String
    pub fn into_inner(self) -> String {
        self.0
    }

    /// File-system safe rendering used for per-unit checkpoint files
    ///
    /// Unsafe characters are replaced and a short hash suffix keeps distinct
    /// identifiers distinct after replacement.
    pub fn file_stem(&self) -> String {
        use sha2::{Digest, Sha256};

        let sanitized: String = self
            .0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .take(80)
            .collect();
        let digest = Sha256::digest(self.0.as_bytes());
        let suffix: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();
        format!("{sanitized}-{suffix}")
    }
}

impl fmt::Display for WorkUnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WorkUnitId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for WorkUnitId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Natural key newtype wrapper
///
/// Identifies a logical entity across repeated or overlapping fetches.
/// Multi-field keys are joined with `|`; derived keys are prefixed `sha256:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NaturalKey(String);

impl NaturalKey {
    /// Creates a new NaturalKey, rejecting blank keys
    pub fn new(key: impl Into<String>) -> Result<Self, String> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err("Natural key cannot be empty".to_string());
        }
        Ok(Self(key))
    }

    /// Builds a key from one or more field values
    pub fn from_parts<I, S>(parts: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = parts
            .into_iter()
            .map(|p| p.as_ref().trim().to_string())
            .collect::<Vec<_>>()
            .join("|");
        Self::new(joined)
    }

    /// Returns the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key was derived from a content hash
    pub fn is_derived(&self) -> bool {
        self.0.starts_with("sha256:")
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NaturalKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_unit_id_valid() {
        let id = WorkUnitId::new("archives/part-0001.tar.gz").unwrap();
        assert_eq!(id.as_str(), "archives/part-0001.tar.gz");
        assert_eq!(id.to_string(), "archives/part-0001.tar.gz");
    }

    #[test]
    fn test_work_unit_id_empty() {
        assert!(WorkUnitId::new("").is_err());
        assert!(WorkUnitId::new("   ").is_err());
    }

    #[test]
    fn test_file_stem_is_safe_and_distinct() {
        let a = WorkUnitId::new("a/b").unwrap();
        let b = WorkUnitId::new("a_b").unwrap();

        assert!(!a.file_stem().contains('/'));
        assert!(a.file_stem().starts_with("a_b-"));
        assert_ne!(a.file_stem(), b.file_stem());
        assert_eq!(a.file_stem(), WorkUnitId::new("a/b").unwrap().file_stem());
    }

    #[test]
    fn test_natural_key_from_parts() {
        let key = NaturalKey::from_parts(["W123", " doi:10.1/x "]).unwrap();
        assert_eq!(key.as_str(), "W123|doi:10.1/x");
        assert!(!key.is_derived());
    }

    #[test]
    fn test_natural_key_empty() {
        assert!(NaturalKey::new("").is_err());
        assert!(NaturalKey::from_parts(Vec::<String>::new()).is_err());
    }
}
