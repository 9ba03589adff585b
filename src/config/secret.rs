//! Secure credential handling using the secrecy crate
//!
//! API tokens and database connection strings are held in [`SecretString`],
//! which zeroes memory on drop and redacts itself in `Debug` output. Call
//! `expose_secret()` only at the point of use.
//!
//! # Example
//!
//! ```rust
//! use sieve::config::secret_string;
//! use secrecy::ExposeSecret;
//!
//! let token = secret_string("api-token".to_string());
//! assert_eq!(token.expose_secret().as_ref(), "api-token");
//! assert!(!format!("{token:?}").contains("api-token"));
//! ```

use secrecy::{CloneableSecret, DebugSecret, Secret, SerializableSecret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

/// Newtype wrapper for String that implements the required traits for Secret
#[derive(Clone, Debug, Zeroize)]
#[zeroize(drop)]
pub struct SecretValue(String);

impl CloneableSecret for SecretValue {}
impl DebugSecret for SecretValue {}
impl SerializableSecret for SecretValue {}

impl From<String> for SecretValue {
    fn from(s: String) -> Self {
        SecretValue(s)
    }
}

impl PartialEq<str> for SecretValue {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl AsRef<str> for SecretValue {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl SecretValue {
    /// Check if the secret value is empty
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Check if the secret value starts with a prefix
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }

    /// Parse the secret value into another type
    pub fn parse<F: std::str::FromStr>(&self) -> Result<F, F::Err> {
        self.0.parse()
    }
}

impl Serialize for SecretValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SecretValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(SecretValue)
    }
}

/// Secret string: zeroed on drop, redacted in Debug, explicit access only
pub type SecretString = Secret<SecretValue>;

/// Wrap a String as a [`SecretString`]
#[inline]
pub fn secret_string(value: String) -> SecretString {
    Secret::new(SecretValue::from(value))
}

/// Wrap an optional String as an optional [`SecretString`]
#[inline]
pub fn secret_string_opt(value: Option<String>) -> Option<SecretString> {
    value.map(secret_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_secret_string_creation() {
        let secret = secret_string("postgres://u:p@db/warehouse".to_string());
        assert_eq!(secret.expose_secret(), "postgres://u:p@db/warehouse");
        assert!(secret.expose_secret().starts_with("postgres://"));
    }

    #[test]
    fn test_secret_string_opt() {
        assert!(secret_string_opt(Some("token".to_string())).is_some());
        assert!(secret_string_opt(None).is_none());
    }

    #[test]
    fn test_blank_secret_is_empty() {
        assert!(secret_string("  ".to_string()).expose_secret().is_empty());
    }

    #[test]
    fn test_secret_debug_redacted() {
        let secret = secret_string("sensitive-token".to_string());
        let debug_output = format!("{secret:?}");
        assert!(!debug_output.contains("sensitive-token"));
    }

    #[test]
    fn test_secret_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct Section {
            api_token: SecretString,
        }

        let section: Section = toml::from_str("api_token = \"abc123\"").unwrap();
        assert_eq!(section.api_token.expose_secret(), "abc123");
    }
}
