//! User identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum user identifier length.
pub const MAX_USER_ID_LENGTH: usize = 256;

/// Identity of the user that owns records and connections.
///
/// Identifiers are opaque strings (in practice the textual form of the
/// store's primary key). Parsing only enforces that the value is usable as
/// a routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Parse and validate a user identifier.
    ///
    /// # Errors
    ///
    /// Returns an error message if the identifier is empty, too long, or
    /// contains whitespace or control characters.
    pub fn parse(value: impl Into<String>) -> Result<Self, &'static str> {
        let value = value.into();
        if value.is_empty() {
            return Err("user id cannot be empty");
        }
        if value.len() > MAX_USER_ID_LENGTH {
            return Err("user id too long");
        }
        if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err("user id contains invalid characters");
        }
        Ok(Self(value))
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for UserId {
    type Error = &'static str;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> String {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let id = UserId::parse("5b0c7c1e-2f7e-4c4b-9a57-0a9d3c1f2e11").unwrap();
        assert_eq!(id.as_str(), "5b0c7c1e-2f7e-4c4b-9a57-0a9d3c1f2e11");
        assert_eq!("u1".parse::<UserId>().unwrap().to_string(), "u1");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(UserId::parse("").is_err());
        assert!(UserId::parse("has space").is_err());
        assert!(UserId::parse("tab\there").is_err());
        assert!(UserId::parse("a".repeat(MAX_USER_ID_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_serde_validates() {
        let id: UserId = serde_json::from_str("\"u1\"").unwrap();
        assert_eq!(id.as_str(), "u1");
        assert!(serde_json::from_str::<UserId>("\"\"").is_err());
    }
}
