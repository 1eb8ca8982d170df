use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identifier assigned to stored documents and addressable sub-entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a client supplied identifier.
    pub fn parse(raw: &str) -> Result<Self, InvalidIdentifier> {
        Uuid::parse_str(raw.trim())
            .map(Self)
            .map_err(|_| InvalidIdentifier(raw.to_string()))
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for DocumentId {
    type Err = InvalidIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Raised when a value passed as an identifier is not a well-formed id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("'{0}' is not a valid identifier")]
pub struct InvalidIdentifier(pub String);
