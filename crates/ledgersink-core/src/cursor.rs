//! Resumption cursor, the opaque token handed out by the upstream stream.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque resumption token.
///
/// The sink never interprets the contents: it stores the token handed over
/// with a batch and gives it back to the stream on restart so delivery
/// resumes right after the last durably committed batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for a blank token, which some drivers send before the
    /// first block of a fresh stream.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Cursor {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Cursor {
    fn from(s: String) -> Self {
        Self(s)
    }
}
