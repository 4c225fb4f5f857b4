//! Shared error definitions for entity validation.

use thiserror::Error;

/// Result alias used throughout the entity model.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while constructing or validating entities.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// An identifier was empty.
    #[error("invalid {kind} id: identifier must not be empty")]
    InvalidId {
        /// Entity kind the identifier belongs to.
        kind: &'static str,
    },

    /// A field failed validation.
    #[error("invalid {field}: {reason}")]
    Validation {
        /// Name of the offending field.
        field: &'static str,
        /// Human-readable reason for rejection.
        reason: String,
    },
}

impl Error {
    /// Convenience constructor for field validation failures.
    #[must_use]
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}

pub(crate) fn require_non_empty(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(field, "must not be empty"));
    }
    Ok(())
}
