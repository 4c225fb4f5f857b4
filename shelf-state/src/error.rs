//! Errors surfaced by library intents.

use shelf_gateway::GatewayError;
use shelf_primitives::EntityKind;
use thiserror::Error;

use crate::dispatch::DispatchError;

/// Result alias for library operations.
pub type LibraryResult<T> = Result<T, LibraryError>;

/// Failure reported by an intent or a settled mutation.
///
/// Gateway construction errors never reach the library, so the taxonomy is
/// the four kinds a presentation layer reacts to.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LibraryError {
    /// Input was rejected before or by the backend.
    #[error("validation failed: {reason}")]
    Validation {
        /// Human-readable reason.
        reason: String,
    },
    /// No signed-in user, or the user may not touch the entity.
    #[error("not authorized: {reason}")]
    Auth {
        /// Human-readable reason.
        reason: String,
    },
    /// Referenced entity does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Kind of the missing entity.
        kind: EntityKind,
        /// Identifier that could not be resolved.
        id: String,
    },
    /// Backend was unreachable or misbehaved.
    #[error("transport failure: {reason}")]
    Transport {
        /// Human-readable reason.
        reason: String,
    },
}

impl LibraryError {
    /// Builds a [`LibraryError::Validation`].
    #[must_use]
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Builds a [`LibraryError::Auth`].
    #[must_use]
    pub fn auth(reason: impl Into<String>) -> Self {
        Self::Auth {
            reason: reason.into(),
        }
    }

    /// Builds a [`LibraryError::NotFound`].
    #[must_use]
    pub fn not_found(kind: EntityKind, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Builds a [`LibraryError::Transport`].
    #[must_use]
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    pub(crate) fn unauthenticated() -> Self {
        Self::auth("sign in required")
    }
}

impl From<GatewayError> for LibraryError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Validation { reason } => Self::Validation { reason },
            GatewayError::Auth { reason } => Self::Auth { reason },
            GatewayError::NotFound { kind, id } => Self::NotFound { kind, id },
            GatewayError::Transport { reason } | GatewayError::Configuration { reason } => {
                Self::Transport { reason }
            }
        }
    }
}

impl From<shelf_primitives::Error> for LibraryError {
    fn from(err: shelf_primitives::Error) -> Self {
        Self::validation(err.to_string())
    }
}

impl From<DispatchError> for LibraryError {
    fn from(err: DispatchError) -> Self {
        Self::transport(err.to_string())
    }
}
