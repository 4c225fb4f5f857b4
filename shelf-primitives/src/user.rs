//! Authenticated user identity.

use serde::{Deserialize, Serialize};

use crate::error::require_non_empty;
use crate::{Result, UserId};

/// A signed-in user. Authentication itself happens outside the entity model.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    /// User identifier.
    pub id: UserId,
    /// Display name.
    pub username: String,
    /// Contact address, compared case-insensitively by auth providers.
    pub email: String,
}

impl User {
    /// Creates a user with a fresh identifier.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Validation`] when the username or email is blank.
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Result<Self> {
        Self::with_id(UserId::random(), username, email)
    }

    /// Creates a user with a known identifier.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Validation`] when the username or email is blank.
    pub fn with_id(
        id: UserId,
        username: impl Into<String>,
        email: impl Into<String>,
    ) -> Result<Self> {
        let username = username.into();
        let email = email.into();
        require_non_empty("username", &username)?;
        require_non_empty("email", &email)?;
        Ok(Self {
            id,
            username: username.trim().to_owned(),
            email: email.trim().to_owned(),
        })
    }
}
