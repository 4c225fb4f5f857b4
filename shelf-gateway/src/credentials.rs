//! Session credentials shared between an auth provider and its store.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use shelf_primitives::User;

/// Bearer token plus the user it was issued to.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Opaque access token.
    pub token: String,
    /// Authenticated user.
    pub user: User,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("user", &self.user)
            .finish()
    }
}

/// Cloneable handle to the current session.
///
/// Clones share storage: setting a credential through one clone is visible
/// through all of them.
#[derive(Clone, Debug, Default)]
pub struct CredentialStore {
    inner: Arc<RwLock<Option<Credential>>>,
}

impl CredentialStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored credential.
    pub fn set(&self, credential: Credential) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(credential);
    }

    /// Drops the stored credential.
    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Returns a copy of the stored credential.
    #[must_use]
    pub fn get(&self) -> Option<Credential> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the bearer token, if signed in.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.get().map(|credential| credential.token)
    }

    /// Returns the signed-in user.
    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.get().map(|credential| credential.user)
    }

    /// Returns `true` while a credential is stored.
    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
