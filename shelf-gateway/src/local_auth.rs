//! Account registry for the local backend.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use shelf_primitives::User;
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::credentials::{Credential, CredentialStore};
use crate::document;
use crate::traits::{AuthProvider, GatewayError, GatewayResult};

/// File name of the persisted account registry inside a data directory.
pub const USERS_FILE: &str = "users.json";

/// PBKDF2-HMAC-SHA256 rounds applied to new passwords.
const PBKDF2_ITERATIONS: u32 = 100_000;

const KEY_SIZE: usize = 32;

#[derive(Clone, Serialize, Deserialize)]
struct Account {
    user: User,
    salt: String,
    iterations: u32,
    digest: String,
}

impl Account {
    fn new(user: User, password: &str) -> Self {
        let salt = Uuid::new_v4().simple().to_string();
        let digest = hex::encode(derive_key(&salt, password, PBKDF2_ITERATIONS));
        Self {
            user,
            salt,
            iterations: PBKDF2_ITERATIONS,
            digest,
        }
    }

    fn verify(&self, password: &str) -> bool {
        let Ok(stored) = hex::decode(&self.digest) else {
            return false;
        };
        let derived = derive_key(&self.salt, password, self.iterations);
        bool::from(derived.as_slice().ct_eq(&stored))
    }

    fn matches_email(&self, email: &str) -> bool {
        self.user.email.eq_ignore_ascii_case(email.trim())
    }
}

#[derive(Default, Serialize, Deserialize)]
struct Accounts {
    #[serde(default)]
    users: Vec<Account>,
}

fn derive_key(salt: &str, password: &str, iterations: u32) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), iterations, &mut key);
    key
}

fn require(field: &str, value: &str) -> GatewayResult<()> {
    if value.trim().is_empty() {
        return Err(GatewayError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Auth provider that keeps accounts next to the local store.
///
/// Passwords are stored as salted PBKDF2-HMAC-SHA256 keys and compared in
/// constant time. Emails compare ignoring
/// ASCII case and a second account with the same email is rejected.
pub struct LocalAuthProvider {
    accounts: Mutex<Accounts>,
    path: Option<PathBuf>,
    credentials: CredentialStore,
}

impl fmt::Debug for LocalAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalAuthProvider")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl LocalAuthProvider {
    /// Creates a provider with no persisted accounts.
    #[must_use]
    pub fn in_memory(credentials: CredentialStore) -> Self {
        Self {
            accounts: Mutex::new(Accounts::default()),
            path: None,
            credentials,
        }
    }

    /// Opens (or starts) a registry persisted at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Configuration`] when an existing file cannot be
    /// read or parsed.
    pub async fn open(
        path: impl Into<PathBuf>,
        credentials: CredentialStore,
    ) -> GatewayResult<Self> {
        let path = path.into();
        let accounts = document::load(&path).await?;
        Ok(Self {
            accounts: Mutex::new(accounts),
            path: Some(path),
            credentials,
        })
    }

    fn start_session(&self, user: &User) {
        self.credentials.set(Credential {
            token: Uuid::new_v4().to_string(),
            user: user.clone(),
        });
    }
}

#[async_trait]
impl AuthProvider for LocalAuthProvider {
    fn current_user(&self) -> Option<User> {
        self.credentials.user()
    }

    async fn sign_in(&self, email: &str, password: &str) -> GatewayResult<User> {
        let accounts = self.accounts.lock().await;
        let user = accounts
            .users
            .iter()
            .find(|account| account.matches_email(email) && account.verify(password))
            .map(|account| account.user.clone())
            .ok_or_else(|| GatewayError::auth("invalid email or password"))?;
        drop(accounts);

        self.start_session(&user);
        info!(user_id = %user.id, "signed in");
        Ok(user)
    }

    async fn sign_up(&self, username: &str, email: &str, password: &str) -> GatewayResult<User> {
        require("username", username)?;
        require("email", email)?;
        require("password", password)?;

        let mut accounts = self.accounts.lock().await;
        if accounts.users.iter().any(|account| account.matches_email(email)) {
            return Err(GatewayError::validation("email is already registered"));
        }

        let user = User::new(username.trim(), email.trim())?;
        let mut next = Accounts {
            users: accounts.users.clone(),
        };
        next.users.push(Account::new(user.clone(), password));
        if let Some(path) = &self.path {
            document::store(path, &next).await?;
        }
        *accounts = next;
        drop(accounts);

        self.start_session(&user);
        info!(user_id = %user.id, "signed up");
        Ok(user)
    }

    async fn sign_out(&self) -> GatewayResult<()> {
        self.credentials.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_up_then_sign_in() {
        let credentials = CredentialStore::new();
        let auth = LocalAuthProvider::in_memory(credentials.clone());

        let user = auth
            .sign_up("ada", "Ada@Example.com", "hunter2")
            .await
            .unwrap();
        assert_eq!(auth.current_user(), Some(user.clone()));

        auth.sign_out().await.unwrap();
        assert!(!credentials.is_signed_in());

        let again = auth.sign_in("ada@example.com", "hunter2").await.unwrap();
        assert_eq!(again, user);
        assert_eq!(credentials.user(), Some(user));
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let auth = LocalAuthProvider::in_memory(CredentialStore::new());
        auth.sign_up("ada", "ada@example.com", "hunter2")
            .await
            .unwrap();
        auth.sign_out().await.unwrap();

        let err = auth.sign_in("ada@example.com", "nope").await.unwrap_err();
        assert!(matches!(err, GatewayError::Auth { .. }));
        assert!(auth.current_user().is_none());
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let auth = LocalAuthProvider::in_memory(CredentialStore::new());
        auth.sign_up("ada", "ada@example.com", "pw").await.unwrap();
        let err = auth
            .sign_up("imposter", "ADA@example.com", "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));
    }

    #[tokio::test]
    async fn accounts_persist() {
        let mut path = std::env::temp_dir();
        path.push(format!("shelf-users-{}.json", Uuid::new_v4()));

        let auth = LocalAuthProvider::open(&path, CredentialStore::new())
            .await
            .unwrap();
        let user = auth.sign_up("ada", "ada@example.com", "pw").await.unwrap();
        drop(auth);

        let reopened = LocalAuthProvider::open(&path, CredentialStore::new())
            .await
            .unwrap();
        assert_eq!(reopened.sign_in("ada@example.com", "pw").await.unwrap(), user);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[test]
    fn keys_are_salted_and_stretched() {
        assert_ne!(derive_key("a", "pw", 2), derive_key("b", "pw", 2));
        assert_ne!(derive_key("a", "pw", 1), derive_key("a", "pw", 2));
    }

    #[test]
    fn stored_accounts_never_hold_the_password() {
        let user = User::new("ada", "ada@example.com").unwrap();
        let account = Account::new(user, "hunter2");
        let json = serde_json::to_string(&account).unwrap();

        assert!(!json.contains("hunter2"));
        assert_eq!(account.iterations, PBKDF2_ITERATIONS);
        assert_eq!(account.digest.len(), KEY_SIZE * 2);
        assert!(account.verify("hunter2"));
        assert!(!account.verify("hunter3"));
    }

    #[test]
    fn corrupt_digest_never_verifies() {
        let user = User::new("ada", "ada@example.com").unwrap();
        let mut account = Account::new(user, "pw");
        account.digest = "not hex".to_owned();
        assert!(!account.verify("pw"));
    }
}
