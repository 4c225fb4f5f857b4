//! Backends that persist prompts, collections, and tags.
//!
//! Every backend implements [`PromptStore`] and pairs with an [`AuthProvider`]
//! that writes into a shared [`CredentialStore`]. The state layer only ever
//! talks to these two traits.

#![warn(missing_docs, clippy::pedantic)]

pub mod credentials;
pub mod hosted;
pub mod local;
pub mod local_auth;
pub mod rest;
pub mod traits;

mod document;
mod http_client;

pub use credentials::{Credential, CredentialStore};
pub use hosted::{HostedAuthProvider, HostedConfig, HostedStore};
pub use http_client::DEFAULT_TIMEOUT;
pub use local::{LIBRARY_FILE, LocalStore};
pub use local_auth::{LocalAuthProvider, USERS_FILE};
pub use rest::{RestAuthProvider, RestConfig, RestStore};
pub use traits::{
    AuthProvider, GatewayError, GatewayResult, PromptQuery, PromptStore, StoreMetadata,
};
