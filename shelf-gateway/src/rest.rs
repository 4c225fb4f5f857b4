//! Client for the prompt-shelf REST API.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use hyper::Method;
use serde::{Deserialize, Serialize};
use shelf_primitives::{
    Collection, CollectionDraft, CollectionId, CollectionPatch, EntityKind, Prompt, PromptDraft,
    PromptId, PromptPatch, Tag, TagId, User, find_by_name,
};
use tracing::info;

use crate::credentials::{Credential, CredentialStore};
use crate::http_client::{
    DEFAULT_TIMEOUT, HttpTransport, NO_BODY, encode_component, query_string, sanitize_base_url,
};
use crate::traits::{
    AuthProvider, GatewayError, GatewayResult, PromptQuery, PromptStore, StoreMetadata,
};

const SERVICE: &str = "REST backend";

/// Connection settings for a REST backend.
#[derive(Clone, Debug)]
pub struct RestConfig {
    base_url: String,
    timeout: Duration,
}

impl RestConfig {
    /// Creates a configuration for the API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Configuration`] if the URL is invalid.
    pub fn new(base_url: impl AsRef<str>) -> GatewayResult<Self> {
        Ok(Self {
            base_url: sanitize_base_url(SERVICE, base_url.as_ref())?,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the sanitized base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    fn transport(&self, credentials: CredentialStore) -> GatewayResult<HttpTransport> {
        HttpTransport::new(SERVICE, &self.base_url, self.timeout, credentials)
    }
}

fn prompt_path(id: &PromptId) -> String {
    format!("api/prompts/{}", encode_component(id.as_str()))
}

fn collection_path(id: &CollectionId) -> String {
    format!("api/collections/{}", encode_component(id.as_str()))
}

fn membership_path(collection_id: &CollectionId, prompt_id: &PromptId) -> String {
    format!(
        "{}/prompts/{}",
        collection_path(collection_id),
        encode_component(prompt_id.as_str())
    )
}

fn prompts_path(query: &PromptQuery) -> String {
    let pairs = query.to_pairs();
    if pairs.is_empty() {
        "api/prompts".to_owned()
    } else {
        format!("api/prompts?{}", query_string(&pairs))
    }
}

#[derive(Serialize)]
struct NewTag<'a> {
    name: &'a str,
}

/// Store backed by the REST API under `/api`.
pub struct RestStore {
    transport: HttpTransport,
    metadata: StoreMetadata,
}

impl fmt::Debug for RestStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestStore")
            .field("base_url", &self.transport.base_url())
            .finish_non_exhaustive()
    }
}

impl RestStore {
    /// Builds a store that authenticates with the shared credentials.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Configuration`] if the HTTP client cannot be built.
    pub fn new(config: &RestConfig, credentials: CredentialStore) -> GatewayResult<Self> {
        let transport = config.transport(credentials)?;
        let metadata = StoreMetadata::new("rest").with_endpoint(transport.base_url());
        Ok(Self {
            transport,
            metadata,
        })
    }

    fn require_session(&self) -> GatewayResult<()> {
        if self.transport.credentials().is_signed_in() {
            Ok(())
        } else {
            Err(GatewayError::unauthenticated())
        }
    }
}

#[async_trait]
impl PromptStore for RestStore {
    fn metadata(&self) -> &StoreMetadata {
        &self.metadata
    }

    async fn list_prompts(&self, query: &PromptQuery) -> GatewayResult<Vec<Prompt>> {
        self.transport
            .json(Method::GET, &prompts_path(query), NO_BODY, &[], None)
            .await
    }

    async fn get_prompt(&self, id: &PromptId) -> GatewayResult<Prompt> {
        self.transport
            .json(
                Method::GET,
                &prompt_path(id),
                NO_BODY,
                &[],
                Some((EntityKind::Prompt, id.as_str())),
            )
            .await
    }

    async fn create_prompt(&self, draft: PromptDraft) -> GatewayResult<Prompt> {
        draft.validate()?;
        self.require_session()?;
        self.transport
            .json(Method::POST, "api/prompts", Some(&draft), &[], None)
            .await
    }

    async fn update_prompt(&self, id: &PromptId, patch: PromptPatch) -> GatewayResult<Prompt> {
        patch.validate()?;
        self.transport
            .json(
                Method::PUT,
                &prompt_path(id),
                Some(&patch),
                &[],
                Some((EntityKind::Prompt, id.as_str())),
            )
            .await
    }

    async fn delete_prompt(&self, id: &PromptId) -> GatewayResult<()> {
        self.transport
            .execute(
                Method::DELETE,
                &prompt_path(id),
                NO_BODY,
                &[],
                Some((EntityKind::Prompt, id.as_str())),
            )
            .await
    }

    async fn toggle_favorite(&self, id: &PromptId) -> GatewayResult<()> {
        self.require_session()?;
        self.transport
            .execute(
                Method::POST,
                &format!("{}/favorite", prompt_path(id)),
                NO_BODY,
                &[],
                Some((EntityKind::Prompt, id.as_str())),
            )
            .await
    }

    async fn list_collections(&self) -> GatewayResult<Vec<Collection>> {
        self.transport
            .json(Method::GET, "api/collections", NO_BODY, &[], None)
            .await
    }

    async fn create_collection(&self, draft: CollectionDraft) -> GatewayResult<Collection> {
        draft.validate()?;
        self.require_session()?;
        self.transport
            .json(Method::POST, "api/collections", Some(&draft), &[], None)
            .await
    }

    async fn update_collection(
        &self,
        id: &CollectionId,
        patch: CollectionPatch,
    ) -> GatewayResult<Collection> {
        patch.validate()?;
        self.transport
            .json(
                Method::PUT,
                &collection_path(id),
                Some(&patch),
                &[],
                Some((EntityKind::Collection, id.as_str())),
            )
            .await
    }

    async fn delete_collection(&self, id: &CollectionId) -> GatewayResult<()> {
        self.transport
            .execute(
                Method::DELETE,
                &collection_path(id),
                NO_BODY,
                &[],
                Some((EntityKind::Collection, id.as_str())),
            )
            .await
    }

    async fn add_to_collection(
        &self,
        prompt_id: &PromptId,
        collection_id: &CollectionId,
    ) -> GatewayResult<()> {
        self.require_session()?;
        self.transport
            .execute(
                Method::POST,
                &membership_path(collection_id, prompt_id),
                NO_BODY,
                &[],
                Some((EntityKind::Prompt, prompt_id.as_str())),
            )
            .await
    }

    async fn remove_from_collection(
        &self,
        prompt_id: &PromptId,
        collection_id: &CollectionId,
    ) -> GatewayResult<()> {
        self.transport
            .execute(
                Method::DELETE,
                &membership_path(collection_id, prompt_id),
                NO_BODY,
                &[],
                Some((EntityKind::Prompt, prompt_id.as_str())),
            )
            .await
    }

    async fn list_tags(&self) -> GatewayResult<Vec<Tag>> {
        self.transport
            .json(Method::GET, "api/tags", NO_BODY, &[], None)
            .await
    }

    async fn create_tag(&self, name: &str) -> GatewayResult<Tag> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GatewayError::validation("tag name must not be empty"));
        }
        let existing = self.list_tags().await?;
        if let Some(tag) = find_by_name(&existing, name) {
            return Ok(tag.clone());
        }
        self.transport
            .json(Method::POST, "api/tags", Some(&NewTag { name }), &[], None)
            .await
    }

    async fn delete_tag(&self, id: &TagId) -> GatewayResult<()> {
        self.transport
            .execute(
                Method::DELETE,
                &format!("api/tags/{}", encode_component(id.as_str())),
                NO_BODY,
                &[],
                Some((EntityKind::Tag, id.as_str())),
            )
            .await
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct SignupRequest<'a> {
    username: &'a str,
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    access_token: String,
    user: User,
}

/// Auth provider for the REST API's `/auth` endpoints.
pub struct RestAuthProvider {
    transport: HttpTransport,
}

impl fmt::Debug for RestAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestAuthProvider")
            .field("base_url", &self.transport.base_url())
            .finish_non_exhaustive()
    }
}

impl RestAuthProvider {
    /// Builds a provider writing sessions into `credentials`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Configuration`] if the HTTP client cannot be built.
    pub fn new(config: &RestConfig, credentials: CredentialStore) -> GatewayResult<Self> {
        Ok(Self {
            transport: config.transport(credentials)?,
        })
    }
}

#[async_trait]
impl AuthProvider for RestAuthProvider {
    fn current_user(&self) -> Option<User> {
        self.transport.credentials().user()
    }

    async fn sign_in(&self, email: &str, password: &str) -> GatewayResult<User> {
        let response: LoginResponse = self
            .transport
            .json(
                Method::POST,
                "auth/login",
                Some(&LoginRequest {
                    email: email.trim(),
                    password,
                }),
                &[],
                None,
            )
            .await?;

        self.transport.credentials().set(Credential {
            token: response.access_token,
            user: response.user.clone(),
        });
        info!(user_id = %response.user.id, "signed in");
        Ok(response.user)
    }

    async fn sign_up(&self, username: &str, email: &str, password: &str) -> GatewayResult<User> {
        if username.trim().is_empty() || email.trim().is_empty() || password.is_empty() {
            return Err(GatewayError::validation(
                "username, email, and password are required",
            ));
        }
        self.transport
            .execute(
                Method::POST,
                "auth/signup",
                Some(&SignupRequest {
                    username: username.trim(),
                    email: email.trim(),
                    password,
                }),
                &[],
                None,
            )
            .await?;
        self.sign_in(email, password).await
    }

    async fn sign_out(&self) -> GatewayResult<()> {
        self.transport.credentials().clear();
        Ok(())
    }
}
