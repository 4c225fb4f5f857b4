//! Backend contracts shared by every store and auth implementation.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shelf_primitives::{
    Collection, CollectionDraft, CollectionId, CollectionPatch, EntityKind, Prompt, PromptDraft,
    PromptId, PromptPatch, SortOption, Tag, TagId, User, UserId,
};
use thiserror::Error;

/// Result alias used by gateway implementations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Error type shared by store and auth implementations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The request carried invalid data.
    #[error("validation failed: {reason}")]
    Validation {
        /// Why the input was rejected.
        reason: String,
    },

    /// The caller is unauthenticated or lacks permission.
    #[error("not authorized: {reason}")]
    Auth {
        /// Additional context for the failure.
        reason: String,
    },

    /// The referenced entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of the missing entity.
        kind: EntityKind,
        /// Identifier that failed to resolve.
        id: String,
    },

    /// Network, protocol, or storage failure.
    #[error("gateway transport error: {reason}")]
    Transport {
        /// Additional context about the error.
        reason: String,
    },

    /// The gateway could not be constructed.
    #[error("gateway not configured: {reason}")]
    Configuration {
        /// Additional context for the failure.
        reason: String,
    },
}

impl GatewayError {
    /// Convenience constructor for validation failures.
    #[must_use]
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for authorization failures.
    #[must_use]
    pub fn auth(reason: impl Into<String>) -> Self {
        Self::Auth {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for missing entities.
    #[must_use]
    pub fn not_found(kind: EntityKind, id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Convenience constructor for transport failures.
    #[must_use]
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for configuration issues.
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn unauthenticated() -> Self {
        Self::auth("sign in required")
    }
}

impl From<shelf_primitives::Error> for GatewayError {
    fn from(err: shelf_primitives::Error) -> Self {
        Self::validation(err.to_string())
    }
}

/// Describes a store instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreMetadata {
    backend: &'static str,
    endpoint: Option<String>,
}

impl StoreMetadata {
    /// Creates metadata for the named backend kind.
    #[must_use]
    pub fn new(backend: &'static str) -> Self {
        Self {
            backend,
            endpoint: None,
        }
    }

    /// Records where the backend lives (URL or file path).
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Returns the backend kind (e.g. `"local"`).
    #[must_use]
    pub const fn backend(&self) -> &'static str {
        self.backend
    }

    /// Returns the endpoint, if any.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }
}

/// Server-side narrowing for [`PromptStore::list_prompts`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptQuery {
    /// Only prompts in this collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<CollectionId>,
    /// Substring filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
    /// Result ordering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<SortOption>,
    /// Only favorites (or only non-favorites).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_favorite: Option<bool>,
    /// Only prompts created by this user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// One-based page number; requires `limit`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Page size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl PromptQuery {
    /// Query that returns every prompt visible to the caller.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Key/value pairs in the REST API's query-string vocabulary.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(id) = &self.collection_id {
            pairs.push(("collectionId", id.to_string()));
        }
        if let Some(query) = &self.search_query {
            pairs.push(("searchQuery", query.clone()));
        }
        if let Some(sort) = self.sort_by {
            pairs.push(("sortBy", sort.to_string()));
        }
        if let Some(favorite) = self.is_favorite {
            pairs.push(("isFavorite", favorite.to_string()));
        }
        if let Some(user) = &self.user_id {
            pairs.push(("userId", user.to_string()));
        }
        if let Some(page) = self.page {
            pairs.push(("page", page.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        pairs
    }

    /// Zero-based offset implied by `page` and `limit`.
    #[must_use]
    pub fn offset(&self) -> usize {
        match (self.page, self.limit) {
            (Some(page), Some(limit)) => page.saturating_sub(1) as usize * limit as usize,
            _ => 0,
        }
    }
}

/// Persistent storage for prompts, collections, and tags.
///
/// Every operation either applies fully or fails. Backends that need several
/// requests for one operation undo the earlier requests when a later one
/// fails, logging any cleanup that itself fails.
#[async_trait]
pub trait PromptStore: Send + Sync {
    /// Returns metadata describing the backend.
    fn metadata(&self) -> &StoreMetadata;

    /// Lists prompts visible to the caller.
    async fn list_prompts(&self, query: &PromptQuery) -> GatewayResult<Vec<Prompt>>;

    /// Fetches one prompt.
    async fn get_prompt(&self, id: &PromptId) -> GatewayResult<Prompt>;

    /// Creates a prompt owned by the signed-in user.
    async fn create_prompt(&self, draft: PromptDraft) -> GatewayResult<Prompt>;

    /// Applies a partial update, bumping the version on content change.
    async fn update_prompt(&self, id: &PromptId, patch: PromptPatch) -> GatewayResult<Prompt>;

    /// Deletes a prompt.
    async fn delete_prompt(&self, id: &PromptId) -> GatewayResult<()>;

    /// Flips the favorite flag server-side.
    async fn toggle_favorite(&self, id: &PromptId) -> GatewayResult<()>;

    /// Lists all collections.
    async fn list_collections(&self) -> GatewayResult<Vec<Collection>>;

    /// Creates a collection owned by the signed-in user.
    async fn create_collection(&self, draft: CollectionDraft) -> GatewayResult<Collection>;

    /// Renames or re-describes a collection.
    async fn update_collection(
        &self,
        id: &CollectionId,
        patch: CollectionPatch,
    ) -> GatewayResult<Collection>;

    /// Deletes a collection; member prompts survive with no collection.
    async fn delete_collection(&self, id: &CollectionId) -> GatewayResult<()>;

    /// Moves a prompt into a collection.
    async fn add_to_collection(
        &self,
        prompt_id: &PromptId,
        collection_id: &CollectionId,
    ) -> GatewayResult<()>;

    /// Takes a prompt out of a collection.
    async fn remove_from_collection(
        &self,
        prompt_id: &PromptId,
        collection_id: &CollectionId,
    ) -> GatewayResult<()>;

    /// Lists all tags.
    async fn list_tags(&self) -> GatewayResult<Vec<Tag>>;

    /// Creates a tag, or returns the existing one whose name matches ignoring case.
    async fn create_tag(&self, name: &str) -> GatewayResult<Tag>;

    /// Deletes a tag and detaches it from every prompt.
    async fn delete_tag(&self, id: &TagId) -> GatewayResult<()>;
}

/// Identity provider paired with a store.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Returns the signed-in user, if any.
    fn current_user(&self) -> Option<User>;

    /// Authenticates with email and password.
    async fn sign_in(&self, email: &str, password: &str) -> GatewayResult<User>;

    /// Registers a new account.
    async fn sign_up(&self, username: &str, email: &str, password: &str) -> GatewayResult<User>;

    /// Drops the current session.
    async fn sign_out(&self) -> GatewayResult<()>;
}
