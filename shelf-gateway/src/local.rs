//! In-process store with optional JSON persistence.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use shelf_primitives::{
    Collection, CollectionDraft, CollectionId, CollectionPatch, EntityKind, Prompt, PromptDraft,
    PromptId, PromptPatch, Tag, TagId, User, dedup_by_id, find_by_name, reindex_memberships,
};
use shelf_prompts::filter::{matches_search, sort_prompts};
use shelf_prompts::versioning::apply_patch;
use tokio::sync::RwLock;
use tracing::debug;

use crate::credentials::CredentialStore;
use crate::document;
use crate::traits::{GatewayError, GatewayResult, PromptQuery, PromptStore, StoreMetadata};

/// File name of the persisted entity document inside a data directory.
pub const LIBRARY_FILE: &str = "library.json";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Tables {
    #[serde(default)]
    prompts: Vec<Prompt>,
    #[serde(default)]
    collections: Vec<Collection>,
    #[serde(default)]
    tags: Vec<Tag>,
}

impl Tables {
    fn prompt_index(&self, id: &PromptId) -> GatewayResult<usize> {
        self.prompts
            .iter()
            .position(|prompt| &prompt.id == id)
            .ok_or_else(|| GatewayError::not_found(EntityKind::Prompt, id))
    }

    fn collection_index(&self, id: &CollectionId) -> GatewayResult<usize> {
        self.collections
            .iter()
            .position(|collection| &collection.id == id)
            .ok_or_else(|| GatewayError::not_found(EntityKind::Collection, id))
    }

    fn tag_index(&self, id: &TagId) -> GatewayResult<usize> {
        self.tags
            .iter()
            .position(|tag| &tag.id == id)
            .ok_or_else(|| GatewayError::not_found(EntityKind::Tag, id))
    }

    /// Maps attached tags onto stored ones (by id, then by name), registering
    /// any the store has not seen.
    fn resolve_tags(&mut self, tags: Vec<Tag>) -> Vec<Tag> {
        let mut resolved = Vec::with_capacity(tags.len());
        for tag in tags {
            if let Some(stored) = self.tags.iter().find(|stored| stored.id == tag.id) {
                resolved.push(stored.clone());
            } else if let Some(stored) = find_by_name(&self.tags, &tag.name) {
                resolved.push(stored.clone());
            } else {
                self.tags.push(tag.clone());
                resolved.push(tag);
            }
        }
        dedup_by_id(resolved)
    }
}

fn ensure_can_modify(prompt: &Prompt, user: Option<&User>) -> GatewayResult<()> {
    if prompt.is_private && !prompt.is_owned_by(user) {
        return Err(GatewayError::auth("private prompt belongs to another user"));
    }
    Ok(())
}

/// Store keeping every table in memory.
///
/// When opened on a path, the whole document is rewritten after each
/// successful mutation. A failed write leaves memory untouched.
pub struct LocalStore {
    tables: RwLock<Tables>,
    path: Option<PathBuf>,
    credentials: CredentialStore,
    metadata: StoreMetadata,
}

impl fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl LocalStore {
    /// Creates an empty, non-persistent store.
    #[must_use]
    pub fn in_memory(credentials: CredentialStore) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            path: None,
            credentials,
            metadata: StoreMetadata::new("local"),
        }
    }

    /// Opens (or starts) a store persisted at `path`.
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
        let mut tables: Tables = document::load(&path).await?;
        reindex_memberships(&mut tables.collections, &tables.prompts);
        debug!(
            path = %path.display(),
            prompts = tables.prompts.len(),
            collections = tables.collections.len(),
            tags = tables.tags.len(),
            "opened local store"
        );

        Ok(Self {
            tables: RwLock::new(tables),
            metadata: StoreMetadata::new("local").with_endpoint(path.display().to_string()),
            path: Some(path),
            credentials,
        })
    }

    /// Returns the backing file, if persistent.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn require_user(&self) -> GatewayResult<User> {
        self.credentials
            .user()
            .ok_or_else(GatewayError::unauthenticated)
    }

    /// Runs `op` against a copy of the tables and swaps it in once persisted.
    async fn mutate<T, F>(&self, op: F) -> GatewayResult<T>
    where
        F: FnOnce(&mut Tables) -> GatewayResult<T> + Send,
    {
        let mut guard = self.tables.write().await;
        let mut next = guard.clone();
        let output = op(&mut next)?;
        reindex_memberships(&mut next.collections, &next.prompts);
        if let Some(path) = &self.path {
            document::store(path, &next).await?;
        }
        *guard = next;
        Ok(output)
    }
}

#[async_trait]
impl PromptStore for LocalStore {
    fn metadata(&self) -> &StoreMetadata {
        &self.metadata
    }

    async fn list_prompts(&self, query: &PromptQuery) -> GatewayResult<Vec<Prompt>> {
        let user = self.credentials.user();
        let tables = self.tables.read().await;
        let mut prompts: Vec<Prompt> = tables
            .prompts
            .iter()
            .filter(|prompt| prompt.is_visible_to(user.as_ref()))
            .filter(|prompt| {
                query
                    .collection_id
                    .as_ref()
                    .is_none_or(|id| prompt.collection_id.as_ref() == Some(id))
            })
            .filter(|prompt| query.is_favorite.is_none_or(|fav| prompt.is_favorite == fav))
            .filter(|prompt| {
                query
                    .user_id
                    .as_ref()
                    .is_none_or(|id| prompt.created_by.as_ref() == Some(id))
            })
            .filter(|prompt| {
                query
                    .search_query
                    .as_deref()
                    .is_none_or(|q| matches_search(prompt, q))
            })
            .cloned()
            .collect();
        drop(tables);

        sort_prompts(&mut prompts, query.sort_by.unwrap_or_default());
        let limit = query.limit.map_or(usize::MAX, |limit| limit as usize);
        Ok(prompts
            .into_iter()
            .skip(query.offset())
            .take(limit)
            .collect())
    }

    async fn get_prompt(&self, id: &PromptId) -> GatewayResult<Prompt> {
        let user = self.credentials.user();
        let tables = self.tables.read().await;
        tables
            .prompts
            .iter()
            .find(|prompt| &prompt.id == id && prompt.is_visible_to(user.as_ref()))
            .cloned()
            .ok_or_else(|| GatewayError::not_found(EntityKind::Prompt, id))
    }

    async fn create_prompt(&self, draft: PromptDraft) -> GatewayResult<Prompt> {
        let user = self.require_user()?;
        draft.validate()?;
        self.mutate(move |tables| {
            if let Some(collection_id) = &draft.collection_id {
                tables.collection_index(collection_id)?;
            }
            let mut draft = draft;
            draft.tags = tables.resolve_tags(std::mem::take(&mut draft.tags));
            let prompt = Prompt::from_draft(draft, Some(user.id), Utc::now())?;
            tables.prompts.insert(0, prompt.clone());
            Ok(prompt)
        })
        .await
    }

    async fn update_prompt(&self, id: &PromptId, patch: PromptPatch) -> GatewayResult<Prompt> {
        patch.validate()?;
        let user = self.credentials.user();
        self.mutate(move |tables| {
            let idx = tables.prompt_index(id)?;
            ensure_can_modify(&tables.prompts[idx], user.as_ref())?;
            if let Some(Some(collection_id)) = &patch.collection_id {
                tables.collection_index(collection_id)?;
            }
            let mut patch = patch;
            if let Some(tags) = patch.tags.take() {
                patch.tags = Some(tables.resolve_tags(tags));
            }
            let next = apply_patch(&tables.prompts[idx], &patch, Utc::now());
            tables.prompts[idx] = next.clone();
            Ok(next)
        })
        .await
    }

    async fn delete_prompt(&self, id: &PromptId) -> GatewayResult<()> {
        let user = self.credentials.user();
        self.mutate(move |tables| {
            let idx = tables.prompt_index(id)?;
            ensure_can_modify(&tables.prompts[idx], user.as_ref())?;
            tables.prompts.remove(idx);
            Ok(())
        })
        .await
    }

    async fn toggle_favorite(&self, id: &PromptId) -> GatewayResult<()> {
        let user = self.require_user()?;
        self.mutate(move |tables| {
            let idx = tables.prompt_index(id)?;
            ensure_can_modify(&tables.prompts[idx], Some(&user))?;
            let prompt = &mut tables.prompts[idx];
            prompt.is_favorite = !prompt.is_favorite;
            Ok(())
        })
        .await
    }

    async fn list_collections(&self) -> GatewayResult<Vec<Collection>> {
        Ok(self.tables.read().await.collections.clone())
    }

    async fn create_collection(&self, draft: CollectionDraft) -> GatewayResult<Collection> {
        let user = self.require_user()?;
        let collection = Collection::from_draft(draft, Some(user.id), Utc::now())?;
        self.mutate(move |tables| {
            tables.collections.push(collection.clone());
            Ok(collection)
        })
        .await
    }

    async fn update_collection(
        &self,
        id: &CollectionId,
        patch: CollectionPatch,
    ) -> GatewayResult<Collection> {
        patch.validate()?;
        self.mutate(move |tables| {
            let idx = tables.collection_index(id)?;
            let next = patch.apply(&tables.collections[idx], Utc::now());
            tables.collections[idx] = next.clone();
            Ok(next)
        })
        .await
    }

    async fn delete_collection(&self, id: &CollectionId) -> GatewayResult<()> {
        self.mutate(move |tables| {
            let idx = tables.collection_index(id)?;
            tables.collections.remove(idx);
            for prompt in &mut tables.prompts {
                if prompt.collection_id.as_ref() == Some(id) {
                    prompt.collection_id = None;
                }
            }
            Ok(())
        })
        .await
    }

    async fn add_to_collection(
        &self,
        prompt_id: &PromptId,
        collection_id: &CollectionId,
    ) -> GatewayResult<()> {
        let user = self.require_user()?;
        self.mutate(move |tables| {
            let idx = tables.prompt_index(prompt_id)?;
            tables.collection_index(collection_id)?;
            ensure_can_modify(&tables.prompts[idx], Some(&user))?;
            let prompt = &mut tables.prompts[idx];
            prompt.collection_id = Some(collection_id.clone());
            prompt.updated_at = Utc::now().max(prompt.created_at);
            Ok(())
        })
        .await
    }

    async fn remove_from_collection(
        &self,
        prompt_id: &PromptId,
        collection_id: &CollectionId,
    ) -> GatewayResult<()> {
        let user = self.credentials.user();
        self.mutate(move |tables| {
            let idx = tables.prompt_index(prompt_id)?;
            tables.collection_index(collection_id)?;
            ensure_can_modify(&tables.prompts[idx], user.as_ref())?;
            let prompt = &mut tables.prompts[idx];
            if prompt.collection_id.as_ref() == Some(collection_id) {
                prompt.collection_id = None;
                prompt.updated_at = Utc::now().max(prompt.created_at);
            }
            Ok(())
        })
        .await
    }

    async fn list_tags(&self) -> GatewayResult<Vec<Tag>> {
        Ok(self.tables.read().await.tags.clone())
    }

    async fn create_tag(&self, name: &str) -> GatewayResult<Tag> {
        let candidate = Tag::new(name)?;
        self.mutate(move |tables| {
            if let Some(existing) = find_by_name(&tables.tags, &candidate.name) {
                return Ok(existing.clone());
            }
            tables.tags.push(candidate.clone());
            Ok(candidate)
        })
        .await
    }

    async fn delete_tag(&self, id: &TagId) -> GatewayResult<()> {
        self.mutate(move |tables| {
            let idx = tables.tag_index(id)?;
            tables.tags.remove(idx);
            for prompt in &mut tables.prompts {
                prompt.tags.retain(|tag| &tag.id != id);
            }
            Ok(())
        })
        .await
    }
}
