//! Client for the hosted relational platform (PostgREST tables plus `/auth/v1`).
//!
//! Tables: `prompts`, `collections`, `tags`, `prompt_tags`, `prompt_versions`
//! and `profiles`, all keyed by string ids with snake_case columns. Rows are
//! mapped onto the entity model here; nothing outside this module sees them.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hyper::Method;
use serde::{Deserialize, Serialize};
use shelf_primitives::{
    Collection, CollectionDraft, CollectionId, CollectionPatch, EntityKind, INITIAL_VERSION,
    Prompt, PromptDraft, PromptId, PromptPatch, SortOption, Tag, TagId, User, UserId,
    VersionSnapshot, find_by_name,
};
use shelf_prompts::versioning::apply_patch;
use tracing::{debug, info, warn};

use crate::credentials::{Credential, CredentialStore};
use crate::http_client::{
    DEFAULT_TIMEOUT, HttpTransport, NO_BODY, encode_component, query_string, sanitize_base_url,
};
use crate::traits::{
    AuthProvider, GatewayError, GatewayResult, PromptQuery, PromptStore, StoreMetadata,
};

const SERVICE: &str = "hosted backend";
const PROMPT_SELECT: &str =
    "*,prompt_tags(tags(id,name)),prompt_versions(version,content,created_at)";
const COLLECTION_SELECT: &str = "*,prompts(id)";
const RETURN_REPRESENTATION: (&str, &str) = ("Prefer", "return=representation");

/// Connection settings for the hosted platform.
#[derive(Clone)]
pub struct HostedConfig {
    url: String,
    anon_key: String,
    timeout: Duration,
}

impl fmt::Debug for HostedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostedConfig")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HostedConfig {
    /// Creates a configuration for the project at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Configuration`] if the URL is invalid or the key
    /// is blank.
    pub fn new(url: impl AsRef<str>, anon_key: impl Into<String>) -> GatewayResult<Self> {
        let anon_key = anon_key.into();
        if anon_key.trim().is_empty() {
            return Err(GatewayError::configuration("hosted anon key must not be empty"));
        }
        Ok(Self {
            url: sanitize_base_url(SERVICE, url.as_ref())?,
            anon_key,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the sanitized project URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn transport(&self, credentials: CredentialStore) -> GatewayResult<HttpTransport> {
        Ok(HttpTransport::new(SERVICE, &self.url, self.timeout, credentials)?
            .with_api_key(self.anon_key.clone()))
    }
}

fn malformed(err: &shelf_primitives::Error) -> GatewayError {
    GatewayError::transport(format!("malformed row from {SERVICE}: {err}"))
}

fn eq(value: &str) -> String {
    format!("eq.{}", encode_component(value))
}

#[derive(Debug, Deserialize)]
struct TagRow {
    id: String,
    name: String,
}

impl TagRow {
    fn into_tag(self) -> GatewayResult<Tag> {
        let id = TagId::new(self.id).map_err(|err| malformed(&err))?;
        Tag::with_id(id, self.name).map_err(|err| malformed(&err))
    }
}

#[derive(Debug, Deserialize)]
struct PromptTagRow {
    tags: Option<TagRow>,
}

#[derive(Debug, Deserialize)]
struct VersionRow {
    version: u32,
    content: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct PromptRow {
    id: String,
    #[serde(default)]
    user_id: Option<String>,
    title: String,
    content: String,
    #[serde(default)]
    collection_id: Option<String>,
    #[serde(default)]
    is_favorite: bool,
    #[serde(default)]
    is_private: bool,
    #[serde(default)]
    version: Option<u32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    prompt_tags: Vec<PromptTagRow>,
    #[serde(default)]
    prompt_versions: Vec<VersionRow>,
}

impl PromptRow {
    fn into_prompt(self) -> GatewayResult<Prompt> {
        let tags = self
            .prompt_tags
            .into_iter()
            .filter_map(|row| row.tags)
            .map(TagRow::into_tag)
            .collect::<GatewayResult<Vec<_>>>()?;

        let mut history: Vec<VersionSnapshot> = self
            .prompt_versions
            .into_iter()
            .map(|row| VersionSnapshot {
                version: row.version,
                content: row.content,
                updated_at: row.created_at,
            })
            .collect();
        history.sort_by_key(|snapshot| snapshot.version);

        Ok(Prompt {
            id: PromptId::new(self.id).map_err(|err| malformed(&err))?,
            title: self.title,
            content: self.content,
            tags: shelf_primitives::dedup_by_id(tags),
            collection_id: self
                .collection_id
                .map(CollectionId::new)
                .transpose()
                .map_err(|err| malformed(&err))?,
            is_favorite: self.is_favorite,
            is_private: self.is_private,
            created_by: self
                .user_id
                .map(UserId::new)
                .transpose()
                .map_err(|err| malformed(&err))?,
            version: self.version.unwrap_or(INITIAL_VERSION).max(INITIAL_VERSION),
            version_history: history,
            created_at: self.created_at,
            updated_at: self.updated_at.max(self.created_at),
        })
    }
}

#[derive(Debug, Deserialize)]
struct IdRow {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CollectionRow {
    id: String,
    #[serde(default)]
    user_id: Option<String>,
    name: String,
    #[serde(default)]
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    prompts: Vec<IdRow>,
}

impl CollectionRow {
    fn into_collection(self) -> GatewayResult<Collection> {
        Ok(Collection {
            id: CollectionId::new(self.id).map_err(|err| malformed(&err))?,
            name: self.name,
            description: self.description,
            prompt_ids: self
                .prompts
                .into_iter()
                .map(|row| PromptId::new(row.id))
                .collect::<Result<_, _>>()
                .map_err(|err| malformed(&err))?,
            created_by: self
                .user_id
                .map(UserId::new)
                .transpose()
                .map_err(|err| malformed(&err))?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ProfileRow {
    id: String,
    username: String,
    email: String,
}

impl ProfileRow {
    fn into_user(self) -> GatewayResult<User> {
        let id = UserId::new(self.id).map_err(|err| malformed(&err))?;
        User::with_id(id, self.username, self.email).map_err(|err| malformed(&err))
    }
}

#[derive(Serialize)]
struct NewPromptRow<'a> {
    user_id: &'a str,
    title: &'a str,
    content: &'a str,
    collection_id: Option<&'a str>,
    is_favorite: bool,
    is_private: bool,
    version: u32,
}

#[derive(Serialize)]
struct PromptUpdateRow<'a> {
    title: &'a str,
    content: &'a str,
    collection_id: Option<&'a str>,
    is_favorite: bool,
    is_private: bool,
    version: u32,
    updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct NewVersionRow<'a> {
    prompt_id: &'a str,
    content: &'a str,
    version: u32,
    created_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct PromptTagLink<'a> {
    prompt_id: &'a str,
    tag_id: &'a str,
}

#[derive(Serialize)]
struct NewCollectionRow<'a> {
    user_id: &'a str,
    name: &'a str,
    description: Option<&'a str>,
}

#[derive(Serialize)]
struct CollectionUpdateRow<'a> {
    name: &'a str,
    description: Option<&'a str>,
    updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct CollectionAssignment<'a> {
    collection_id: Option<&'a str>,
    updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct FavoriteUpdate {
    is_favorite: bool,
}

#[derive(Serialize)]
struct NewTagRow<'a> {
    name: &'a str,
}

fn order_clause(sort: SortOption) -> &'static str {
    match sort {
        SortOption::Newest => "created_at.desc",
        SortOption::Oldest => "created_at.asc",
        SortOption::Alphabetical => "title.asc",
        SortOption::Updated => "updated_at.desc",
    }
}

fn prompts_path(query: &PromptQuery) -> String {
    let mut pairs: Vec<(&str, String)> = vec![("select", PROMPT_SELECT.to_owned())];
    if let Some(id) = &query.collection_id {
        pairs.push(("collection_id", format!("eq.{id}")));
    }
    if let Some(favorite) = query.is_favorite {
        pairs.push(("is_favorite", format!("eq.{favorite}")));
    }
    if let Some(user) = &query.user_id {
        pairs.push(("user_id", format!("eq.{user}")));
    }
    if let Some(search) = query
        .search_query
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        let pattern = search.replace(['*', ',', '(', ')'], " ");
        pairs.push((
            "or",
            format!("(title.ilike.*{pattern}*,content.ilike.*{pattern}*)"),
        ));
    }
    pairs.push((
        "order",
        order_clause(query.sort_by.unwrap_or_default()).to_owned(),
    ));
    if let Some(limit) = query.limit {
        pairs.push(("limit", limit.to_string()));
        pairs.push(("offset", query.offset().to_string()));
    }
    format!("rest/v1/prompts?{}", query_string(&pairs))
}

/// Store backed by the hosted platform's REST interface.
pub struct HostedStore {
    transport: HttpTransport,
    metadata: StoreMetadata,
}

impl fmt::Debug for HostedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostedStore")
            .field("url", &self.transport.base_url())
            .finish_non_exhaustive()
    }
}

impl HostedStore {
    /// Builds a store that authenticates with the shared credentials.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Configuration`] if the HTTP client cannot be built.
    pub fn new(config: &HostedConfig, credentials: CredentialStore) -> GatewayResult<Self> {
        let transport = config.transport(credentials)?;
        let metadata = StoreMetadata::new("hosted").with_endpoint(transport.base_url());
        Ok(Self {
            transport,
            metadata,
        })
    }

    fn require_user(&self) -> GatewayResult<User> {
        self.transport
            .credentials()
            .user()
            .ok_or_else(GatewayError::unauthenticated)
    }

    async fn link_tags(&self, prompt_id: &PromptId, tags: &[Tag]) -> GatewayResult<()> {
        if tags.is_empty() {
            return Ok(());
        }
        let mut links = Vec::with_capacity(tags.len());
        let mut resolved = Vec::with_capacity(tags.len());
        for tag in tags {
            resolved.push(self.create_tag(&tag.name).await?);
        }
        for tag in &resolved {
            links.push(PromptTagLink {
                prompt_id: prompt_id.as_str(),
                tag_id: tag.id.as_str(),
            });
        }
        self.transport
            .execute(
                Method::POST,
                "rest/v1/prompt_tags",
                Some(&links),
                &[("Prefer", "resolution=ignore-duplicates")],
                None,
            )
            .await
    }

    async fn unlink_tags(&self, prompt_id: &PromptId) -> GatewayResult<()> {
        self.transport
            .execute(
                Method::DELETE,
                &format!("rest/v1/prompt_tags?prompt_id={}", eq(prompt_id.as_str())),
                NO_BODY,
                &[],
                None,
            )
            .await
    }

    async fn replace_tags(&self, prompt_id: &PromptId, tags: &[Tag]) -> GatewayResult<()> {
        self.unlink_tags(prompt_id).await?;
        self.link_tags(prompt_id, tags).await
    }

    async fn write_prompt(&self, id: &PromptId, prompt: &Prompt) -> GatewayResult<()> {
        let rows: Vec<IdRow> = self
            .transport
            .json(
                Method::PATCH,
                &format!("rest/v1/prompts?id={}&select=id", eq(id.as_str())),
                Some(&PromptUpdateRow {
                    title: &prompt.title,
                    content: &prompt.content,
                    collection_id: prompt.collection_id.as_ref().map(CollectionId::as_str),
                    is_favorite: prompt.is_favorite,
                    is_private: prompt.is_private,
                    version: prompt.version,
                    updated_at: prompt.updated_at,
                }),
                &[RETURN_REPRESENTATION],
                None,
            )
            .await?;
        if rows.is_empty() {
            return Err(GatewayError::not_found(EntityKind::Prompt, id));
        }
        Ok(())
    }

    async fn record_version(&self, id: &PromptId, previous: &Prompt) -> GatewayResult<()> {
        self.transport
            .execute(
                Method::POST,
                "rest/v1/prompt_versions",
                Some(&NewVersionRow {
                    prompt_id: id.as_str(),
                    content: &previous.content,
                    version: previous.version,
                    created_at: previous.updated_at,
                }),
                &[],
                None,
            )
            .await
    }

    /// Puts back the row, and the tag links when `relink` is set, that an
    /// update started from.
    async fn revert_prompt(&self, id: &PromptId, previous: &Prompt, relink: bool) {
        let restored = async {
            self.write_prompt(id, previous).await?;
            if relink {
                self.replace_tags(id, &previous.tags).await?;
            }
            Ok::<_, GatewayError>(())
        };
        if let Err(err) = restored.await {
            warn!(prompt_id = %id, error = %err, "failed to revert partial prompt update");
        }
    }

    async fn find_collection(&self, id: &CollectionId) -> GatewayResult<Collection> {
        let rows: Vec<CollectionRow> = self
            .transport
            .json(
                Method::GET,
                &format!(
                    "rest/v1/collections?select={}&id={}",
                    encode_component(COLLECTION_SELECT),
                    eq(id.as_str())
                ),
                NO_BODY,
                &[],
                None,
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| GatewayError::not_found(EntityKind::Collection, id))?
            .into_collection()
    }

    async fn assign(
        &self,
        prompt_id: &PromptId,
        filter: &str,
        collection_id: Option<&CollectionId>,
    ) -> GatewayResult<bool> {
        let rows: Vec<IdRow> = self
            .transport
            .json(
                Method::PATCH,
                &format!("rest/v1/prompts?id={}{filter}&select=id", eq(prompt_id.as_str())),
                Some(&CollectionAssignment {
                    collection_id: collection_id.map(CollectionId::as_str),
                    updated_at: Utc::now(),
                }),
                &[RETURN_REPRESENTATION],
                None,
            )
            .await?;
        Ok(!rows.is_empty())
    }
}

#[async_trait]
impl PromptStore for HostedStore {
    fn metadata(&self) -> &StoreMetadata {
        &self.metadata
    }

    async fn list_prompts(&self, query: &PromptQuery) -> GatewayResult<Vec<Prompt>> {
        let rows: Vec<PromptRow> = self
            .transport
            .json(Method::GET, &prompts_path(query), NO_BODY, &[], None)
            .await?;
        rows.into_iter().map(PromptRow::into_prompt).collect()
    }

    async fn get_prompt(&self, id: &PromptId) -> GatewayResult<Prompt> {
        let rows: Vec<PromptRow> = self
            .transport
            .json(
                Method::GET,
                &format!(
                    "rest/v1/prompts?select={}&id={}",
                    encode_component(PROMPT_SELECT),
                    eq(id.as_str())
                ),
                NO_BODY,
                &[],
                None,
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| GatewayError::not_found(EntityKind::Prompt, id))?
            .into_prompt()
    }

    async fn create_prompt(&self, draft: PromptDraft) -> GatewayResult<Prompt> {
        draft.validate()?;
        let user = self.require_user()?;
        let row = NewPromptRow {
            user_id: user.id.as_str(),
            title: &draft.title,
            content: &draft.content,
            collection_id: draft.collection_id.as_ref().map(CollectionId::as_str),
            is_favorite: draft.is_favorite,
            is_private: draft.is_private,
            version: INITIAL_VERSION,
        };
        let created: Vec<IdRow> = self
            .transport
            .json(
                Method::POST,
                "rest/v1/prompts?select=id",
                Some(&row),
                &[RETURN_REPRESENTATION],
                None,
            )
            .await?;
        let id = created
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::transport("insert returned no prompt row"))?;
        let id = PromptId::new(id.id).map_err(|err| malformed(&err))?;

        if let Err(err) = self.link_tags(&id, &draft.tags).await {
            if let Err(cleanup) = self.delete_prompt(&id).await {
                warn!(prompt_id = %id, error = %cleanup, "failed to remove half-created prompt");
            }
            return Err(err);
        }
        debug!(prompt_id = %id, "created hosted prompt");
        self.get_prompt(&id).await
    }

    async fn update_prompt(&self, id: &PromptId, patch: PromptPatch) -> GatewayResult<Prompt> {
        patch.validate()?;
        let current = self.get_prompt(id).await?;
        let user = self.transport.credentials().user();
        if current.is_private && !current.is_owned_by(user.as_ref()) {
            return Err(GatewayError::auth("private prompt belongs to another user"));
        }

        let next = apply_patch(&current, &patch, Utc::now());
        self.write_prompt(id, &next).await?;

        let follow_up = async {
            if next.version != current.version {
                self.record_version(id, &current).await?;
            }
            if let Some(tags) = &patch.tags {
                self.replace_tags(id, tags).await?;
            }
            Ok::<_, GatewayError>(())
        };
        if let Err(err) = follow_up.await {
            self.revert_prompt(id, &current, patch.tags.is_some()).await;
            return Err(err);
        }
        self.get_prompt(id).await
    }

    async fn delete_prompt(&self, id: &PromptId) -> GatewayResult<()> {
        let rows: Vec<IdRow> = self
            .transport
            .json(
                Method::DELETE,
                &format!("rest/v1/prompts?id={}&select=id", eq(id.as_str())),
                NO_BODY,
                &[RETURN_REPRESENTATION],
                None,
            )
            .await?;
        if rows.is_empty() {
            return Err(GatewayError::not_found(EntityKind::Prompt, id));
        }
        Ok(())
    }

    async fn toggle_favorite(&self, id: &PromptId) -> GatewayResult<()> {
        self.require_user()?;
        let current = self.get_prompt(id).await?;
        self.transport
            .execute(
                Method::PATCH,
                &format!("rest/v1/prompts?id={}", eq(id.as_str())),
                Some(&FavoriteUpdate {
                    is_favorite: !current.is_favorite,
                }),
                &[],
                None,
            )
            .await
    }

    async fn list_collections(&self) -> GatewayResult<Vec<Collection>> {
        let rows: Vec<CollectionRow> = self
            .transport
            .json(
                Method::GET,
                &format!(
                    "rest/v1/collections?select={}&order=created_at.asc",
                    encode_component(COLLECTION_SELECT)
                ),
                NO_BODY,
                &[],
                None,
            )
            .await?;
        rows.into_iter().map(CollectionRow::into_collection).collect()
    }

    async fn create_collection(&self, draft: CollectionDraft) -> GatewayResult<Collection> {
        draft.validate()?;
        let user = self.require_user()?;
        let rows: Vec<CollectionRow> = self
            .transport
            .json(
                Method::POST,
                "rest/v1/collections",
                Some(&NewCollectionRow {
                    user_id: user.id.as_str(),
                    name: draft.name.trim(),
                    description: draft.description.as_deref(),
                }),
                &[RETURN_REPRESENTATION],
                None,
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| GatewayError::transport("insert returned no collection row"))?
            .into_collection()
    }

    async fn update_collection(
        &self,
        id: &CollectionId,
        patch: CollectionPatch,
    ) -> GatewayResult<Collection> {
        patch.validate()?;
        let current = self.find_collection(id).await?;
        let next = patch.apply(&current, Utc::now());
        let rows: Vec<IdRow> = self
            .transport
            .json(
                Method::PATCH,
                &format!("rest/v1/collections?id={}&select=id", eq(id.as_str())),
                Some(&CollectionUpdateRow {
                    name: &next.name,
                    description: next.description.as_deref(),
                    updated_at: next.updated_at,
                }),
                &[RETURN_REPRESENTATION],
                None,
            )
            .await?;
        if rows.is_empty() {
            return Err(GatewayError::not_found(EntityKind::Collection, id));
        }
        Ok(next)
    }

    async fn delete_collection(&self, id: &CollectionId) -> GatewayResult<()> {
        self.transport
            .execute(
                Method::PATCH,
                &format!("rest/v1/prompts?collection_id={}", eq(id.as_str())),
                Some(&CollectionAssignment {
                    collection_id: None,
                    updated_at: Utc::now(),
                }),
                &[],
                None,
            )
            .await?;
        let rows: Vec<IdRow> = self
            .transport
            .json(
                Method::DELETE,
                &format!("rest/v1/collections?id={}&select=id", eq(id.as_str())),
                NO_BODY,
                &[RETURN_REPRESENTATION],
                None,
            )
            .await?;
        if rows.is_empty() {
            return Err(GatewayError::not_found(EntityKind::Collection, id));
        }
        Ok(())
    }

    async fn add_to_collection(
        &self,
        prompt_id: &PromptId,
        collection_id: &CollectionId,
    ) -> GatewayResult<()> {
        self.require_user()?;
        self.find_collection(collection_id).await?;
        if self.assign(prompt_id, "", Some(collection_id)).await? {
            Ok(())
        } else {
            Err(GatewayError::not_found(EntityKind::Prompt, prompt_id))
        }
    }

    async fn remove_from_collection(
        &self,
        prompt_id: &PromptId,
        collection_id: &CollectionId,
    ) -> GatewayResult<()> {
        let filter = format!("&collection_id={}", eq(collection_id.as_str()));
        if self.assign(prompt_id, &filter, None).await? {
            return Ok(());
        }
        // Nothing matched: either not a member (fine) or the prompt is gone.
        self.get_prompt(prompt_id).await.map(|_| ())
    }

    async fn list_tags(&self) -> GatewayResult<Vec<Tag>> {
        let rows: Vec<TagRow> = self
            .transport
            .json(
                Method::GET,
                "rest/v1/tags?select=id,name&order=name.asc",
                NO_BODY,
                &[],
                None,
            )
            .await?;
        rows.into_iter().map(TagRow::into_tag).collect()
    }

    async fn create_tag(&self, name: &str) -> GatewayResult<Tag> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GatewayError::validation("tag name must not be empty"));
        }
        let candidates: Vec<TagRow> = self
            .transport
            .json(
                Method::GET,
                &format!(
                    "rest/v1/tags?select=id,name&name=ilike.{}",
                    encode_component(name)
                ),
                NO_BODY,
                &[],
                None,
            )
            .await?;
        let candidates = candidates
            .into_iter()
            .map(TagRow::into_tag)
            .collect::<GatewayResult<Vec<_>>>()?;
        if let Some(existing) = find_by_name(&candidates, name) {
            return Ok(existing.clone());
        }

        let rows: Vec<TagRow> = self
            .transport
            .json(
                Method::POST,
                "rest/v1/tags?select=id,name",
                Some(&NewTagRow { name }),
                &[RETURN_REPRESENTATION],
                None,
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| GatewayError::transport("insert returned no tag row"))?
            .into_tag()
    }

    async fn delete_tag(&self, id: &TagId) -> GatewayResult<()> {
        self.transport
            .execute(
                Method::DELETE,
                &format!("rest/v1/prompt_tags?tag_id={}", eq(id.as_str())),
                NO_BODY,
                &[],
                None,
            )
            .await?;
        let rows: Vec<IdRow> = self
            .transport
            .json(
                Method::DELETE,
                &format!("rest/v1/tags?id={}&select=id", eq(id.as_str())),
                NO_BODY,
                &[RETURN_REPRESENTATION],
                None,
            )
            .await?;
        if rows.is_empty() {
            return Err(GatewayError::not_found(EntityKind::Tag, id));
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct SignupData<'a> {
    username: &'a str,
}

#[derive(Serialize)]
struct SignupRequest<'a> {
    email: &'a str,
    password: &'a str,
    data: SignupData<'a>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthMetadata {
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: AuthMetadata,
}

impl AuthUser {
    fn fallback_user(&self) -> GatewayResult<User> {
        let email = self.email.clone().unwrap_or_default();
        let username = self
            .user_metadata
            .username
            .clone()
            .or_else(|| email.split('@').next().map(str::to_owned))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.id.clone());
        let id = UserId::new(self.id.clone()).map_err(|err| malformed(&err))?;
        User::with_id(id, username, email).map_err(|err| malformed(&err))
    }
}

#[derive(Debug, Deserialize)]
struct Session {
    access_token: String,
    user: AuthUser,
}

/// Sign-up answers with a session when auto-confirm is on, a bare user otherwise.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignupResponse {
    Session(Session),
    User(AuthUser),
}

/// Auth provider for the hosted platform's `/auth/v1` endpoints.
pub struct HostedAuthProvider {
    transport: HttpTransport,
}

impl fmt::Debug for HostedAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostedAuthProvider")
            .field("url", &self.transport.base_url())
            .finish_non_exhaustive()
    }
}

impl HostedAuthProvider {
    /// Builds a provider writing sessions into `credentials`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Configuration`] if the HTTP client cannot be built.
    pub fn new(config: &HostedConfig, credentials: CredentialStore) -> GatewayResult<Self> {
        Ok(Self {
            transport: config.transport(credentials)?,
        })
    }

    async fn profile(&self, id: &str) -> GatewayResult<Option<User>> {
        let rows: Vec<ProfileRow> = self
            .transport
            .json(
                Method::GET,
                &format!("rest/v1/profiles?select=id,username,email&id={}", eq(id)),
                NO_BODY,
                &[],
                None,
            )
            .await?;
        rows.into_iter().next().map(ProfileRow::into_user).transpose()
    }

    /// Stores the session, then upgrades the user from the `profiles` row.
    async fn establish(&self, session: Session) -> GatewayResult<User> {
        let fallback = session.user.fallback_user()?;
        self.transport.credentials().set(Credential {
            token: session.access_token.clone(),
            user: fallback.clone(),
        });

        let user = self
            .profile(&session.user.id)
            .await?
            .unwrap_or(fallback);
        self.transport.credentials().set(Credential {
            token: session.access_token,
            user: user.clone(),
        });
        Ok(user)
    }
}

#[async_trait]
impl AuthProvider for HostedAuthProvider {
    fn current_user(&self) -> Option<User> {
        self.transport.credentials().user()
    }

    async fn sign_in(&self, email: &str, password: &str) -> GatewayResult<User> {
        let session: Session = self
            .transport
            .json(
                Method::POST,
                "auth/v1/token?grant_type=password",
                Some(&PasswordGrant {
                    email: email.trim(),
                    password,
                }),
                &[],
                None,
            )
            .await?;
        let user = self.establish(session).await?;
        info!(user_id = %user.id, "signed in");
        Ok(user)
    }

    async fn sign_up(&self, username: &str, email: &str, password: &str) -> GatewayResult<User> {
        if username.trim().is_empty() || email.trim().is_empty() || password.is_empty() {
            return Err(GatewayError::validation(
                "username, email, and password are required",
            ));
        }
        let response: SignupResponse = self
            .transport
            .json(
                Method::POST,
                "auth/v1/signup",
                Some(&SignupRequest {
                    email: email.trim(),
                    password,
                    data: SignupData {
                        username: username.trim(),
                    },
                }),
                &[],
                None,
            )
            .await?;

        match response {
            SignupResponse::Session(session) => {
                let profile = ProfileRow {
                    id: session.user.id.clone(),
                    username: username.trim().to_owned(),
                    email: email.trim().to_owned(),
                };
                self.transport.credentials().set(Credential {
                    token: session.access_token.clone(),
                    user: session.user.fallback_user()?,
                });
                self.transport
                    .execute(
                        Method::POST,
                        "rest/v1/profiles",
                        Some(&profile),
                        &[("Prefer", "resolution=merge-duplicates")],
                        None,
                    )
                    .await?;
                let user = self.establish(session).await?;
                info!(user_id = %user.id, "signed up");
                Ok(user)
            }
            SignupResponse::User(pending) => {
                info!(user_id = %pending.id, "signed up; awaiting email confirmation");
                pending.fallback_user()
            }
        }
    }

    async fn sign_out(&self) -> GatewayResult<()> {
        let result = if self.transport.credentials().is_signed_in() {
            self.transport
                .execute(Method::POST, "auth/v1/logout", NO_BODY, &[], None)
                .await
        } else {
            Ok(())
        };
        self.transport.credentials().clear();
        result
    }
}
