//! Prompts, their drafts and patches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::require_non_empty;
use crate::tag::dedup_by_id;
use crate::{CollectionId, Error, PromptId, Result, Tag, TagId, User, UserId};

/// Version assigned to freshly created prompts.
pub const INITIAL_VERSION: u32 = 1;

const fn initial_version() -> u32 {
    INITIAL_VERSION
}

/// Content of a prompt as it was before an edit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSnapshot {
    /// Version number the content carried.
    pub version: u32,
    /// Content at that version.
    pub content: String,
    /// `updatedAt` of the prompt while it held this version.
    pub updated_at: DateTime<Utc>,
}

/// A stored reusable text template with metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    /// Prompt identifier.
    pub id: PromptId,
    /// Non-empty title.
    pub title: String,
    /// Body, possibly containing `{name}` / `{{name}}` placeholders.
    pub content: String,
    /// Attached tags, unique by id, in insertion order.
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Collection the prompt belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<CollectionId>,
    /// Favorite flag.
    #[serde(default)]
    pub is_favorite: bool,
    /// Private prompts are only visible to their owner.
    #[serde(default)]
    pub is_private: bool,
    /// Owner, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<UserId>,
    /// Content version, starting at [`INITIAL_VERSION`].
    #[serde(default = "initial_version")]
    pub version: u32,
    /// Previous contents, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub version_history: Vec<VersionSnapshot>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Prompt {
    /// Stamps a draft with a fresh identifier and initial timestamps.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the draft's title or content is blank.
    pub fn from_draft(
        draft: PromptDraft,
        created_by: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        draft.validate()?;
        Ok(Self {
            id: PromptId::random(),
            title: draft.title,
            content: draft.content,
            tags: dedup_by_id(draft.tags),
            collection_id: draft.collection_id,
            is_favorite: draft.is_favorite,
            is_private: draft.is_private,
            created_by,
            version: INITIAL_VERSION,
            version_history: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Checks the entity invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the first violated invariant.
    pub fn validate(&self) -> Result<()> {
        require_non_empty("title", &self.title)?;
        if self.version < INITIAL_VERSION {
            return Err(Error::validation("version", "must be at least 1"));
        }
        if self.updated_at < self.created_at {
            return Err(Error::validation(
                "updatedAt",
                "must not precede createdAt",
            ));
        }
        Ok(())
    }

    /// Returns `true` when `user` created this prompt.
    #[must_use]
    pub fn is_owned_by(&self, user: Option<&User>) -> bool {
        match (self.created_by.as_ref(), user) {
            (Some(owner), Some(user)) => owner == &user.id,
            _ => false,
        }
    }

    /// Owner-or-public rule: private prompts are visible to their owner only.
    #[must_use]
    pub fn is_visible_to(&self, user: Option<&User>) -> bool {
        !self.is_private || self.is_owned_by(user)
    }

    /// Returns `true` when the prompt carries the tag.
    #[must_use]
    pub fn has_tag(&self, tag_id: &TagId) -> bool {
        self.tags.iter().any(|tag| &tag.id == tag_id)
    }

    /// Iterates over the ids of attached tags.
    pub fn tag_ids(&self) -> impl Iterator<Item = &TagId> {
        self.tags.iter().map(|tag| &tag.id)
    }
}

/// Fields supplied by a user when creating a prompt.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptDraft {
    /// Title of the new prompt.
    pub title: String,
    /// Content of the new prompt.
    pub content: String,
    /// Tags to attach.
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Collection to place the prompt in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<CollectionId>,
    /// Initial favorite flag.
    #[serde(default)]
    pub is_favorite: bool,
    /// Initial privacy flag.
    #[serde(default)]
    pub is_private: bool,
}

impl PromptDraft {
    /// Starts a public, untagged draft.
    #[must_use]
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    /// Attaches tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }

    /// Places the prompt in a collection.
    #[must_use]
    pub fn in_collection(mut self, collection_id: CollectionId) -> Self {
        self.collection_id = Some(collection_id);
        self
    }

    /// Marks the prompt private.
    #[must_use]
    pub fn private(mut self) -> Self {
        self.is_private = true;
        self
    }

    /// Marks the prompt as a favorite.
    #[must_use]
    pub fn favorite(mut self) -> Self {
        self.is_favorite = true;
        self
    }

    /// Checks that title and content are present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a blank title or content.
    pub fn validate(&self) -> Result<()> {
        require_non_empty("title", &self.title)?;
        require_non_empty("content", &self.content)
    }
}

/// Partial update of a prompt. `None` leaves a field untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptPatch {
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New content; bumps the version when it differs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Replacement tag set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<Tag>>,
    /// `Some(None)` clears the collection, `Some(Some(id))` reassigns it.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::double_option"
    )]
    pub collection_id: Option<Option<CollectionId>>,
    /// New favorite flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_favorite: Option<bool>,
    /// New privacy flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_private: Option<bool>,
}

impl PromptPatch {
    /// Sets the title.
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the content.
    #[must_use]
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Replaces the tag set.
    #[must_use]
    pub fn tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Reassigns (or with `None`, clears) the collection.
    #[must_use]
    pub fn collection(mut self, collection_id: Option<CollectionId>) -> Self {
        self.collection_id = Some(collection_id);
        self
    }

    /// Sets the favorite flag.
    #[must_use]
    pub fn favorite(mut self, is_favorite: bool) -> Self {
        self.is_favorite = Some(is_favorite);
        self
    }

    /// Sets the privacy flag.
    #[must_use]
    pub fn private(mut self, is_private: bool) -> Self {
        self.is_private = Some(is_private);
        self
    }

    /// Returns `true` when the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.tags.is_none()
            && self.collection_id.is_none()
            && self.is_favorite.is_none()
            && self.is_private.is_none()
    }

    /// Rejects blank titles or contents.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when a supplied title or content is blank.
    pub fn validate(&self) -> Result<()> {
        if let Some(title) = &self.title {
            require_non_empty("title", title)?;
        }
        if let Some(content) = &self.content {
            require_non_empty("content", content)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> User {
        User::new(name, format!("{name}@example.com")).unwrap()
    }

    #[test]
    fn draft_requires_title_and_content() {
        assert!(PromptDraft::new("T", "C").validate().is_ok());
        let err = PromptDraft::new(" ", "C").validate().unwrap_err();
        assert!(matches!(err, Error::Validation { field: "title", .. }));
        let err = PromptDraft::new("T", "").validate().unwrap_err();
        assert!(matches!(err, Error::Validation { field: "content", .. }));
    }

    #[test]
    fn from_draft_stamps_initial_state() {
        let owner = user("ada");
        let now = Utc::now();
        let prompt =
            Prompt::from_draft(PromptDraft::new("T", "C"), Some(owner.id.clone()), now).unwrap();

        assert_eq!(prompt.version, INITIAL_VERSION);
        assert!(prompt.version_history.is_empty());
        assert_eq!(prompt.created_by, Some(owner.id));
        assert_eq!(prompt.created_at, prompt.updated_at);
        assert!(prompt.validate().is_ok());
    }

    #[test]
    fn private_prompts_visible_to_owner_only() {
        let owner = user("ada");
        let other = user("bob");
        let mut prompt = Prompt::from_draft(
            PromptDraft::new("T", "C").private(),
            Some(owner.id.clone()),
            Utc::now(),
        )
        .unwrap();

        assert!(prompt.is_visible_to(Some(&owner)));
        assert!(!prompt.is_visible_to(Some(&other)));
        assert!(!prompt.is_visible_to(None));

        prompt.is_private = false;
        assert!(prompt.is_visible_to(None));
    }

    #[test]
    fn patch_distinguishes_absent_and_null_collection() {
        let clear: PromptPatch = serde_json::from_str(r#"{"collectionId": null}"#).unwrap();
        assert_eq!(clear.collection_id, Some(None));

        let untouched: PromptPatch = serde_json::from_str(r#"{"title": "x"}"#).unwrap();
        assert_eq!(untouched.collection_id, None);

        let json = serde_json::to_value(PromptPatch::default().collection(None)).unwrap();
        assert_eq!(json, serde_json::json!({"collectionId": null}));
    }

    #[test]
    fn prompt_wire_format_is_camel_case() {
        let prompt =
            Prompt::from_draft(PromptDraft::new("T", "C"), None, Utc::now()).unwrap();
        let json = serde_json::to_value(&prompt).unwrap();
        assert!(json.get("isFavorite").is_some());
        assert!(json.get("createdAt").is_some());
        assert!(json.get("versionHistory").is_none());
    }
}
