//! Named groupings of prompts.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::require_non_empty;
use crate::{CollectionId, Prompt, PromptId, Result, UserId};

/// A named grouping of prompts; a prompt sits in at most one collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    /// Collection identifier.
    pub id: CollectionId,
    /// Non-empty name.
    pub name: String,
    /// Optional free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Mirror of every `Prompt::collection_id` pointing here.
    #[serde(default)]
    pub prompt_ids: BTreeSet<PromptId>,
    /// Owner, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<UserId>,
    /// Creation timestamp.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Collection {
    /// Stamps a draft with a fresh identifier and initial timestamps.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Validation`] when the name is blank.
    pub fn from_draft(
        draft: CollectionDraft,
        created_by: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        draft.validate()?;
        Ok(Self {
            id: CollectionId::random(),
            name: draft.name.trim().to_owned(),
            description: draft.description.filter(|text| !text.trim().is_empty()),
            prompt_ids: BTreeSet::new(),
            created_by,
            created_at: now,
            updated_at: now,
        })
    }

    /// Returns `true` when the prompt is listed as a member.
    #[must_use]
    pub fn contains(&self, prompt_id: &PromptId) -> bool {
        self.prompt_ids.contains(prompt_id)
    }
}

/// Rebuilds every collection's `prompt_ids` from `Prompt::collection_id`.
///
/// Prompts pointing at an unknown collection contribute nothing.
pub fn reindex_memberships(collections: &mut [Collection], prompts: &[Prompt]) {
    for collection in collections.iter_mut() {
        collection.prompt_ids = prompts
            .iter()
            .filter(|prompt| prompt.collection_id.as_ref() == Some(&collection.id))
            .map(|prompt| prompt.id.clone())
            .collect();
    }
}

/// Fields supplied when creating a collection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDraft {
    /// Name of the new collection.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CollectionDraft {
    /// Starts a draft with the supplied name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Checks that the name is present.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Validation`] when the name is blank.
    pub fn validate(&self) -> Result<()> {
        require_non_empty("collection name", &self.name)
    }
}

/// Partial update of a collection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionPatch {
    /// New name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// `Some(None)` clears the description.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::double_option"
    )]
    pub description: Option<Option<String>>,
}

impl CollectionPatch {
    /// Sets the name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets or clears the description.
    #[must_use]
    pub fn description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    /// Rejects a blank name.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Validation`] when a supplied name is blank.
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            require_non_empty("collection name", name)?;
        }
        Ok(())
    }

    /// Applies the patch, producing a new collection value.
    #[must_use]
    pub fn apply(&self, collection: &Collection, now: DateTime<Utc>) -> Collection {
        let mut next = collection.clone();
        if let Some(name) = &self.name {
            next.name = name.trim().to_owned();
        }
        if let Some(description) = &self.description {
            next.description.clone_from(description);
        }
        next.updated_at = now.max(collection.created_at);
        next
    }
}
