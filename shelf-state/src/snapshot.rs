//! Immutable views published after every state change.

use shelf_primitives::{Collection, CollectionId, Prompt, PromptId, Tag, TagId, User};
use shelf_prompts::FilterState;

use crate::error::LibraryError;

/// Everything a presentation layer renders, frozen at one revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibrarySnapshot {
    pub(crate) revision: u64,
    pub(crate) prompts: Vec<Prompt>,
    pub(crate) collections: Vec<Collection>,
    pub(crate) tags: Vec<Tag>,
    pub(crate) filter: FilterState,
    pub(crate) visible: Vec<Prompt>,
    pub(crate) current_user: Option<User>,
    pub(crate) loading: bool,
    pub(crate) pending: usize,
    pub(crate) last_error: Option<LibraryError>,
}

impl LibrarySnapshot {
    /// Publication counter; strictly increases.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Every prompt held locally, private ones included.
    #[must_use]
    pub fn prompts(&self) -> &[Prompt] {
        &self.prompts
    }

    /// All collections, with `prompt_ids` mirroring prompt membership.
    #[must_use]
    pub fn collections(&self) -> &[Collection] {
        &self.collections
    }

    /// All tags.
    #[must_use]
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Current filter selections.
    #[must_use]
    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    /// Prompts after visibility, filters, and sort.
    #[must_use]
    pub fn visible(&self) -> &[Prompt] {
        &self.visible
    }

    /// Signed-in user, if any.
    #[must_use]
    pub fn current_user(&self) -> Option<&User> {
        self.current_user.as_ref()
    }

    /// `true` while a refresh is running.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.loading
    }

    /// Number of mutations applied locally but not yet settled.
    #[must_use]
    pub const fn pending_mutations(&self) -> usize {
        self.pending
    }

    /// Most recent refresh or rollback error.
    #[must_use]
    pub fn last_error(&self) -> Option<&LibraryError> {
        self.last_error.as_ref()
    }

    /// Looks up a prompt by id.
    #[must_use]
    pub fn prompt(&self, id: &PromptId) -> Option<&Prompt> {
        self.prompts.iter().find(|prompt| &prompt.id == id)
    }

    /// Looks up a collection by id.
    #[must_use]
    pub fn collection(&self, id: &CollectionId) -> Option<&Collection> {
        self.collections.iter().find(|collection| &collection.id == id)
    }

    /// Looks up a tag by id.
    #[must_use]
    pub fn tag(&self, id: &TagId) -> Option<&Tag> {
        self.tags.iter().find(|tag| &tag.id == id)
    }

    /// Prompts assigned to a collection, in list order.
    pub fn prompts_in<'a>(&'a self, id: &'a CollectionId) -> impl Iterator<Item = &'a Prompt> {
        self.prompts
            .iter()
            .filter(move |prompt| prompt.collection_id.as_ref() == Some(id))
    }

    /// Favorite prompts the current user can see.
    pub fn favorites(&self) -> impl Iterator<Item = &Prompt> {
        self.prompts
            .iter()
            .filter(|prompt| prompt.is_favorite && prompt.is_visible_to(self.current_user.as_ref()))
    }
}
