//! Entity state owned by the library and the edits it can undo.

use shelf_primitives::{
    Collection, CollectionId, EntityKind, Prompt, PromptId, Tag, TagId, User,
    reindex_memberships,
};
use shelf_prompts::{FilterState, derive_visible};

use crate::error::LibraryError;
use crate::snapshot::LibrarySnapshot;

/// Pre-mutation value of one piece of state.
///
/// Entities carry their list position so a rollback puts them back where
/// they were. `None` means the entity did not exist before the mutation.
#[derive(Debug, Clone)]
pub(crate) enum Preimage {
    Prompt {
        id: PromptId,
        before: Option<(usize, Prompt)>,
    },
    Collection {
        id: CollectionId,
        before: Option<(usize, Collection)>,
    },
    Tag {
        id: TagId,
        before: Option<(usize, Tag)>,
    },
    SelectedCollection(Option<CollectionId>),
    SelectedTags(Vec<TagId>),
}

/// Which piece of state a [`Preimage`] covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum PreimageKey {
    Prompt(PromptId),
    Collection(CollectionId),
    Tag(TagId),
    SelectedCollection,
    SelectedTags,
}

impl Preimage {
    pub fn key(&self) -> PreimageKey {
        match self {
            Self::Prompt { id, .. } => PreimageKey::Prompt(id.clone()),
            Self::Collection { id, .. } => PreimageKey::Collection(id.clone()),
            Self::Tag { id, .. } => PreimageKey::Tag(id.clone()),
            Self::SelectedCollection(_) => PreimageKey::SelectedCollection,
            Self::SelectedTags(_) => PreimageKey::SelectedTags,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct EntityState {
    pub prompts: Vec<Prompt>,
    pub collections: Vec<Collection>,
    pub tags: Vec<Tag>,
    pub filter: FilterState,
    pub current_user: Option<User>,
    pub loading: bool,
    pub last_error: Option<LibraryError>,
}

fn put_back<T>(items: &mut Vec<T>, is_target: impl Fn(&T) -> bool, before: Option<(usize, T)>) {
    items.retain(|item| !is_target(item));
    if let Some((index, value)) = before {
        let index = index.min(items.len());
        items.insert(index, value);
    }
}

fn replace_or_insert<T>(
    items: &mut Vec<T>,
    position: Option<usize>,
    value: T,
    at_front: bool,
) {
    match position {
        Some(index) => items[index] = value,
        None if at_front => items.insert(0, value),
        None => items.push(value),
    }
}

impl EntityState {
    pub fn prompt_index(&self, id: &PromptId) -> Option<usize> {
        self.prompts.iter().position(|prompt| &prompt.id == id)
    }

    pub fn collection_index(&self, id: &CollectionId) -> Option<usize> {
        self.collections
            .iter()
            .position(|collection| &collection.id == id)
    }

    pub fn tag_index(&self, id: &TagId) -> Option<usize> {
        self.tags.iter().position(|tag| &tag.id == id)
    }

    pub fn capture_prompt(&self, id: &PromptId) -> Preimage {
        Preimage::Prompt {
            id: id.clone(),
            before: self
                .prompt_index(id)
                .map(|index| (index, self.prompts[index].clone())),
        }
    }

    pub fn capture_collection(&self, id: &CollectionId) -> Preimage {
        Preimage::Collection {
            id: id.clone(),
            before: self
                .collection_index(id)
                .map(|index| (index, self.collections[index].clone())),
        }
    }

    pub fn capture_tag(&self, id: &TagId) -> Preimage {
        Preimage::Tag {
            id: id.clone(),
            before: self.tag_index(id).map(|index| (index, self.tags[index].clone())),
        }
    }

    /// Undoes edits, newest first.
    pub fn restore(&mut self, preimages: Vec<Preimage>) {
        for preimage in preimages.into_iter().rev() {
            match preimage {
                Preimage::Prompt { id, before } => {
                    put_back(&mut self.prompts, |prompt| prompt.id == id, before);
                }
                Preimage::Collection { id, before } => {
                    put_back(&mut self.collections, |c| c.id == id, before);
                }
                Preimage::Tag { id, before } => {
                    put_back(&mut self.tags, |tag| tag.id == id, before);
                }
                Preimage::SelectedCollection(selected) => {
                    self.filter.selected_collection = selected;
                }
                Preimage::SelectedTags(selected) => self.filter.selected_tags = selected,
            }
        }
    }

    /// Removes a collection and detaches its prompts, returning what was touched.
    pub fn remove_collection(&mut self, id: &CollectionId) -> Vec<Preimage> {
        let mut touched = vec![self.capture_collection(id)];
        self.collections.retain(|collection| &collection.id != id);

        for index in 0..self.prompts.len() {
            if self.prompts[index].collection_id.as_ref() == Some(id) {
                touched.push(Preimage::Prompt {
                    id: self.prompts[index].id.clone(),
                    before: Some((index, self.prompts[index].clone())),
                });
                self.prompts[index].collection_id = None;
            }
        }

        if self.filter.selected_collection.as_ref() == Some(id) {
            touched.push(Preimage::SelectedCollection(
                self.filter.selected_collection.take(),
            ));
        }
        touched
    }

    /// Removes a tag from the tag list, every prompt, and the tag filter.
    pub fn remove_tag(&mut self, id: &TagId) -> Vec<Preimage> {
        let mut touched = vec![self.capture_tag(id)];
        self.tags.retain(|tag| &tag.id != id);

        for index in 0..self.prompts.len() {
            if self.prompts[index].has_tag(id) {
                touched.push(Preimage::Prompt {
                    id: self.prompts[index].id.clone(),
                    before: Some((index, self.prompts[index].clone())),
                });
                self.prompts[index].tags.retain(|tag| &tag.id != id);
            }
        }

        if self.filter.selected_tags.contains(id) {
            touched.push(Preimage::SelectedTags(self.filter.selected_tags.clone()));
            self.filter.selected_tags.retain(|selected| selected != id);
        }
        touched
    }

    /// Drops an entity the backend no longer knows, cascading like a delete.
    pub fn forget(&mut self, kind: EntityKind, id: &str) {
        match kind {
            EntityKind::Prompt => self.prompts.retain(|prompt| prompt.id.as_str() != id),
            EntityKind::Collection => {
                if let Some(index) = self.collections.iter().position(|c| c.id.as_str() == id) {
                    let id = self.collections[index].id.clone();
                    self.remove_collection(&id);
                }
            }
            EntityKind::Tag => {
                if let Some(index) = self.tags.iter().position(|tag| tag.id.as_str() == id) {
                    let id = self.tags[index].id.clone();
                    self.remove_tag(&id);
                }
            }
            EntityKind::User => {}
        }
    }

    /// Installs the backend's copy of a prompt over `local_id` (a provisional
    /// or the same id), keeping its list position.
    pub fn reconcile_prompt(&mut self, local_id: &PromptId, prompt: Prompt) {
        if local_id != &prompt.id && self.prompt_index(local_id).is_some() {
            // A refresh may already have brought in the server copy.
            self.prompts.retain(|existing| existing.id != prompt.id);
        }
        let position = self
            .prompt_index(local_id)
            .or_else(|| self.prompt_index(&prompt.id));
        replace_or_insert(&mut self.prompts, position, prompt, true);
    }

    pub fn reconcile_collection(&mut self, local_id: &CollectionId, collection: Collection) {
        if local_id != &collection.id {
            if self.collection_index(local_id).is_some() {
                self.collections.retain(|existing| existing.id != collection.id);
            }
            for prompt in &mut self.prompts {
                if prompt.collection_id.as_ref() == Some(local_id) {
                    prompt.collection_id = Some(collection.id.clone());
                }
            }
            if self.filter.selected_collection.as_ref() == Some(local_id) {
                self.filter.selected_collection = Some(collection.id.clone());
            }
        }
        let position = self
            .collection_index(local_id)
            .or_else(|| self.collection_index(&collection.id));
        replace_or_insert(&mut self.collections, position, collection, false);
    }

    /// Swaps a provisional tag for the backend's tag. When the backend tag is
    /// already present the provisional entry is dropped instead.
    pub fn reconcile_tag(&mut self, local_id: &TagId, tag: Tag) {
        if local_id != &tag.id {
            for prompt in &mut self.prompts {
                for attached in &mut prompt.tags {
                    if &attached.id == local_id {
                        *attached = tag.clone();
                    }
                }
                prompt.tags = shelf_primitives::dedup_by_id(std::mem::take(&mut prompt.tags));
            }
            let mut selected = Vec::with_capacity(self.filter.selected_tags.len());
            for id in self.filter.selected_tags.drain(..) {
                let id = if &id == local_id { tag.id.clone() } else { id };
                if !selected.contains(&id) {
                    selected.push(id);
                }
            }
            self.filter.selected_tags = selected;

            if self.tag_index(&tag.id).is_some() {
                self.tags.retain(|existing| &existing.id != local_id);
            }
        }
        let position = self.tag_index(local_id).or_else(|| self.tag_index(&tag.id));
        replace_or_insert(&mut self.tags, position, tag, false);
    }

    /// Restores derived invariants: collection mirrors and filter references.
    pub fn normalize(&mut self) {
        reindex_memberships(&mut self.collections, &self.prompts);

        if let Some(selected) = &self.filter.selected_collection {
            if self.collection_index(selected).is_none() {
                self.filter.selected_collection = None;
            }
        }
        let tags = &self.tags;
        self.filter
            .selected_tags
            .retain(|id| tags.iter().any(|tag| &tag.id == id));
    }

    pub fn snapshot(&self, revision: u64, pending: usize) -> LibrarySnapshot {
        LibrarySnapshot {
            revision,
            prompts: self.prompts.clone(),
            collections: self.collections.clone(),
            tags: self.tags.clone(),
            filter: self.filter.clone(),
            visible: derive_visible(&self.prompts, &self.filter, self.current_user.as_ref()),
            current_user: self.current_user.clone(),
            loading: self.loading,
            pending,
            last_error: self.last_error.clone(),
        }
    }
}
