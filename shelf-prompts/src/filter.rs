//! Derivation of the visible prompt list.
//!
//! [`derive_visible`] is a pure function: the same inputs always produce the
//! same output, so callers may re-run or memoize it freely.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use shelf_primitives::{CollectionId, Prompt, SortOption, TagId, User, ViewMode};

/// User-controlled filter and presentation state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterState {
    /// Only show prompts in this collection.
    pub selected_collection: Option<CollectionId>,
    /// Only show prompts carrying at least one of these tags.
    pub selected_tags: Vec<TagId>,
    /// Case-insensitive substring query.
    pub search_query: String,
    /// Ordering of the result.
    pub sort: SortOption,
    /// Presentation hint; does not affect the result.
    pub view_mode: ViewMode,
}

impl FilterState {
    /// Adds the tag to the selection, or removes it if already selected.
    pub fn toggle_tag(&mut self, tag_id: TagId) {
        if let Some(pos) = self.selected_tags.iter().position(|id| id == &tag_id) {
            self.selected_tags.remove(pos);
        } else {
            self.selected_tags.push(tag_id);
        }
    }

    /// Clears collection, tag, and search filters. Sort and view are kept.
    pub fn clear(&mut self) {
        self.selected_collection = None;
        self.selected_tags.clear();
        self.search_query.clear();
    }

    /// Returns `true` when any narrowing filter is set.
    #[must_use]
    pub fn is_filtering(&self) -> bool {
        self.selected_collection.is_some()
            || !self.selected_tags.is_empty()
            || !self.search_query.trim().is_empty()
    }
}

/// Computes the prompts a user sees.
///
/// Steps run in a fixed order: visibility (owner-or-public), collection,
/// tags (any selected tag matches), search, then a stable sort.
#[must_use]
pub fn derive_visible(
    prompts: &[Prompt],
    filter: &FilterState,
    current_user: Option<&User>,
) -> Vec<Prompt> {
    let query = filter.search_query.trim().to_lowercase();

    let mut visible: Vec<Prompt> = prompts
        .iter()
        .filter(|prompt| prompt.is_visible_to(current_user))
        .filter(|prompt| {
            filter
                .selected_collection
                .as_ref()
                .is_none_or(|selected| prompt.collection_id.as_ref() == Some(selected))
        })
        .filter(|prompt| {
            filter.selected_tags.is_empty()
                || filter.selected_tags.iter().any(|tag| prompt.has_tag(tag))
        })
        .filter(|prompt| query.is_empty() || matches_lowercase_query(prompt, &query))
        .cloned()
        .collect();

    sort_prompts(&mut visible, filter.sort);
    visible
}

/// Case-insensitive substring match on title, content, or any tag name.
#[must_use]
pub fn matches_search(prompt: &Prompt, query: &str) -> bool {
    let query = query.trim().to_lowercase();
    query.is_empty() || matches_lowercase_query(prompt, &query)
}

fn matches_lowercase_query(prompt: &Prompt, query: &str) -> bool {
    prompt.title.to_lowercase().contains(query)
        || prompt.content.to_lowercase().contains(query)
        || prompt
            .tags
            .iter()
            .any(|tag| tag.name.to_lowercase().contains(query))
}

/// Stable in-place sort; ties keep their relative order.
pub fn sort_prompts(prompts: &mut [Prompt], sort: SortOption) {
    match sort {
        SortOption::Newest => prompts.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortOption::Oldest => prompts.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        SortOption::Alphabetical => prompts.sort_by(|a, b| compare_titles(&a.title, &b.title)),
        SortOption::Updated => prompts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at)),
    }
}

/// Collation for titles.
///
/// Accents and case are folded away first, so `Éclair` lands between
/// `apple` and `Zebra`; the raw text breaks remaining ties.
#[must_use]
pub fn compare_titles(a: &str, b: &str) -> Ordering {
    collation_key(a)
        .cmp(&collation_key(b))
        .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
        .then_with(|| a.cmp(b))
}

fn collation_key(title: &str) -> String {
    deunicode::deunicode(title).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use shelf_primitives::{PromptDraft, Tag};

    struct Fixture {
        owner: User,
        stranger: User,
        alpha: Tag,
        beta: Tag,
        collection: CollectionId,
        prompts: Vec<Prompt>,
    }

    fn fixture() -> Fixture {
        let owner = User::new("ada", "ada@example.com").unwrap();
        let stranger = User::new("bob", "bob@example.com").unwrap();
        let alpha = Tag::new("alpha").unwrap();
        let beta = Tag::new("beta").unwrap();
        let collection = CollectionId::random();
        let base = Utc::now();

        let make = |title: &str, content: &str, offset: i64| {
            let mut prompt = Prompt::from_draft(
                PromptDraft::new(title, content),
                Some(owner.id.clone()),
                base + Duration::seconds(offset),
            )
            .unwrap();
            prompt.updated_at = base + Duration::seconds(100 - offset);
            prompt
        };

        let mut writing = make("writing coach", "Improve {text}", 1);
        writing.tags = vec![alpha.clone()];
        writing.collection_id = Some(collection.clone());

        let mut review = make("Code review", "Review this diff", 2);
        review.tags = vec![beta.clone()];

        let mut secret = make("Secret plan", "private notes", 3);
        secret.is_private = true;
        secret.tags = vec![alpha.clone(), beta.clone()];

        Fixture {
            owner,
            stranger,
            alpha,
            beta,
            collection,
            prompts: vec![writing, review, secret],
        }
    }

    fn titles(prompts: &[Prompt]) -> Vec<&str> {
        prompts.iter().map(|p| p.title.as_str()).collect()
    }

    #[test]
    fn accented_titles_sort_with_their_base_letter() {
        let mut titles = vec!["Zebra", "Éclair", "apple", "eclair"];
        titles.sort_by(|a, b| compare_titles(a, b));
        assert_eq!(titles, vec!["apple", "eclair", "Éclair", "Zebra"]);
    }

    #[test]
    fn hides_private_prompts_from_others() {
        let fx = fixture();
        let filter = FilterState::default();

        assert_eq!(derive_visible(&fx.prompts, &filter, Some(&fx.owner)).len(), 3);
        assert_eq!(derive_visible(&fx.prompts, &filter, Some(&fx.stranger)).len(), 2);
        assert_eq!(derive_visible(&fx.prompts, &filter, None).len(), 2);
    }

    #[test]
    fn tag_filter_matches_any_selected_tag() {
        let fx = fixture();
        let mut filter = FilterState::default();
        filter.toggle_tag(fx.alpha.id.clone());
        filter.toggle_tag(fx.beta.id.clone());

        let visible = derive_visible(&fx.prompts, &filter, Some(&fx.owner));
        assert_eq!(visible.len(), 3);

        filter.toggle_tag(fx.beta.id.clone());
        let visible = derive_visible(&fx.prompts, &filter, Some(&fx.owner));
        assert_eq!(titles(&visible), vec!["Secret plan", "writing coach"]);
    }

    #[test]
    fn search_covers_title_content_and_tags() {
        let fx = fixture();
        let mut filter = FilterState {
            search_query: "DIFF".to_owned(),
            ..FilterState::default()
        };
        assert_eq!(
            titles(&derive_visible(&fx.prompts, &filter, None)),
            vec!["Code review"]
        );

        filter.search_query = "alp".to_owned();
        assert_eq!(
            titles(&derive_visible(&fx.prompts, &filter, Some(&fx.owner))),
            vec!["Secret plan", "writing coach"]
        );
    }

    #[test]
    fn collection_and_search_can_empty_the_view() {
        let fx = fixture();
        let mut filter = FilterState {
            selected_collection: Some(fx.collection.clone()),
            search_query: "test".to_owned(),
            ..FilterState::default()
        };
        assert!(derive_visible(&fx.prompts, &filter, Some(&fx.owner)).is_empty());

        filter.clear();
        assert_eq!(derive_visible(&fx.prompts, &filter, Some(&fx.owner)).len(), 3);
    }

    #[test]
    fn sorts_by_each_option() {
        let fx = fixture();
        let mut filter = FilterState::default();
        let user = Some(&fx.owner);

        assert_eq!(
            titles(&derive_visible(&fx.prompts, &filter, user)),
            vec!["Secret plan", "Code review", "writing coach"]
        );

        filter.sort = SortOption::Oldest;
        assert_eq!(
            titles(&derive_visible(&fx.prompts, &filter, user)),
            vec!["writing coach", "Code review", "Secret plan"]
        );

        filter.sort = SortOption::Alphabetical;
        assert_eq!(
            titles(&derive_visible(&fx.prompts, &filter, user)),
            vec!["Code review", "Secret plan", "writing coach"]
        );

        filter.sort = SortOption::Updated;
        assert_eq!(
            titles(&derive_visible(&fx.prompts, &filter, user)),
            vec!["writing coach", "Code review", "Secret plan"]
        );
    }

    #[test]
    fn sort_is_stable_for_ties() {
        let fx = fixture();
        let mut prompts = fx.prompts.clone();
        let stamp = prompts[0].created_at;
        for prompt in &mut prompts {
            prompt.created_at = stamp;
        }

        let filter = FilterState::default();
        let visible = derive_visible(&prompts, &filter, Some(&fx.owner));
        assert_eq!(
            titles(&visible),
            vec!["writing coach", "Code review", "Secret plan"]
        );
    }

    #[test]
    fn derivation_is_idempotent() {
        let fx = fixture();
        let filter = FilterState {
            search_query: "e".to_owned(),
            sort: SortOption::Alphabetical,
            ..FilterState::default()
        };
        let first = derive_visible(&fx.prompts, &filter, Some(&fx.owner));
        let second = derive_visible(&fx.prompts, &filter, Some(&fx.owner));
        assert_eq!(first, second);
    }
}
