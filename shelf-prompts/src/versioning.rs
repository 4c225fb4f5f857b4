//! Content-history rule applied whenever a prompt is edited.
//!
//! History is append-only and never pruned, so it grows with every content
//! change.

use chrono::{DateTime, Utc};
use shelf_primitives::{Prompt, PromptPatch, VersionSnapshot, dedup_by_id};
use tracing::trace;

/// Replaces a prompt's content, archiving the previous version.
///
/// Identical content is a no-op and returns an unchanged copy. Otherwise the
/// pre-change `(version, content, updatedAt)` triple is appended to the
/// history and the version advances by one.
#[must_use]
pub fn record_version(prompt: &Prompt, new_content: &str, now: DateTime<Utc>) -> Prompt {
    if new_content == prompt.content {
        return prompt.clone();
    }

    let mut next = prompt.clone();
    next.version_history.push(VersionSnapshot {
        version: prompt.version,
        content: prompt.content.clone(),
        updated_at: prompt.updated_at,
    });
    next.version = prompt.version + 1;
    new_content.clone_into(&mut next.content);
    next.updated_at = now.max(prompt.created_at);

    trace!(prompt_id = %prompt.id, version = next.version, "recorded prompt version");
    next
}

/// Applies a partial update, routing content changes through [`record_version`].
///
/// `updatedAt` is refreshed even when only metadata changes.
#[must_use]
pub fn apply_patch(prompt: &Prompt, patch: &PromptPatch, now: DateTime<Utc>) -> Prompt {
    let mut next = match &patch.content {
        Some(content) => record_version(prompt, content, now),
        None => prompt.clone(),
    };

    if let Some(title) = &patch.title {
        title.clone_into(&mut next.title);
    }
    if let Some(tags) = &patch.tags {
        next.tags = dedup_by_id(tags.clone());
    }
    if let Some(collection_id) = &patch.collection_id {
        next.collection_id.clone_from(collection_id);
    }
    if let Some(is_favorite) = patch.is_favorite {
        next.is_favorite = is_favorite;
    }
    if let Some(is_private) = patch.is_private {
        next.is_private = is_private;
    }
    next.updated_at = now.max(prompt.created_at);
    next
}

/// History for display, newest entry first.
pub fn history_newest_first(prompt: &Prompt) -> impl Iterator<Item = &VersionSnapshot> {
    prompt.version_history.iter().rev()
}

/// Content the prompt held at `version`, whether current or archived.
#[must_use]
pub fn content_at(prompt: &Prompt, version: u32) -> Option<&str> {
    if version == prompt.version {
        return Some(&prompt.content);
    }
    prompt
        .version_history
        .iter()
        .find(|snapshot| snapshot.version == version)
        .map(|snapshot| snapshot.content.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use shelf_primitives::{CollectionId, PromptDraft};

    fn prompt() -> Prompt {
        Prompt::from_draft(PromptDraft::new("T", "C"), None, Utc::now()).unwrap()
    }

    #[test]
    fn content_change_bumps_version_and_archives() {
        let original = prompt();
        let later = original.updated_at + Duration::seconds(5);
        let next = record_version(&original, "C2", later);

        assert_eq!(next.version, original.version + 1);
        assert_eq!(next.content, "C2");
        assert_eq!(next.updated_at, later);
        assert_eq!(
            next.version_history,
            vec![VersionSnapshot {
                version: 1,
                content: "C".to_owned(),
                updated_at: original.updated_at,
            }]
        );
    }

    #[test]
    fn same_content_is_a_no_op() {
        let original = prompt();
        let next = record_version(&original, "C", original.updated_at + Duration::seconds(5));
        assert_eq!(next, original);
    }

    #[test]
    fn history_is_append_only() {
        let original = prompt();
        let now = original.created_at;
        let v2 = record_version(&original, "C2", now + Duration::seconds(1));
        let v3 = record_version(&v2, "C3", now + Duration::seconds(2));

        assert_eq!(v3.version, 3);
        assert_eq!(v3.version_history.len(), 2);
        assert_eq!(v3.version_history[0].content, "C");
        assert_eq!(v3.version_history[1].content, "C2");

        let newest: Vec<u32> = history_newest_first(&v3).map(|s| s.version).collect();
        assert_eq!(newest, vec![2, 1]);
        assert_eq!(content_at(&v3, 1), Some("C"));
        assert_eq!(content_at(&v3, 3), Some("C3"));
        assert_eq!(content_at(&v3, 9), None);
    }

    #[test]
    fn metadata_patch_keeps_version() {
        let original = prompt();
        let collection = CollectionId::random();
        let patch = PromptPatch::default()
            .title("Renamed")
            .content("C")
            .collection(Some(collection.clone()))
            .private(true);

        let next = apply_patch(&original, &patch, original.created_at + Duration::seconds(1));
        assert_eq!(next.version, 1);
        assert!(next.version_history.is_empty());
        assert_eq!(next.title, "Renamed");
        assert_eq!(next.collection_id, Some(collection));
        assert!(next.is_private);
        assert!(next.updated_at > original.updated_at);
    }

    #[test]
    fn clock_skew_never_breaks_timestamp_order() {
        let original = prompt();
        let next = record_version(&original, "C2", original.created_at - Duration::hours(1));
        assert!(next.updated_at >= next.created_at);
    }
}
