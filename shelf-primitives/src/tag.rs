//! Tags and case-insensitive name handling.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::require_non_empty;
use crate::{Result, TagId};

/// Short label attachable to many prompts. Names are unique ignoring case.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// Tag identifier.
    pub id: TagId,
    /// Display name, stored trimmed.
    pub name: String,
}

impl Tag {
    /// Creates a tag with a fresh identifier.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Validation`] when the name is blank.
    pub fn new(name: impl AsRef<str>) -> Result<Self> {
        Self::with_id(TagId::random(), name)
    }

    /// Creates a tag with a known identifier.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Validation`] when the name is blank.
    pub fn with_id(id: TagId, name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref();
        require_non_empty("tag name", name)?;
        Ok(Self {
            id,
            name: name.trim().to_owned(),
        })
    }

    /// Returns `true` when `name` matches this tag ignoring case and padding.
    #[must_use]
    pub fn matches_name(&self, name: &str) -> bool {
        normalize_tag_name(&self.name) == normalize_tag_name(name)
    }
}

/// Canonical form used for tag-name comparisons.
#[must_use]
pub fn normalize_tag_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Finds a tag by case-insensitive name.
#[must_use]
pub fn find_by_name<'a>(tags: &'a [Tag], name: &str) -> Option<&'a Tag> {
    let wanted = normalize_tag_name(name);
    tags.iter().find(|tag| normalize_tag_name(&tag.name) == wanted)
}

/// Drops repeated tag ids, keeping the first occurrence and the original order.
#[must_use]
pub fn dedup_by_id(tags: Vec<Tag>) -> Vec<Tag> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .filter(|tag| seen.insert(tag.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_rejects_blank_names() {
        assert_eq!(Tag::new("  alpha ").unwrap().name, "alpha");
        assert!(Tag::new("   ").is_err());
    }

    #[test]
    fn lookup_ignores_case() {
        let tags = vec![Tag::new("Alpha").unwrap(), Tag::new("beta").unwrap()];
        let found = find_by_name(&tags, " ALPHA").expect("match");
        assert_eq!(found.name, "Alpha");
        assert!(find_by_name(&tags, "gamma").is_none());
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let alpha = Tag::new("alpha").unwrap();
        let beta = Tag::new("beta").unwrap();
        let tags = dedup_by_id(vec![alpha.clone(), beta.clone(), alpha.clone()]);
        assert_eq!(tags, vec![alpha, beta]);
    }
}
