//! Core entity types shared by every prompt-shelf crate.
//!
//! Entities are plain values: updates produce new values and never mutate a
//! shared instance. Validation lives next to each type as small predicates.

#![warn(missing_docs, clippy::pedantic)]

mod collection;
pub mod double_option;
mod error;
mod ids;
mod options;
mod prompt;
mod tag;
mod user;

/// Collections and the drafts/patches used to create and edit them.
pub use collection::{Collection, CollectionDraft, CollectionPatch, reindex_memberships};
/// Error type and result alias shared across the workspace.
pub use error::{Error, Result};
/// Opaque identifiers for every entity kind.
pub use ids::{CollectionId, EntityKind, PromptId, TagId, UserId};
/// Sort and presentation options carried in filter state.
pub use options::{SortOption, ViewMode};
/// Prompts, their version snapshots, drafts, and patches.
pub use prompt::{INITIAL_VERSION, Prompt, PromptDraft, PromptPatch, VersionSnapshot};
/// Tags and case-insensitive name helpers.
pub use tag::{Tag, dedup_by_id, find_by_name, normalize_tag_name};
/// Authenticated user identity.
pub use user::User;
