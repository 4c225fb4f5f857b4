//! Operations over prompt content.
//!
//! Everything here is a pure function of its inputs: placeholder handling,
//! the version-history rule, the visible-prompt derivation, and JSON export.

#![warn(missing_docs, clippy::pedantic)]

pub mod export;
pub mod filter;
pub mod template;
pub mod versioning;

pub use export::{PromptExport, export_file_name, export_prompt};
pub use filter::{FilterState, compare_titles, derive_visible, matches_search, sort_prompts};
pub use template::{PromptTemplate, TemplateError, TemplateResult, fill, placeholders};
pub use versioning::{apply_patch, content_at, history_newest_first, record_version};
