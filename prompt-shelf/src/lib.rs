//! prompt-shelf facade.
//!
//! Bundles the workspace crates behind feature flags so an application can
//! depend on a single crate and switch off what it does not use.

#![warn(missing_docs, clippy::pedantic)]

/// Entity model shared by every layer.
pub use shelf_primitives as primitives;

/// Versioning, filtering, templates, and export (enabled by `prompts` feature).
#[cfg(feature = "prompts")]
pub use shelf_prompts as prompts;

/// Backend stores and auth providers (enabled by `gateway` feature).
#[cfg(feature = "gateway")]
pub use shelf_gateway as gateway;

/// Optimistic library state (enabled by `state` feature).
#[cfg(feature = "state")]
pub use shelf_state as state;

/// Configuration loading (enabled by `config` feature).
#[cfg(feature = "config")]
pub use shelf_config as config;

/// Logging setup (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use shelf_telemetry as telemetry;

/// Types most applications need.
#[cfg(feature = "state")]
pub mod prelude {
    pub use shelf_primitives::{
        Collection, CollectionDraft, CollectionId, Prompt, PromptDraft, PromptId, PromptPatch,
        SortOption, Tag, TagId, User, ViewMode,
    };
    pub use shelf_state::{LibraryError, LibrarySnapshot, MutationHandle, PromptLibrary};
}
