//! Configuration management for prompt-shelf.
//!
//! A [`ShelfConfig`] is read from a JSON file or from `PROMPT_SHELF_*`
//! environment variables, validated, and then turned into a connected
//! [`Backend`] plus the matching [`shelf_state::LibraryConfig`].

#![warn(missing_docs, clippy::pedantic)]

pub mod loader;
pub mod schema;

pub use loader::{Backend, ENV_PREFIX, connect, from_env, from_lookup, from_path};
pub use schema::{BackendConfig, DEFAULT_LOG_FILTER, DEFAULT_TIMEOUT_SECS, ShelfConfig};
