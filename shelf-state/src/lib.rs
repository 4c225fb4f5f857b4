//! Optimistic client state for prompt-shelf.
//!
//! [`PromptLibrary`] owns every prompt, collection, and tag the session knows
//! about. Intents update that state immediately and publish an immutable
//! [`LibrarySnapshot`]; the backend call then runs on the [`CallDispatcher`]
//! and its outcome either reconciles or rolls back the change.

#![warn(missing_docs, clippy::pedantic)]

mod dispatch;
mod error;
mod library;
mod mutation;
mod snapshot;
mod state;

pub use dispatch::{
    CallDispatcher, DEFAULT_MAX_IN_FLIGHT, DispatchConfig, DispatchError, DispatchResult,
    Reservation,
};
pub use error::{LibraryError, LibraryResult};
pub use library::{DEFAULT_EVENT_CAPACITY, LibraryConfig, PromptLibrary};
pub use mutation::{
    MutationError, MutationEvent, MutationHandle, MutationId, MutationKind, MutationNotice,
    MutationOutcome, MutationResult, MutationState, MutationTarget, MutationTracker,
};
pub use snapshot::LibrarySnapshot;
