//! Per-mutation state machine, notices, and the handle returned by intents.

use std::fmt::{self, Display, Formatter};
use std::future::Future;

use futures::future::{BoxFuture, FutureExt};
use shelf_primitives::{CollectionId, PromptId, TagId};
use thiserror::Error;
use tracing::debug;

use crate::error::{LibraryError, LibraryResult};

/// Monotonic identifier assigned to each dispatched mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MutationId(u64);

impl MutationId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw counter value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl Display for MutationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Stages a mutation passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    /// Accepted but not yet applied.
    Idle,
    /// Applied locally; the gateway call is in flight.
    Pending,
    /// The backend confirmed the change.
    Committed,
    /// The backend rejected the change and local state was restored.
    RolledBack,
}

impl MutationState {
    /// Returns `true` once the mutation has settled either way.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

/// Events that move a mutation between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationEvent {
    /// Optimistic state published and the call handed to the dispatcher.
    Dispatch,
    /// Gateway call succeeded.
    Succeed,
    /// Gateway call failed.
    Fail,
}

/// Operation a mutation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    /// Create a prompt from a draft.
    CreatePrompt,
    /// Apply a patch to a prompt.
    UpdatePrompt,
    /// Delete a prompt.
    DeletePrompt,
    /// Flip a prompt's favorite flag.
    ToggleFavorite,
    /// Create a collection.
    CreateCollection,
    /// Rename or re-describe a collection.
    UpdateCollection,
    /// Delete a collection, detaching its prompts.
    DeleteCollection,
    /// Move a prompt into a collection.
    AddToCollection,
    /// Take a prompt out of its collection.
    RemoveFromCollection,
    /// Create (or resolve) a tag by name.
    CreateTag,
    /// Delete a tag everywhere.
    DeleteTag,
}

impl MutationKind {
    /// Stable lowercase name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreatePrompt => "create_prompt",
            Self::UpdatePrompt => "update_prompt",
            Self::DeletePrompt => "delete_prompt",
            Self::ToggleFavorite => "toggle_favorite",
            Self::CreateCollection => "create_collection",
            Self::UpdateCollection => "update_collection",
            Self::DeleteCollection => "delete_collection",
            Self::AddToCollection => "add_to_collection",
            Self::RemoveFromCollection => "remove_from_collection",
            Self::CreateTag => "create_tag",
            Self::DeleteTag => "delete_tag",
        }
    }
}

impl Display for MutationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity a mutation is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MutationTarget {
    /// A prompt.
    Prompt(PromptId),
    /// A collection.
    Collection(CollectionId),
    /// A tag.
    Tag(TagId),
}

impl Display for MutationTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prompt(id) => write!(f, "prompt:{id}"),
            Self::Collection(id) => write!(f, "collection:{id}"),
            Self::Tag(id) => write!(f, "tag:{id}"),
        }
    }
}

/// Tracks one mutation through `Idle -> Pending -> {Committed | RolledBack}`.
#[derive(Debug, Clone, Copy)]
pub struct MutationTracker {
    id: MutationId,
    kind: MutationKind,
    state: MutationState,
}

impl MutationTracker {
    /// Creates a tracker in the [`MutationState::Idle`] state.
    #[must_use]
    pub const fn new(id: MutationId, kind: MutationKind) -> Self {
        Self {
            id,
            kind,
            state: MutationState::Idle,
        }
    }

    /// Returns the mutation identifier.
    #[must_use]
    pub const fn id(&self) -> MutationId {
        self.id
    }

    /// Returns the operation being tracked.
    #[must_use]
    pub const fn kind(&self) -> MutationKind {
        self.kind
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> MutationState {
        self.state
    }

    /// Applies an event, returning the resulting state.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::InvalidTransition`] when the event is not
    /// allowed from the current state.
    pub fn transition(&mut self, event: MutationEvent) -> MutationResult<MutationState> {
        let next = match (self.state, event) {
            (MutationState::Idle, MutationEvent::Dispatch) => MutationState::Pending,
            (MutationState::Pending, MutationEvent::Succeed) => MutationState::Committed,
            (MutationState::Pending, MutationEvent::Fail) => MutationState::RolledBack,
            (from, event) => {
                return Err(MutationError::InvalidTransition {
                    id: self.id,
                    from,
                    event,
                });
            }
        };

        debug!(
            mutation_id = %self.id,
            kind = %self.kind,
            from = ?self.state,
            to = ?next,
            ?event,
            "mutation transition"
        );
        self.state = next;
        Ok(next)
    }
}

/// Errors emitted by [`MutationTracker`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MutationError {
    /// Transition was not permitted from the current state.
    #[error("invalid mutation transition from {from:?} via {event:?} for {id}")]
    InvalidTransition {
        /// Mutation whose transition failed.
        id: MutationId,
        /// State prior to the attempted transition.
        from: MutationState,
        /// Event that triggered the failure.
        event: MutationEvent,
    },
}

/// Result alias used for mutation transitions.
pub type MutationResult<T> = Result<T, MutationError>;

/// How a mutation settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The backend accepted the change.
    Committed,
    /// The change was reverted; carries the surfaced error.
    RolledBack(LibraryError),
}

/// Broadcast to observers whenever a mutation settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationNotice {
    /// Mutation that settled.
    pub id: MutationId,
    /// Operation it performed.
    pub kind: MutationKind,
    /// Entity it targeted, by the id known when it was issued.
    pub target: MutationTarget,
    /// Result.
    pub outcome: MutationOutcome,
}

/// Pending result of an intent.
///
/// State has already been updated optimistically when the handle is
/// returned; awaiting [`settled`](Self::settled) yields the reconciled value
/// or the error that caused a rollback.
#[must_use = "a mutation handle reports whether the change stuck"]
pub struct MutationHandle<T> {
    id: Option<MutationId>,
    kind: MutationKind,
    outcome: BoxFuture<'static, LibraryResult<T>>,
}

impl<T> fmt::Debug for MutationHandle<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> MutationHandle<T> {
    pub(crate) fn dispatched(
        id: MutationId,
        kind: MutationKind,
        outcome: impl Future<Output = LibraryResult<T>> + Send + 'static,
    ) -> Self {
        Self {
            id: Some(id),
            kind,
            outcome: outcome.boxed(),
        }
    }

    /// Handle for an intent resolved without a gateway call.
    pub(crate) fn ready(kind: MutationKind, result: LibraryResult<T>) -> Self {
        Self {
            id: None,
            kind,
            outcome: futures::future::ready(result).boxed(),
        }
    }

    /// Handle that follows another mutation's outcome.
    pub(crate) fn follow(
        kind: MutationKind,
        outcome: impl Future<Output = LibraryResult<T>> + Send + 'static,
    ) -> Self {
        Self {
            id: None,
            kind,
            outcome: outcome.boxed(),
        }
    }

    /// Identifier of the dispatched mutation, or `None` when the intent
    /// resolved locally (rejected, a no-op, or joined another mutation).
    #[must_use]
    pub const fn id(&self) -> Option<MutationId> {
        self.id
    }

    /// Operation this handle belongs to.
    #[must_use]
    pub const fn kind(&self) -> MutationKind {
        self.kind
    }

    /// Waits for the mutation to settle.
    ///
    /// # Errors
    ///
    /// Returns the error that caused the rollback or rejected the intent.
    pub async fn settled(self) -> LibraryResult<T> {
        self.outcome.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> MutationTracker {
        MutationTracker::new(MutationId::new(1), MutationKind::UpdatePrompt)
    }

    #[test]
    fn dispatch_then_commit() {
        let mut tracker = tracker();
        assert_eq!(tracker.state(), MutationState::Idle);
        tracker.transition(MutationEvent::Dispatch).unwrap();
        assert_eq!(tracker.state(), MutationState::Pending);
        tracker.transition(MutationEvent::Succeed).unwrap();
        assert!(tracker.state().is_settled());
    }

    #[test]
    fn dispatch_then_fail() {
        let mut tracker = tracker();
        tracker.transition(MutationEvent::Dispatch).unwrap();
        assert_eq!(
            tracker.transition(MutationEvent::Fail).unwrap(),
            MutationState::RolledBack
        );
    }

    #[test]
    fn settled_mutations_reject_further_events() {
        let mut tracker = tracker();
        assert!(tracker.transition(MutationEvent::Succeed).is_err());

        tracker.transition(MutationEvent::Dispatch).unwrap();
        tracker.transition(MutationEvent::Succeed).unwrap();
        let err = tracker.transition(MutationEvent::Fail).unwrap_err();
        assert!(matches!(
            err,
            MutationError::InvalidTransition {
                from: MutationState::Committed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn ready_handles_resolve_immediately() {
        let handle = MutationHandle::ready(MutationKind::CreateTag, Ok(7_u32));
        assert!(handle.id().is_none());
        assert_eq!(handle.settled().await, Ok(7));
    }

    #[test]
    fn targets_render_with_kind_prefix() {
        let target = MutationTarget::Prompt(PromptId::new("p1").unwrap());
        assert_eq!(target.to_string(), "prompt:p1");
    }
}
