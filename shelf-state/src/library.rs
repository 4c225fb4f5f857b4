//! The single-writer prompt library.
//!
//! Every intent runs its optimistic apply under one mutex, publishes a new
//! snapshot, and hands the gateway call to the dispatcher. The spawned task
//! settles the mutation: success installs the backend's entity, failure
//! restores the preimages captured during the apply.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use shelf_gateway::{AuthProvider, GatewayResult, PromptQuery, PromptStore, StoreMetadata};
use shelf_primitives::{
    Collection, CollectionDraft, CollectionId, CollectionPatch, EntityKind, Prompt, PromptDraft,
    PromptId, PromptPatch, SortOption, Tag, TagId, User, ViewMode, dedup_by_id, find_by_name,
    normalize_tag_name,
};
use shelf_prompts::{PromptExport, apply_patch, export_prompt};
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, info, warn};

use crate::dispatch::{CallDispatcher, DispatchConfig};
use crate::error::{LibraryError, LibraryResult};
use crate::mutation::{
    MutationEvent, MutationHandle, MutationId, MutationKind, MutationNotice, MutationOutcome,
    MutationTarget, MutationTracker,
};
use crate::snapshot::LibrarySnapshot;
use crate::state::{EntityState, Preimage, PreimageKey};

/// Default capacity of the settle-notice channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Tunables for [`PromptLibrary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibraryConfig {
    dispatch: DispatchConfig,
    default_sort: SortOption,
    event_capacity: usize,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            default_sort: SortOption::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl LibraryConfig {
    /// Sets the gateway concurrency limit.
    #[must_use]
    pub const fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Sets the sort applied before the user picks one.
    #[must_use]
    pub const fn with_default_sort(mut self, sort: SortOption) -> Self {
        self.default_sort = sort;
        self
    }

    /// Sets how many unread settle notices a subscriber may lag behind.
    #[must_use]
    pub const fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Returns the dispatch configuration.
    #[must_use]
    pub const fn dispatch(&self) -> DispatchConfig {
        self.dispatch
    }

    /// Returns the initial sort option.
    #[must_use]
    pub const fn default_sort(&self) -> SortOption {
        self.default_sort
    }
}

type SharedTag = Shared<BoxFuture<'static, LibraryResult<Tag>>>;

/// What an optimistic apply changed.
struct Plan {
    target: MutationTarget,
    preimages: Vec<Preimage>,
    provisional: Option<String>,
}

impl Plan {
    fn new(target: MutationTarget, preimages: Vec<Preimage>) -> Self {
        Self {
            target,
            preimages,
            provisional: None,
        }
    }

    fn provisional(mut self, id: impl fmt::Display) -> Self {
        self.provisional = Some(id.to_string());
        self
    }
}

struct InFlight {
    tracker: MutationTracker,
    target: MutationTarget,
    preimages: Vec<Preimage>,
    provisional: Option<String>,
    tag_key: Option<String>,
}

#[derive(Default)]
struct Inner {
    state: EntityState,
    in_flight: BTreeMap<MutationId, InFlight>,
    /// Ids of entities whose create has not settled.
    provisional: HashSet<String>,
    /// Tag creations in flight, keyed by normalized name.
    pending_tags: HashMap<String, SharedTag>,
    /// In-flight mutations per piece of state, oldest first.
    touched_by: HashMap<PreimageKey, BTreeSet<MutationId>>,
    /// Newest committed mutation per piece of state that older in-flight
    /// mutations also touched.
    committed_over: HashMap<PreimageKey, MutationId>,
    revision: u64,
}

impl Inner {
    fn track(&mut self, id: MutationId, preimages: &[Preimage]) {
        for preimage in preimages {
            self.touched_by.entry(preimage.key()).or_default().insert(id);
        }
    }

    fn untrack(&mut self, id: MutationId, key: &PreimageKey) {
        if let Some(ids) = self.touched_by.get_mut(key) {
            ids.remove(&id);
            if ids.is_empty() {
                self.touched_by.remove(key);
                self.committed_over.remove(key);
            }
        }
    }

    fn settle_committed(&mut self, id: MutationId, preimages: &[Preimage]) {
        for preimage in preimages {
            let key = preimage.key();
            let older_pending = self
                .touched_by
                .get(&key)
                .is_some_and(|ids| ids.range(..id).next().is_some());
            if older_pending {
                let newest = self.committed_over.entry(key.clone()).or_insert(id);
                *newest = (*newest).max(id);
            }
            self.untrack(id, &key);
        }
    }

    /// Decides what a failed mutation may undo.
    ///
    /// State a newer mutation committed over stays as is. State a newer
    /// in-flight mutation also touched is not restored now; that mutation
    /// inherits the preimage so its own rollback goes back far enough.
    /// Everything else is returned for restoring.
    fn settle_failed(&mut self, id: MutationId, preimages: Vec<Preimage>) -> Vec<Preimage> {
        let mut restorable = Vec::with_capacity(preimages.len());
        for preimage in preimages {
            let key = preimage.key();
            let superseded = self.committed_over.get(&key).is_some_and(|newest| *newest > id);
            let successor = self.touched_by.get(&key).and_then(|ids| {
                ids.range((Bound::Excluded(id), Bound::Unbounded)).next().copied()
            });
            self.untrack(id, &key);

            if superseded {
                continue;
            }
            if let Some(successor) = successor {
                let slot = self.in_flight.get_mut(&successor).and_then(|record| {
                    record.preimages.iter_mut().find(|held| held.key() == key)
                });
                if let Some(slot) = slot {
                    debug!(
                        mutation_id = %id,
                        successor = %successor,
                        "preimage handed to newer mutation"
                    );
                    *slot = preimage;
                    continue;
                }
            }
            restorable.push(preimage);
        }
        restorable
    }
}

struct Core {
    store: Arc<dyn PromptStore>,
    auth: Arc<dyn AuthProvider>,
    inner: Mutex<Inner>,
    snapshots: watch::Sender<Arc<LibrarySnapshot>>,
    notices: broadcast::Sender<MutationNotice>,
    next_id: AtomicU64,
    dispatcher: CallDispatcher,
}

impl Core {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_mutation_id(&self) -> MutationId {
        MutationId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn publish(&self, inner: &mut Inner) {
        inner.state.normalize();
        inner.revision += 1;
        let snapshot = inner.state.snapshot(inner.revision, inner.in_flight.len());
        self.snapshots.send_replace(Arc::new(snapshot));
    }

    fn finish(
        &self,
        inner: &mut Inner,
        mut record: InFlight,
        event: MutationEvent,
        outcome: MutationOutcome,
    ) {
        if let Err(err) = record.tracker.transition(event) {
            warn!(error = %err, "mutation settled twice");
        }
        if let Some(id) = &record.provisional {
            inner.provisional.remove(id);
        }
        if let Some(key) = &record.tag_key {
            inner.pending_tags.remove(key);
        }
        let _ = self.notices.send(MutationNotice {
            id: record.tracker.id(),
            kind: record.tracker.kind(),
            target: record.target,
            outcome,
        });
    }

    fn commit<T>(&self, id: MutationId, reconcile: impl FnOnce(&mut EntityState) -> T) -> T {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let value = reconcile(&mut inner.state);
        if let Some(record) = inner.in_flight.remove(&id) {
            inner.settle_committed(id, &record.preimages);
            debug!(
                mutation_id = %id,
                kind = %record.tracker.kind(),
                target = %record.target,
                "mutation committed"
            );
            self.finish(inner, record, MutationEvent::Succeed, MutationOutcome::Committed);
        }
        self.publish(inner);
        value
    }

    fn roll_back(&self, id: MutationId, error: LibraryError) -> LibraryError {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if let Some(mut record) = inner.in_flight.remove(&id) {
            warn!(
                mutation_id = %id,
                kind = %record.tracker.kind(),
                target = %record.target,
                error = %error,
                "mutation rolled back"
            );
            let restorable = inner.settle_failed(id, std::mem::take(&mut record.preimages));
            inner.state.restore(restorable);
            self.finish(
                inner,
                record,
                MutationEvent::Fail,
                MutationOutcome::RolledBack(error.clone()),
            );
        }
        match &error {
            LibraryError::NotFound { kind, id } => inner.state.forget(*kind, id),
            LibraryError::Auth { .. } => inner.state.current_user = self.auth.current_user(),
            LibraryError::Validation { .. } | LibraryError::Transport { .. } => {}
        }
        inner.state.last_error = Some(error.clone());
        self.publish(inner);
        error
    }
}

fn receive<T: Send + 'static>(
    rx: oneshot::Receiver<LibraryResult<T>>,
) -> impl Future<Output = LibraryResult<T>> + Send + 'static {
    rx.map(|received| {
        received.unwrap_or_else(|_| {
            Err(LibraryError::transport(
                "mutation was dropped before it settled",
            ))
        })
    })
}

fn require_user(state: &EntityState) -> LibraryResult<User> {
    state
        .current_user
        .clone()
        .ok_or_else(LibraryError::unauthenticated)
}

fn ensure_settled(provisional: &HashSet<String>, kind: EntityKind, id: &str) -> LibraryResult<()> {
    if provisional.contains(id) {
        return Err(LibraryError::validation(format!(
            "{kind} {id} is still being saved"
        )));
    }
    Ok(())
}

fn prompt_slot(
    state: &EntityState,
    provisional: &HashSet<String>,
    id: &PromptId,
) -> LibraryResult<usize> {
    let index = state
        .prompt_index(id)
        .ok_or_else(|| LibraryError::not_found(EntityKind::Prompt, id))?;
    ensure_settled(provisional, EntityKind::Prompt, id.as_str())?;
    Ok(index)
}

fn collection_slot(
    state: &EntityState,
    provisional: &HashSet<String>,
    id: &CollectionId,
) -> LibraryResult<usize> {
    let index = state
        .collection_index(id)
        .ok_or_else(|| LibraryError::not_found(EntityKind::Collection, id))?;
    ensure_settled(provisional, EntityKind::Collection, id.as_str())?;
    Ok(index)
}

fn tag_slot(
    state: &EntityState,
    provisional: &HashSet<String>,
    id: &TagId,
) -> LibraryResult<usize> {
    let index = state
        .tag_index(id)
        .ok_or_else(|| LibraryError::not_found(EntityKind::Tag, id))?;
    ensure_settled(provisional, EntityKind::Tag, id.as_str())?;
    Ok(index)
}

fn ensure_can_modify(prompt: &Prompt, user: Option<&User>) -> LibraryResult<()> {
    if prompt.is_private && !prompt.is_owned_by(user) {
        return Err(LibraryError::auth("private prompt belongs to another user"));
    }
    Ok(())
}

/// Swaps caller-supplied tags for the local tag of the same name.
fn resolve_local_tags(state: &EntityState, tags: &[Tag]) -> Vec<Tag> {
    dedup_by_id(
        tags.iter()
            .map(|tag| find_by_name(&state.tags, &tag.name).cloned().unwrap_or_else(|| tag.clone()))
            .collect(),
    )
}

/// Client-side state for prompts, collections, tags, and filters.
///
/// Cloning is cheap and every clone drives the same state. Intents must be
/// issued from within a tokio runtime.
#[derive(Clone)]
pub struct PromptLibrary {
    core: Arc<Core>,
}

impl fmt::Debug for PromptLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptLibrary")
            .field("backend", &self.core.store.metadata().backend())
            .field("revision", &self.core.snapshots.borrow().revision())
            .finish_non_exhaustive()
    }
}

impl PromptLibrary {
    /// Creates a library over the given backend with default settings.
    #[must_use]
    pub fn new(store: Arc<dyn PromptStore>, auth: Arc<dyn AuthProvider>) -> Self {
        Self::with_config(store, auth, LibraryConfig::default())
    }

    /// Creates a library with explicit settings.
    #[must_use]
    pub fn with_config(
        store: Arc<dyn PromptStore>,
        auth: Arc<dyn AuthProvider>,
        config: LibraryConfig,
    ) -> Self {
        let mut inner = Inner::default();
        inner.state.filter.sort = config.default_sort;
        inner.state.current_user = auth.current_user();

        let (snapshots, _) = watch::channel(Arc::new(inner.state.snapshot(0, 0)));
        let (notices, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            core: Arc::new(Core {
                store,
                auth,
                inner: Mutex::new(inner),
                snapshots,
                notices,
                next_id: AtomicU64::new(0),
                dispatcher: CallDispatcher::new(config.dispatch),
            }),
        }
    }

    /// Describes the backend in use.
    #[must_use]
    pub fn store_metadata(&self) -> &StoreMetadata {
        self.core.store.metadata()
    }

    /// Returns the latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<LibrarySnapshot> {
        Arc::clone(&self.core.snapshots.borrow())
    }

    /// Subscribes to snapshot publications.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<LibrarySnapshot>> {
        self.core.snapshots.subscribe()
    }

    /// Subscribes to settle notices.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<MutationNotice> {
        self.core.notices.subscribe()
    }

    /// Returns the signed-in user as last observed.
    #[must_use]
    pub fn current_user(&self) -> Option<User> {
        self.snapshot().current_user().cloned()
    }

    /// Returns the gateway dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &CallDispatcher {
        &self.core.dispatcher
    }

    /// Stops accepting intents that need the backend. Mutations already
    /// dispatched still settle.
    pub fn shutdown(&self) {
        self.core.dispatcher.close();
        info!("prompt library shut down");
    }

    /// Reloads prompts, collections, and tags from the backend.
    ///
    /// # Errors
    ///
    /// Returns the first gateway failure; local entities are left untouched
    /// and the error is recorded on the snapshot.
    pub async fn refresh(&self) -> LibraryResult<()> {
        {
            let mut inner = self.core.lock();
            inner.state.loading = true;
            self.core.publish(&mut inner);
        }

        let store = &self.core.store;
        let query = PromptQuery::all();
        let loaded = futures::try_join!(
            store.list_prompts(&query),
            store.list_collections(),
            store.list_tags()
        );
        let user = self.core.auth.current_user();

        let mut inner = self.core.lock();
        inner.state.loading = false;
        inner.state.current_user = user;
        let result = match loaded {
            Ok((prompts, collections, tags)) => {
                info!(
                    backend = store.metadata().backend(),
                    prompts = prompts.len(),
                    collections = collections.len(),
                    tags = tags.len(),
                    "library loaded"
                );
                inner.state.prompts = prompts;
                inner.state.collections = collections;
                inner.state.tags = tags;
                inner.state.last_error = None;
                Ok(())
            }
            Err(err) => {
                let err = LibraryError::from(err);
                warn!(error = %err, "library refresh failed");
                inner.state.last_error = Some(err.clone());
                Err(err)
            }
        };
        self.core.publish(&mut inner);
        result
    }

    /// Signs in and reloads the library as that user.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Auth`] for bad credentials, or a refresh error.
    pub async fn sign_in(&self, email: &str, password: &str) -> LibraryResult<User> {
        let user = self.core.auth.sign_in(email, password).await?;
        self.set_user(Some(user.clone()));
        self.refresh().await?;
        Ok(user)
    }

    /// Registers an account, signs in, and reloads.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Validation`] for bad input or a taken email,
    /// or a refresh error.
    pub async fn sign_up(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> LibraryResult<User> {
        let user = self.core.auth.sign_up(username, email, password).await?;
        self.set_user(self.core.auth.current_user());
        self.refresh().await?;
        Ok(user)
    }

    /// Signs out and reloads what remains visible anonymously.
    ///
    /// # Errors
    ///
    /// Returns the provider's error (the local session is cleared anyway), or a
    /// refresh error.
    pub async fn sign_out(&self) -> LibraryResult<()> {
        let signed_out = self.core.auth.sign_out().await;
        self.set_user(self.core.auth.current_user());
        signed_out?;
        self.refresh().await
    }

    fn set_user(&self, user: Option<User>) {
        let mut inner = self.core.lock();
        inner.state.current_user = user;
        self.core.publish(&mut inner);
    }

    /// Exports a visible prompt as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::NotFound`] if the prompt is unknown or not
    /// visible to the current user.
    pub fn export(&self, id: &PromptId) -> LibraryResult<PromptExport> {
        let snapshot = self.snapshot();
        let prompt = snapshot
            .prompt(id)
            .filter(|prompt| prompt.is_visible_to(snapshot.current_user()))
            .ok_or_else(|| LibraryError::not_found(EntityKind::Prompt, id))?;
        export_prompt(prompt)
            .map_err(|err| LibraryError::transport(format!("failed to encode prompt: {err}")))
    }

    // Filter intents. These never reach the backend.

    fn update_filter(
        &self,
        edit: impl FnOnce(&mut EntityState) -> LibraryResult<()>,
    ) -> LibraryResult<()> {
        let mut inner = self.core.lock();
        edit(&mut inner.state)?;
        debug!(filter = ?inner.state.filter, "filter changed");
        self.core.publish(&mut inner);
        Ok(())
    }

    /// Narrows the view to one collection, or clears the selection.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::NotFound`] for an unknown collection.
    pub fn set_selected_collection(&self, id: Option<CollectionId>) -> LibraryResult<()> {
        self.update_filter(|state| {
            if let Some(id) = &id {
                state
                    .collection_index(id)
                    .ok_or_else(|| LibraryError::not_found(EntityKind::Collection, id))?;
            }
            state.filter.selected_collection = id;
            Ok(())
        })
    }

    /// Adds a tag to the filter, or removes it if already selected.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::NotFound`] for an unknown tag.
    pub fn toggle_selected_tag(&self, id: TagId) -> LibraryResult<()> {
        self.update_filter(|state| {
            state
                .tag_index(&id)
                .ok_or_else(|| LibraryError::not_found(EntityKind::Tag, &id))?;
            state.filter.toggle_tag(id);
            Ok(())
        })
    }

    /// Sets the search query.
    pub fn set_search_query(&self, query: impl Into<String>) {
        let query = query.into();
        let _ = self.update_filter(|state| {
            state.filter.search_query = query;
            Ok(())
        });
    }

    /// Sets the sort order.
    pub fn set_sort_option(&self, sort: SortOption) {
        let _ = self.update_filter(|state| {
            state.filter.sort = sort;
            Ok(())
        });
    }

    /// Sets the presentation mode.
    pub fn set_view_mode(&self, mode: ViewMode) {
        let _ = self.update_filter(|state| {
            state.filter.view_mode = mode;
            Ok(())
        });
    }

    /// Clears collection, tag, and search filters.
    pub fn clear_filters(&self) {
        let _ = self.update_filter(|state| {
            state.filter.clear();
            Ok(())
        });
    }

    // Entity intents.

    fn launch<R, T, A, C, S>(
        &self,
        kind: MutationKind,
        reply: oneshot::Sender<LibraryResult<T>>,
        tag_key: Option<String>,
        apply: A,
        call: C,
        reconcile: S,
    ) -> Option<MutationId>
    where
        A: FnOnce(&mut EntityState, &HashSet<String>) -> LibraryResult<Plan>,
        C: Future<Output = GatewayResult<R>> + Send + 'static,
        S: FnOnce(&mut EntityState, R) -> T + Send + 'static,
        R: Send + 'static,
        T: Send + 'static,
    {
        let reject = |err: LibraryError, reply: oneshot::Sender<LibraryResult<T>>| {
            if let Some(key) = &tag_key {
                self.core.lock().pending_tags.remove(key);
            }
            debug!(kind = %kind, error = %err, "intent rejected");
            let _ = reply.send(Err(err));
        };

        let reservation = match self.core.dispatcher.reserve() {
            Ok(reservation) => reservation,
            Err(err) => {
                reject(err.into(), reply);
                return None;
            }
        };

        let id = self.core.next_mutation_id();
        {
            let mut guard = self.core.lock();
            let inner = &mut *guard;
            let plan = match apply(&mut inner.state, &inner.provisional) {
                Ok(plan) => plan,
                Err(err) => {
                    drop(guard);
                    reject(err, reply);
                    return None;
                }
            };

            if let Some(provisional) = &plan.provisional {
                inner.provisional.insert(provisional.clone());
            }
            let mut tracker = MutationTracker::new(id, kind);
            if let Err(err) = tracker.transition(MutationEvent::Dispatch) {
                warn!(error = %err, "fresh mutation refused dispatch");
            }
            debug!(
                mutation_id = %id,
                kind = %kind,
                target = %plan.target,
                "applied optimistically"
            );
            inner.track(id, &plan.preimages);
            inner.in_flight.insert(
                id,
                InFlight {
                    tracker,
                    target: plan.target,
                    preimages: plan.preimages,
                    provisional: plan.provisional,
                    tag_key: tag_key.clone(),
                },
            );
            self.core.publish(inner);
        }

        let core = Arc::clone(&self.core);
        let task = async move {
            let outcome = match call.await {
                Ok(value) => Ok(core.commit(id, move |state| reconcile(state, value))),
                Err(err) => Err(core.roll_back(id, err.into())),
            };
            let _ = reply.send(outcome);
        };
        reservation.spawn(task);
        Some(id)
    }

    fn dispatch<R, T, A, C, S>(
        &self,
        kind: MutationKind,
        apply: A,
        call: C,
        reconcile: S,
    ) -> MutationHandle<T>
    where
        A: FnOnce(&mut EntityState, &HashSet<String>) -> LibraryResult<Plan>,
        C: Future<Output = GatewayResult<R>> + Send + 'static,
        S: FnOnce(&mut EntityState, R) -> T + Send + 'static,
        R: Send + 'static,
        T: Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        match self.launch(kind, reply, None, apply, call, reconcile) {
            Some(id) => MutationHandle::dispatched(id, kind, receive(rx)),
            None => MutationHandle::follow(kind, receive(rx)),
        }
    }

    /// Creates a prompt owned by the current user.
    ///
    /// The prompt appears at the top of the list under a provisional id that
    /// is swapped for the backend's id when the create settles. Until then
    /// other intents naming the provisional id are rejected.
    pub fn create_prompt(&self, draft: PromptDraft) -> MutationHandle<Prompt> {
        let local_id = PromptId::random();
        let store = Arc::clone(&self.core.store);
        let request = draft.clone();
        let reconcile_id = local_id.clone();

        self.dispatch(
            MutationKind::CreatePrompt,
            move |state, provisional| {
                draft.validate()?;
                let user = require_user(state)?;
                if let Some(collection_id) = &draft.collection_id {
                    collection_slot(state, provisional, collection_id)?;
                }
                let tags = resolve_local_tags(state, &draft.tags);
                let mut prompt = Prompt::from_draft(draft, Some(user.id), Utc::now())?;
                prompt.id = local_id.clone();
                prompt.tags = tags;

                let preimage = state.capture_prompt(&local_id);
                state.prompts.insert(0, prompt);
                Ok(Plan::new(MutationTarget::Prompt(local_id.clone()), vec![preimage])
                    .provisional(&local_id))
            },
            async move { store.create_prompt(request).await },
            move |state, prompt: Prompt| {
                state.reconcile_prompt(&reconcile_id, prompt.clone());
                prompt
            },
        )
    }

    /// Applies a patch to a prompt. Content changes record a version.
    pub fn update_prompt(&self, id: &PromptId, patch: PromptPatch) -> MutationHandle<Prompt> {
        let store = Arc::clone(&self.core.store);
        let target = id.clone();
        let call_id = id.clone();
        let reconcile_id = id.clone();
        let request = patch.clone();

        self.dispatch(
            MutationKind::UpdatePrompt,
            move |state, provisional| {
                patch.validate()?;
                let index = prompt_slot(state, provisional, &target)?;
                ensure_can_modify(&state.prompts[index], state.current_user.as_ref())?;
                if let Some(Some(collection_id)) = &patch.collection_id {
                    collection_slot(state, provisional, collection_id)?;
                }

                let preimage = state.capture_prompt(&target);
                let mut patch = patch;
                if let Some(tags) = patch.tags.take() {
                    patch.tags = Some(resolve_local_tags(state, &tags));
                }
                state.prompts[index] = apply_patch(&state.prompts[index], &patch, Utc::now());
                Ok(Plan::new(MutationTarget::Prompt(target), vec![preimage]))
            },
            async move { store.update_prompt(&call_id, request).await },
            move |state, prompt: Prompt| {
                state.reconcile_prompt(&reconcile_id, prompt.clone());
                prompt
            },
        )
    }

    /// Deletes a prompt.
    pub fn delete_prompt(&self, id: &PromptId) -> MutationHandle<()> {
        let store = Arc::clone(&self.core.store);
        let target = id.clone();
        let call_id = id.clone();

        self.dispatch(
            MutationKind::DeletePrompt,
            move |state, provisional| {
                let index = prompt_slot(state, provisional, &target)?;
                ensure_can_modify(&state.prompts[index], state.current_user.as_ref())?;
                let preimage = state.capture_prompt(&target);
                state.prompts.remove(index);
                Ok(Plan::new(MutationTarget::Prompt(target), vec![preimage]))
            },
            async move { store.delete_prompt(&call_id).await },
            |_, ()| (),
        )
    }

    /// Flips a prompt's favorite flag, then re-reads the prompt to learn the
    /// value the backend settled on. Resolves to that value.
    pub fn toggle_favorite(&self, id: &PromptId) -> MutationHandle<bool> {
        let store = Arc::clone(&self.core.store);
        let target = id.clone();
        let call_id = id.clone();
        let reconcile_id = id.clone();

        self.dispatch(
            MutationKind::ToggleFavorite,
            move |state, provisional| {
                require_user(state)?;
                let index = prompt_slot(state, provisional, &target)?;
                ensure_can_modify(&state.prompts[index], state.current_user.as_ref())?;
                let preimage = state.capture_prompt(&target);
                let prompt = &mut state.prompts[index];
                prompt.is_favorite = !prompt.is_favorite;
                Ok(Plan::new(MutationTarget::Prompt(target), vec![preimage]))
            },
            async move {
                store.toggle_favorite(&call_id).await?;
                match store.get_prompt(&call_id).await {
                    Ok(prompt) => Ok(Some(prompt)),
                    Err(err) => {
                        warn!(
                            prompt_id = %call_id,
                            error = %err,
                            "favorite reconcile failed; keeping local value"
                        );
                        Ok(None)
                    }
                }
            },
            move |state, fresh: Option<Prompt>| {
                if let Some(prompt) = fresh {
                    state.reconcile_prompt(&reconcile_id, prompt);
                }
                state
                    .prompt_index(&reconcile_id)
                    .is_some_and(|index| state.prompts[index].is_favorite)
            },
        )
    }

    /// Creates a collection owned by the current user.
    pub fn create_collection(&self, draft: CollectionDraft) -> MutationHandle<Collection> {
        let local_id = CollectionId::random();
        let store = Arc::clone(&self.core.store);
        let request = draft.clone();
        let reconcile_id = local_id.clone();

        self.dispatch(
            MutationKind::CreateCollection,
            move |state, _| {
                draft.validate()?;
                let user = require_user(state)?;
                let mut collection = Collection::from_draft(draft, Some(user.id), Utc::now())?;
                collection.id = local_id.clone();

                let preimage = state.capture_collection(&local_id);
                state.collections.push(collection);
                Ok(
                    Plan::new(MutationTarget::Collection(local_id.clone()), vec![preimage])
                        .provisional(&local_id),
                )
            },
            async move { store.create_collection(request).await },
            move |state, collection: Collection| {
                state.reconcile_collection(&reconcile_id, collection.clone());
                collection
            },
        )
    }

    /// Renames or re-describes a collection.
    pub fn update_collection(
        &self,
        id: &CollectionId,
        patch: CollectionPatch,
    ) -> MutationHandle<Collection> {
        let store = Arc::clone(&self.core.store);
        let target = id.clone();
        let call_id = id.clone();
        let reconcile_id = id.clone();
        let request = patch.clone();

        self.dispatch(
            MutationKind::UpdateCollection,
            move |state, provisional| {
                patch.validate()?;
                let index = collection_slot(state, provisional, &target)?;
                let preimage = state.capture_collection(&target);
                state.collections[index] = patch.apply(&state.collections[index], Utc::now());
                Ok(Plan::new(MutationTarget::Collection(target), vec![preimage]))
            },
            async move { store.update_collection(&call_id, request).await },
            move |state, collection: Collection| {
                state.reconcile_collection(&reconcile_id, collection.clone());
                collection
            },
        )
    }

    /// Deletes a collection. Its prompts survive without a collection.
    pub fn delete_collection(&self, id: &CollectionId) -> MutationHandle<()> {
        let store = Arc::clone(&self.core.store);
        let target = id.clone();
        let call_id = id.clone();

        self.dispatch(
            MutationKind::DeleteCollection,
            move |state, provisional| {
                collection_slot(state, provisional, &target)?;
                let touched = state.remove_collection(&target);
                Ok(Plan::new(MutationTarget::Collection(target), touched))
            },
            async move { store.delete_collection(&call_id).await },
            |_, ()| (),
        )
    }

    /// Moves a prompt into a collection, leaving any previous one.
    pub fn add_to_collection(
        &self,
        prompt_id: &PromptId,
        collection_id: &CollectionId,
    ) -> MutationHandle<()> {
        let store = Arc::clone(&self.core.store);
        let target = prompt_id.clone();
        let destination = collection_id.clone();
        let (call_prompt, call_collection) = (prompt_id.clone(), collection_id.clone());

        self.dispatch(
            MutationKind::AddToCollection,
            move |state, provisional| {
                require_user(state)?;
                let index = prompt_slot(state, provisional, &target)?;
                collection_slot(state, provisional, &destination)?;
                ensure_can_modify(&state.prompts[index], state.current_user.as_ref())?;

                let preimage = state.capture_prompt(&target);
                let prompt = &mut state.prompts[index];
                prompt.collection_id = Some(destination);
                prompt.updated_at = Utc::now().max(prompt.created_at);
                Ok(Plan::new(MutationTarget::Prompt(target), vec![preimage]))
            },
            async move { store.add_to_collection(&call_prompt, &call_collection).await },
            |_, ()| (),
        )
    }

    /// Takes a prompt out of a collection. Resolves immediately when the
    /// prompt is not in that collection.
    pub fn remove_from_collection(
        &self,
        prompt_id: &PromptId,
        collection_id: &CollectionId,
    ) -> MutationHandle<()> {
        {
            let inner = self.core.lock();
            let Some(index) = inner.state.prompt_index(prompt_id) else {
                return MutationHandle::ready(
                    MutationKind::RemoveFromCollection,
                    Err(LibraryError::not_found(EntityKind::Prompt, prompt_id)),
                );
            };
            if inner.state.prompts[index].collection_id.as_ref() != Some(collection_id) {
                return MutationHandle::ready(MutationKind::RemoveFromCollection, Ok(()));
            }
        }

        let store = Arc::clone(&self.core.store);
        let target = prompt_id.clone();
        let source = collection_id.clone();
        let (call_prompt, call_collection) = (prompt_id.clone(), collection_id.clone());

        self.dispatch(
            MutationKind::RemoveFromCollection,
            move |state, provisional| {
                let index = prompt_slot(state, provisional, &target)?;
                ensure_can_modify(&state.prompts[index], state.current_user.as_ref())?;
                let preimage = state.capture_prompt(&target);
                let prompt = &mut state.prompts[index];
                if prompt.collection_id.as_ref() == Some(&source) {
                    prompt.collection_id = None;
                    prompt.updated_at = Utc::now().max(prompt.created_at);
                }
                Ok(Plan::new(MutationTarget::Prompt(target), vec![preimage]))
            },
            async move {
                store
                    .remove_from_collection(&call_prompt, &call_collection)
                    .await
            },
            |_, ()| (),
        )
    }

    /// Creates a tag, or returns the existing tag with the same name.
    ///
    /// Names compare case-insensitively. A second call while the first is in
    /// flight shares its outcome instead of issuing another create.
    pub fn add_tag(&self, name: &str) -> MutationHandle<Tag> {
        let name = name.trim().to_owned();
        let tag = match Tag::new(&name) {
            Ok(tag) => tag,
            Err(err) => return MutationHandle::ready(MutationKind::CreateTag, Err(err.into())),
        };
        let key = normalize_tag_name(&name);

        let (reply, rx) = oneshot::channel();
        let shared: SharedTag = receive(rx).boxed().shared();
        {
            let mut inner = self.core.lock();
            if let Some(pending) = inner.pending_tags.get(&key) {
                debug!(tag = %name, "joining in-flight tag creation");
                return MutationHandle::follow(MutationKind::CreateTag, pending.clone());
            }
            if let Some(existing) = find_by_name(&inner.state.tags, &name) {
                return MutationHandle::ready(MutationKind::CreateTag, Ok(existing.clone()));
            }
            inner.pending_tags.insert(key.clone(), shared.clone());
        }

        let store = Arc::clone(&self.core.store);
        let local_id = tag.id.clone();
        let reconcile_id = tag.id.clone();

        let launched = self.launch(
            MutationKind::CreateTag,
            reply,
            Some(key),
            move |state, _| {
                let preimage = state.capture_tag(&local_id);
                state.tags.push(tag);
                Ok(Plan::new(MutationTarget::Tag(local_id.clone()), vec![preimage])
                    .provisional(&local_id))
            },
            async move { store.create_tag(&name).await },
            move |state, tag: Tag| {
                state.reconcile_tag(&reconcile_id, tag.clone());
                tag
            },
        );
        match launched {
            Some(id) => MutationHandle::dispatched(id, MutationKind::CreateTag, shared),
            None => MutationHandle::follow(MutationKind::CreateTag, shared),
        }
    }

    /// Deletes a tag, detaching it from every prompt and from the filter.
    pub fn delete_tag(&self, id: &TagId) -> MutationHandle<()> {
        let store = Arc::clone(&self.core.store);
        let target = id.clone();
        let call_id = id.clone();

        self.dispatch(
            MutationKind::DeleteTag,
            move |state, provisional| {
                tag_slot(state, provisional, &target)?;
                let touched = state.remove_tag(&target);
                Ok(Plan::new(MutationTarget::Tag(target), touched))
            },
            async move { store.delete_tag(&call_id).await },
            |_, ()| (),
        )
    }

    /// Attaches an existing tag to a prompt.
    pub fn tag_prompt(&self, prompt_id: &PromptId, tag_id: &TagId) -> MutationHandle<Prompt> {
        self.retag(prompt_id, tag_id, |tags, tag| {
            if !tags.iter().any(|attached| attached.id == tag.id) {
                tags.push(tag);
            }
        })
    }

    /// Detaches a tag from a prompt.
    pub fn untag_prompt(&self, prompt_id: &PromptId, tag_id: &TagId) -> MutationHandle<Prompt> {
        self.retag(prompt_id, tag_id, |tags, tag| {
            tags.retain(|attached| attached.id != tag.id);
        })
    }

    fn retag(
        &self,
        prompt_id: &PromptId,
        tag_id: &TagId,
        edit: impl FnOnce(&mut Vec<Tag>, Tag),
    ) -> MutationHandle<Prompt> {
        let tags = {
            let inner = self.core.lock();
            let lookup = prompt_slot(&inner.state, &inner.provisional, prompt_id).and_then(|p| {
                tag_slot(&inner.state, &inner.provisional, tag_id).map(|t| (p, t))
            });
            match lookup {
                Ok((prompt, tag)) => {
                    let mut tags = inner.state.prompts[prompt].tags.clone();
                    edit(&mut tags, inner.state.tags[tag].clone());
                    tags
                }
                Err(err) => return MutationHandle::ready(MutationKind::UpdatePrompt, Err(err)),
            }
        };
        self.update_prompt(prompt_id, PromptPatch::default().tags(tags))
    }
}
