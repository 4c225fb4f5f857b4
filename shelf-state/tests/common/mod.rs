#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use shelf_gateway::{
    CredentialStore, GatewayError, GatewayResult, LocalAuthProvider, LocalStore, PromptQuery,
    PromptStore, StoreMetadata,
};
use shelf_primitives::{
    Collection, CollectionDraft, CollectionId, CollectionPatch, Prompt, PromptDraft, PromptId,
    PromptPatch, Tag, TagId,
};
use shelf_state::{LibrarySnapshot, PromptLibrary};
use tokio::sync::Semaphore;

/// Wraps a [`LocalStore`] with per-operation fault injection and gates.
pub struct ScriptedStore {
    inner: LocalStore,
    faults: Mutex<HashMap<&'static str, GatewayError>>,
    gates: Mutex<HashMap<&'static str, Arc<Semaphore>>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl ScriptedStore {
    pub fn new(inner: LocalStore) -> Self {
        Self {
            inner,
            faults: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &LocalStore {
        &self.inner
    }

    /// Every later call to `op` fails with `err`.
    pub fn fail(&self, op: &'static str, err: GatewayError) {
        self.faults.lock().unwrap().insert(op, err);
    }

    pub fn heal(&self, op: &'static str) {
        self.faults.lock().unwrap().remove(op);
    }

    /// Calls to `op` block until [`release`](Self::release).
    pub fn hold(&self, op: &'static str) {
        self.gates
            .lock()
            .unwrap()
            .insert(op, Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, op: &'static str) {
        if let Some(gate) = self.gates.lock().unwrap().remove(op) {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn calls(&self, op: &'static str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    async fn enter(&self, op: &'static str) -> GatewayResult<()> {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;
        let gate = self.gates.lock().unwrap().get(op).cloned();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await;
        }
        match self.faults.lock().unwrap().get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PromptStore for ScriptedStore {
    fn metadata(&self) -> &StoreMetadata {
        self.inner.metadata()
    }

    async fn list_prompts(&self, query: &PromptQuery) -> GatewayResult<Vec<Prompt>> {
        self.enter("list_prompts").await?;
        self.inner.list_prompts(query).await
    }

    async fn get_prompt(&self, id: &PromptId) -> GatewayResult<Prompt> {
        self.enter("get_prompt").await?;
        self.inner.get_prompt(id).await
    }

    async fn create_prompt(&self, draft: PromptDraft) -> GatewayResult<Prompt> {
        self.enter("create_prompt").await?;
        self.inner.create_prompt(draft).await
    }

    async fn update_prompt(&self, id: &PromptId, patch: PromptPatch) -> GatewayResult<Prompt> {
        self.enter("update_prompt").await?;
        self.inner.update_prompt(id, patch).await
    }

    async fn delete_prompt(&self, id: &PromptId) -> GatewayResult<()> {
        self.enter("delete_prompt").await?;
        self.inner.delete_prompt(id).await
    }

    async fn toggle_favorite(&self, id: &PromptId) -> GatewayResult<()> {
        self.enter("toggle_favorite").await?;
        self.inner.toggle_favorite(id).await
    }

    async fn list_collections(&self) -> GatewayResult<Vec<Collection>> {
        self.enter("list_collections").await?;
        self.inner.list_collections().await
    }

    async fn create_collection(&self, draft: CollectionDraft) -> GatewayResult<Collection> {
        self.enter("create_collection").await?;
        self.inner.create_collection(draft).await
    }

    async fn update_collection(
        &self,
        id: &CollectionId,
        patch: CollectionPatch,
    ) -> GatewayResult<Collection> {
        self.enter("update_collection").await?;
        self.inner.update_collection(id, patch).await
    }

    async fn delete_collection(&self, id: &CollectionId) -> GatewayResult<()> {
        self.enter("delete_collection").await?;
        self.inner.delete_collection(id).await
    }

    async fn add_to_collection(
        &self,
        prompt_id: &PromptId,
        collection_id: &CollectionId,
    ) -> GatewayResult<()> {
        self.enter("add_to_collection").await?;
        self.inner.add_to_collection(prompt_id, collection_id).await
    }

    async fn remove_from_collection(
        &self,
        prompt_id: &PromptId,
        collection_id: &CollectionId,
    ) -> GatewayResult<()> {
        self.enter("remove_from_collection").await?;
        self.inner
            .remove_from_collection(prompt_id, collection_id)
            .await
    }

    async fn list_tags(&self) -> GatewayResult<Vec<Tag>> {
        self.enter("list_tags").await?;
        self.inner.list_tags().await
    }

    async fn create_tag(&self, name: &str) -> GatewayResult<Tag> {
        self.enter("create_tag").await?;
        self.inner.create_tag(name).await
    }

    async fn delete_tag(&self, id: &TagId) -> GatewayResult<()> {
        self.enter("delete_tag").await?;
        self.inner.delete_tag(id).await
    }
}

pub struct Harness {
    pub library: PromptLibrary,
    pub store: Arc<ScriptedStore>,
    pub credentials: CredentialStore,
}

/// Library over an in-memory local backend with `ada` signed in.
pub async fn harness() -> Harness {
    let credentials = CredentialStore::new();
    let store = Arc::new(ScriptedStore::new(LocalStore::in_memory(
        credentials.clone(),
    )));
    let auth = Arc::new(LocalAuthProvider::in_memory(credentials.clone()));
    let library = PromptLibrary::new(store.clone(), auth);
    library
        .sign_up("ada", "ada@example.com", "pw")
        .await
        .unwrap();
    Harness {
        library,
        store,
        credentials,
    }
}

pub fn transport() -> GatewayError {
    GatewayError::transport("connection reset")
}

/// Entity state without revision counters or bookkeeping.
pub fn entities(snapshot: &LibrarySnapshot) -> (Vec<Prompt>, Vec<Collection>, Vec<Tag>) {
    (
        snapshot.prompts().to_vec(),
        snapshot.collections().to_vec(),
        snapshot.tags().to_vec(),
    )
}

/// Checks that every collection mirrors exactly the prompts pointing at it.
pub fn assert_memberships_consistent(snapshot: &LibrarySnapshot) {
    for collection in snapshot.collections() {
        let expected: Vec<&PromptId> = snapshot
            .prompts()
            .iter()
            .filter(|prompt| prompt.collection_id.as_ref() == Some(&collection.id))
            .map(|prompt| &prompt.id)
            .collect();
        let mirrored: Vec<&PromptId> = collection.prompt_ids.iter().collect();
        let mut expected = expected;
        expected.sort();
        assert_eq!(mirrored, expected, "collection {} mirror drifted", collection.name);
    }
    for prompt in snapshot.prompts() {
        let owners = snapshot
            .collections()
            .iter()
            .filter(|collection| collection.contains(&prompt.id))
            .count();
        assert!(owners <= 1, "prompt {} in {owners} collections", prompt.title);
    }
}
