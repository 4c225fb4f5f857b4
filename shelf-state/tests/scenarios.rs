mod common;

use common::{assert_memberships_consistent, harness};
use shelf_primitives::{CollectionDraft, INITIAL_VERSION, PromptDraft, PromptPatch, SortOption};
use shelf_prompts::derive_visible;

#[tokio::test]
async fn create_then_edit_records_history() {
    let h = harness().await;
    let user = h.library.current_user().unwrap();

    let created = h
        .library
        .create_prompt(PromptDraft::new("T", "C"))
        .settled()
        .await
        .unwrap();
    assert_eq!(created.version, INITIAL_VERSION);
    assert!(created.version_history.is_empty());
    assert_eq!(created.created_by, Some(user.id));

    let updated = h
        .library
        .update_prompt(&created.id, PromptPatch::default().content("C2"))
        .settled()
        .await
        .unwrap();
    assert_eq!(updated.version, 2);
    assert_eq!(updated.version_history.len(), 1);
    let entry = &updated.version_history[0];
    assert_eq!(entry.version, 1);
    assert_eq!(entry.content, "C");
    assert_eq!(entry.updated_at, created.updated_at);

    assert_eq!(h.library.snapshot().prompt(&created.id), Some(&updated));
}

#[tokio::test]
async fn same_content_does_not_bump_version() {
    let h = harness().await;
    let created = h
        .library
        .create_prompt(PromptDraft::new("T", "C"))
        .settled()
        .await
        .unwrap();

    let updated = h
        .library
        .update_prompt(&created.id, PromptPatch::default().content("C").title("T2"))
        .settled()
        .await
        .unwrap();
    assert_eq!(updated.version, INITIAL_VERSION);
    assert!(updated.version_history.is_empty());
    assert_eq!(updated.title, "T2");
}

#[tokio::test]
async fn tag_names_dedupe_case_insensitively() {
    let h = harness().await;

    let first = h.library.add_tag("alpha");
    let second = h.library.add_tag("Alpha");
    assert_eq!(h.library.snapshot().tags().len(), 1);

    let first = first.settled().await.unwrap();
    let second = second.settled().await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(h.store.calls("create_tag"), 1);

    let third = h.library.add_tag("ALPHA").settled().await.unwrap();
    assert_eq!(third.id, first.id);
    assert_eq!(h.library.snapshot().tags(), std::slice::from_ref(&first));
}

#[tokio::test]
async fn tag_creation_shared_while_call_blocked() {
    let h = harness().await;
    h.store.hold("create_tag");

    let first = h.library.add_tag("alpha");
    tokio::task::yield_now().await;
    let second = h.library.add_tag("ALPHA");
    assert!(second.id().is_none());
    assert_eq!(h.library.snapshot().pending_mutations(), 1);

    h.store.release("create_tag");
    let (first, second) = tokio::join!(first.settled(), second.settled());
    assert_eq!(first.unwrap().id, second.unwrap().id);
    assert_eq!(h.store.calls("create_tag"), 1);
}

#[tokio::test]
async fn reassignment_moves_membership() {
    let h = harness().await;
    let a = h
        .library
        .create_collection(CollectionDraft::new("A"))
        .settled()
        .await
        .unwrap();
    let b = h
        .library
        .create_collection(CollectionDraft::new("B"))
        .settled()
        .await
        .unwrap();
    let x = h
        .library
        .create_prompt(PromptDraft::new("X", "body"))
        .settled()
        .await
        .unwrap();

    h.library.add_to_collection(&x.id, &a.id).settled().await.unwrap();
    let to_b = h.library.add_to_collection(&x.id, &b.id);

    // Both mirrors move within the optimistic publication.
    let optimistic = h.library.snapshot();
    assert!(!optimistic.collection(&a.id).unwrap().contains(&x.id));
    assert!(optimistic.collection(&b.id).unwrap().contains(&x.id));
    assert_memberships_consistent(&optimistic);

    to_b.settled().await.unwrap();
    let snapshot = h.library.snapshot();
    assert!(!snapshot.collection(&a.id).unwrap().contains(&x.id));
    assert!(snapshot.collection(&b.id).unwrap().contains(&x.id));
    assert_eq!(snapshot.prompt(&x.id).unwrap().collection_id, Some(b.id.clone()));
    assert_memberships_consistent(&snapshot);

    h.library.refresh().await.unwrap();
    assert_memberships_consistent(&h.library.snapshot());
}

#[tokio::test]
async fn empty_filter_result_then_clear_restores() {
    let h = harness().await;
    let a = h
        .library
        .create_collection(CollectionDraft::new("A"))
        .settled()
        .await
        .unwrap();
    let inside = h
        .library
        .create_prompt(PromptDraft::new("Draft email", "hello").in_collection(a.id.clone()))
        .settled()
        .await
        .unwrap();
    h.library
        .create_prompt(PromptDraft::new("Unit test ideas", "write a test"))
        .settled()
        .await
        .unwrap();
    h.library
        .create_prompt(PromptDraft::new("Secret", "mine").private())
        .settled()
        .await
        .unwrap();

    let everything = h.library.snapshot().visible().to_vec();
    assert_eq!(everything.len(), 3);

    h.library.set_selected_collection(Some(a.id.clone())).unwrap();
    assert_eq!(h.library.snapshot().visible(), std::slice::from_ref(&inside));

    h.library.set_search_query("test");
    assert!(h.library.snapshot().visible().is_empty());

    h.library.clear_filters();
    assert_eq!(h.library.snapshot().visible(), everything.as_slice());

    // Signed out, the private prompt drops out of view.
    h.library.sign_out().await.unwrap();
    assert_eq!(h.library.snapshot().visible().len(), 2);
}

#[tokio::test]
async fn derivation_is_idempotent() {
    let h = harness().await;
    for title in ["beta", "Alpha", "gamma"] {
        h.library
            .create_prompt(PromptDraft::new(title, "body"))
            .settled()
            .await
            .unwrap();
    }
    h.library.set_sort_option(SortOption::Alphabetical);

    let snapshot = h.library.snapshot();
    let once = derive_visible(snapshot.prompts(), snapshot.filter(), snapshot.current_user());
    let twice = derive_visible(snapshot.prompts(), snapshot.filter(), snapshot.current_user());
    assert_eq!(once, twice);
    assert_eq!(once, snapshot.visible());

    let titles: Vec<&str> = once.iter().map(|p| p.title.as_str()).collect();
    assert_eq!(titles, ["Alpha", "beta", "gamma"]);
}

#[tokio::test]
async fn tag_filter_matches_any_selected_tag() {
    let h = harness().await;
    let alpha = h.library.add_tag("alpha").settled().await.unwrap();
    let beta = h.library.add_tag("beta").settled().await.unwrap();

    let first = h
        .library
        .create_prompt(PromptDraft::new("one", "body"))
        .settled()
        .await
        .unwrap();
    let second = h
        .library
        .create_prompt(PromptDraft::new("two", "body"))
        .settled()
        .await
        .unwrap();
    h.library.tag_prompt(&first.id, &alpha.id).settled().await.unwrap();
    h.library.tag_prompt(&second.id, &beta.id).settled().await.unwrap();

    h.library.toggle_selected_tag(alpha.id.clone()).unwrap();
    assert_eq!(h.library.snapshot().visible().len(), 1);

    h.library.toggle_selected_tag(beta.id.clone()).unwrap();
    assert_eq!(h.library.snapshot().visible().len(), 2);

    h.library.delete_tag(&alpha.id).settled().await.unwrap();
    let snapshot = h.library.snapshot();
    assert_eq!(snapshot.filter().selected_tags, vec![beta.id.clone()]);
    assert!(snapshot.prompt(&first.id).unwrap().tags.is_empty());
}

#[tokio::test]
async fn favorites_reconcile_with_backend() {
    let h = harness().await;
    let prompt = h
        .library
        .create_prompt(PromptDraft::new("T", "C"))
        .settled()
        .await
        .unwrap();

    let handle = h.library.toggle_favorite(&prompt.id);
    assert!(h.library.snapshot().prompt(&prompt.id).unwrap().is_favorite);
    assert!(handle.settled().await.unwrap());
    assert_eq!(h.store.calls("get_prompt"), 1);
    assert_eq!(h.library.snapshot().favorites().count(), 1);
}

#[tokio::test]
async fn removing_a_non_member_resolves_locally() {
    let h = harness().await;
    let a = h
        .library
        .create_collection(CollectionDraft::new("A"))
        .settled()
        .await
        .unwrap();
    let prompt = h
        .library
        .create_prompt(PromptDraft::new("T", "C"))
        .settled()
        .await
        .unwrap();

    let handle = h.library.remove_from_collection(&prompt.id, &a.id);
    assert!(handle.id().is_none());
    handle.settled().await.unwrap();
    assert_eq!(h.store.calls("remove_from_collection"), 0);
}

#[tokio::test]
async fn export_uses_slugged_title() {
    let h = harness().await;
    let prompt = h
        .library
        .create_prompt(PromptDraft::new("Code Review Helper", "Review {code}"))
        .settled()
        .await
        .unwrap();

    let export = h.library.export(&prompt.id).unwrap();
    assert_eq!(export.file_name, "code-review-helper.json");
    assert!(export.json.contains("\"title\": \"Code Review Helper\""));
}
