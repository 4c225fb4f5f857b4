mod common;

use common::{assert_memberships_consistent, entities, harness, transport};
use shelf_gateway::GatewayError;
use shelf_primitives::{CollectionDraft, EntityKind, PromptDraft, PromptPatch};
use shelf_state::{LibraryError, MutationKind, MutationOutcome, MutationTarget};

async fn seeded() -> common::Harness {
    let h = harness().await;
    let work = h
        .library
        .create_collection(CollectionDraft::new("Work"))
        .settled()
        .await
        .unwrap();
    let alpha = h.library.add_tag("alpha").settled().await.unwrap();
    for title in ["first", "second", "third"] {
        h.library
            .create_prompt(
                PromptDraft::new(title, format!("{title} body"))
                    .in_collection(work.id.clone())
                    .with_tags(vec![alpha.clone()]),
            )
            .settled()
            .await
            .unwrap();
    }
    h
}

#[tokio::test]
async fn failed_create_leaves_no_trace() {
    let h = seeded().await;
    let before = entities(&h.library.snapshot());
    h.store.fail("create_prompt", transport());

    let handle = h.library.create_prompt(PromptDraft::new("doomed", "body"));
    assert_eq!(h.library.snapshot().prompts().len(), 4);

    let err = handle.settled().await.unwrap_err();
    assert!(matches!(err, LibraryError::Transport { .. }));
    let after = h.library.snapshot();
    assert_eq!(entities(&after), before);
    assert_eq!(after.last_error(), Some(&err));
    assert_eq!(after.pending_mutations(), 0);
}

#[tokio::test]
async fn failed_update_reverts_content_and_history() {
    let h = seeded().await;
    let before = entities(&h.library.snapshot());
    let target = before.0[1].id.clone();
    h.store.fail("update_prompt", transport());

    let handle = h
        .library
        .update_prompt(&target, PromptPatch::default().content("rewritten"));
    let optimistic = h.library.snapshot();
    let edited = optimistic.prompt(&target).unwrap();
    assert_eq!(edited.version, 2);
    assert_eq!(edited.version_history.len(), 1);

    handle.settled().await.unwrap_err();
    assert_eq!(entities(&h.library.snapshot()), before);
}

#[tokio::test]
async fn failed_delete_restores_position() {
    let h = seeded().await;
    let before = entities(&h.library.snapshot());
    let target = before.0[1].id.clone();
    h.store.fail("delete_prompt", transport());

    let handle = h.library.delete_prompt(&target);
    let optimistic = h.library.snapshot();
    assert!(optimistic.prompt(&target).is_none());
    assert_memberships_consistent(&optimistic);

    handle.settled().await.unwrap_err();
    let after = h.library.snapshot();
    assert_eq!(entities(&after), before);
    assert_memberships_consistent(&after);
}

#[tokio::test]
async fn failed_favorite_reverts_flag() {
    let h = seeded().await;
    let before = entities(&h.library.snapshot());
    let target = before.0[0].id.clone();
    h.store.fail("toggle_favorite", transport());

    let handle = h.library.toggle_favorite(&target);
    assert!(h.library.snapshot().prompt(&target).unwrap().is_favorite);

    handle.settled().await.unwrap_err();
    assert_eq!(entities(&h.library.snapshot()), before);
    assert_eq!(h.store.calls("get_prompt"), 0);
}

#[tokio::test]
async fn failed_reassignment_restores_both_mirrors() {
    let h = seeded().await;
    let other = h
        .library
        .create_collection(CollectionDraft::new("Other"))
        .settled()
        .await
        .unwrap();
    let before = entities(&h.library.snapshot());
    let target = before.0[0].id.clone();
    h.store.fail("add_to_collection", transport());

    let handle = h.library.add_to_collection(&target, &other.id);
    assert!(h.library.snapshot().collection(&other.id).unwrap().contains(&target));

    handle.settled().await.unwrap_err();
    let after = h.library.snapshot();
    assert_eq!(entities(&after), before);
    assert_memberships_consistent(&after);
}

#[tokio::test]
async fn failed_collection_delete_reattaches_prompts() {
    let h = seeded().await;
    let work = h.library.snapshot().collections()[0].id.clone();
    h.library.set_selected_collection(Some(work.clone())).unwrap();
    let before = entities(&h.library.snapshot());
    h.store.fail("delete_collection", transport());

    let handle = h.library.delete_collection(&work);
    let optimistic = h.library.snapshot();
    assert!(optimistic.collections().is_empty());
    assert!(optimistic.prompts().iter().all(|p| p.collection_id.is_none()));
    assert!(optimistic.filter().selected_collection.is_none());

    handle.settled().await.unwrap_err();
    let after = h.library.snapshot();
    assert_eq!(entities(&after), before);
    assert_eq!(after.filter().selected_collection, Some(work));
}

#[tokio::test]
async fn failed_tag_delete_reattaches_tag() {
    let h = seeded().await;
    let alpha = h.library.snapshot().tags()[0].id.clone();
    h.library.toggle_selected_tag(alpha.clone()).unwrap();
    let before = entities(&h.library.snapshot());
    h.store.fail("delete_tag", transport());

    h.library.delete_tag(&alpha).settled().await.unwrap_err();
    let after = h.library.snapshot();
    assert_eq!(entities(&after), before);
    assert_eq!(after.filter().selected_tags, vec![alpha]);
}

#[tokio::test]
async fn failed_tag_create_releases_the_name() {
    let h = harness().await;
    h.store.fail("create_tag", transport());
    h.library.add_tag("beta").settled().await.unwrap_err();
    assert!(h.library.snapshot().tags().is_empty());

    h.store.heal("create_tag");
    let beta = h.library.add_tag("beta").settled().await.unwrap();
    assert_eq!(h.library.snapshot().tags(), std::slice::from_ref(&beta));
}

#[tokio::test]
async fn not_found_drops_the_dangling_prompt() {
    let h = seeded().await;
    let target = h.library.snapshot().prompts()[0].id.clone();
    // Someone else deletes it behind our back.
    shelf_gateway::PromptStore::delete_prompt(h.store.inner(), &target)
        .await
        .unwrap();

    let err = h
        .library
        .update_prompt(&target, PromptPatch::default().title("late"))
        .settled()
        .await
        .unwrap_err();
    assert_eq!(err, LibraryError::not_found(EntityKind::Prompt, &target));

    let after = h.library.snapshot();
    assert!(after.prompt(&target).is_none());
    assert_memberships_consistent(&after);
}

#[tokio::test]
async fn auth_failure_refreshes_current_user() {
    let h = seeded().await;
    let target = h.library.snapshot().prompts()[0].id.clone();
    h.credentials.clear();
    h.store
        .fail("update_prompt", GatewayError::auth("session expired"));

    let err = h
        .library
        .update_prompt(&target, PromptPatch::default().title("x"))
        .settled()
        .await
        .unwrap_err();
    assert!(matches!(err, LibraryError::Auth { .. }));
    assert!(h.library.current_user().is_none());
}

#[tokio::test]
async fn settle_notices_report_outcomes() {
    let h = seeded().await;
    let mut events = h.library.events();
    let target = h.library.snapshot().prompts()[0].id.clone();

    h.library
        .update_prompt(&target, PromptPatch::default().title("ok"))
        .settled()
        .await
        .unwrap();
    let notice = events.recv().await.unwrap();
    assert_eq!(notice.kind, MutationKind::UpdatePrompt);
    assert_eq!(notice.target, MutationTarget::Prompt(target.clone()));
    assert_eq!(notice.outcome, MutationOutcome::Committed);

    h.store.fail("delete_prompt", transport());
    let err = h.library.delete_prompt(&target).settled().await.unwrap_err();
    let notice = events.recv().await.unwrap();
    assert_eq!(notice.kind, MutationKind::DeletePrompt);
    assert_eq!(notice.outcome, MutationOutcome::RolledBack(err));
}

#[tokio::test]
async fn validation_blocks_dispatch() {
    let h = seeded().await;
    let revision = h.library.snapshot().revision();

    let err = h
        .library
        .create_prompt(PromptDraft::new("  ", "body"))
        .settled()
        .await
        .unwrap_err();
    assert!(matches!(err, LibraryError::Validation { .. }));
    assert_eq!(h.library.snapshot().revision(), revision);
    assert_eq!(h.store.calls("create_prompt"), 3);
}

#[tokio::test]
async fn refresh_failure_keeps_entities() {
    let h = seeded().await;
    let before = entities(&h.library.snapshot());
    h.store.fail("list_tags", transport());

    let err = h.library.refresh().await.unwrap_err();
    let after = h.library.snapshot();
    assert_eq!(entities(&after), before);
    assert!(!after.is_loading());
    assert_eq!(after.last_error(), Some(&err));
}

#[tokio::test]
async fn late_failure_keeps_a_newer_committed_delete() {
    let h = seeded().await;
    let target = h.library.snapshot().prompts()[0].id.clone();
    h.store.hold("update_prompt");
    h.store.fail("update_prompt", transport());

    let edit = h
        .library
        .update_prompt(&target, PromptPatch::default().title("late"));
    tokio::task::yield_now().await;
    h.library.delete_prompt(&target).settled().await.unwrap();

    h.store.release("update_prompt");
    edit.settled().await.unwrap_err();

    let after = h.library.snapshot();
    assert!(after.prompt(&target).is_none());
    assert_eq!(after.prompts().len(), 2);
    assert_eq!(after.pending_mutations(), 0);
    assert_memberships_consistent(&after);
}

#[tokio::test]
async fn stacked_failures_restore_the_oldest_value() {
    let h = seeded().await;
    let before = entities(&h.library.snapshot());
    let target = before.0[0].id.clone();
    h.store.hold("update_prompt");
    h.store.fail("update_prompt", transport());

    let first = h
        .library
        .update_prompt(&target, PromptPatch::default().title("one"));
    let second = h
        .library
        .update_prompt(&target, PromptPatch::default().title("two"));
    assert_eq!(h.library.snapshot().prompt(&target).unwrap().title, "two");

    h.store.release("update_prompt");
    let (first, second) = tokio::join!(first.settled(), second.settled());
    assert!(first.is_err() && second.is_err());
    assert_eq!(entities(&h.library.snapshot()), before);
}
