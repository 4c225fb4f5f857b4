//! Walks a prompt library through its main flows against a local backend.
//!
//! Set `PROMPT_SHELF_BACKEND` (and friends) to point at another backend;
//! otherwise a throwaway data directory under the system temp dir is used.

use std::path::PathBuf;

use anyhow::{Context, Result};
use prompt_shelf::config::{self, BackendConfig, ShelfConfig};
use prompt_shelf::prelude::*;
use prompt_shelf::prompts::PromptTemplate;
use prompt_shelf::telemetry::{self, TelemetryConfig};
use tracing::info;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let (settings, scratch) = load_config()?;
    telemetry::init(&TelemetryConfig::new(&settings.log_filter))?;

    println!("=== prompt-shelf: library walkthrough ===\n");

    let backend = config::connect(&settings).await?;
    let library =
        PromptLibrary::with_config(backend.store, backend.auth, settings.library_config());

    let user = library
        .sign_up("ada", "ada@example.com", "analytical-engine")
        .await
        .context("sign up failed")?;
    println!("Signed in as {} <{}>\n", user.username, user.email);

    build_library(&library).await?;
    browse(&library)?;
    edit_and_export(&library).await?;
    show_rollback(&library).await;

    library.shutdown();
    if let Some(dir) = scratch {
        std::fs::remove_dir_all(&dir).ok();
    }
    Ok(())
}

fn load_config() -> Result<(ShelfConfig, Option<PathBuf>)> {
    let mut settings = config::from_env()?;
    let mut scratch = None;
    if settings.backend == BackendConfig::default() {
        let dir = std::env::temp_dir().join(format!("prompt-shelf-demo-{}", Uuid::new_v4()));
        settings.backend = BackendConfig::Local {
            data_dir: Some(dir.clone()),
        };
        scratch = Some(dir);
    }
    Ok((settings, scratch))
}

async fn build_library(library: &PromptLibrary) -> Result<()> {
    println!("--- Building the library ---\n");

    let work = library
        .create_collection(CollectionDraft::new("Work").with_description("Day job prompts"))
        .settled()
        .await?;
    let review = library.add_tag("review").settled().await?;
    let writing = library.add_tag("Writing").settled().await?;

    // Same name, different case: resolves to the existing tag.
    let again = library.add_tag("REVIEW").settled().await?;
    assert_eq!(again.id, review.id);

    let drafts = [
        PromptDraft::new("Code review helper", "Review this {language} code:\n{code}")
            .in_collection(work.id.clone())
            .with_tags(vec![review.clone()]),
        PromptDraft::new("Release notes", "Summarise these commits for {audience}")
            .in_collection(work.id.clone())
            .with_tags(vec![writing.clone()]),
        PromptDraft::new("Journal", "What went well today?").private(),
    ];
    for draft in drafts {
        let handle = library.create_prompt(draft);
        // The prompt is visible before the backend confirms it.
        println!("  pending mutations: {}", library.snapshot().pending_mutations());
        let prompt = handle.settled().await?;
        println!("  created `{}` (v{})", prompt.title, prompt.version);
    }
    println!();
    Ok(())
}

fn browse(library: &PromptLibrary) -> Result<()> {
    println!("--- Filtering ---\n");

    let snapshot = library.snapshot();
    let work = snapshot
        .collections()
        .first()
        .map(|c| c.id.clone())
        .context("no collection")?;
    library.set_selected_collection(Some(work))?;
    library.set_sort_option(SortOption::Alphabetical);
    print_visible(library, "in Work, alphabetical");

    library.set_search_query("review");
    print_visible(library, "in Work matching `review`");

    library.clear_filters();
    print_visible(library, "everything");
    Ok(())
}

async fn edit_and_export(library: &PromptLibrary) -> Result<()> {
    println!("--- Editing ---\n");

    let target = library
        .snapshot()
        .prompts()
        .iter()
        .find(|p| p.title == "Code review helper")
        .cloned()
        .context("prompt missing")?;

    let updated = library
        .update_prompt(
            &target.id,
            PromptPatch::default().content("Review this {language} code for bugs:\n{code}"),
        )
        .settled()
        .await?;
    println!(
        "  `{}` is now v{} with {} earlier version(s)",
        updated.title,
        updated.version,
        updated.version_history.len()
    );

    let favorite = library.toggle_favorite(&updated.id).settled().await?;
    println!("  favorite: {favorite}");

    let rendered = PromptTemplate::new(&updated.content)
        .with_value("language", "Rust")
        .with_value("code", "fn main() {}")
        .render();
    println!("  rendered:\n{rendered}\n");

    let export = library.export(&updated.id)?;
    println!("  export file: {}\n", export.file_name);
    Ok(())
}

async fn show_rollback(library: &PromptLibrary) {
    println!("--- Validation ---\n");

    let before = library.snapshot().revision();
    match library.create_prompt(PromptDraft::new("   ", "no title")).settled().await {
        Ok(prompt) => println!("  unexpectedly created {}", prompt.id),
        Err(err) => println!("  rejected: {err}"),
    }
    info!(
        unchanged = library.snapshot().revision() == before,
        "state untouched by rejected intent"
    );
}

fn print_visible(library: &PromptLibrary, label: &str) {
    let snapshot = library.snapshot();
    println!("  {label}:");
    for prompt in snapshot.visible() {
        let tags: Vec<&str> = prompt.tags.iter().map(|t| t.name.as_str()).collect();
        println!("    - {} [{}]", prompt.title, tags.join(", "));
    }
    println!();
}
