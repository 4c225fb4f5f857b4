//! Single-prompt JSON export.

use serde::Serialize;
use shelf_primitives::Prompt;

/// A serialized prompt and the file name it should be saved under.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptExport {
    /// Suggested file name, e.g. `code-review.json`.
    pub file_name: String,
    /// Pretty-printed prompt JSON.
    pub json: String,
}

/// Serializes a prompt for download.
///
/// # Errors
///
/// Propagates serialization failures from `serde_json`.
pub fn export_prompt(prompt: &Prompt) -> Result<PromptExport, serde_json::Error> {
    Ok(PromptExport {
        file_name: export_file_name(&prompt.title),
        json: serde_json::to_string_pretty(prompt)?,
    })
}

/// Derives a file name: whitespace runs become `-`, then lowercase, then `.json`.
///
/// Path separators and other characters file systems reserve count as
/// whitespace, and leading or trailing dots are dropped, so the result is
/// always a single path component.
#[must_use]
pub fn export_file_name(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| if is_reserved(c) { ' ' } else { c })
        .collect();
    let joined = cleaned.split_whitespace().collect::<Vec<_>>().join("-");
    let stem = joined.trim_matches(|c| c == '.' || c == '-');
    if stem.is_empty() {
        return "prompt.json".to_owned();
    }
    format!("{}.json", stem.to_lowercase())
}

fn is_reserved(c: char) -> bool {
    c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shelf_primitives::PromptDraft;

    #[test]
    fn file_name_collapses_whitespace() {
        assert_eq!(export_file_name("Code  Review\tHelper"), "code-review-helper.json");
        assert_eq!(export_file_name("   "), "prompt.json");
    }

    #[test]
    fn file_name_never_contains_a_path() {
        assert_eq!(export_file_name("../../etc/passwd"), "etc-passwd.json");
        assert_eq!(export_file_name("a\\b/c"), "a-b-c.json");
        assert_eq!(export_file_name("What? Why: <now>"), "what-why-now.json");
        assert_eq!(export_file_name("/"), "prompt.json");
        assert_eq!(export_file_name(".hidden"), "hidden.json");
    }

    #[test]
    fn export_round_trips_through_json() {
        let prompt =
            Prompt::from_draft(PromptDraft::new("My Prompt", "Say {hi}"), None, Utc::now())
                .unwrap();
        let export = export_prompt(&prompt).unwrap();

        assert_eq!(export.file_name, "my-prompt.json");
        let parsed: Prompt = serde_json::from_str(&export.json).unwrap();
        assert_eq!(parsed, prompt);
    }
}
