//! Placeholder substitution for prompt content.
//!
//! Content may embed `{name}` or `{{name}}` tokens. They are resolved at
//! display time only; stored content always keeps the raw tokens.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Result alias for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Errors that can occur while filling placeholders.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// A placeholder had no value during strict rendering.
    #[error("missing value for placeholder: {name}")]
    MissingPlaceholder {
        /// Name of the unresolved placeholder.
        name: String,
    },
}

/// Prompt content paired with the values chosen for its placeholders.
///
/// # Examples
///
/// ```
/// use shelf_prompts::template::PromptTemplate;
///
/// let mut template = PromptTemplate::new("Summarize {{topic}} for {audience}.");
/// template.set_value("topic", "Rust lifetimes");
///
/// assert_eq!(template.placeholders(), vec!["topic", "audience"]);
/// assert_eq!(template.render(), "Summarize Rust lifetimes for {audience}.");
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PromptTemplate {
    content: String,
    values: HashMap<String, String>,
}

impl PromptTemplate {
    /// Wraps raw prompt content.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            values: HashMap::new(),
        }
    }

    /// Sets the value used for a placeholder.
    pub fn set_value(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Builder-style variant of [`set_value`](Self::set_value).
    #[must_use]
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_value(name, value);
        self
    }

    /// Returns the value chosen for a placeholder, if any.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Placeholder names still lacking a value.
    #[must_use]
    pub fn unresolved(&self) -> Vec<&str> {
        placeholders(&self.content)
            .into_iter()
            .filter(|name| !self.values.contains_key(*name))
            .collect()
    }

    /// Distinct placeholder names in order of first appearance.
    #[must_use]
    pub fn placeholders(&self) -> Vec<&str> {
        placeholders(&self.content)
    }

    /// Fills known placeholders and leaves the rest untouched.
    #[must_use]
    pub fn render(&self) -> String {
        fill(&self.content, &self.values)
    }

    /// Fills every placeholder.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::MissingPlaceholder`] for the first placeholder
    /// without a value.
    pub fn render_strict(&self) -> TemplateResult<String> {
        fill_strict(&self.content, &self.values)
    }

    /// Returns the raw content.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }
}

impl fmt::Display for PromptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.content)
    }
}

/// Distinct placeholder names in `content`, in order of first appearance.
#[must_use]
pub fn placeholders(content: &str) -> Vec<&str> {
    let mut seen = HashSet::new();
    segments(content)
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Placeholder { name, .. } => Some(name),
            Segment::Text(_) => None,
        })
        .filter(|name| seen.insert(*name))
        .collect()
}

/// Substitutes placeholders that have a value; unknown ones stay as written.
#[must_use]
pub fn fill<S: std::hash::BuildHasher>(
    content: &str,
    values: &HashMap<String, String, S>,
) -> String {
    let mut out = String::with_capacity(content.len());
    for segment in segments(content) {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Placeholder { name, raw } => {
                out.push_str(values.get(name).map_or(raw, String::as_str));
            }
        }
    }
    out
}

/// Substitutes every placeholder.
///
/// # Errors
///
/// Returns [`TemplateError::MissingPlaceholder`] for the first placeholder
/// without a value.
pub fn fill_strict<S: std::hash::BuildHasher>(
    content: &str,
    values: &HashMap<String, String, S>,
) -> TemplateResult<String> {
    let mut out = String::with_capacity(content.len());
    for segment in segments(content) {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Placeholder { name, .. } => {
                let value = values
                    .get(name)
                    .ok_or_else(|| TemplateError::MissingPlaceholder {
                        name: name.to_owned(),
                    })?;
                out.push_str(value);
            }
        }
    }
    Ok(out)
}

#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Placeholder { name: &'a str, raw: &'a str },
}

/// Splits content into literal text and placeholder tokens.
///
/// `{{name}}` is tried before `{name}`; braces that do not enclose a valid
/// name are kept as text.
fn segments(content: &str) -> Vec<Segment<'_>> {
    let bytes = content.as_bytes();
    let mut out = Vec::new();
    let mut literal_start = 0;
    let mut idx = 0;

    while idx < bytes.len() {
        if bytes[idx] == b'{' {
            if let Some((name, end)) = match_token(content, idx) {
                if literal_start < idx {
                    out.push(Segment::Text(&content[literal_start..idx]));
                }
                out.push(Segment::Placeholder {
                    name,
                    raw: &content[idx..end],
                });
                idx = end;
                literal_start = end;
                continue;
            }
        }
        idx += 1;
    }

    if literal_start < content.len() {
        out.push(Segment::Text(&content[literal_start..]));
    }
    out
}

fn match_token(content: &str, start: usize) -> Option<(&str, usize)> {
    let (open, close) = if content[start..].starts_with("{{") {
        (2, "}}")
    } else {
        (1, "}")
    };
    let body_start = start + open;
    let rel = content[body_start..].find(close)?;
    let inner = &content[body_start..body_start + rel];
    is_valid_name(inner).then(|| (inner.trim(), body_start + rel + close.len()))
}

fn is_valid_name(inner: &str) -> bool {
    let trimmed = inner.trim_matches(' ');
    !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ' '))
}
