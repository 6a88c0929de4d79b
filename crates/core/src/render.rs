//! `{{field}}` placeholder rendering for plain-text templates.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::error::CoreError;
use crate::generation::{DocumentGenerator, Template};
use crate::types::Row;

/// Regex pattern matching `{{field}}` tokens, whitespace allowed inside braces.
pub const PLACEHOLDER_PATTERN: &str = r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_.\-]*)\s*\}\}";

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PLACEHOLDER_PATTERN).expect("valid regex"));

/// Field names referenced by `content`, in order of first appearance.
pub fn placeholders(content: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for caps in PLACEHOLDER_RE.captures_iter(content) {
        let name = caps[1].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

/// Substitute every placeholder in `content` from `row`.
///
/// String values are inserted verbatim; other JSON values use their JSON
/// text. A field missing from the row is a generation error.
pub fn render(content: &str, row: &Row) -> Result<String, CoreError> {
    if let Some(missing) = placeholders(content)
        .into_iter()
        .find(|name| !row.contains_key(name))
    {
        return Err(CoreError::Generation(format!(
            "missing field '{missing}' in data row"
        )));
    }

    let rendered = PLACEHOLDER_RE.replace_all(content, |caps: &Captures| {
        match row.get(&caps[1]) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    });
    Ok(rendered.into_owned())
}

/// [`DocumentGenerator`] that renders UTF-8 templates with [`render`].
#[derive(Debug, Default, Clone)]
pub struct PlaceholderGenerator;

#[async_trait]
impl DocumentGenerator for PlaceholderGenerator {
    async fn generate(&self, template: &Template, row: &Row) -> Result<Vec<u8>, CoreError> {
        render(&template.content, row).map(String::into_bytes)
    }
}
