//! Shared helpers used across extraction, scoring, and commands.
//!
//! Name handling lives here so every stage derives simple names and
//! test-file classifications the same way.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;

use crate::cli::OutputFormat;
use crate::output::Format;

// ---------------------------------------------------------------------------
// Names
// ---------------------------------------------------------------------------

/// Last dotted segment of a qualified name (`a.b.Foo` -> `Foo`).
pub fn simple_name(qualified: &str) -> &str {
    qualified.rsplit('.').next().unwrap_or(qualified)
}

/// Split `pkg.Class.method` into (`pkg.Class`, `method`).
///
/// Returns `None` when there is no qualifier.
pub fn split_member(qualified: &str) -> Option<(&str, &str)> {
    let (owner, member) = qualified.rsplit_once('.')?;
    if owner.is_empty() || member.is_empty() {
        return None;
    }
    Some((owner, member))
}

/// Drop repeated entries keeping first occurrence, then cap the length.
pub fn dedup_capped<I>(items: I, cap: usize) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        if out.len() >= cap {
            break;
        }
        if seen.insert(item.clone()) {
            out.push(item);
        }
    }
    out
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Time allowed for one external call: `timeout`, cut short by `deadline`.
pub fn call_budget(timeout: Duration, deadline: Option<Instant>) -> Duration {
    match deadline {
        Some(d) => timeout.min(d.saturating_duration_since(Instant::now())),
        None => timeout,
    }
}

// ---------------------------------------------------------------------------
// Test files
// ---------------------------------------------------------------------------

/// Whether a path looks like test code.
///
/// A directory segment named `test`, `tests` or `testing` marks the whole
/// subtree; otherwise the file stem must look like a test class
/// (`FooTest`, `FooTests`, `TestFoo`) or a `test_`/`_test` module.
pub fn is_test_path(path: &str) -> bool {
    let normalized = path.replace('\\', "/");
    let mut segments = normalized.rsplit('/');
    let file_name = segments.next().unwrap_or_default();
    let in_test_dir = segments.any(|seg| {
        matches!(
            seg.to_ascii_lowercase().as_str(),
            "test" | "tests" | "testing"
        )
    });
    let stem = file_name.split('.').next().unwrap_or(file_name);
    in_test_dir
        || tested_class(stem).is_some()
        || stem.starts_with("test_")
        || stem.ends_with("_test")
}

/// Map a test class name to the class it tests.
///
/// `TestFoo`, `FooTest` and `FooTests` all map to `Foo`.
pub fn tested_class(test_class: &str) -> Option<&str> {
    if let Some(rest) = test_class.strip_prefix("Test") {
        if rest.chars().next().is_some_and(|c| c.is_uppercase()) {
            return Some(rest);
        }
    }
    if let Some(rest) = test_class.strip_suffix("Tests") {
        if !rest.is_empty() {
            return Some(rest);
        }
    }
    if let Some(rest) = test_class.strip_suffix("Test") {
        if !rest.is_empty() {
            return Some(rest);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Format mapping
// ---------------------------------------------------------------------------

/// Map the clap [`OutputFormat`] to the library [`Format`].
pub fn cli_format_to_output_format(fmt: &OutputFormat) -> Format {
    match fmt {
        OutputFormat::Markdown => Format::Markdown,
        OutputFormat::Json => Format::Json,
        OutputFormat::Plain => Format::Plain,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
