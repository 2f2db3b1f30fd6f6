//! Filesystem-safe names derived from record titles.

use std::sync::LazyLock;

use regex::Regex;

use super::sniff::ArtifactKind;

/// Maximum characters kept from a title.
pub const MAX_NAME_CHARS: usize = 100;

/// Maximum UTF-8 bytes kept from a title.
pub const MAX_NAME_BYTES: usize = 200;

/// Name used when nothing usable is left of the title.
pub const PLACEHOLDER_NAME: &str = "unnamed";

/// Runs of characters illegal in file names on common filesystems.
#[allow(clippy::expect_used)]
static ILLEGAL_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[\\/:*?"<>|\p{Cc}]+"#).expect("file name regex is valid") // Static pattern, safe to panic
});

/// Sanitizes a title into a file stem.
///
/// Each run of illegal or control characters becomes one `_`; leading and
/// trailing spaces and dots are trimmed; the result is capped at
/// [`MAX_NAME_CHARS`] characters and [`MAX_NAME_BYTES`] bytes. Never empty.
#[must_use]
pub fn sanitize_title(title: &str) -> String {
    let replaced = ILLEGAL_RUN.replace_all(title, "_");
    let trimmed = replaced.trim_matches(|c| c == ' ' || c == '.');

    let mut stem = String::with_capacity(trimmed.len().min(MAX_NAME_BYTES));
    for (count, ch) in trimmed.chars().enumerate() {
        if count == MAX_NAME_CHARS || stem.len() + ch.len_utf8() > MAX_NAME_BYTES {
            break;
        }
        stem.push(ch);
    }

    let stem = stem.trim_end_matches(|c| c == ' ' || c == '.');
    if stem.is_empty() {
        PLACEHOLDER_NAME.to_string()
    } else {
        stem.to_string()
    }
}

/// Full file name for an artifact of `kind` titled `title`.
#[must_use]
pub fn file_name_for(title: &str, kind: ArtifactKind) -> String {
    format!("{}{}", sanitize_title(title), kind.extension())
}
