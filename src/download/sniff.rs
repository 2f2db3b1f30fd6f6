//! Content sniffing on the first bytes of a response body.

use std::fmt;

use serde::Serialize;

use super::constants::{DECODE_PREFIX_LEN, ERROR_PAGE_MARKER, HTML_MARKER, SNIFF_LEN};

const PDF_MAGIC: &[u8] = b"%PDF";

/// Artifact formats the listing serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ArtifactKind {
    Pdf,
    /// CNKI's native format; the default when nothing else matches.
    Caj,
}

impl ArtifactKind {
    /// File extension including the leading dot.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Pdf => ".pdf",
            Self::Caj => ".caj",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.extension()[1..])
    }
}

/// What the head of a body looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sniffed {
    Artifact(ArtifactKind),
    /// An error or HTML page served in place of the artifact.
    ErrorPage,
    Empty,
}

/// Classifies a body from its first bytes.
///
/// Only the first [`SNIFF_LEN`] bytes are considered; the marker search
/// covers the first [`DECODE_PREFIX_LEN`] bytes, decoded lossily.
#[must_use]
pub fn sniff(head: &[u8]) -> Sniffed {
    let head = &head[..head.len().min(SNIFF_LEN)];
    if head.is_empty() {
        return Sniffed::Empty;
    }
    if head.starts_with(PDF_MAGIC) {
        return Sniffed::Artifact(ArtifactKind::Pdf);
    }

    let prefix = String::from_utf8_lossy(&head[..head.len().min(DECODE_PREFIX_LEN)]);
    if prefix.contains(ERROR_PAGE_MARKER) || prefix.to_lowercase().contains(HTML_MARKER) {
        return Sniffed::ErrorPage;
    }
    Sniffed::Artifact(ArtifactKind::Caj)
}
