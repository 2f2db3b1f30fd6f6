//! Error types for artifact fetching.
//!
//! [`FetchError`] carries the context (URL, path) of a failed operation.
//! The pipeline folds it into a [`FailureReason`] on the outcome; it never
//! escapes a batch.

use std::path::PathBuf;

use thiserror::Error;

use super::FailureReason;

/// Errors raised while fetching one artifact.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The HTTP client could not be constructed.
    #[error("could not build HTTP client: {source}")]
    Client {
        #[source]
        source: reqwest::Error,
    },

    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Any status other than 200.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error while writing the artifact.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The download reference is not a usable URL.
    #[error("invalid download reference: {reference}")]
    InvalidReference {
        /// The reference as extracted.
        reference: String,
    },
}

impl FetchError {
    /// Creates a network error, promoting reqwest timeouts to [`FetchError::Timeout`].
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::Timeout { url: url.into() };
        }
        Self::Network {
            url: url.into(),
            source,
        }
    }

    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_reference(reference: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.into(),
        }
    }

    /// Returns `true` for failures worth another request: connect errors,
    /// timeouts, and HTTP 408, 429 and 5xx.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Network { source, .. } => source.is_connect() || source.is_timeout(),
            Self::HttpStatus { status, .. } => matches!(status, 408 | 429 | 500..=599),
            Self::Client { .. } | Self::Io { .. } | Self::InvalidReference { .. } => false,
        }
    }

    /// Classifies the error for the download outcome.
    #[must_use]
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Self::HttpStatus { status, .. } => FailureReason::HttpStatus(*status),
            Self::Io { source, .. } => FailureReason::WriteError(source.to_string()),
            Self::InvalidReference { .. } => FailureReason::InvalidReference,
            Self::Client { .. } | Self::Network { .. } | Self::Timeout { .. } => {
                FailureReason::Network(self.to_string())
            }
        }
    }
}
