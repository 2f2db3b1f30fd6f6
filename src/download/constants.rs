//! Constants for the download module (timeouts, sniffing, progress).

use std::time::Duration;

/// Default per-request timeout for artifact downloads (60 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Referer sent when no listing URL is known.
pub const DEFAULT_REFERER: &str = "https://www.cnki.net";

/// Bytes read from the body before deciding what the artifact is (8 KiB).
pub const SNIFF_LEN: usize = 8 * 1024;

/// Bytes of the head decoded as text when looking for error-page markers.
pub const DECODE_PREFIX_LEN: usize = 200;

/// Marker the site serves in place of an artifact when the session is rejected.
pub const ERROR_PAGE_MARKER: &str = "来源应用不正确";

/// Lower-cased HTML marker; any HTML body is treated as an error page.
pub const HTML_MARKER: &str = "<html";

/// Suffix of the temporary file written before the final rename.
pub const PART_SUFFIX: &str = ".part";

/// A progress line is logged every this many processed records.
pub const PROGRESS_INTERVAL: usize = 10;

/// Attempts per request, counting the first (transient failures only).
pub const REQUEST_ATTEMPTS: u32 = 2;

/// Delay between request attempts.
pub const REQUEST_RETRY_DELAY: Duration = Duration::from_secs(1);
