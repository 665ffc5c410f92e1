//! Error types for content loading and navigation data.

use quick_xml::events::attributes::AttrError;

/// Error while loading a content document.
///
/// [`LoadError::Status`] is an HTTP failure (the origin answered, but not
/// with success); every other variant is a transport or parse failure. The
/// viewer shows the same error fragment for both kinds.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Server (or directory) answered with a non-success status.
    #[error("failed to fetch {url}: status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Resolved location that was requested.
        url: String,
    },

    /// HTTP request failed (connection refused, DNS, TLS, ...).
    #[error("HTTP request failed: {0}")]
    Transport(#[from] ureq::Error),

    /// I/O error reading a local document.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Document markup could not be parsed.
    #[error("markup parse error: {0}")]
    Parse(#[from] quick_xml::Error),

    /// Malformed attribute in the document markup.
    #[error("markup attribute error: {0}")]
    Attr(#[from] AttrError),
}

impl LoadError {
    /// True for non-success responses, false for transport/parse failures.
    pub fn is_http_failure(&self) -> bool {
        matches!(self, Self::Status { .. })
    }
}

/// Error reading a navigation (table of contents) file.
#[derive(Debug, thiserror::Error)]
pub enum NavigationError {
    #[error("cannot read navigation file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid navigation JSON: {0}")]
    Json(#[from] serde_json::Error),
}
