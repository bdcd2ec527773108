//! Error types for the iiifetch core

use thiserror::Error;

/// Errors that can occur while harvesting a manifest
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to parse manifest {url}: {reason}")]
    ManifestParse { url: String, reason: String },

    #[error("No usable image service on canvas {index}")]
    ImageServiceUnsupported { index: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Server returned HTTP {status}")]
    Http { status: u16 },

    #[error("Response truncated: received {got} of {expected} bytes")]
    Truncated { got: u64, expected: u64 },

    #[error("Downloaded bytes are not a decodable image: {0}")]
    Integrity(String),

    #[error("Harvest was cancelled")]
    Cancelled,
}

impl HarvestError {
    /// Whether a download attempt failing with this error may be retried.
    ///
    /// 429 counts as retryable despite being a 4xx: it resolves by
    /// waiting. Truncation and undecodable bytes are retried because
    /// some institutions intermittently serve short responses.
    pub fn is_retryable(&self) -> bool {
        match self {
            HarvestError::Network(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            HarvestError::Http { status } => *status == 429 || *status >= 500,
            HarvestError::Truncated { .. } | HarvestError::Integrity(_) => true,
            _ => false,
        }
    }

    /// The HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            HarvestError::Http { status } => Some(*status),
            HarvestError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
