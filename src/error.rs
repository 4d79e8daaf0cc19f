//! Error types shared by the listing and synchronization layers.
//!
//! [`ListingError`] is always fatal to a run. [`SyncError`] is always scoped to a
//! single repository and never escapes a worker.

use std::path::PathBuf;
use thiserror::Error;

/// Failures while authenticating against or listing the remote API.
#[derive(Debug, Error)]
pub enum ListingError {
    #[error("authentication against {url} failed with HTTP {status}")]
    Authentication { url: String, status: u16 },

    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("malformed response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("the authenticated account has no username")]
    MissingUsername,
}

/// Per-repository failures reported by workers.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("unsupported scm '{scm}'")]
    UnsupportedScm { repository: String, scm: String },

    #[error("{} is not a valid mirror: {output}", path.display())]
    ValidationFailed { path: PathBuf, output: String },

    #[error("`{command}` failed:\n{output}")]
    CloneFailed { command: String, output: String },

    #[error("`{command}` failed:\n{output}")]
    UpdateFailed { command: String, output: String },

    #[error("failed to remove {}: {source}", path.display())]
    Purge {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create {}: {source}", path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
