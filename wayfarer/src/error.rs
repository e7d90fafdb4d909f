//! Error taxonomy for route and asset loading.
//!
//! Failures fall into two classes:
//!
//! - **Asset-load errors**: the infrastructure failed. A script or stylesheet
//!   could not be fetched, the route is missing from the build manifest, or
//!   the overall load timed out. These are tagged so callers can distinguish
//!   them from application bugs and show a retry-style failure UI.
//! - **Module errors**: the route's own code failed while evaluating. These
//!   are legitimate application errors and are propagated untagged.
//!
//! Errors are shared across concurrent waiters of the same cache key, so the
//! type is `Clone` and is usually passed around as `Arc<LoadError>`.

use std::sync::Arc;

use thiserror::Error;

/// A failure while loading a route or one of its assets.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// A script asset failed to load or execute at the host level.
    #[error("failed to load script: {url}")]
    Script { url: String },

    /// A stylesheet fetch returned a non-success status.
    #[error("failed to load stylesheet {href} (status {status})")]
    Stylesheet { href: String, status: u16 },

    /// The build manifest has no entry for the requested route.
    #[error("route not in build manifest: {route}")]
    ManifestMiss { route: String },

    /// The route did not finish loading within the configured deadline.
    #[error("route did not load within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Transport-level failure talking to the asset origin.
    #[error("asset request failed: {message}")]
    Http { message: String },

    /// The load task was abandoned before producing a result.
    ///
    /// Seen by waiters when the computing side dropped its resolver without
    /// settling, e.g. the runtime shut down mid-load.
    #[error("load was abandoned before completion")]
    Abandoned,

    /// The route's own module code failed during evaluation.
    ///
    /// Not an asset-load error: the network and cache did their job, the
    /// application code threw.
    #[error("module evaluation failed: {message}")]
    Module { message: String },
}

impl LoadError {
    /// Whether this is an infrastructure (asset-load) failure rather than a
    /// failure inside the route's own code.
    ///
    /// Replaces the marker-property tag of the original design: a predicate
    /// over the variant rather than a sentinel field.
    pub fn is_asset_error(&self) -> bool {
        !matches!(self, LoadError::Module { .. })
    }

    /// Convenience constructor for module-evaluation failures.
    pub fn module(message: impl Into<String>) -> Self {
        LoadError::Module {
            message: message.into(),
        }
    }

    /// Convenience constructor for transport failures.
    pub fn http(message: impl Into<String>) -> Self {
        LoadError::Http {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for LoadError {
    fn from(err: reqwest::Error) -> Self {
        LoadError::Http {
            message: err.to_string(),
        }
    }
}

/// Shared error handle used by the caches.
///
/// All concurrent waiters for a failed key receive a clone of the same
/// underlying error.
pub type SharedError = Arc<LoadError>;
