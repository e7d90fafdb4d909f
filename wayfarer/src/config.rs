//! Runtime configuration for the route loader.
//!
//! Configuration is constructed once at startup (typically from the build
//! output that produced the asset manifest) and passed by value into the
//! loader. There are no file-scope globals: tests construct their own config
//! per instance.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default deadline for a full route load (file list + scripts + styles).
pub const DEFAULT_ROUTE_TIMEOUT_MS: u64 = 3800;

/// Which build the runtime is serving.
///
/// Development mode changes caching behavior: script execution is never
/// memoized (hot reload re-runs modules) and the route-load timeout is gated
/// behind the dev server's build-ready signal so a slow compile does not trip
/// it spuriously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    Production,
    Development,
}

impl RuntimeMode {
    pub fn is_development(&self) -> bool {
        matches!(self, RuntimeMode::Development)
    }
}

/// Configuration for the route loader and asset cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Prefix prepended to every asset path, e.g. a CDN origin.
    pub asset_prefix: String,

    /// Deployment identifier appended as a query parameter to every asset
    /// URL. A pure string transform; the cache never inspects it.
    pub deployment_id: Option<String>,

    /// Cross-origin attribute forwarded to the asset host when it injects
    /// scripts or prefetch hints.
    pub cross_origin: Option<String>,

    /// Production or development behavior.
    pub mode: RuntimeMode,

    /// Deadline for a full route load in milliseconds.
    pub route_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            asset_prefix: String::new(),
            deployment_id: None,
            cross_origin: None,
            mode: RuntimeMode::Production,
            route_timeout_ms: DEFAULT_ROUTE_TIMEOUT_MS,
        }
    }
}

impl RuntimeConfig {
    /// Create a production config with the given asset prefix.
    pub fn production(asset_prefix: impl Into<String>) -> Self {
        Self {
            asset_prefix: asset_prefix.into(),
            ..Self::default()
        }
    }

    /// Create a development config with the given asset prefix.
    pub fn development(asset_prefix: impl Into<String>) -> Self {
        Self {
            asset_prefix: asset_prefix.into(),
            mode: RuntimeMode::Development,
            ..Self::default()
        }
    }

    /// The route-load deadline as a [`Duration`].
    pub fn route_timeout(&self) -> Duration {
        Duration::from_millis(self.route_timeout_ms)
    }
}
