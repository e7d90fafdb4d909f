//! Asset fetching and per-URL deduplication.
//!
//! The host seam ([`AssetHost`]) owns the actual mechanics of getting a
//! script executing and a stylesheet's text in hand: in a browser that is
//! DOM `<script>`/`<link>` injection, here the default is an HTTP host
//! ([`http::HttpAssetHost`]) and tests use in-memory fakes. The cache layer
//! ([`AssetCache`]) sits on top and guarantees each URL is fetched and each
//! script executed at most once per process, except in development mode where
//! script memoization is deliberately skipped so hot reload can re-run
//! modules.

pub mod http;

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use crate::error::{LoadError, SharedError};
use crate::future_cache::FutureCache;
use crate::manifest::ScriptUrl;

/// What kind of asset a prefetch hint refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Script,
    Style,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Script => "script",
            AssetKind::Style => "style",
        }
    }
}

/// A fetched stylesheet: its URL plus the CSS text.
///
/// Shared across every route that references the same href.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleSheet {
    pub href: String,
    pub content: Arc<str>,
}

/// Evaluates fetched script bytes.
///
/// The executed module is expected to register itself back into the route
/// loader (`on_entrypoint`) by convention; execution here only reports
/// whether evaluation itself succeeded.
pub trait ScriptExecutor: Send + Sync {
    fn execute(&self, url: &str, source: &[u8]) -> Result<(), LoadError>;
}

/// Platform seam for asset retrieval.
///
/// Implementations must wire their failure reporting before starting the
/// fetch (a host that begins fetching synchronously must not lose the error
/// signal) and return futures that own everything they need.
pub trait AssetHost: Send + Sync {
    /// Fetch and execute a script. Resolves once the script has run (or
    /// definitively failed to load).
    fn execute_script(&self, url: &ScriptUrl) -> BoxFuture<'static, Result<(), LoadError>>;

    /// Fetch a stylesheet's text. Non-success responses are tagged
    /// asset-load errors.
    fn fetch_stylesheet(&self, href: &str) -> BoxFuture<'static, Result<String, LoadError>>;

    /// Issue a low-priority resource hint for `url`.
    fn prefetch_hint(&self, url: &str, kind: AssetKind) -> BoxFuture<'static, Result<(), LoadError>>;

    /// Whether a script for `url` is already present in the host (e.g.
    /// injected by server-rendered markup).
    fn has_script(&self, _url: &str) -> bool {
        false
    }

    /// Whether a prefetch/preload hint for `url` is already in flight.
    fn has_prefetch_hint(&self, _url: &str) -> bool {
        false
    }

    /// Whether the host supports prefetch hints at all. When it does not,
    /// hinting silently becomes a no-op and prefetch falls through to the
    /// idle full load.
    fn supports_prefetch_hint(&self) -> bool {
        true
    }
}

/// Deduplicating cache over an [`AssetHost`].
pub struct AssetCache {
    host: Arc<dyn AssetHost>,
    /// Script load records: a resolved entry means the script has executed.
    scripts: FutureCache<()>,
    stylesheets: FutureCache<StyleSheet>,
    dev_mode: bool,
}

impl AssetCache {
    pub fn new(host: Arc<dyn AssetHost>, dev_mode: bool) -> Self {
        Self {
            host,
            scripts: FutureCache::new(),
            stylesheets: FutureCache::new(),
            dev_mode,
        }
    }

    /// Execute a script at most once per process.
    ///
    /// Short-circuits when the host already has the script (server-rendered
    /// pages). In development mode memoization is skipped entirely: hot
    /// reload needs modules to re-run on every invocation.
    pub async fn execute_script_once(&self, url: &ScriptUrl) -> Result<(), SharedError> {
        if self.dev_mode {
            return self
                .host
                .execute_script(url)
                .await
                .map_err(SharedError::new);
        }
        let host = Arc::clone(&self.host);
        let script = url.clone();
        self.scripts
            .with_future(url.as_str(), || async move {
                if host.has_script(script.as_str()) {
                    debug!(url = script.as_str(), "script already present, skipping");
                    return Ok(());
                }
                host.execute_script(&script).await
            })
            .await
    }

    /// Fetch a stylesheet, memoized by href.
    pub async fn fetch_stylesheet(&self, href: &str) -> Result<StyleSheet, SharedError> {
        let host = Arc::clone(&self.host);
        let target = href.to_string();
        self.stylesheets
            .with_future(href, || async move {
                let content = host.fetch_stylesheet(&target).await?;
                Ok(StyleSheet {
                    href: target,
                    content: content.into(),
                })
            })
            .await
    }

    /// Issue a prefetch hint for `url` unless the host already handles it.
    pub async fn prefetch_hint(&self, url: &str, kind: AssetKind) -> Result<(), LoadError> {
        if !self.host.supports_prefetch_hint() {
            return Ok(());
        }
        if self.host.has_prefetch_hint(url) || self.host.has_script(url) {
            debug!(url, "prefetch hint already handled");
            return Ok(());
        }
        self.host.prefetch_hint(url, kind).await
    }
}
