//! HTTP-backed asset host.
//!
//! Fetches scripts and stylesheets over HTTP with reqwest and hands script
//! bytes to a pluggable [`ScriptExecutor`] for evaluation. Prefetch hints are
//! plain low-priority GETs whose bodies are discarded; the point is to warm
//! whatever HTTP cache sits between us and the origin.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use tracing::debug;

use super::{AssetHost, AssetKind, ScriptExecutor};
use crate::error::LoadError;
use crate::manifest::ScriptUrl;

/// Default timeout for individual asset requests.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Asset host that retrieves everything over HTTP.
pub struct HttpAssetHost {
    client: Client,
    executor: Arc<dyn ScriptExecutor>,
    /// Forwarded from build config; sent as an `Origin`-style marker header
    /// so the asset origin can apply its cross-origin policy.
    cross_origin: Option<String>,
}

impl HttpAssetHost {
    pub fn new(executor: Arc<dyn ScriptExecutor>, cross_origin: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            executor,
            cross_origin,
        }
    }

    pub fn with_client(
        client: Client,
        executor: Arc<dyn ScriptExecutor>,
        cross_origin: Option<String>,
    ) -> Self {
        Self {
            client,
            executor,
            cross_origin,
        }
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.get(url);
        if let Some(cross_origin) = &self.cross_origin {
            req = req.header("x-cross-origin", cross_origin.as_str());
        }
        req
    }
}

impl AssetHost for HttpAssetHost {
    fn execute_script(&self, url: &ScriptUrl) -> BoxFuture<'static, Result<(), LoadError>> {
        let request = self.request(url.as_str());
        let executor = Arc::clone(&self.executor);
        let url = url.clone();
        Box::pin(async move {
            let response = request.send().await.map_err(|_| LoadError::Script {
                url: url.as_str().to_string(),
            })?;
            if !response.status().is_success() {
                return Err(LoadError::Script {
                    url: url.as_str().to_string(),
                });
            }
            let bytes = response.bytes().await.map_err(|_| LoadError::Script {
                url: url.as_str().to_string(),
            })?;
            debug!(url = url.as_str(), bytes = bytes.len(), "executing script");
            executor.execute(url.as_str(), &bytes)
        })
    }

    fn fetch_stylesheet(&self, href: &str) -> BoxFuture<'static, Result<String, LoadError>> {
        let request = self.request(href);
        let href = href.to_string();
        Box::pin(async move {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(LoadError::Stylesheet {
                    href,
                    status: status.as_u16(),
                });
            }
            Ok(response.text().await?)
        })
    }

    fn prefetch_hint(&self, url: &str, kind: AssetKind) -> BoxFuture<'static, Result<(), LoadError>> {
        let request = self.request(url).header("purpose", "prefetch");
        let url = url.to_string();
        let kind = kind.as_str();
        Box::pin(async move {
            let response = request.send().await.map_err(|err| LoadError::Http {
                message: err.to_string(),
            })?;
            debug!(url = url.as_str(), kind, status = %response.status(), "prefetch hint issued");
            // Body intentionally dropped; the fetch itself warms the cache.
            Ok(())
        })
    }
}
