//! Build-manifest lookup: route name → asset file lists.
//!
//! The manifest format itself is opaque to the loader; this module only
//! answers "which scripts and stylesheets does route R need". Two
//! implementations are provided:
//!
//! - [`BuildManifest`]: production. The manifest arrives asynchronously
//!   (published by the bootstrap script once the build output is known);
//!   lookups issued before publication wait for it. This is the
//!   callback-registration pattern of the original host expressed as a watch
//!   channel.
//! - [`DevManifest`]: development. No manifest exists yet; URLs are
//!   constructed by convention directly from the route name.
//!
//! Every returned URL carries the asset prefix and, when configured, the
//! deployment-id query suffix, a pure string transform applied uniformly.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::sync::watch;

use crate::error::LoadError;

/// A script URL that has passed the host's trust policy.
///
/// Construction goes through a [`ScriptUrlPolicy`] so hosts enforcing a
/// Trusted-Types-style CSP can interpose; the default policy is a no-op
/// promotion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptUrl(String);

impl ScriptUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScriptUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Promotes raw URL strings into [`ScriptUrl`]s.
pub trait ScriptUrlPolicy: Send + Sync {
    fn promote(&self, url: &str) -> ScriptUrl;
}

/// Default policy: every URL is accepted verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScriptUrlPolicy;

impl ScriptUrlPolicy for NoopScriptUrlPolicy {
    fn promote(&self, url: &str) -> ScriptUrl {
        ScriptUrl(url.to_string())
    }
}

/// Asset file lists for one route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteFiles {
    pub scripts: Vec<ScriptUrl>,
    pub css: Vec<String>,
}

/// Route → asset lookup service.
pub trait ManifestService: Send + Sync {
    /// Resolve the script and stylesheet URLs needed to render `route`.
    ///
    /// A route absent from the manifest is an asset-load error
    /// ([`LoadError::ManifestMiss`]).
    fn files_for_route(&self, route: &str) -> BoxFuture<'static, Result<RouteFiles, LoadError>>;
}

/// Raw manifest payload: route name → relative asset paths.
///
/// Scripts and stylesheets are mixed in one list and split by extension at
/// lookup time, matching the build output format.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManifestData {
    #[serde(flatten)]
    pub routes: HashMap<String, Vec<String>>,
}

impl ManifestData {
    pub fn from_json(payload: &str) -> Result<Self, LoadError> {
        serde_json::from_str(payload).map_err(|err| LoadError::Http {
            message: format!("malformed build manifest: {err}"),
        })
    }
}

/// Append the deployment-id query suffix to an asset URL.
///
/// Pure string transform; applied to every asset URL uniformly and never
/// inspected by the caches.
pub fn append_deployment_suffix(url: &str, deployment_id: Option<&str>) -> String {
    match deployment_id {
        Some(id) if !id.is_empty() => {
            let sep = if url.contains('?') { '&' } else { '?' };
            format!("{url}{sep}dpl={id}")
        }
        _ => url.to_string(),
    }
}

/// Map a route name to its on-disk asset path stem (`/` becomes `/index`).
pub fn asset_path_from_route(route: &str) -> String {
    if route == "/" {
        "/index".to_string()
    } else {
        route.to_string()
    }
}

fn full_asset_url(asset_prefix: &str, file: &str, deployment_id: Option<&str>) -> String {
    let url = format!("{}/_assets/{}", asset_prefix, file.trim_start_matches('/'));
    append_deployment_suffix(&url, deployment_id)
}

/// Production manifest service backed by an asynchronously published build
/// manifest.
pub struct BuildManifest {
    asset_prefix: String,
    deployment_id: Option<String>,
    policy: Arc<dyn ScriptUrlPolicy>,
    manifest: watch::Receiver<Option<Arc<ManifestData>>>,
}

/// Publication side of a [`BuildManifest`].
///
/// The bootstrap code calls [`publish`] exactly once, when the build output
/// becomes available; pending lookups resolve at that point.
///
/// [`publish`]: BuildManifestHandle::publish
pub struct BuildManifestHandle {
    tx: watch::Sender<Option<Arc<ManifestData>>>,
}

impl BuildManifestHandle {
    pub fn publish(&self, data: ManifestData) {
        let _ = self.tx.send(Some(Arc::new(data)));
    }
}

impl BuildManifest {
    /// Create an unpublished manifest service plus its publication handle.
    pub fn new(
        asset_prefix: impl Into<String>,
        deployment_id: Option<String>,
        policy: Arc<dyn ScriptUrlPolicy>,
    ) -> (Self, BuildManifestHandle) {
        let (tx, rx) = watch::channel(None);
        (
            Self {
                asset_prefix: asset_prefix.into(),
                deployment_id,
                policy,
                manifest: rx,
            },
            BuildManifestHandle { tx },
        )
    }

    /// Create an already-published manifest service (server-rendered pages
    /// where the manifest shipped inline with the markup).
    pub fn published(
        asset_prefix: impl Into<String>,
        deployment_id: Option<String>,
        policy: Arc<dyn ScriptUrlPolicy>,
        data: ManifestData,
    ) -> Self {
        let (service, handle) = Self::new(asset_prefix, deployment_id, policy);
        handle.publish(data);
        service
    }
}

fn split_files(
    asset_prefix: &str,
    deployment_id: Option<&str>,
    policy: &dyn ScriptUrlPolicy,
    route: &str,
    files: &[String],
) -> RouteFiles {
    let mut scripts = Vec::new();
    let mut css = Vec::new();
    for file in files {
        let url = full_asset_url(asset_prefix, file, deployment_id);
        if file.ends_with(".css") {
            css.push(url);
        } else {
            scripts.push(policy.promote(&url));
        }
    }
    tracing::trace!(route, scripts = scripts.len(), css = css.len(), "manifest lookup");
    RouteFiles { scripts, css }
}

impl ManifestService for BuildManifest {
    fn files_for_route(&self, route: &str) -> BoxFuture<'static, Result<RouteFiles, LoadError>> {
        let mut manifest = self.manifest.clone();
        let route = route.to_string();
        let asset_prefix = self.asset_prefix.clone();
        let deployment_id = self.deployment_id.clone();
        let policy = Arc::clone(&self.policy);
        Box::pin(async move {
            // Wait until the bootstrap publishes the manifest.
            let data = match manifest.wait_for(|data| data.is_some()).await {
                Ok(guard) => guard.clone().unwrap_or_default(),
                Err(_) => {
                    return Err(LoadError::Http {
                        message: "build manifest was never published".into(),
                    })
                }
            };
            match data.routes.get(&route) {
                Some(files) => Ok(split_files(
                    &asset_prefix,
                    deployment_id.as_deref(),
                    policy.as_ref(),
                    &route,
                    files,
                )),
                None => Err(LoadError::ManifestMiss { route }),
            }
        })
    }
}

/// Development manifest service: convention-based URL construction.
///
/// The dev server exposes one script per route under a predictable path and
/// serves styles through the script pipeline, so the css list is empty.
pub struct DevManifest {
    asset_prefix: String,
    deployment_id: Option<String>,
    policy: Arc<dyn ScriptUrlPolicy>,
}

impl DevManifest {
    pub fn new(
        asset_prefix: impl Into<String>,
        deployment_id: Option<String>,
        policy: Arc<dyn ScriptUrlPolicy>,
    ) -> Self {
        Self {
            asset_prefix: asset_prefix.into(),
            deployment_id,
            policy,
        }
    }
}

impl ManifestService for DevManifest {
    fn files_for_route(&self, route: &str) -> BoxFuture<'static, Result<RouteFiles, LoadError>> {
        let file = format!(
            "static/development/pages{}.js",
            asset_path_from_route(route)
        );
        let url = full_asset_url(&self.asset_prefix, &file, self.deployment_id.as_deref());
        let files = RouteFiles {
            scripts: vec![self.policy.promote(&url)],
            css: Vec::new(),
        };
        Box::pin(async move { Ok(files) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> Arc<dyn ScriptUrlPolicy> {
        Arc::new(NoopScriptUrlPolicy)
    }

    #[test]
    fn deployment_suffix_uses_query_separator() {
        assert_eq!(
            append_deployment_suffix("/a.js", Some("d1")),
            "/a.js?dpl=d1"
        );
        assert_eq!(
            append_deployment_suffix("/a.js?x=1", Some("d1")),
            "/a.js?x=1&dpl=d1"
        );
        assert_eq!(append_deployment_suffix("/a.js", None), "/a.js");
    }

    #[test]
    fn root_route_maps_to_index_asset_path() {
        assert_eq!(asset_path_from_route("/"), "/index");
        assert_eq!(asset_path_from_route("/about"), "/about");
    }

    #[tokio::test]
    async fn published_manifest_splits_scripts_and_css() {
        let mut routes = HashMap::new();
        routes.insert(
            "/about".to_string(),
            vec![
                "static/chunks/about.js".to_string(),
                "static/css/about.css".to_string(),
            ],
        );
        let service = BuildManifest::published(
            "https://cdn.example",
            Some("d7".into()),
            policy(),
            ManifestData { routes },
        );

        let files = service.files_for_route("/about").await.unwrap();
        assert_eq!(
            files.scripts,
            vec![NoopScriptUrlPolicy
                .promote("https://cdn.example/_assets/static/chunks/about.js?dpl=d7")]
        );
        assert_eq!(
            files.css,
            vec!["https://cdn.example/_assets/static/css/about.css?dpl=d7".to_string()]
        );
    }

    #[tokio::test]
    async fn missing_route_is_a_tagged_manifest_miss() {
        let service =
            BuildManifest::published("", None, policy(), ManifestData::default());
        let err = service.files_for_route("/nope").await.unwrap_err();
        assert_eq!(
            err,
            LoadError::ManifestMiss {
                route: "/nope".into()
            }
        );
        assert!(err.is_asset_error());
    }

    #[tokio::test]
    async fn lookup_waits_for_publication() {
        let (service, handle) = BuildManifest::new("", None, policy());
        let lookup = service.files_for_route("/about");
        let lookup = tokio::spawn(lookup);
        tokio::task::yield_now().await;

        let mut routes = HashMap::new();
        routes.insert("/about".to_string(), vec!["a.js".to_string()]);
        handle.publish(ManifestData { routes });

        let files = lookup.await.unwrap().unwrap();
        assert_eq!(files.scripts.len(), 1);
    }

    #[tokio::test]
    async fn dev_manifest_builds_urls_by_convention() {
        let service = DevManifest::new("", None, policy());
        let files = service.files_for_route("/").await.unwrap();
        assert_eq!(
            files.scripts[0].as_str(),
            "/_assets/static/development/pages/index.js"
        );
        assert!(files.css.is_empty());
    }

    #[test]
    fn manifest_parses_from_json() {
        let data =
            ManifestData::from_json(r#"{"/about": ["static/chunks/about.js"]}"#).unwrap();
        assert_eq!(data.routes.len(), 1);

        let err = ManifestData::from_json("not json").unwrap_err();
        assert!(err.is_asset_error());
    }
}
