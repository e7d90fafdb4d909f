//! Route loading and entrypoint registration.
//!
//! Per route the loader runs a small state machine, `UNREQUESTED → LOADING →
//! {LOADED | FAILED}`, with the terminal states cached until explicitly
//! invalidated (hot reload). Two caches back it:
//!
//! - **entrypoints**: settled out-of-band by the route's own script calling
//!   [`RouteLoader::on_entrypoint`] when it finishes evaluating.
//! - **routes**: the joined result (entrypoint plus resolved stylesheets),
//!   kept separately because a route's styles may be refetched across route
//!   table changes even when its entrypoint is still cached.
//!
//! The whole load races a fixed deadline; in development the timer is gated
//! behind the dev server's build-ready signal and an idle deferral so a slow
//! compile does not trip it.

use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture};
use tokio::sync::watch;
use tracing::debug;

use crate::assets::{AssetCache, AssetKind, StyleSheet};
use crate::config::RuntimeConfig;
use crate::deadline::resolve_with_deadline;
use crate::error::{LoadError, SharedError};
use crate::future_cache::FutureCache;
use crate::idle::{IdleScheduler, TokioIdle};
use crate::manifest::ManifestService;
use crate::network::{NetworkInfo, UnknownNetwork};

/// The value a route's module registers: its exports plus an optional
/// designated default export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteModule<C> {
    /// The module's designated component export, if it names one.
    pub default: Option<C>,
    /// The whole-module value, used as the component when no default exists.
    pub exports: C,
}

impl<C: Clone> RouteModule<C> {
    /// The component to render: the default export, falling back to the
    /// module itself.
    pub fn component(&self) -> C {
        self.default.clone().unwrap_or_else(|| self.exports.clone())
    }
}

/// A registered entrypoint: a successfully evaluated module or the captured
/// evaluation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entrypoint<C> {
    Loaded {
        component: C,
        exports: RouteModule<C>,
    },
    Failed(SharedError),
}

/// A fully loaded route: the entrypoint joined with its stylesheets, or a
/// captured failure the render layer shows an error UI for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteEntry<C> {
    Loaded {
        component: C,
        exports: RouteModule<C>,
        styles: Vec<StyleSheet>,
    },
    Failed(SharedError),
}

struct LoaderInner<C> {
    config: RuntimeConfig,
    entrypoints: FutureCache<Entrypoint<C>>,
    routes: FutureCache<RouteEntry<C>>,
    assets: AssetCache,
    manifest: Arc<dyn ManifestService>,
    idle: Arc<dyn IdleScheduler>,
    network: Arc<dyn NetworkInfo>,
    /// Development-mode build gate: the deadline timer is not armed until
    /// this reports `true`.
    build_ready: Option<watch::Receiver<bool>>,
}

/// Orchestrates per-route asset retrieval, entrypoint registration and
/// caching.
///
/// Cheaply cloneable; clones share all caches. The public surface is the four
/// operations the render and UI layers consume: [`when_entrypoint`],
/// [`on_entrypoint`], [`load_route`] and [`prefetch`].
///
/// [`when_entrypoint`]: RouteLoader::when_entrypoint
/// [`on_entrypoint`]: RouteLoader::on_entrypoint
/// [`load_route`]: RouteLoader::load_route
/// [`prefetch`]: RouteLoader::prefetch
pub struct RouteLoader<C> {
    inner: Arc<LoaderInner<C>>,
}

impl<C> Clone for RouteLoader<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> RouteLoader<C>
where
    C: Clone + Send + Sync + 'static,
{
    pub fn new(
        config: RuntimeConfig,
        manifest: Arc<dyn ManifestService>,
        assets: AssetCache,
    ) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                config,
                entrypoints: FutureCache::new(),
                routes: FutureCache::new(),
                assets,
                manifest,
                idle: Arc::new(TokioIdle::default()),
                network: Arc::new(UnknownNetwork),
                build_ready: None,
            }),
        }
    }

    /// Replace the idle scheduler (tests, embedders with a real idle signal).
    pub fn with_idle(mut self, idle: Arc<dyn IdleScheduler>) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("with_idle must be called before the loader is shared")
            .idle = idle;
        self
    }

    /// Replace the connection-quality source.
    pub fn with_network(mut self, network: Arc<dyn NetworkInfo>) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("with_network must be called before the loader is shared")
            .network = network;
        self
    }

    /// Install the development build-ready gate.
    pub fn with_build_ready(mut self, build_ready: watch::Receiver<bool>) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("with_build_ready must be called before the loader is shared")
            .build_ready = Some(build_ready);
        self
    }

    /// Wait for `route`'s entrypoint to be registered.
    ///
    /// Pure external-resolution mode: nothing here starts any work, some
    /// executing script must call [`RouteLoader::on_entrypoint`].
    pub async fn when_entrypoint(&self, route: &str) -> Result<Entrypoint<C>, SharedError> {
        self.inner.entrypoints.wait(route).await
    }

    /// Register (or invalidate) `route`'s entrypoint.
    ///
    /// `execute` evaluates the route's already-loaded module synchronously;
    /// its result is normalized into an [`Entrypoint`]: failures become a
    /// captured [`Entrypoint::Failed`], never a propagated error. Registering
    /// over an already-settled entrypoint also drops the resolved joined
    /// entry, since it was built from the old module. Passing `None`
    /// invalidates the entrypoint and the joined route entry so the next load
    /// starts from scratch (hot reload), unless a load is currently pending
    /// on the route, because a no-op registration must not clobber a pending
    /// wait.
    pub fn on_entrypoint<F>(&self, route: &str, execute: Option<F>)
    where
        F: FnOnce() -> Result<RouteModule<C>, LoadError>,
    {
        match execute {
            Some(run) => {
                let entrypoint = match run() {
                    Ok(module) => Entrypoint::Loaded {
                        component: module.component(),
                        exports: module,
                    },
                    Err(err) => Entrypoint::Failed(SharedError::new(err)),
                };
                if !self.inner.entrypoints.is_pending(route) {
                    // Re-registration over a settled entrypoint (dev
                    // re-execution): the joined entry was built from the old
                    // module and must not be served again. An in-flight load
                    // is left alone.
                    self.inner.routes.remove_resolved(route);
                }
                self.inner.entrypoints.resolve(route, entrypoint);
            }
            None => {
                if !self.inner.entrypoints.is_pending(route) {
                    debug!(route, "entrypoint invalidated");
                    self.inner.entrypoints.remove(route);
                    // An invalidated entrypoint means the joined entry is
                    // stale too; the route must be fully reloaded.
                    self.inner.routes.remove(route);
                }
            }
        }
    }

    /// Load everything needed to render `route`.
    ///
    /// Returns from cache when already loaded or prefetched; otherwise runs
    /// the full sequence of file list, scripts (skipped when the entrypoint
    /// is already cached), stylesheets and entrypoint join under the
    /// configured deadline.
    ///
    /// In prefetch mode errors propagate and the cache key is cleared, so
    /// future attempts retry; in navigation mode they are swallowed into a
    /// [`RouteEntry::Failed`] that is cached as a terminal state; the render
    /// layer keeps getting the same captured failure until the route is
    /// invalidated.
    pub async fn load_route(
        &self,
        route: &str,
        prefetch: bool,
    ) -> Result<RouteEntry<C>, SharedError> {
        let this = self.clone();
        let key = route.to_string();
        self.inner
            .routes
            .with_future(route, move || this.load_route_uncached(key, prefetch))
            .await
    }

    /// Opportunistically warm the caches for `route`.
    ///
    /// Short-circuits on constrained connections, issues deduped low-priority
    /// hints for every script, then schedules a full cache-warming load once
    /// the host is idle. Prefetching is advisory: every failure is swallowed
    /// and logged, none reaches the caller.
    pub async fn prefetch(&self, route: &str) {
        if self.inner.network.should_skip_prefetch() {
            debug!(route, "prefetch skipped on constrained connection");
            return;
        }

        let files = match self.inner.manifest.files_for_route(route).await {
            Ok(files) => files,
            Err(err) => {
                debug!(route, error = %err, "prefetch file lookup failed");
                return;
            }
        };
        for script in &files.scripts {
            if let Err(err) = self
                .inner
                .assets
                .prefetch_hint(script.as_str(), AssetKind::Script)
                .await
            {
                debug!(route, url = script.as_str(), error = %err, "prefetch hint failed");
                return;
            }
        }

        let this = self.clone();
        let route = route.to_string();
        tokio::spawn(async move {
            this.inner.idle.when_idle().await;
            if let Err(err) = this.load_route(&route, true).await {
                debug!(route, error = %err, "idle prefetch load failed");
            }
        });
    }

    async fn load_route_uncached(
        self,
        route: String,
        prefetch: bool,
    ) -> Result<RouteEntry<C>, LoadError> {
        let timeout = self.inner.config.route_timeout();
        let timeout_ms = self.inner.config.route_timeout_ms;
        let gate = self.deadline_gate();
        let work = {
            let this = self.clone();
            async move { this.fetch_and_join(route).await }
        };
        let result =
            resolve_with_deadline(work, gate, timeout, move || LoadError::Timeout { timeout_ms })
                .await;
        match result {
            Ok(entry) => Ok(entry),
            // Prefetch is advisory: surface the failure so the cache entry is
            // cleared and a later navigation retries from scratch.
            Err(err) if prefetch => Err(err),
            // A failed navigation is a terminal state: returning it as a
            // value caches the captured failure.
            Err(err) => Ok(RouteEntry::Failed(SharedError::new(err))),
        }
    }

    /// Development mode defers the deadline timer until the build is ready
    /// and the host has gone idle; the work itself starts immediately.
    fn deadline_gate(&self) -> Option<BoxFuture<'static, ()>> {
        if !self.inner.config.mode.is_development() {
            return None;
        }
        let build_ready = self.inner.build_ready.clone();
        let idle = Arc::clone(&self.inner.idle);
        Some(Box::pin(async move {
            if let Some(mut build_ready) = build_ready {
                let _ = build_ready.wait_for(|ready| *ready).await;
            }
            idle.when_idle().await;
        }))
    }

    async fn fetch_and_join(&self, route: String) -> Result<RouteEntry<C>, LoadError> {
        let files = self.inner.manifest.files_for_route(&route).await?;

        // An already-cached (or in-flight) entrypoint means the route's code
        // has run; re-executing it is unnecessary and must be avoided.
        let have_entrypoint = self.inner.entrypoints.contains(&route);

        let scripts = async {
            if have_entrypoint {
                return Ok(());
            }
            try_join_all(
                files
                    .scripts
                    .iter()
                    .map(|script| self.inner.assets.execute_script_once(script)),
            )
            .await
            .map(|_| ())
        };
        let styles = try_join_all(
            files
                .css
                .iter()
                .map(|href| self.inner.assets.fetch_stylesheet(href)),
        );

        let ((), styles) = tokio::try_join!(scripts, styles).map_err(unshare)?;
        let entrypoint = self.when_entrypoint(&route).await.map_err(unshare)?;

        Ok(match entrypoint {
            Entrypoint::Loaded { component, exports } => RouteEntry::Loaded {
                component,
                exports,
                styles,
            },
            Entrypoint::Failed(err) => RouteEntry::Failed(err),
        })
    }
}

fn unshare(err: SharedError) -> LoadError {
    (*err).clone()
}
