//! Wayfarer - client-side route loading and asset caching
//!
//! This library is the navigation-runtime core of a client-rendered
//! application: it fetches, caches and sequences the scripts and stylesheets
//! a route needs, prefetches routes opportunistically when their links become
//! visible, and hands the render layer a ready `{component, exports, styles}`
//! value (or a captured failure) per route.
//!
//! Everything platform-specific sits behind trait seams: [`assets::AssetHost`]
//! for script/stylesheet retrieval, [`intersection::IntersectionBackend`] for
//! visibility events, [`idle::IdleScheduler`] for idle-time scheduling and
//! [`network::NetworkInfo`] for connection quality, with HTTP/tokio defaults
//! and hand-driven fakes for tests. All caches are explicit constructed state
//! passed by reference; there are no process-wide singletons.

pub mod assets;
pub mod config;
pub mod deadline;
pub mod error;
pub mod future_cache;
pub mod idle;
pub mod intersection;
pub mod loader;
pub mod manifest;
pub mod network;
pub mod scheduler;
pub mod visibility;

pub use assets::{AssetCache, AssetHost, AssetKind, ScriptExecutor, StyleSheet};
pub use config::{RuntimeConfig, RuntimeMode, DEFAULT_ROUTE_TIMEOUT_MS};
pub use error::{LoadError, SharedError};
pub use future_cache::FutureCache;
pub use idle::{IdleScheduler, ImmediateIdle, TokioIdle};
pub use intersection::{
    ElementId, IntersectionBackend, IntersectionRegistry, ObserverOptions, Subscription,
};
pub use loader::{Entrypoint, RouteEntry, RouteLoader, RouteModule};
pub use manifest::{
    BuildManifest, BuildManifestHandle, DevManifest, ManifestData, ManifestService,
    NoopScriptUrlPolicy, RouteFiles, ScriptUrl, ScriptUrlPolicy,
};
pub use network::{EffectiveType, NetworkInfo};
pub use scheduler::{ObservedLink, PrefetchPriority, PrefetchScheduler, PrefetchTarget};
pub use visibility::VisibilityTracker;
