//! Visibility-driven prefetch scheduling.
//!
//! Links and form actions register a target here; when the target scrolls
//! into view the scheduler asks the route loader to warm its caches. Two
//! priority tiers exist:
//!
//! - **Viewport**: passive, fired by visibility. Deduped per
//!   `(href, as, locale)` so a link rendered many times prefetches once.
//! - **Intent**: fired by pointer-hover or touch-start. Signals stronger
//!   navigation intent and always re-issues the request, even when a passive
//!   prefetch already ran, to upgrade its priority.
//!
//! Prefetch failures are logged and dropped; nothing from here ever reaches
//! the render path.

use std::sync::Arc;

use dashmap::DashSet;
use futures::future::BoxFuture;
use tracing::debug;

use crate::idle::IdleScheduler;
use crate::intersection::{ElementId, IntersectionRegistry, ObserverOptions};
use crate::loader::RouteLoader;
use crate::visibility::VisibilityTracker;

/// Loader-side entry point the scheduler drives.
///
/// Keeps the scheduler decoupled from the loader's component type; tests
/// substitute a counting fake.
pub trait RoutePrefetcher: Send + Sync {
    fn prefetch_route(&self, route: &str) -> BoxFuture<'static, ()>;
}

impl<C> RoutePrefetcher for RouteLoader<C>
where
    C: Clone + Send + Sync + 'static,
{
    fn prefetch_route(&self, route: &str) -> BoxFuture<'static, ()> {
        let loader = self.clone();
        let route = route.to_string();
        Box::pin(async move { loader.prefetch(&route).await })
    }
}

/// How urgently a prefetch was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchPriority {
    /// Passive viewport visibility; deduped.
    Viewport,
    /// Hover/touch intent; bypasses dedup.
    Intent,
}

/// One prefetchable destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchTarget {
    /// The link's declared destination path.
    pub href: String,
    /// Resolved as-path when it differs from `href` (dynamic routes).
    pub as_path: Option<String>,
    /// Active locale, part of the dedup identity.
    pub locale: Option<String>,
    /// Whether the destination is a same-origin, client-routable path.
    /// Function-valued form actions and external URLs are not.
    pub in_app: bool,
    /// Caller explicitly disabled prefetching.
    pub disabled: bool,
}

impl PrefetchTarget {
    pub fn page(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            as_path: None,
            locale: None,
            in_app: true,
            disabled: false,
        }
    }

    /// The route key handed to the loader.
    pub fn route(&self) -> &str {
        self.as_path.as_deref().unwrap_or(&self.href)
    }

    fn dedup_key(&self) -> String {
        format!(
            "{}%{}%{}",
            self.href,
            self.as_path.as_deref().unwrap_or(&self.href),
            self.locale.as_deref().unwrap_or("")
        )
    }
}

/// Dedupes and dispatches prefetch requests to the loader.
pub struct PrefetchScheduler {
    loader: Arc<dyn RoutePrefetcher>,
    /// Whether client-side routing is the active navigation mode at all.
    client_routing: bool,
    seen: DashSet<String>,
}

impl PrefetchScheduler {
    pub fn new(loader: Arc<dyn RoutePrefetcher>) -> Self {
        Self {
            loader,
            client_routing: true,
            seen: DashSet::new(),
        }
    }

    /// Build a scheduler for a host without client-side routing; every
    /// request becomes a no-op.
    pub fn inactive(loader: Arc<dyn RoutePrefetcher>) -> Self {
        Self {
            client_routing: false,
            ..Self::new(loader)
        }
    }

    fn eligible(&self, target: &PrefetchTarget) -> bool {
        self.client_routing && target.in_app && !target.disabled
    }

    /// Request a prefetch for `target` at the given priority tier.
    pub async fn request(&self, target: &PrefetchTarget, priority: PrefetchPriority) {
        if !self.eligible(target) {
            return;
        }
        let key = target.dedup_key();
        match priority {
            PrefetchPriority::Viewport => {
                // `insert` reports whether the key was new.
                if !self.seen.insert(key) {
                    debug!(href = %target.href, "viewport prefetch already issued");
                    return;
                }
            }
            PrefetchPriority::Intent => {
                // Record the key but never skip: intent upgrades priority.
                self.seen.insert(key);
            }
        }
        self.loader.prefetch_route(target.route()).await;
    }
}

/// A link (or form action) wired for visibility-driven prefetching.
///
/// Owns the target's [`VisibilityTracker`]; the UI layer calls
/// [`mount`]/[`unmount`] around the element's lifecycle and forwards pointer
/// and touch events for the intent tier.
///
/// [`mount`]: ObservedLink::mount
/// [`unmount`]: ObservedLink::unmount
pub struct ObservedLink {
    scheduler: Arc<PrefetchScheduler>,
    target: PrefetchTarget,
    tracker: VisibilityTracker,
}

impl ObservedLink {
    pub fn new(
        scheduler: Arc<PrefetchScheduler>,
        target: PrefetchTarget,
        registry: Arc<IntersectionRegistry>,
        idle: Arc<dyn IdleScheduler>,
        options: ObserverOptions,
    ) -> Self {
        let tracker = VisibilityTracker::new(registry, idle, options);
        {
            let scheduler = Arc::clone(&scheduler);
            let target = target.clone();
            tracker.set_on_visible(Arc::new(move || {
                let scheduler = Arc::clone(&scheduler);
                let target = target.clone();
                tokio::spawn(async move {
                    scheduler.request(&target, PrefetchPriority::Viewport).await;
                });
            }));
        }
        Self {
            scheduler,
            target,
            tracker,
        }
    }

    /// Attach the rendered element; visibility starts being tracked.
    pub fn mount(&self, element: ElementId) {
        self.tracker.set_element(Some(element));
    }

    /// Detach the element (component unmounted).
    pub fn unmount(&self) {
        self.tracker.set_element(None);
    }

    pub fn is_visible(&self) -> bool {
        self.tracker.is_visible()
    }

    /// Forget sticky visibility, e.g. after the route table changed.
    pub fn reset_visible(&self) {
        self.tracker.reset_visible();
    }

    /// Pointer entered the link: intent-tier prefetch.
    pub async fn pointer_enter(&self) {
        self.scheduler
            .request(&self.target, PrefetchPriority::Intent)
            .await;
    }

    /// Touch started on the link: intent-tier prefetch.
    pub async fn touch_start(&self) {
        self.scheduler
            .request(&self.target, PrefetchPriority::Intent)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingPrefetcher {
        calls: AtomicUsize,
        routes: Mutex<Vec<String>>,
    }

    impl RoutePrefetcher for CountingPrefetcher {
        fn prefetch_route(&self, route: &str) -> BoxFuture<'static, ()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.routes.lock().push(route.to_string());
            Box::pin(async {})
        }
    }

    fn scheduler(prefetcher: &Arc<CountingPrefetcher>) -> PrefetchScheduler {
        PrefetchScheduler::new(Arc::clone(prefetcher) as Arc<dyn RoutePrefetcher>)
    }

    #[tokio::test]
    async fn viewport_requests_are_deduped_per_target() {
        let prefetcher = Arc::new(CountingPrefetcher::default());
        let scheduler = scheduler(&prefetcher);
        let target = PrefetchTarget {
            locale: Some("en".into()),
            ..PrefetchTarget::page("/x")
        };

        scheduler.request(&target, PrefetchPriority::Viewport).await;
        scheduler.request(&target, PrefetchPriority::Viewport).await;

        assert_eq!(prefetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn intent_bypasses_viewport_dedup() {
        let prefetcher = Arc::new(CountingPrefetcher::default());
        let scheduler = scheduler(&prefetcher);
        let target = PrefetchTarget {
            locale: Some("en".into()),
            ..PrefetchTarget::page("/x")
        };

        scheduler.request(&target, PrefetchPriority::Viewport).await;
        scheduler.request(&target, PrefetchPriority::Intent).await;

        assert_eq!(prefetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn intent_still_marks_the_key_for_later_viewport_requests() {
        let prefetcher = Arc::new(CountingPrefetcher::default());
        let scheduler = scheduler(&prefetcher);
        let target = PrefetchTarget::page("/x");

        scheduler.request(&target, PrefetchPriority::Intent).await;
        scheduler.request(&target, PrefetchPriority::Viewport).await;

        assert_eq!(prefetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn locale_and_as_path_are_part_of_the_identity() {
        let prefetcher = Arc::new(CountingPrefetcher::default());
        let scheduler = scheduler(&prefetcher);
        let en = PrefetchTarget {
            locale: Some("en".into()),
            ..PrefetchTarget::page("/x")
        };
        let fr = PrefetchTarget {
            locale: Some("fr".into()),
            ..PrefetchTarget::page("/x")
        };

        scheduler.request(&en, PrefetchPriority::Viewport).await;
        scheduler.request(&fr, PrefetchPriority::Viewport).await;

        assert_eq!(prefetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn ineligible_targets_are_ignored() {
        let prefetcher = Arc::new(CountingPrefetcher::default());
        let scheduler = scheduler(&prefetcher);

        let external = PrefetchTarget {
            in_app: false,
            ..PrefetchTarget::page("https://elsewhere.example/x")
        };
        scheduler.request(&external, PrefetchPriority::Viewport).await;

        let disabled = PrefetchTarget {
            disabled: true,
            ..PrefetchTarget::page("/x")
        };
        scheduler.request(&disabled, PrefetchPriority::Intent).await;

        assert_eq!(prefetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn inactive_client_routing_disables_everything() {
        let prefetcher = Arc::new(CountingPrefetcher::default());
        let scheduler =
            PrefetchScheduler::inactive(Arc::clone(&prefetcher) as Arc<dyn RoutePrefetcher>);

        scheduler
            .request(&PrefetchTarget::page("/x"), PrefetchPriority::Viewport)
            .await;
        assert_eq!(prefetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn as_path_routes_the_prefetch() {
        let prefetcher = Arc::new(CountingPrefetcher::default());
        let scheduler = scheduler(&prefetcher);
        let target = PrefetchTarget {
            as_path: Some("/posts/42".into()),
            ..PrefetchTarget::page("/posts/[id]")
        };

        scheduler.request(&target, PrefetchPriority::Viewport).await;
        assert_eq!(prefetcher.routes.lock().as_slice(), ["/posts/42"]);
    }
}
