//! Sticky visibility tracking for a single element.
//!
//! The UI layer gives a tracker its element handle when the component mounts
//! and asks [`VisibilityTracker::is_visible`] when deciding whether to
//! prefetch. Visibility is one-directional: once an element has been seen it
//! stays "visible" until [`VisibilityTracker::reset_visible`], matching the
//! prefetch-once semantics upstream; a link scrolled out of view does not
//! un-prefetch anything.
//!
//! When the platform has no intersection support at all the tracker falls
//! back to an idle-scheduled "assume visible soon" instead of failing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::idle::IdleScheduler;
use crate::intersection::{
    ElementId, IntersectionRegistry, ObserverOptions, Subscription, VisibilityCallback,
};

/// Tracks whether one element has ever been visible.
pub struct VisibilityTracker {
    registry: Arc<IntersectionRegistry>,
    idle: Arc<dyn IdleScheduler>,
    options: ObserverOptions,
    visible: Arc<AtomicBool>,
    on_visible: Arc<Mutex<Option<VisibilityCallback>>>,
    subscription: Arc<Mutex<Option<Subscription>>>,
}

impl VisibilityTracker {
    pub fn new(
        registry: Arc<IntersectionRegistry>,
        idle: Arc<dyn IdleScheduler>,
        options: ObserverOptions,
    ) -> Self {
        Self {
            registry,
            idle,
            options,
            visible: Arc::new(AtomicBool::new(false)),
            on_visible: Arc::new(Mutex::new(None)),
            subscription: Arc::new(Mutex::new(None)),
        }
    }

    /// Install the callback fired when the element first becomes visible.
    pub fn set_on_visible(&self, callback: VisibilityCallback) {
        *self.on_visible.lock() = Some(callback);
    }

    /// Point the tracker at an element (or detach it with `None`).
    ///
    /// Already-visible trackers deliberately do not re-subscribe: visibility
    /// is sticky and there is nothing left to learn from the observer.
    pub fn set_element(&self, element: Option<ElementId>) {
        // Detach any previous subscription first.
        self.subscription.lock().take();

        let Some(element) = element else {
            return;
        };
        if self.visible.load(Ordering::SeqCst) {
            return;
        }

        if !self.registry.is_supported() {
            // No observer facility on this platform: treat the element as
            // visible once the host goes idle rather than never prefetching.
            trace!(element, "intersection unsupported, assuming visible when idle");
            let visible = Arc::clone(&self.visible);
            let on_visible = Arc::clone(&self.on_visible);
            let idle = self.idle.when_idle();
            tokio::spawn(async move {
                idle.await;
                mark_visible(&visible, &on_visible);
            });
            return;
        }

        let visible = Arc::clone(&self.visible);
        let on_visible = Arc::clone(&self.on_visible);
        let slot = Arc::clone(&self.subscription);
        let callback: VisibilityCallback = Arc::new(move || {
            mark_visible(&visible, &on_visible);
            // One-shot: visibility never goes back to false on its own, so
            // the element no longer needs watching.
            if let Some(subscription) = slot.lock().take() {
                subscription.unobserve();
            }
        });
        let subscription = self.registry.observe(element, callback, &self.options);
        *self.subscription.lock() = Some(subscription);
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    /// Clear the sticky flag so a subsequent [`set_element`] re-subscribes.
    ///
    /// [`set_element`]: VisibilityTracker::set_element
    pub fn reset_visible(&self) {
        self.visible.store(false, Ordering::SeqCst);
    }
}

fn mark_visible(visible: &AtomicBool, on_visible: &Mutex<Option<VisibilityCallback>>) {
    if visible.swap(true, Ordering::SeqCst) {
        return;
    }
    let callback = on_visible.lock().clone();
    if let Some(callback) = callback {
        callback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idle::ImmediateIdle;
    use crate::intersection::{
        IntersectionBackend, IntersectionSink, ManualIntersections, ObserverHandle,
    };
    use std::sync::atomic::AtomicUsize;

    fn tracker_with(backend: &Arc<ManualIntersections>) -> VisibilityTracker {
        let registry = Arc::new(IntersectionRegistry::new(
            Arc::clone(backend) as Arc<dyn IntersectionBackend>
        ));
        VisibilityTracker::new(registry, Arc::new(ImmediateIdle), ObserverOptions::default())
    }

    #[test]
    fn visibility_is_sticky_across_exit_events() {
        let backend = ManualIntersections::new();
        let tracker = tracker_with(&backend);

        tracker.set_element(Some(1));
        assert!(!tracker.is_visible());

        backend.emit(1, true);
        assert!(tracker.is_visible());

        // Scrolling back out must not clear the flag.
        backend.emit(1, false);
        assert!(tracker.is_visible());
    }

    #[test]
    fn on_visible_fires_once() {
        let backend = ManualIntersections::new();
        let tracker = tracker_with(&backend);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_cb = Arc::clone(&fired);
        tracker.set_on_visible(Arc::new(move || {
            fired_cb.fetch_add(1, Ordering::SeqCst);
        }));

        tracker.set_element(Some(1));
        backend.emit(1, true);
        backend.emit(1, true);

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn becoming_visible_releases_the_subscription() {
        let backend = ManualIntersections::new();
        let registry = Arc::new(IntersectionRegistry::new(
            Arc::clone(&backend) as Arc<dyn IntersectionBackend>
        ));
        let tracker = VisibilityTracker::new(
            Arc::clone(&registry),
            Arc::new(ImmediateIdle),
            ObserverOptions::default(),
        );

        tracker.set_element(Some(1));
        assert_eq!(registry.observer_count(), 1);

        backend.emit(1, true);
        assert_eq!(registry.observer_count(), 0);
    }

    #[test]
    fn visible_trackers_do_not_resubscribe() {
        let backend = ManualIntersections::new();
        let tracker = tracker_with(&backend);

        tracker.set_element(Some(1));
        backend.emit(1, true);
        assert_eq!(backend.observers_created(), 1);

        tracker.set_element(Some(1));
        assert_eq!(backend.observers_created(), 1);
    }

    #[test]
    fn reset_allows_a_fresh_subscription() {
        let backend = ManualIntersections::new();
        let tracker = tracker_with(&backend);

        tracker.set_element(Some(1));
        backend.emit(1, true);
        assert!(tracker.is_visible());

        tracker.reset_visible();
        assert!(!tracker.is_visible());

        tracker.set_element(Some(1));
        backend.emit(1, true);
        assert!(tracker.is_visible());
        assert_eq!(backend.observers_created(), 2);
    }

    #[test]
    fn detaching_releases_the_observer() {
        let backend = ManualIntersections::new();
        let registry = Arc::new(IntersectionRegistry::new(
            Arc::clone(&backend) as Arc<dyn IntersectionBackend>
        ));
        let tracker = VisibilityTracker::new(
            Arc::clone(&registry),
            Arc::new(ImmediateIdle),
            ObserverOptions::default(),
        );

        tracker.set_element(Some(1));
        assert_eq!(registry.observer_count(), 1);
        tracker.set_element(None);
        assert_eq!(registry.observer_count(), 0);
    }

    struct Unsupported;

    impl IntersectionBackend for Unsupported {
        fn create_observer(
            &self,
            _options: &ObserverOptions,
            _sink: IntersectionSink,
        ) -> Box<dyn ObserverHandle> {
            unreachable!("unsupported backends never construct observers")
        }

        fn is_supported(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn unsupported_platform_assumes_visible_when_idle() {
        let registry = Arc::new(IntersectionRegistry::new(Arc::new(Unsupported)));
        let tracker = VisibilityTracker::new(
            registry,
            Arc::new(ImmediateIdle),
            ObserverOptions::default(),
        );

        tracker.set_element(Some(1));
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(tracker.is_visible());
    }
}
