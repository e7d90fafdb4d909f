//! Shared intersection-observer pool.
//!
//! Many observed elements are multiplexed onto few underlying platform
//! observers: one per distinct `(root, margin)` option pair. Observers are
//! created lazily on the first [`IntersectionRegistry::observe`] call for a
//! new pair and torn down exactly when their last watched element is
//! released, so unused observers never leak one-per-component.
//!
//! The platform itself sits behind [`IntersectionBackend`]: a browser host
//! wraps `IntersectionObserver`, tests drive [`ManualIntersections`] by hand,
//! and hosts without any such facility report unsupported so callers can fall
//! back to idle-based "assume visible" behavior.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

/// Opaque handle to a UI element, assigned by the host layer.
pub type ElementId = u64;

/// Callback invoked when an element becomes visible.
pub type VisibilityCallback = Arc<dyn Fn() + Send + Sync>;

/// Event sink handed to the backend: `(element, is_intersecting)`.
pub type IntersectionSink = Arc<dyn Fn(ElementId, bool) + Send + Sync>;

/// Identifier for a shared observer: compared by value, not identity,
/// because distinct call sites pass structurally-equal options that are not
/// the same allocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObserverOptions {
    pub root: Option<ElementId>,
    pub margin: String,
}

/// A live platform observer.
pub trait ObserverHandle: Send + Sync {
    fn observe(&self, element: ElementId);
    fn unobserve(&self, element: ElementId);
    fn disconnect(&self);
}

/// Platform seam for constructing observers.
pub trait IntersectionBackend: Send + Sync {
    /// Construct an observer delivering events for its observed elements to
    /// `sink`.
    fn create_observer(
        &self,
        options: &ObserverOptions,
        sink: IntersectionSink,
    ) -> Box<dyn ObserverHandle>;

    /// Whether the platform supports intersection observation at all.
    fn is_supported(&self) -> bool {
        true
    }
}

struct SharedObserver {
    id: u64,
    options: ObserverOptions,
    handle: Box<dyn ObserverHandle>,
    elements: Arc<Mutex<HashMap<ElementId, VisibilityCallback>>>,
}

/// Pool of shared observers keyed by observer options.
pub struct IntersectionRegistry {
    backend: Arc<dyn IntersectionBackend>,
    observers: Mutex<Vec<Arc<SharedObserver>>>,
    next_id: AtomicU64,
}

impl IntersectionRegistry {
    pub fn new(backend: Arc<dyn IntersectionBackend>) -> Self {
        Self {
            backend,
            observers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.backend.is_supported()
    }

    /// Number of live shared observers.
    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Whether an observer for these options currently exists.
    pub fn is_known(&self, options: &ObserverOptions) -> bool {
        self.observers
            .lock()
            .iter()
            .any(|observer| observer.options == *options)
    }

    /// Watch `element`, invoking `callback` when it becomes visible.
    ///
    /// The callback fires only on the transition to visible, never on the
    /// way out. The returned [`Subscription`] releases the element; releasing
    /// the observer's last element disconnects and removes it.
    pub fn observe(
        self: &Arc<Self>,
        element: ElementId,
        callback: VisibilityCallback,
        options: &ObserverOptions,
    ) -> Subscription {
        let observer = self.find_or_create(options);
        observer.elements.lock().insert(element, callback);
        observer.handle.observe(element);
        Subscription {
            registry: Arc::clone(self),
            observer,
            element,
            active: AtomicBool::new(true),
        }
    }

    fn find_or_create(&self, options: &ObserverOptions) -> Arc<SharedObserver> {
        let mut observers = self.observers.lock();
        // Linear scan with value equality; the number of distinct option
        // pairs in a page is tiny.
        if let Some(existing) = observers.iter().find(|o| o.options == *options) {
            return Arc::clone(existing);
        }

        let elements: Arc<Mutex<HashMap<ElementId, VisibilityCallback>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let sink: IntersectionSink = {
            let elements = Arc::clone(&elements);
            Arc::new(move |element, is_intersecting| {
                // Only the becoming-visible transition is interesting.
                if !is_intersecting {
                    return;
                }
                // Clone the callback out so it runs without the map locked;
                // callbacks are allowed to unobserve.
                let callback = elements.lock().get(&element).cloned();
                if let Some(callback) = callback {
                    callback();
                }
            })
        };
        let handle = self.backend.create_observer(options, sink);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        trace!(id, margin = %options.margin, "shared observer created");
        let observer = Arc::new(SharedObserver {
            id,
            options: options.clone(),
            handle,
            elements,
        });
        observers.push(Arc::clone(&observer));
        observer
    }

    fn release(&self, observer: &Arc<SharedObserver>, element: ElementId) {
        let emptied = {
            let mut elements = observer.elements.lock();
            elements.remove(&element);
            elements.is_empty()
        };
        observer.handle.unobserve(element);
        if emptied {
            observer.handle.disconnect();
            let mut observers = self.observers.lock();
            observers.retain(|o| o.id != observer.id);
            trace!(id = observer.id, "shared observer torn down");
        }
    }
}

/// A watched element; release it with [`Subscription::unobserve`] or by
/// dropping it.
pub struct Subscription {
    registry: Arc<IntersectionRegistry>,
    observer: Arc<SharedObserver>,
    element: ElementId,
    active: AtomicBool,
}

impl Subscription {
    /// Stop watching the element. Idempotent.
    pub fn unobserve(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            self.registry.release(&self.observer, self.element);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unobserve();
    }
}

/// Hand-driven backend for tests and headless hosts.
///
/// Events are injected with [`ManualIntersections::emit`]; creation and
/// disconnection are counted so pooling behavior can be asserted.
#[derive(Default)]
pub struct ManualIntersections {
    observers: Mutex<Vec<ManualObserver>>,
    created: AtomicUsize,
    disconnected: Arc<AtomicUsize>,
}

struct ManualObserver {
    sink: IntersectionSink,
    watched: Arc<Mutex<HashMap<ElementId, ()>>>,
    connected: Arc<AtomicBool>,
}

struct ManualHandle {
    watched: Arc<Mutex<HashMap<ElementId, ()>>>,
    connected: Arc<AtomicBool>,
    disconnected: Arc<AtomicUsize>,
}

impl ObserverHandle for ManualHandle {
    fn observe(&self, element: ElementId) {
        self.watched.lock().insert(element, ());
    }

    fn unobserve(&self, element: ElementId) {
        self.watched.lock().remove(&element);
    }

    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.disconnected.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl ManualIntersections {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn observers_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn observers_disconnected(&self) -> usize {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Deliver an intersection event to every connected observer watching
    /// `element`.
    pub fn emit(&self, element: ElementId, is_intersecting: bool) {
        let sinks: Vec<IntersectionSink> = self
            .observers
            .lock()
            .iter()
            .filter(|o| o.connected.load(Ordering::SeqCst) && o.watched.lock().contains_key(&element))
            .map(|o| Arc::clone(&o.sink))
            .collect();
        for sink in sinks {
            sink(element, is_intersecting);
        }
    }
}

impl IntersectionBackend for ManualIntersections {
    fn create_observer(
        &self,
        _options: &ObserverOptions,
        sink: IntersectionSink,
    ) -> Box<dyn ObserverHandle> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let watched = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));
        self.observers.lock().push(ManualObserver {
            sink,
            watched: Arc::clone(&watched),
            connected: Arc::clone(&connected),
        });
        Box::new(ManualHandle {
            watched,
            connected,
            disconnected: Arc::clone(&self.disconnected),
        })
    }
}
