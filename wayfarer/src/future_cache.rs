//! Memoized future cache.
//!
//! This is the single synchronization primitive behind every async cache in
//! the crate: entrypoints, joined route entries, stylesheet fetches and script
//! load records all sit on top of it. A key maps to either a resolved value
//! or a pending slot whose waiters share one eventual result.
//!
//! # Design
//!
//! - **At-most-one computation per key**: the first caller through
//!   [`FutureCache::with_future`] becomes the computer; everyone else waits on
//!   the same settlement channel. No duplicate network or script work is ever
//!   started for a key.
//! - **Failure resets the key**: a failed generator deletes the map entry so
//!   the next caller retries from scratch. All waiters of the failed attempt
//!   receive a clone of the same error.
//! - **External resolution**: [`FutureCache::wait`] creates a pending slot
//!   without a generator; some out-of-band code path (module registration
//!   driven by executing script code) settles it via
//!   [`FutureCache::resolve`].
//!
//! The slot map is guarded by a `parking_lot::Mutex` and every check-and-set
//! happens in one synchronous critical section; no lock is ever held across
//! an await.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{LoadError, SharedError};

/// Settlement payload broadcast to waiters of a pending slot.
type Settled<V> = Option<Result<V, SharedError>>;

/// A cache slot: either a plain resolved value or a pending computation.
enum Slot<V> {
    Ready(V),
    Pending(PendingSlot<V>),
}

/// A pending computation: the settlement channel plus a receiver template
/// cloned out to each waiter.
struct PendingSlot<V> {
    tx: Arc<watch::Sender<Settled<V>>>,
    rx: watch::Receiver<Settled<V>>,
}

enum Role<V> {
    Ready(V),
    Wait(watch::Receiver<Settled<V>>),
    Compute(Arc<watch::Sender<Settled<V>>>),
}

/// String-keyed cache of resolved values and in-flight computations.
pub struct FutureCache<V> {
    slots: Mutex<HashMap<String, Slot<V>>>,
}

impl<V> Default for FutureCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> FutureCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return the resolved value for `key`, if any.
    ///
    /// Pending slots are invisible to this accessor.
    pub fn get(&self, key: &str) -> Option<V> {
        match self.slots.lock().get(key) {
            Some(Slot::Ready(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Whether `key` has a slot at all, resolved or pending.
    pub fn contains(&self, key: &str) -> bool {
        self.slots.lock().contains_key(key)
    }

    /// Whether `key` currently holds a pending (unsettled) slot.
    pub fn is_pending(&self, key: &str) -> bool {
        matches!(self.slots.lock().get(key), Some(Slot::Pending(_)))
    }

    /// Remove whatever slot `key` holds.
    ///
    /// Removing a pending slot drops its resolver; waiters observe
    /// [`LoadError::Abandoned`].
    pub fn remove(&self, key: &str) -> bool {
        self.slots.lock().remove(key).is_some()
    }

    /// Remove `key` only if it holds a resolved value, leaving a pending
    /// computation untouched.
    pub fn remove_resolved(&self, key: &str) -> bool {
        let mut slots = self.slots.lock();
        if matches!(slots.get(key), Some(Slot::Ready(_))) {
            slots.remove(key);
            true
        } else {
            false
        }
    }

    /// Settle `key` with `value`.
    ///
    /// A pending slot is resolved in place (its waiters all receive a clone
    /// of `value`) and replaced by the plain resolved value; a resolved slot
    /// is overwritten; a vacant key is inserted resolved.
    pub fn resolve(&self, key: &str, value: V) {
        let tx = {
            let mut slots = self.slots.lock();
            match slots.insert(key.to_string(), Slot::Ready(value.clone())) {
                Some(Slot::Pending(pending)) => Some(pending.tx),
                _ => None,
            }
        };
        if let Some(tx) = tx {
            // Waiters may have all gone away; a closed channel is fine.
            let _ = tx.send(Some(Ok(value)));
        }
    }

    /// Wait for `key` to be settled by an out-of-band [`resolve`] call.
    ///
    /// Creates a pending slot if the key is vacant. This is the
    /// no-generator mode: this function never computes anything itself.
    ///
    /// [`resolve`]: FutureCache::resolve
    pub async fn wait(&self, key: &str) -> Result<V, SharedError> {
        let rx = {
            let mut slots = self.slots.lock();
            match slots.get(key) {
                Some(Slot::Ready(value)) => return Ok(value.clone()),
                Some(Slot::Pending(pending)) => pending.rx.clone(),
                None => {
                    let (tx, rx) = watch::channel(None);
                    slots.insert(
                        key.to_string(),
                        Slot::Pending(PendingSlot {
                            tx: Arc::new(tx),
                            rx: rx.clone(),
                        }),
                    );
                    rx
                }
            }
        };
        Self::await_settled(rx).await
    }

    /// Look up `key`, computing it with `generator` on a miss.
    ///
    /// - Resolved value: returned immediately.
    /// - Pending slot: waits for the in-flight computation; no second
    ///   computation is started.
    /// - Vacant: this caller runs `generator`. Success stores the plain value
    ///   and wakes waiters; failure deletes the entry (subsequent calls retry
    ///   from scratch) and hands every waiter a clone of the error.
    pub async fn with_future<G, Fut>(&self, key: &str, generator: G) -> Result<V, SharedError>
    where
        G: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, LoadError>>,
    {
        let role = {
            let mut slots = self.slots.lock();
            match slots.get(key) {
                Some(Slot::Ready(value)) => Role::Ready(value.clone()),
                Some(Slot::Pending(pending)) => Role::Wait(pending.rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    let tx = Arc::new(tx);
                    slots.insert(
                        key.to_string(),
                        Slot::Pending(PendingSlot {
                            tx: Arc::clone(&tx),
                            rx,
                        }),
                    );
                    Role::Compute(tx)
                }
            }
        };

        let tx = match role {
            Role::Ready(value) => return Ok(value),
            Role::Wait(rx) => return Self::await_settled(rx).await,
            Role::Compute(tx) => tx,
        };

        match generator().await {
            Ok(value) => {
                self.slots
                    .lock()
                    .insert(key.to_string(), Slot::Ready(value.clone()));
                let _ = tx.send(Some(Ok(value.clone())));
                Ok(value)
            }
            Err(err) => {
                let err = SharedError::new(err);
                {
                    let mut slots = self.slots.lock();
                    // Only clear the slot if it is still our pending entry; an
                    // out-of-band resolve may have replaced it mid-flight.
                    if matches!(slots.get(key), Some(Slot::Pending(p)) if Arc::ptr_eq(&p.tx, &tx))
                    {
                        slots.remove(key);
                    }
                }
                let _ = tx.send(Some(Err(Arc::clone(&err))));
                Err(err)
            }
        }
    }

    async fn await_settled(mut rx: watch::Receiver<Settled<V>>) -> Result<V, SharedError> {
        match rx.wait_for(|settled| settled.is_some()).await {
            Ok(settled) => settled
                .clone()
                .unwrap_or(Err(SharedError::new(LoadError::Abandoned))),
            // Sender dropped without settling: the computation was abandoned.
            Err(_) => Err(SharedError::new(LoadError::Abandoned)),
        }
    }
}
