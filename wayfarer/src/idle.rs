//! Idle-time scheduling abstraction.
//!
//! The loader defers low-priority work (prefetch cache warming, the
//! development-mode timeout) until the host is idle. Browsers expose
//! `requestIdleCallback` for this; other hosts approximate it. The trait
//! keeps the policy injectable so tests can run "idle" work immediately and
//! deterministically.

use futures::future::BoxFuture;
use std::time::Duration;

/// Source of "the host is idle" signals.
pub trait IdleScheduler: Send + Sync {
    /// Resolves once the host considers itself idle.
    fn when_idle(&self) -> BoxFuture<'static, ()>;
}

/// Default deferral used by [`TokioIdle`].
///
/// Mirrors the ballpark an idle-callback timeout would use: long enough to
/// let urgent work win the executor, short enough that prefetching still
/// happens promptly.
pub const DEFAULT_IDLE_DELAY: Duration = Duration::from_millis(50);

/// Tokio-backed idle scheduler.
///
/// There is no direct idle-callback analog on a tokio runtime; a short timer
/// plus a yield is the conventional approximation, letting already-queued
/// tasks run first.
#[derive(Debug, Clone)]
pub struct TokioIdle {
    delay: Duration,
}

impl Default for TokioIdle {
    fn default() -> Self {
        Self {
            delay: DEFAULT_IDLE_DELAY,
        }
    }
}

impl TokioIdle {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl IdleScheduler for TokioIdle {
    fn when_idle(&self) -> BoxFuture<'static, ()> {
        let delay = self.delay;
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            tokio::task::yield_now().await;
        })
    }
}

/// Test scheduler that reports idle immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateIdle;

impl IdleScheduler for ImmediateIdle {
    fn when_idle(&self) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}
