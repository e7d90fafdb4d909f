//! Timeout race for route loads.
//!
//! The race is logical, not a cancellation: the underlying work is spawned as
//! its own task and keeps running after the deadline fires; its late result
//! is simply detached and ignored. The outer result settles exactly once;
//! a late completion can never double-settle it. Hot reload relies on the
//! same property: abandoned work finishes into nowhere while fresh calls
//! restart from a clean cache.

use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::debug;

use crate::error::LoadError;

/// Race `work` against `timeout`, optionally delaying the start of the timer.
///
/// `work` is spawned immediately. If `gate` is supplied it is awaited before
/// the timer is armed; development mode gates on the build-ready signal and
/// an idle deferral so slow compiles do not trip the deadline while the work
/// itself already runs.
///
/// On timeout the spawned task is detached, not aborted, and the caller gets
/// the error produced by `on_timeout`.
pub async fn resolve_with_deadline<T, W, E>(
    work: W,
    gate: Option<BoxFuture<'static, ()>>,
    timeout: Duration,
    on_timeout: E,
) -> Result<T, LoadError>
where
    T: Send + 'static,
    W: Future<Output = Result<T, LoadError>> + Send + 'static,
    E: FnOnce() -> LoadError,
{
    let mut handle = tokio::spawn(work);

    if let Some(gate) = gate {
        gate.await;
    }

    tokio::select! {
        joined = &mut handle => match joined {
            Ok(result) => result,
            // The spawned work panicked; surface it as an abandoned load
            // rather than tearing down the caller.
            Err(join_err) => {
                debug!(error = %join_err, "route load task aborted");
                Err(LoadError::Abandoned)
            }
        },
        _ = tokio::time::sleep(timeout) => {
            // Dropping the handle detaches the task; it runs to completion
            // in the background and its result is discarded.
            debug!(timeout_ms = timeout.as_millis() as u64, "route load deadline elapsed");
            Err(on_timeout())
        }
    }
}
