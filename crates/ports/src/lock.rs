//! Lock boundary contract (spec.md §4.3 step 1, §4.6).
//!
//! Net-new — grounded on spec.md's watch-root lock (FW refuses to run a
//! second watcher against the same root) and worker-role lock files (WO
//! refuses to start a second instance of a worker role). Both are the same
//! shape: an exclusively-held, named lock that either one process holds or
//! nobody does.

use crate::BoxFuture;
use pyindex_shared::{RequestContext, Result};

/// An acquired lock. Dropping it without calling [`LockGuard::release`]
/// still releases the underlying lock (adapters back this with an
/// OS-level advisory lock tied to file descriptor lifetime); `release` is
/// for callers that want to surface release failures explicitly.
pub trait LockGuard: Send + Sync {
    /// Release the lock, surfacing any error the backing adapter hit.
    fn release(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}

/// Boundary contract for exclusive, named locks (spec.md §4.3 step 1's
/// watch-root lock, §4.6's per-role worker lock).
pub trait LockPort: Send + Sync {
    /// Attempt to acquire the named lock without blocking. Returns `None`
    /// when another process already holds it (surfaced by the caller as
    /// `LockHeld`, spec.md §7).
    fn try_acquire(&self, ctx: &RequestContext, key: &str) -> BoxFuture<'_, Result<Option<Box<dyn LockGuard>>>>;
}
