//! Resolution scopes: the per-scope value cache and the exit stack.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{error, trace};

use super::{CacheKey, Value};
use crate::error::{HandlerResult, Interrupt};

/// Cleanup registered by a scoped dependency.
pub type Teardown = BoxFuture<'static, HandlerResult>;

/// The return value of a scoped provider: a value plus its cleanup.
///
/// ```rust,ignore
/// async fn session(pool: Dep<Pool>) -> HandlerResult<Scoped<Conn>> {
///     let conn = pool.acquire().await?;
///     let guard = conn.clone();
///     Ok(Scoped::new(conn, async move { guard.release().await?; Ok(()) }))
/// }
/// ```
pub struct Scoped<T> {
    pub(crate) value: T,
    pub(crate) teardown: Teardown,
}

impl<T> Scoped<T> {
    pub fn new<F>(value: T, teardown: F) -> Self
    where
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            value,
            teardown: teardown.boxed(),
        }
    }
}

impl<T: Any + Send + Sync> Scoped<T> {
    pub(crate) fn erase(self) -> Scoped<Value> {
        Scoped {
            value: Arc::new(self.value),
            teardown: self.teardown,
        }
    }
}

// ============================================================================
// ExitStack
// ============================================================================

/// Teardowns pushed during a scope, run in reverse order on close.
#[derive(Default)]
pub struct ExitStack {
    exits: Mutex<Vec<(&'static str, Teardown)>>,
}

impl ExitStack {
    pub fn push(&self, name: &'static str, teardown: Teardown) {
        self.exits.lock().push((name, teardown));
    }

    pub(crate) fn len(&self) -> usize {
        self.exits.lock().len()
    }

    /// Runs and drains every pending teardown, newest first.
    ///
    /// Failures are logged; closing twice runs nothing the second time.
    pub async fn close(&self) {
        let exits = std::mem::take(&mut *self.exits.lock());
        for (name, teardown) in exits.into_iter().rev() {
            trace!(dependency = name, "Running teardown");
            match teardown.await {
                Ok(()) => {}
                Err(Interrupt::Failed(err)) => {
                    error!(dependency = name, error = %err, "Dependency teardown failed");
                }
                Err(signal) => {
                    trace!(dependency = name, %signal, "Ignoring signal raised by teardown");
                }
            }
        }
    }
}

// ============================================================================
// DependencyCache
// ============================================================================

/// Values resolved in one scope, keyed by [`CacheKey`].
///
/// Each key owns a [`OnceCell`], so concurrent resolutions of the same
/// dependency invoke it once and share the value.
#[derive(Default)]
pub struct DependencyCache {
    cells: Mutex<HashMap<CacheKey, Arc<OnceCell<Value>>>>,
}

impl DependencyCache {
    pub(crate) fn cell(&self, key: &CacheKey) -> Arc<OnceCell<Value>> {
        Arc::clone(self.cells.lock().entry(key.clone()).or_default())
    }

    /// Number of keys with a resolved value.
    pub(crate) fn len(&self) -> usize {
        self.cells
            .lock()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }
}

/// A dependency cache plus the exit stack of its scoped values.
///
/// The dispatcher opens one scope for all checks of an event and each
/// matcher run opens its own.
#[derive(Default)]
pub struct Scope {
    pub cache: DependencyCache,
    pub stack: ExitStack,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn close(&self) {
        trace!(
            cached = self.cache.len(),
            teardowns = self.stack.len(),
            "Closing dependency scope"
        );
        self.stack.close().await;
    }
}
