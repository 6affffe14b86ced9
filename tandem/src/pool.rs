//! Per-run resource pooling.
//!
//! Transport adapters (an MCP client, a shared HTTP session) often need
//! one live connection per descriptor for the duration of a run. The
//! runtime owns a [`ResourcePool`] keyed by descriptor string and closes
//! every entry when the run exits, so adapters never manage lifecycle
//! themselves.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

/// A pooled resource with an async shutdown.
#[async_trait]
pub trait PoolResource: Send + Sync {
    /// Downcast support for typed retrieval.
    fn as_any(&self) -> &dyn Any;

    /// Release the resource. Called once, when the run exits.
    async fn close(&self);
}

struct PoolInner {
    entries: HashMap<String, Arc<dyn PoolResource>>,
    closed: bool,
}

/// A per-run map of live resources keyed by descriptor.
pub struct ResourcePool {
    inner: Mutex<PoolInner>,
}

impl ResourcePool {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                entries: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Fetch the resource under `key`, creating it with `factory` on first
    /// use. The factory runs under the pool lock, so concurrent callers
    /// never double-create.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Inactive`] when the pool was already closed, or
    /// the factory's error.
    pub async fn get_or_create<F, Fut>(&self, key: &str, factory: F) -> Result<Arc<dyn PoolResource>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn PoolResource>>> + Send,
    {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(Error::inactive("resource pool closed"));
        }
        if let Some(existing) = inner.entries.get(key) {
            return Ok(Arc::clone(existing));
        }
        let resource = factory().await?;
        debug!(key, "pooled resource created");
        inner.entries.insert(key.to_owned(), Arc::clone(&resource));
        Ok(resource)
    }

    /// Fetch the resource under `key`, if present.
    pub async fn get(&self, key: &str) -> Option<Arc<dyn PoolResource>> {
        self.inner.lock().await.entries.get(key).map(Arc::clone)
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// Returns `true` when no resources are pooled.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }

    /// Close every entry and refuse further use.
    pub(crate) async fn close_all(&self) {
        let entries: Vec<(String, Arc<dyn PoolResource>)> = {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.entries.drain().collect()
        };
        for (key, resource) in entries {
            debug!(key, "closing pooled resource");
            resource.close().await;
        }
    }
}

impl fmt::Debug for ResourcePool {
    // Manual impl: fmt must not touch the async lock.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool").finish_non_exhaustive()
    }
}
