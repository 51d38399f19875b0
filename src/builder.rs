//! Builder for configuring an [`IndexWorker`].

use crate::error::Result;
use crate::store::SpatialStore;
use crate::transform::{SrsAuthority, TransformCache};
use crate::types::IndexConfig;
use crate::worker::IndexWorker;
use std::path::PathBuf;
use std::sync::Arc;

/// Step-by-step [`IndexWorker`] construction.
///
/// # Example
///
/// ```rust
/// use geodex::IndexWorkerBuilder;
///
/// let worker = IndexWorkerBuilder::new()
///     .in_memory()
///     .max_idle_connections(2)
///     .build()
///     .unwrap();
/// assert_eq!(worker.canonical_srs(), "EPSG:4326");
/// ```
pub struct IndexWorkerBuilder {
    path: Option<PathBuf>,
    config: IndexConfig,
    authority: Option<Arc<dyn SrsAuthority>>,
}

impl IndexWorkerBuilder {
    /// Start from defaults: in-memory store, built-in SRS authority.
    pub fn new() -> Self {
        Self {
            path: None,
            config: IndexConfig::default(),
            authority: None,
        }
    }

    /// Back the store with a database file at `path`.
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Use a private in-memory store (the default).
    pub fn in_memory(mut self) -> Self {
        self.path = None;
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: IndexConfig) -> Self {
        self.config = config;
        self
    }

    pub fn canonical_srs<S: Into<String>>(mut self, srs: S) -> Self {
        self.config.canonical_srs = srs.into();
        self
    }

    pub fn max_idle_connections(mut self, max: usize) -> Self {
        self.config = self.config.with_max_idle_connections(max);
        self
    }

    pub fn busy_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config = self.config.with_busy_timeout_ms(timeout_ms);
        self
    }

    /// Supply a custom SRS authority for reprojection.
    pub fn authority(mut self, authority: Arc<dyn SrsAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    /// Open the store and assemble the worker.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` if the backing database cannot be opened.
    pub fn build(self) -> Result<IndexWorker> {
        let store = match &self.path {
            Some(path) => SpatialStore::open(path, &self.config)?,
            None => SpatialStore::memory(&self.config)?,
        };
        let transforms = match self.authority {
            Some(authority) => TransformCache::new(authority),
            None => TransformCache::with_builtin(),
        };
        Ok(IndexWorker::new(
            Arc::new(store),
            Arc::new(transforms),
            self.config.canonical_srs,
        ))
    }
}

impl Default for IndexWorkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
