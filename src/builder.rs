//! Atlas builder.
//!
//! Collects configuration, an optional shared cache backend and an optional
//! snapshot path, then loads any existing snapshot.

use crate::atlas::Atlas;
use crate::cache::{DescendantCache, SharedBackend};
use crate::db::GeoStore;
use crate::error::{GeoError, Result};
use crate::persistence::{SnapshotConfig, SnapshotFile};
use crate::types::Config;
use std::path::PathBuf;

/// Builder for an [`Atlas`] with custom configuration, cache backend and
/// persistence.
pub struct AtlasBuilder {
    config: Config,
    cache_backend: Option<SharedBackend>,
    snapshot_path: Option<PathBuf>,
}

impl AtlasBuilder {
    /// In-memory atlas with default configuration and a private cache.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            cache_backend: None,
            snapshot_path: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Share a cache backend with other components.
    pub fn cache_backend(mut self, backend: SharedBackend) -> Self {
        self.cache_backend = Some(backend);
        self
    }

    /// Persist to a JSON snapshot. An existing file is loaded on build.
    pub fn snapshot_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    /// Drop any configured snapshot path.
    pub fn in_memory(mut self) -> Self {
        self.snapshot_path = None;
        self
    }

    /// Validates the configuration and loads the snapshot, if any.
    ///
    /// The cache backend is cleared: entries it already holds describe some
    /// other store, the same as after [`Atlas::load_snapshot`].
    pub fn build(self) -> Result<Atlas> {
        self.config.validate().map_err(GeoError::InvalidConfig)?;

        let cache = match self.cache_backend {
            Some(backend) => DescendantCache::new(backend, &self.config),
            None => DescendantCache::in_memory(&self.config),
        };

        let (store, snapshot) = match self.snapshot_path {
            Some(path) => {
                let snapshot = SnapshotFile::new(
                    path,
                    SnapshotConfig {
                        auto_snapshot_ops: self.config.snapshot_auto_ops,
                    },
                );
                (snapshot.load()?, Some(snapshot))
            }
            None => (GeoStore::new(), None),
        };
        cache.clear();

        Ok(Atlas::from_parts(store, cache, self.config, snapshot))
    }
}

impl Default for AtlasBuilder {
    fn default() -> Self {
        Self::new()
    }
}
