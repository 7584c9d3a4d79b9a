//! Descendant-id cache.
//!
//! Resolving "every Village under this District" walks four tables. The
//! result is memoized at two layers:
//!
//! - a [`Lookup`] memo that lives for one operation, and
//! - the injected [`CacheBackend`], keyed per node and descendant kind, with
//!   the configured TTL.
//!
//! The backend is a side channel. Every backend failure is logged and the
//! lookup falls through to the store, so a broken cache costs time but never
//! changes an answer or raises.

use crate::db::GeoStore;
use crate::geography::{DescendantResolvable, Id, Kind, NodeRef};
use crate::namespace::{Namespace, descendant_key, parse_descendant_key};
use crate::storage::{CacheBackend, CacheOp, CacheStats, MemoryBackend};
use crate::types::{CacheItem, Config, SetOptions};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Cache backend shared between every component that reads or invalidates.
pub type SharedBackend = Arc<RwLock<dyn CacheBackend>>;

/// Handle to the descendant-id cache backend.
#[derive(Clone)]
pub struct DescendantCache {
    backend: SharedBackend,
    ttl: Option<Duration>,
    enabled: bool,
}

impl DescendantCache {
    pub fn new(backend: SharedBackend, config: &Config) -> Self {
        Self {
            backend,
            ttl: config.cache_ttl(),
            enabled: config.cache_enabled,
        }
    }

    /// Cache over a private [`MemoryBackend`].
    pub fn in_memory(config: &Config) -> Self {
        let backend: SharedBackend = Arc::new(RwLock::new(MemoryBackend::new()));
        Self::new(backend, config)
    }

    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Starts an operation-scoped lookup against `store`.
    pub fn lookup<'a>(&'a self, store: &'a GeoStore) -> Lookup<'a> {
        Lookup {
            cache: self,
            store,
            memo: FxHashMap::default(),
        }
    }

    fn read(&self, node: NodeRef, kind: Kind) -> Option<Vec<Id>> {
        if !self.enabled {
            return None;
        }

        let key = descendant_key(node, kind);
        let item = match self.backend.read().get(&key) {
            Ok(item) => item?,
            Err(e) => {
                log::warn!("Descendant cache read failed for {}_{}: {}", node, kind, e);
                return None;
            }
        };

        match serde_json::from_slice(&item.value) {
            Ok(ids) => Some(ids),
            Err(e) => {
                log::warn!("Discarding undecodable cache entry for {} {}: {}", node, kind, e);
                None
            }
        }
    }

    fn write(&self, node: NodeRef, kind: Kind, ids: &[Id]) {
        if !self.enabled {
            return;
        }

        let value = match serde_json::to_vec(ids) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Could not encode descendant ids for {}: {}", node, e);
                return;
            }
        };
        let opts = self.ttl.map(SetOptions::with_ttl);
        let item = CacheItem::from_options(value, opts.as_ref());

        if let Err(e) = self.backend.write().put(&descendant_key(node, kind), &item) {
            log::warn!("Descendant cache write failed for {} {}: {}", node, kind, e);
        }
    }

    /// Drops the entries of `node` and each of its strict ancestors, using
    /// the parent links currently in `store`.
    ///
    /// Returns the number of keys removed from the backend.
    pub fn invalidate(&self, store: &GeoStore, node: NodeRef) -> usize {
        let mut chain = vec![node];
        match store.ancestors(node) {
            Ok(ancestors) => chain.extend(ancestors),
            Err(e) => log::warn!("Invalidating {} without its ancestors: {}", node, e),
        }
        self.invalidate_chain(chain)
    }

    /// Drops every descendant key of every node in `chain`.
    pub fn invalidate_chain(&self, chain: impl IntoIterator<Item = NodeRef>) -> usize {
        let ops: Vec<CacheOp> = chain
            .into_iter()
            .flat_map(|owner| {
                owner.kind.descendants().map(move |kind| CacheOp::Delete {
                    key: descendant_key(owner, kind),
                })
            })
            .collect();

        let count = ops.len();
        if let Err(e) = self.backend.write().batch(&ops) {
            log::warn!("Descendant cache invalidation failed: {}", e);
            return 0;
        }
        log::debug!("Invalidated {} descendant cache keys", count);
        count
    }

    pub fn cleanup_expired(&self) -> usize {
        match self.backend.write().cleanup_expired(SystemTime::now()) {
            Ok(count) => count,
            Err(e) => {
                log::warn!("Descendant cache cleanup failed: {}", e);
                0
            }
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.backend.write().clear() {
            log::warn!("Descendant cache clear failed: {}", e);
        }
    }

    /// Cached `(owner, descendant kind)` pairs for owners of `kind`.
    pub fn cached_entries(&self, kind: Kind) -> Vec<(NodeRef, Kind)> {
        let prefix = Namespace::for_kind(kind).prefix();
        match self.backend.read().keys_with_prefix(&prefix) {
            Ok(keys) => keys
                .iter()
                .filter_map(|key| parse_descendant_key(key))
                .collect(),
            Err(e) => {
                log::warn!("Could not list {} cache entries: {}", kind, e);
                Vec::new()
            }
        }
    }

    pub fn stats(&self) -> Option<CacheStats> {
        self.backend.read().stats().ok()
    }
}

/// Descendant lookups for one operation.
///
/// Holds the store immutably, so nothing can reparent a node while a memo
/// built from it is alive.
pub struct Lookup<'a> {
    cache: &'a DescendantCache,
    store: &'a GeoStore,
    memo: FxHashMap<(NodeRef, Kind), Arc<[Id]>>,
}

impl<'a> Lookup<'a> {
    pub fn store(&self) -> &'a GeoStore {
        self.store
    }

    /// Ids of every `kind` node below `node`, ascending. Empty when `kind`
    /// is not strictly deeper than the node.
    pub fn descendant_ids<N: DescendantResolvable>(&mut self, node: N, kind: Kind) -> Arc<[Id]> {
        let root = node.subtree_root();
        if !kind.is_deeper_than(root.kind) {
            return Arc::from(Vec::new());
        }

        if let Some(ids) = self.memo.get(&(root, kind)) {
            return Arc::clone(ids);
        }

        let ids: Arc<[Id]> = match self.cache.read(root, kind) {
            Some(ids) => ids.into(),
            None => {
                let ids = self.resolve(root, kind);
                self.cache.write(root, kind, &ids);
                ids
            }
        };

        self.memo.insert((root, kind), Arc::clone(&ids));
        ids
    }

    /// One level outward from the already resolved parent level.
    fn resolve(&mut self, root: NodeRef, kind: Kind) -> Arc<[Id]> {
        let Some(parent_kind) = kind.parent() else {
            return Arc::from(Vec::new());
        };

        let parent_ids: BTreeSet<Id> = if parent_kind == root.kind {
            BTreeSet::from([root.id])
        } else {
            self.descendant_ids(root, parent_kind).iter().copied().collect()
        };

        self.store
            .child_ids_of(kind, &parent_ids)
            .into_iter()
            .collect()
    }

    /// Descendant ids for every kind below `node`, nearest first.
    pub fn all_descendants<N: DescendantResolvable>(&mut self, node: N) -> Vec<(Kind, Arc<[Id]>)> {
        let root = node.subtree_root();
        root.kind
            .descendants()
            .map(|kind| (kind, self.descendant_ids(root, kind)))
            .collect()
    }

    pub fn memoized(&self) -> usize {
        self.memo.len()
    }
}
