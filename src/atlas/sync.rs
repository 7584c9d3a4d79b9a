//! Thread-safe wrapper for shared atlas access.
//!
//! `SyncAtlas` wraps an [`Atlas`] in `Arc<RwLock<_>>`. Queries share the read
//! lock; every mutation, cascades included, holds the write lock for its
//! whole duration.
//!
//! Enable the `sync` feature to use this module:
//!
//! ```toml
//! [dependencies]
//! liters-geo = { version = "0.1", features = ["sync"] }
//! ```

use super::{Atlas, NodeChange};
use crate::db::Removed;
use crate::error::Result;
use crate::geography::{GeographyNode, Id, Kind, NewNode, NodeRef, NodeUpdate};
use crate::hierarchy::HierarchyReport;
use crate::import::ImportSummary;
use crate::records::{DateRange, NewReport, Report};
use crate::resolver::ReportTotals;
use crate::types::Config;
use crate::visibility::VisibilityChange;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

/// Cloneable handle to one shared [`Atlas`].
#[derive(Clone)]
pub struct SyncAtlas {
    inner: Arc<RwLock<Atlas>>,
}

impl SyncAtlas {
    pub fn new(atlas: Atlas) -> Self {
        Self {
            inner: Arc::new(RwLock::new(atlas)),
        }
    }

    pub fn memory() -> Result<Self> {
        Ok(Self::new(Atlas::memory()?))
    }

    pub fn memory_with_config(config: Config) -> Result<Self> {
        Ok(Self::new(Atlas::memory_with_config(config)?))
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(Atlas::open(path)?))
    }

    /// Runs `f` under the read lock.
    pub fn read<R>(&self, f: impl FnOnce(&Atlas) -> R) -> R {
        f(&*self.inner.read())
    }

    /// Runs `f` under the write lock.
    pub fn write<R>(&self, f: impl FnOnce(&mut Atlas) -> R) -> R {
        f(&mut *self.inner.write())
    }

    // ===== Geography nodes =====

    pub fn node(&self, node: NodeRef) -> Result<GeographyNode> {
        self.inner.read().node(node).cloned()
    }

    pub fn create_node(&self, new: NewNode) -> Result<NodeRef> {
        self.inner.write().create_node(new)
    }

    pub fn update_node(&self, node: NodeRef, update: NodeUpdate) -> Result<NodeChange> {
        self.inner.write().update_node(node, update)
    }

    pub fn destroy_node(&self, node: NodeRef) -> Result<Removed> {
        self.inner.write().destroy_node(node)
    }

    pub fn create_report(&self, new: NewReport) -> Result<Id> {
        self.inner.write().create_report(new)
    }

    // ===== Aggregation =====

    /// Reports on `node` or below, optionally limited to a date range.
    pub fn related_reports(&self, node: NodeRef, range: Option<DateRange>) -> Result<Vec<Report>> {
        let atlas = self.inner.read();
        let mut query = atlas.related_reports(node)?;
        if let Some(range) = range {
            query = query.within(range);
        }
        Ok(query.execute(atlas.store()).into_iter().cloned().collect())
    }

    pub fn report_totals(&self, node: NodeRef, range: Option<DateRange>) -> Result<ReportTotals> {
        let atlas = self.inner.read();
        let mut query = atlas.related_reports(node)?;
        if let Some(range) = range {
            query = query.within(range);
        }
        Ok(query.totals(atlas.store()))
    }

    pub fn descendant_ids(&self, node: NodeRef, kind: Kind) -> Vec<Id> {
        self.inner.read().descendant_ids(node, kind)
    }

    pub fn ancestors_at(&self, targets: &[NodeRef], level: Kind) -> BTreeSet<Id> {
        self.inner.read().ancestors_at(targets, level)
    }

    // ===== Cascades =====

    pub fn update_hierarchy(&self, node: NodeRef, cascade: bool) -> Result<HierarchyReport> {
        self.inner.write().update_hierarchy(node, cascade)
    }

    pub fn reset_hierarchies(&self) -> Result<HierarchyReport> {
        self.inner.write().reset_hierarchies()
    }

    pub fn toggle_visibility(&self, node: NodeRef, hidden: bool) -> Result<VisibilityChange> {
        self.inner.write().toggle_visibility(node, hidden)
    }

    pub fn import<P: AsRef<Path>>(&self, kind: Kind, path: P) -> Result<ImportSummary> {
        self.inner.write().import(kind, path)
    }

    pub fn cleanup_cache(&self) -> usize {
        self.inner.read().cleanup_cache()
    }

    pub fn save_snapshot(&self) -> Result<()> {
        self.inner.write().save_snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_clone_shares_state() {
        let atlas = SyncAtlas::memory().unwrap();
        let handle = atlas.clone();

        let rwanda = atlas
            .create_node(NewNode::new(Kind::Country, "Rwanda"))
            .unwrap();
        assert_eq!(handle.node(rwanda).unwrap().name, "Rwanda");
    }

    #[test]
    fn test_concurrent_creates() {
        let atlas = SyncAtlas::memory().unwrap();
        let rwanda = atlas
            .create_node(NewNode::new(Kind::Country, "Rwanda"))
            .unwrap();

        let workers: Vec<_> = (0..4)
            .map(|i| {
                let atlas = atlas.clone();
                thread::spawn(move || {
                    atlas
                        .create_node(
                            NewNode::new(Kind::District, format!("District {}", i))
                                .parent(rwanda.id),
                        )
                        .unwrap()
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(atlas.descendant_ids(rwanda, Kind::District).len(), 4);
        assert_eq!(atlas.read(|a| a.stats().nodes_of(Kind::District)), 4);
    }
}
