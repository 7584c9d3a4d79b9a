//! The `Atlas` facade.
//!
//! Wires the record store, the descendant cache and configuration together
//! and keeps them consistent: structural edits invalidate the cache chains
//! they touch, reparenting recomputes hierarchy snapshots, and every
//! mutation counts toward the automatic snapshot.
//!
//! ```rust
//! use liters_geo::{Atlas, Kind, NewNode};
//!
//! let mut atlas = Atlas::memory()?;
//! let rwanda = atlas.create_node(NewNode::new(Kind::Country, "Rwanda"))?;
//! let kigali = atlas.create_node(NewNode::new(Kind::District, "Kigali").parent(rwanda.id))?;
//! assert_eq!(atlas.descendant_ids(rwanda, Kind::District), vec![kigali.id]);
//! # Ok::<(), liters_geo::GeoError>(())
//! ```

use crate::builder::AtlasBuilder;
use crate::cache::DescendantCache;
use crate::db::{GeoStore, Removed, StoreStats};
use crate::error::{GeoError, Result};
use crate::geography::{DescendantResolvable, GeographyNode, Id, Kind, NewNode, NodeRef, NodeUpdate};
use crate::hierarchy::{self, HierarchyReport};
use crate::import::{self, ImportSummary};
use crate::persistence::{SnapshotConfig, SnapshotFile};
use crate::records::{
    Contract, NewContract, NewPlan, NewReport, NewStory, NewTechnology, Plan, Report, Story,
    Technology,
};
use crate::resolver::{self, PlanQuery, ReportQuery, StoryQuery};
use crate::types::Config;
use crate::visibility::{self, VisibilityChange};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

#[cfg(feature = "sync")]
pub mod sync;

/// What an [`Atlas::update_node`] call changed beyond plain attributes.
#[derive(Debug, Default)]
pub struct NodeChange {
    pub reparented: bool,
    pub previous_parent: Option<NodeRef>,
    pub hierarchy: Option<HierarchyReport>,
    pub visibility: Option<VisibilityChange>,
}

/// Geography tree, attached records and aggregation services.
pub struct Atlas {
    store: GeoStore,
    cache: DescendantCache,
    config: Config,
    snapshot: Option<SnapshotFile>,
}

impl Atlas {
    /// Starts an [`AtlasBuilder`].
    pub fn builder() -> AtlasBuilder {
        AtlasBuilder::new()
    }

    /// In-memory atlas with default configuration.
    pub fn memory() -> Result<Self> {
        AtlasBuilder::new().build()
    }

    /// In-memory atlas with `config`.
    ///
    /// # Errors
    ///
    /// `GeoError::InvalidConfig` when `config` fails validation.
    pub fn memory_with_config(config: Config) -> Result<Self> {
        AtlasBuilder::new().config(config).build()
    }

    /// Atlas persisted to the JSON snapshot at `path`, loading it if present.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        AtlasBuilder::new()
            .snapshot_path(path.as_ref())
            .build()
    }

    pub(crate) fn from_parts(
        store: GeoStore,
        cache: DescendantCache,
        config: Config,
        snapshot: Option<SnapshotFile>,
    ) -> Self {
        Self {
            store,
            cache,
            config,
            snapshot,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Read access to the tables, for executing queries.
    pub fn store(&self) -> &GeoStore {
        &self.store
    }

    /// The descendant-id cache, for inspection and statistics.
    pub fn cache(&self) -> &DescendantCache {
        &self.cache
    }

    /// Row counts for every table.
    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    // ===== Geography nodes =====

    /// Node by reference.
    pub fn node(&self, node: NodeRef) -> Result<&GeographyNode> {
        self.store.node(node)
    }

    /// Direct children of `node`.
    pub fn children(&self, node: NodeRef) -> Vec<&GeographyNode> {
        self.store.children(node)
    }

    /// Creates a node with its hierarchy derived from the parent.
    pub fn create_node(&mut self, new: NewNode) -> Result<NodeRef> {
        let node = self.store.insert_node(new)?;
        self.cache.invalidate(&self.store, node);
        log::debug!("Created {}", node);
        self.after_write();
        Ok(node)
    }

    /// Applies attribute edits. A parent change recomputes the node's
    /// hierarchy (its whole subtree for a Sector) and invalidates both the old
    /// and the new ancestor chains. A `hidden` change runs the visibility
    /// cascade in the same transaction, so either every part of the update
    /// lands or none does.
    ///
    /// # Arguments
    ///
    /// * `node` - The node to edit
    /// * `update` - Fields to change; `None` fields are left as they are
    ///
    /// # Returns
    ///
    /// What changed beyond plain attributes: the reparent, the hierarchy
    /// report and the visibility cascade.
    pub fn update_node(&mut self, node: NodeRef, update: NodeUpdate) -> Result<NodeChange> {
        let mut old_chain = vec![node];
        old_chain.extend(self.store.ancestors(node)?);

        let cascade = node.kind == Kind::Sector;
        let cache = &self.cache;
        let change = self.store.transaction(|s| {
            let mut change = NodeChange::default();
            if let Some(previous) = s.apply_node_update(node, &update)? {
                change.reparented = true;
                change.previous_parent = node
                    .kind
                    .parent()
                    .zip(previous)
                    .map(|(kind, id)| NodeRef::new(kind, id));
                change.hierarchy = Some(hierarchy::update_hierarchy(s, node, cascade)?);
            }
            if let Some(hidden) = update.hidden {
                change.visibility = Some(visibility::toggle_visibility(s, cache, node, hidden)?);
            }
            Ok(change)
        })?;

        if change.reparented {
            self.cache.invalidate_chain(old_chain);
            self.cache.invalidate(&self.store, node);
            log::info!("Moved {} from {:?}", node, change.previous_parent);
        }

        self.after_write();
        Ok(change)
    }

    /// Deletes a node, its subtree and every report, plan and story attached
    /// to them.
    pub fn destroy_node(&mut self, node: NodeRef) -> Result<Removed> {
        let mut chain = vec![node];
        chain.extend(self.store.ancestors(node)?);

        let removed = self.store.transaction(|s| s.remove_subtree(node))?;
        self.cache
            .invalidate_chain(chain.into_iter().chain(removed.nodes.iter().copied()));

        log::info!(
            "Destroyed {} with {} nodes, {} reports, {} plans, {} stories",
            node,
            removed.nodes.len(),
            removed.reports,
            removed.plans,
            removed.stories
        );
        self.after_write();
        Ok(removed)
    }

    // ===== Contracts, technologies and records =====

    /// Creates a contract.
    ///
    /// # Arguments
    ///
    /// * `new` - Name, date span and optional goals
    ///
    /// # Returns
    ///
    /// The new contract's id.
    pub fn create_contract(&mut self, new: NewContract) -> Result<Id> {
        let id = self.store.insert_contract(new)?;
        self.after_write();
        Ok(id)
    }

    /// Contract by id.
    pub fn contract(&self, id: Id) -> Result<&Contract> {
        self.store.contract(id)
    }

    /// Creates a technology. Names are unique.
    pub fn create_technology(&mut self, new: NewTechnology) -> Result<Id> {
        let id = self.store.insert_technology(new)?;
        self.after_write();
        Ok(id)
    }

    /// Technology by id.
    pub fn technology(&self, id: Id) -> Result<&Technology> {
        self.store.technology(id)
    }

    /// Creates a report and copies its target's hierarchy onto it.
    ///
    /// # Errors
    ///
    /// `GeoError::Validation` when the target, technology or contract does not
    /// exist, or `hours` is negative.
    pub fn create_report(&mut self, new: NewReport) -> Result<Id> {
        let id = self.store.insert_report(new)?;
        self.after_write();
        Ok(id)
    }

    /// Report by id.
    pub fn report(&self, id: Id) -> Result<&Report> {
        self.store.report(id)
    }

    /// Moves a report to another node and copies that node's hierarchy.
    pub fn update_report_target(&mut self, report_id: Id, target: NodeRef) -> Result<()> {
        hierarchy::set_report_target(&mut self.store, report_id, target)?;
        self.after_write();
        Ok(())
    }

    /// Creates a plan and copies its target's hierarchy onto it.
    pub fn create_plan(&mut self, new: NewPlan) -> Result<Id> {
        let id = self.store.insert_plan(new)?;
        self.after_write();
        Ok(id)
    }

    /// Plan by id.
    pub fn plan(&self, id: Id) -> Result<&Plan> {
        self.store.plan(id)
    }

    /// Moves a plan to another node and copies that node's hierarchy.
    pub fn update_plan_target(&mut self, plan_id: Id, target: NodeRef) -> Result<()> {
        hierarchy::set_plan_target(&mut self.store, plan_id, target)?;
        self.after_write();
        Ok(())
    }

    /// Creates a story about an existing report.
    pub fn create_story(&mut self, new: NewStory) -> Result<Id> {
        let id = self.store.insert_story(new)?;
        self.after_write();
        Ok(id)
    }

    /// Story by id.
    pub fn story(&self, id: Id) -> Result<&Story> {
        self.store.story(id)
    }

    // ===== Aggregation =====

    /// Reports on `node` or anywhere below it. Execute the returned query
    /// against [`store`](Self::store).
    pub fn related_reports<N: DescendantResolvable>(&self, node: N) -> Result<ReportQuery> {
        let root = self.existing_root(node)?;
        let mut lookup = self.cache.lookup(&self.store);
        Ok(resolver::related_reports(&mut lookup, root))
    }

    /// Plans on `node` or anywhere below it. Narrow the query by date range
    /// to match contracts whose span overlaps it.
    pub fn related_plans<N: DescendantResolvable>(&self, node: N) -> Result<PlanQuery> {
        let root = self.existing_root(node)?;
        let mut lookup = self.cache.lookup(&self.store);
        Ok(resolver::related_plans(&mut lookup, root))
    }

    /// Stories whose report is related to `node`.
    pub fn related_stories<N: DescendantResolvable>(&self, node: N) -> Result<StoryQuery> {
        let root = self.existing_root(node)?;
        let mut lookup = self.cache.lookup(&self.store);
        Ok(resolver::related_stories(&mut lookup, root))
    }

    /// Ids of every `kind` node below `node`, ascending.
    pub fn descendant_ids<N: DescendantResolvable>(&self, node: N, kind: Kind) -> Vec<Id> {
        self.cache
            .lookup(&self.store)
            .descendant_ids(node, kind)
            .to_vec()
    }

    /// Ids of the `level` nodes containing at least one of `targets`.
    pub fn ancestors_at(&self, targets: &[NodeRef], level: Kind) -> BTreeSet<Id> {
        resolver::ancestors_at(&self.store, targets, level)
    }

    /// The node itself for its own kind, its ancestor for a shallower kind and
    /// `None` for a deeper kind.
    pub fn ancestor_of_kind(&self, node: NodeRef, kind: Kind) -> Result<Option<NodeRef>> {
        self.store.ancestor_of_kind(node, kind)
    }

    fn existing_root<N: DescendantResolvable>(&self, node: N) -> Result<NodeRef> {
        let root = node.subtree_root();
        self.store.node(root)?;
        Ok(root)
    }

    // ===== Cascades =====

    /// Recomputes the hierarchy of `node`, and of its whole subtree with
    /// `cascade`.
    ///
    /// # Arguments
    ///
    /// * `node` - Subtree root
    /// * `cascade` - Also rewrite every descendant, parents first
    ///
    /// # Returns
    ///
    /// Counts of updated and unchanged nodes plus per-node failures.
    pub fn update_hierarchy(&mut self, node: NodeRef, cascade: bool) -> Result<HierarchyReport> {
        let report = hierarchy::update_hierarchy(&mut self.store, node, cascade)?;
        self.after_write();
        Ok(report)
    }

    /// Rebuilds every hierarchy top-down and re-copies report and plan
    /// hierarchies.
    pub fn reset_hierarchies(&mut self) -> Result<HierarchyReport> {
        let report = hierarchy::reset_hierarchies(&mut self.store)?;
        self.after_write();
        Ok(report)
    }

    /// Hides or shows `node` and cascades; see [`visibility::toggle_visibility`].
    pub fn toggle_visibility(&mut self, node: NodeRef, hidden: bool) -> Result<VisibilityChange> {
        let change = visibility::toggle_visibility(&mut self.store, &self.cache, node, hidden)?;
        if !change.is_noop() {
            self.after_write();
        }
        Ok(change)
    }

    // ===== Import =====

    /// Imports `kind` rows from a CSV file.
    pub fn import<P: AsRef<Path>>(&mut self, kind: Kind, path: P) -> Result<ImportSummary> {
        let summary = import::import_path(&mut self.store, kind, path, &self.config)?;
        self.after_import(&summary);
        Ok(summary)
    }

    /// Imports `kind` rows from any CSV reader.
    pub fn import_reader<R: Read>(&mut self, kind: Kind, reader: R) -> Result<ImportSummary> {
        let summary = import::import_reader(&mut self.store, kind, reader, &self.config)?;
        self.after_import(&summary);
        Ok(summary)
    }

    fn after_import(&mut self, summary: &ImportSummary) {
        if summary.created.is_empty() {
            return;
        }

        let mut touched = BTreeSet::new();
        for &node in &summary.created {
            touched.insert(node);
            match self.store.ancestors(node) {
                Ok(ancestors) => touched.extend(ancestors),
                Err(e) => log::warn!("Invalidating {} without its ancestors: {}", node, e),
            }
        }
        self.cache.invalidate_chain(touched);
        self.after_write();
    }

    // ===== Cache and persistence =====

    /// Sweeps expired descendant cache entries.
    pub fn cleanup_cache(&self) -> usize {
        self.cache.cleanup_expired()
    }

    /// Writes the configured snapshot now.
    pub fn save_snapshot(&mut self) -> Result<()> {
        let Some(snapshot) = self.snapshot.as_mut() else {
            return Err(GeoError::InvalidConfig(
                "no snapshot path configured".to_string(),
            ));
        };
        snapshot.save(&self.store)
    }

    /// Writes a one-off snapshot to `path`.
    pub fn save_snapshot_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        SnapshotFile::new(path, SnapshotConfig::default()).save(&self.store)
    }

    /// Replaces every table with the snapshot at `path` and drops every
    /// cached descendant list.
    pub fn load_snapshot<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.store = SnapshotFile::new(path, SnapshotConfig::default()).load()?;
        self.cache.clear();
        Ok(())
    }

    /// Counts a committed write toward the automatic snapshot. A failed save
    /// is logged and retried on the next write; the write itself stands.
    fn after_write(&mut self) {
        if let Some(snapshot) = self.snapshot.as_mut() {
            snapshot.record_operation();
            if snapshot.should_snapshot()
                && let Err(e) = snapshot.save(&self.store)
            {
                log::warn!(
                    "Automatic snapshot to {:?} failed, {} writes pending: {}",
                    snapshot.path(),
                    snapshot.pending_operations(),
                    e
                );
            }
        }
    }
}
