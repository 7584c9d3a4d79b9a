//! Hierarchy snapshots.
//!
//! Every node stores the path from the root to its parent so breadcrumbs
//! render without walking the tree; reports and plans carry a copy of their
//! target's path. A node's snapshot is recomputed when its parent changes.
//! Descendants are only rewritten when a cascade is requested.

use crate::db::GeoStore;
use crate::error::{GeoError, Result, ValidationErrors};
use crate::geography::{Hierarchy, HierarchyBearing, Id, NodeRef};
use std::collections::BTreeSet;
use std::fmt;

/// What a failed hierarchy update was about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    Node(NodeRef),
    Report(Id),
    Plan(Id),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Node(node) => write!(f, "{}", node),
            Subject::Report(id) => write!(f, "Report {}", id),
            Subject::Plan(id) => write!(f, "Plan {}", id),
        }
    }
}

#[derive(Debug)]
pub struct HierarchyFailure {
    pub subject: Subject,
    pub error: GeoError,
}

/// Outcome of a hierarchy pass.
#[derive(Debug, Default)]
pub struct HierarchyReport {
    /// Snapshots rewritten with a different value
    pub updated: usize,
    /// Snapshots recomputed to the value already stored
    pub unchanged: usize,
    /// Nodes left alone because an ancestor failed
    pub skipped: Vec<NodeRef>,
    pub failures: Vec<HierarchyFailure>,
}

impl HierarchyReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }

    fn record(&mut self, changed: bool) {
        if changed {
            self.updated += 1;
        } else {
            self.unchanged += 1;
        }
    }

    fn fail(&mut self, subject: Subject, error: GeoError) {
        log::warn!("Hierarchy update failed for {}: {}", subject, error);
        self.failures.push(HierarchyFailure { subject, error });
    }
}

/// The snapshot `node` should carry given the current parent links.
pub fn compute_hierarchy(store: &GeoStore, node: NodeRef) -> Result<Hierarchy> {
    let stored = store.node(node)?;
    if node.kind.is_root() {
        return Ok(Hierarchy::new());
    }

    let Some(parent) = stored.parent_ref() else {
        let mut errors = ValidationErrors::new();
        errors.add("parent_id", "can't be blank");
        return Err(GeoError::Validation(errors));
    };
    Ok(Hierarchy::below(store.node(parent)?))
}

/// Writes the freshly computed snapshot of one node. Returns whether it
/// differed from the stored one.
fn refresh(store: &mut GeoStore, node: NodeRef) -> Result<bool> {
    let hierarchy = compute_hierarchy(store, node)?;
    let stored = store.node_mut(node)?;
    let changed = stored.hierarchy != hierarchy;
    stored.set_hierarchy(hierarchy);
    Ok(changed)
}

/// Recomputes `node`'s snapshot and, with `cascade`, every descendant's,
/// each after its own parent.
///
/// Runs as one transaction. A node whose parent is missing is reported and
/// its subtree skipped; any other error rolls the whole pass back.
pub fn update_hierarchy(
    store: &mut GeoStore,
    node: NodeRef,
    cascade: bool,
) -> Result<HierarchyReport> {
    store.node(node)?;

    store.transaction(|s| {
        let mut report = HierarchyReport::default();
        let order = if cascade { s.subtree(node) } else { vec![node] };
        refresh_in_order(s, &order, &mut report)?;

        log::debug!(
            "Hierarchy update from {} (cascade={}): {} updated, {} unchanged",
            node,
            cascade,
            report.updated,
            report.unchanged
        );
        Ok(report)
    })
}

fn refresh_in_order(
    store: &mut GeoStore,
    order: &[NodeRef],
    report: &mut HierarchyReport,
) -> Result<()> {
    let mut broken: BTreeSet<NodeRef> = BTreeSet::new();

    for &current in order {
        let parent = store.get_node(current).and_then(|n| n.parent_ref());
        if parent.is_some_and(|p| broken.contains(&p)) {
            broken.insert(current);
            report.skipped.push(current);
            continue;
        }

        match refresh(store, current) {
            Ok(changed) => report.record(changed),
            Err(e) if e.is_per_node() => {
                broken.insert(current);
                report.fail(Subject::Node(current), e);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Rebuilds every node snapshot top-down, then re-copies every report and
/// plan snapshot from its target. One transaction for the whole pass.
pub fn reset_hierarchies(store: &mut GeoStore) -> Result<HierarchyReport> {
    store.transaction(|s| {
        let mut report = HierarchyReport::default();

        let order: Vec<NodeRef> = crate::geography::Kind::ALL
            .into_iter()
            .flat_map(|kind| s.nodes(kind).map(|n| n.node_ref()).collect::<Vec<_>>())
            .collect();
        refresh_in_order(s, &order, &mut report)?;

        let report_ids: Vec<Id> = s.reports().map(|r| r.id).collect();
        for id in report_ids {
            let target = s.report(id)?.target;
            match s.node(target).map(|n| n.hierarchy.clone()) {
                Ok(hierarchy) => {
                    let record = s.report_mut(id)?;
                    let changed = record.hierarchy != hierarchy;
                    record.set_hierarchy(hierarchy);
                    report.record(changed);
                }
                Err(e) => report.fail(Subject::Report(id), e),
            }
        }

        let plan_ids: Vec<Id> = s.plans().map(|p| p.id).collect();
        for id in plan_ids {
            let target = s.plan(id)?.target;
            match s.node(target).map(|n| n.hierarchy.clone()) {
                Ok(hierarchy) => {
                    let record = s.plan_mut(id)?;
                    let changed = record.hierarchy != hierarchy;
                    record.set_hierarchy(hierarchy);
                    report.record(changed);
                }
                Err(e) => report.fail(Subject::Plan(id), e),
            }
        }

        log::info!(
            "Reset hierarchies: {} updated, {} unchanged, {} failed, {} skipped",
            report.updated,
            report.unchanged,
            report.failures.len(),
            report.skipped.len()
        );
        Ok(report)
    })
}

/// Points a report at a new target and copies the target's snapshot.
pub fn set_report_target(store: &mut GeoStore, report_id: Id, target: NodeRef) -> Result<()> {
    let hierarchy = store.node(target)?.hierarchy.clone();
    let report = store.report_mut(report_id)?;
    report.target = target;
    report.set_hierarchy(hierarchy);
    Ok(())
}

/// Points a plan at a new target and copies the target's snapshot.
pub fn set_plan_target(store: &mut GeoStore, plan_id: Id, target: NodeRef) -> Result<()> {
    let hierarchy = store.node(target)?.hierarchy.clone();
    let plan = store.plan_mut(plan_id)?;
    plan.target = target;
    plan.set_hierarchy(hierarchy);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geography::{Kind, NewNode, NodeUpdate};
    use crate::records::{NewReport, NewTechnology, TechnologyScale};
    use chrono::NaiveDate;

    struct Tree {
        store: GeoStore,
        kigali: NodeRef,
        nyarugenge: NodeRef,
        muhima: NodeRef,
        kiyovu: NodeRef,
        village: NodeRef,
        facility: NodeRef,
    }

    fn tree() -> Tree {
        let mut store = GeoStore::new();
        let rwanda = store.insert_node(NewNode::new(Kind::Country, "Rwanda")).unwrap();
        let kigali = store
            .insert_node(NewNode::new(Kind::District, "Kigali").parent(rwanda.id))
            .unwrap();
        let nyarugenge = store
            .insert_node(NewNode::new(Kind::Sector, "Nyarugenge").parent(kigali.id))
            .unwrap();
        let muhima = store
            .insert_node(NewNode::new(Kind::Sector, "Muhima").parent(kigali.id))
            .unwrap();
        let kiyovu = store
            .insert_node(NewNode::new(Kind::Cell, "Kiyovu").parent(nyarugenge.id))
            .unwrap();
        let village = store
            .insert_node(NewNode::new(Kind::Village, "Ubumwe").parent(kiyovu.id))
            .unwrap();
        let facility = store
            .insert_node(NewNode::new(Kind::Facility, "Health post").parent(village.id))
            .unwrap();
        Tree {
            store,
            kigali,
            nyarugenge,
            muhima,
            kiyovu,
            village,
            facility,
        }
    }

    fn parent_name(store: &GeoStore, node: NodeRef, kind: Kind) -> String {
        store
            .node(node)
            .unwrap()
            .hierarchy
            .entry_for(kind)
            .unwrap()
            .parent_name
            .clone()
    }

    #[test]
    fn test_non_cascading_update_leaves_descendants_stale() {
        let mut t = tree();
        t.store
            .apply_node_update(t.kiyovu, &NodeUpdate::new().parent(t.muhima.id))
            .unwrap();

        let report = update_hierarchy(&mut t.store, t.kiyovu, false).unwrap();
        assert_eq!(report.updated, 1);

        let cell = t.store.node(t.kiyovu).unwrap();
        assert_eq!(cell.hierarchy.last().unwrap().parent_id, t.muhima.id);
        assert_eq!(cell.hierarchy.len(), cell.depth());
        assert_eq!(parent_name(&t.store, t.village, Kind::Sector), "Nyarugenge");
    }

    #[test]
    fn test_cascading_update_rewrites_descendants() {
        let mut t = tree();
        t.store
            .apply_node_update(t.kiyovu, &NodeUpdate::new().parent(t.muhima.id))
            .unwrap();

        let report = update_hierarchy(&mut t.store, t.kiyovu, true).unwrap();
        assert_eq!(report.updated, 3);
        assert!(report.is_clean());
        assert_eq!(parent_name(&t.store, t.village, Kind::Sector), "Muhima");
        assert_eq!(parent_name(&t.store, t.facility, Kind::Sector), "Muhima");
        assert_eq!(
            t.store
                .node(t.facility)
                .unwrap()
                .hierarchy
                .last()
                .unwrap()
                .parent_id,
            t.village.id
        );
    }

    #[test]
    fn test_cascade_is_idempotent() {
        let mut t = tree();
        update_hierarchy(&mut t.store, t.kigali, true).unwrap();
        let first: Vec<Hierarchy> = t
            .store
            .subtree(t.kigali)
            .into_iter()
            .map(|n| t.store.node(n).unwrap().hierarchy.clone())
            .collect();

        let report = update_hierarchy(&mut t.store, t.kigali, true).unwrap();
        assert_eq!(report.updated, 0);
        let second: Vec<Hierarchy> = t
            .store
            .subtree(t.kigali)
            .into_iter()
            .map(|n| t.store.node(n).unwrap().hierarchy.clone())
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_parent_is_reported_and_subtree_skipped() {
        let mut t = tree();
        // Simulate a dangling parent link, as a restored snapshot could hold.
        t.store.node_mut(t.kiyovu).unwrap().parent_id = Some(404);

        let report = reset_hierarchies(&mut t.store).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].subject, Subject::Node(t.kiyovu));
        assert!(matches!(
            report.failures[0].error,
            GeoError::NodeNotFound {
                kind: Kind::Sector,
                id: 404
            }
        ));
        assert_eq!(report.unchanged, 4);
        assert_eq!(report.skipped, vec![t.village, t.facility]);
    }

    #[test]
    fn test_single_update_with_missing_parent_fails_softly() {
        let mut t = tree();
        t.store.node_mut(t.kiyovu).unwrap().parent_id = Some(404);

        let report = update_hierarchy(&mut t.store, t.kiyovu, true).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.skipped, vec![t.village, t.facility]);
        assert_eq!(report.updated, 0);
    }

    #[test]
    fn test_reset_refreshes_records() {
        let mut t = tree();
        let tech = t
            .store
            .insert_technology(NewTechnology::new("SAM3", TechnologyScale::Family))
            .unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let report_id = t
            .store
            .insert_report(NewReport::new(day, tech, t.village))
            .unwrap();

        t.store
            .apply_node_update(t.kiyovu, &NodeUpdate::new().parent(t.muhima.id))
            .unwrap();
        let report = reset_hierarchies(&mut t.store).unwrap();
        assert!(report.is_clean());
        assert!(report.updated >= 4);

        let stored = t.store.report(report_id).unwrap();
        assert_eq!(stored.hierarchy.entry_for(Kind::Sector).unwrap().parent_name, "Muhima");
    }

    #[test]
    fn test_set_report_target_copies_hierarchy() {
        let mut t = tree();
        let tech = t
            .store
            .insert_technology(NewTechnology::new("Filter", TechnologyScale::Family))
            .unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let id = t
            .store
            .insert_report(NewReport::new(day, tech, t.kigali))
            .unwrap();

        set_report_target(&mut t.store, id, t.facility).unwrap();
        let report = t.store.report(id).unwrap();
        assert_eq!(report.target, t.facility);
        assert_eq!(report.hierarchy.len(), 5);

        let err = set_report_target(&mut t.store, id, NodeRef::new(Kind::Cell, 77)).unwrap_err();
        assert!(matches!(err, GeoError::NodeNotFound { .. }));
        assert_eq!(t.store.report(id).unwrap().target, t.facility);
    }
}
