//! Authoritative record store.
//!
//! `GeoStore` owns one table per geography kind plus the report, plan,
//! story, contract and technology tables. It enforces record validation and
//! parent links, answers the bulk queries the aggregation services are built
//! on, and runs multi-record edits as transactions.

use crate::error::{GeoError, Result, ValidationErrors};
use crate::geography::{GeographyNode, Hierarchy, Id, Kind, NewNode, NodeRef, NodeUpdate};
use crate::records::{
    Contract, NewContract, NewPlan, NewReport, NewStory, NewTechnology, Plan, Report, Story,
    Technology,
};
use std::collections::{BTreeSet, VecDeque};

mod batch;
pub(crate) mod internal;

pub use batch::Transaction;

use internal::Tables;

/// Row counts per table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub nodes: [usize; 6],
    pub reports: usize,
    pub plans: usize,
    pub stories: usize,
    pub contracts: usize,
    pub technologies: usize,
}

impl StoreStats {
    /// Rows stored for one geography kind.
    pub fn nodes_of(&self, kind: Kind) -> usize {
        self.nodes[kind.depth()]
    }
}

/// What a destroy removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Removed {
    pub nodes: Vec<NodeRef>,
    pub reports: usize,
    pub plans: usize,
    pub stories: usize,
}

/// In-memory tables for the geography tree and everything attached to it.
#[derive(Debug, Clone, Default)]
pub struct GeoStore {
    pub(crate) tables: Tables,
}

impl GeoStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row counts for every table.
    pub fn stats(&self) -> StoreStats {
        let t = &self.tables;
        StoreStats {
            nodes: std::array::from_fn(|depth| t.nodes[depth].len()),
            reports: t.reports.len(),
            plans: t.plans.len(),
            stories: t.stories.len(),
            contracts: t.contracts.len(),
            technologies: t.technologies.len(),
        }
    }

    // ===== Geography nodes =====

    /// Looks up a node, `None` when it does not exist.
    pub fn get_node(&self, node: NodeRef) -> Option<&GeographyNode> {
        self.tables.node(node)
    }

    /// Like [`get_node`](Self::get_node) but a missing node is an error.
    pub fn node(&self, node: NodeRef) -> Result<&GeographyNode> {
        self.tables.node(node).ok_or(GeoError::NodeNotFound {
            kind: node.kind,
            id: node.id,
        })
    }

    pub(crate) fn node_mut(&mut self, node: NodeRef) -> Result<&mut GeographyNode> {
        self.tables.node_mut(node).ok_or(GeoError::NodeNotFound {
            kind: node.kind,
            id: node.id,
        })
    }

    /// True when `node` is stored.
    pub fn contains(&self, node: NodeRef) -> bool {
        self.tables.contains(node)
    }

    /// Every stored node of `kind`, ascending by id.
    pub fn nodes(&self, kind: Kind) -> impl Iterator<Item = &GeographyNode> {
        self.tables.table(kind).values()
    }

    /// The `kind` node carrying geocode `code`, if any.
    pub fn find_by_gis_code(&self, kind: Kind, code: &str) -> Option<&GeographyNode> {
        self.nodes(kind).find(|n| n.gis_code.as_deref() == Some(code))
    }

    /// Create-or-find key used by imports.
    ///
    /// # Arguments
    ///
    /// * `kind` - Table to search
    /// * `name` - Exact node name
    /// * `code` - Exact geocode
    ///
    /// # Returns
    ///
    /// The first node matching both, or `None`.
    pub fn find_by_name_and_code(
        &self,
        kind: Kind,
        name: &str,
        code: &str,
    ) -> Option<&GeographyNode> {
        self.nodes(kind)
            .find(|n| n.name == name && n.gis_code.as_deref() == Some(code))
    }

    /// Validates and stores a node. Its hierarchy is derived from the parent.
    pub fn insert_node(&mut self, new: NewNode) -> Result<NodeRef> {
        self.tables.validate_node(&new, None).into_result()?;

        let hierarchy = match new.kind.parent().zip(new.parent_id) {
            Some((kind, id)) => Hierarchy::below(self.node(NodeRef::new(kind, id))?),
            None => Hierarchy::new(),
        };

        let id = self.tables.next_node_id(new.kind);
        let node = GeographyNode {
            id,
            kind: new.kind,
            name: new.name.trim().to_string(),
            gis_code: new.gis_code,
            location: new.location,
            population: new.population,
            households: new.households,
            hidden: new.hidden,
            parent_id: new.parent_id,
            hierarchy,
        };
        self.tables.table_mut(new.kind).insert(id, node);

        Ok(NodeRef::new(new.kind, id))
    }

    /// Applies the attribute part of `update`. Hierarchy and visibility are
    /// left to the callers that own those cascades.
    ///
    /// Returns the previous parent id when the parent changed.
    pub fn apply_node_update(
        &mut self,
        node: NodeRef,
        update: &NodeUpdate,
    ) -> Result<Option<Option<Id>>> {
        let current = self.node(node)?;

        let candidate = NewNode {
            kind: node.kind,
            name: update.name.clone().unwrap_or_else(|| current.name.clone()),
            parent_id: update.parent_id.or(current.parent_id),
            gis_code: update
                .gis_code
                .clone()
                .unwrap_or_else(|| current.gis_code.clone()),
            location: update.location.unwrap_or(current.location),
            population: update.population.unwrap_or(current.population),
            households: update.households.unwrap_or(current.households),
            hidden: current.hidden,
        };
        self.tables
            .validate_node(&candidate, Some(node.id))
            .into_result()?;

        let previous_parent = current.parent_id;
        let stored = self.node_mut(node)?;
        stored.name = candidate.name.trim().to_string();
        stored.gis_code = candidate.gis_code;
        stored.location = candidate.location;
        stored.population = candidate.population;
        stored.households = candidate.households;
        stored.parent_id = candidate.parent_id;

        Ok((previous_parent != candidate.parent_id).then_some(previous_parent))
    }

    /// Direct children of a node.
    pub fn children(&self, node: NodeRef) -> Vec<&GeographyNode> {
        let Some(child_kind) = node.kind.child() else {
            return Vec::new();
        };
        self.nodes(child_kind)
            .filter(|n| n.parent_id == Some(node.id))
            .collect()
    }

    /// Ids of `child_kind` rows whose parent is in `parent_ids`.
    pub fn child_ids_of(&self, child_kind: Kind, parent_ids: &BTreeSet<Id>) -> BTreeSet<Id> {
        if child_kind.is_root() || parent_ids.is_empty() {
            return BTreeSet::new();
        }
        self.nodes(child_kind)
            .filter(|n| n.parent_id.is_some_and(|p| parent_ids.contains(&p)))
            .map(|n| n.id)
            .collect()
    }

    /// Parent ids of the `kind` rows in `ids`, deduplicated. Ids that do not
    /// exist are skipped.
    pub fn parent_ids_of(&self, kind: Kind, ids: &BTreeSet<Id>) -> BTreeSet<Id> {
        let table = self.tables.table(kind);
        ids.iter()
            .filter_map(|id| table.get(id))
            .filter_map(|n| n.parent_id)
            .collect()
    }

    /// Every id of `descendant` below `node`, resolved one level at a time.
    pub fn descendant_ids(&self, node: NodeRef, descendant: Kind) -> Vec<Id> {
        if !descendant.is_deeper_than(node.kind) {
            return Vec::new();
        }

        let mut frontier = BTreeSet::from([node.id]);
        let mut kind = node.kind;
        while kind != descendant {
            let Some(next) = kind.child() else {
                break;
            };
            frontier = self.child_ids_of(next, &frontier);
            kind = next;
            if frontier.is_empty() {
                break;
            }
        }
        frontier.into_iter().collect()
    }

    /// The node and everything below it, every parent before its children.
    pub fn subtree(&self, node: NodeRef) -> Vec<NodeRef> {
        let mut order = Vec::new();
        let mut queue = VecDeque::from([node]);
        while let Some(current) = queue.pop_front() {
            order.push(current);
            queue.extend(self.children(current).into_iter().map(|c| c.node_ref()));
        }
        order
    }

    /// Strict ancestors, immediate parent first, following stored parent
    /// links rather than the hierarchy snapshot.
    pub fn ancestors(&self, node: NodeRef) -> Result<Vec<NodeRef>> {
        let mut chain = Vec::with_capacity(node.kind.depth());
        let mut current = self.node(node)?;
        while let Some(parent) = current.parent_ref() {
            current = self.node(parent)?;
            chain.push(parent);
        }
        Ok(chain)
    }

    /// The node itself for its own kind, its ancestor for a shallower kind,
    /// `None` for a deeper kind.
    pub fn ancestor_of_kind(&self, node: NodeRef, kind: Kind) -> Result<Option<NodeRef>> {
        if kind.is_deeper_than(node.kind) {
            return Ok(None);
        }
        let mut current = self.node(node)?;
        while current.kind != kind {
            let Some(parent) = current.parent_ref() else {
                return Ok(None);
            };
            current = self.node(parent)?;
        }
        Ok(Some(current.node_ref()))
    }

    /// Bulk write of the hidden flag. Returns the number of rows changed.
    pub fn set_hidden(&mut self, kind: Kind, ids: &[Id], hidden: bool) -> usize {
        let table = self.tables.table_mut(kind);
        let mut changed = 0;
        for id in ids {
            if let Some(node) = table.get_mut(id)
                && node.hidden != hidden
            {
                node.hidden = hidden;
                changed += 1;
            }
        }
        changed
    }

    /// Deletes a node, its whole subtree and every record attached to any
    /// of them.
    pub fn remove_subtree(&mut self, node: NodeRef) -> Result<Removed> {
        self.node(node)?;

        let doomed = self.subtree(node);
        let targets: BTreeSet<NodeRef> = doomed.iter().copied().collect();

        let t = &mut self.tables;
        let report_ids: BTreeSet<Id> = t
            .reports
            .values()
            .filter(|r| targets.contains(&r.target))
            .map(|r| r.id)
            .collect();
        let stories_before = t.stories.len();
        t.stories.retain(|_, s| !report_ids.contains(&s.report_id));
        t.reports.retain(|id, _| !report_ids.contains(id));
        let plans_before = t.plans.len();
        t.plans.retain(|_, p| !targets.contains(&p.target));

        for doomed_node in &doomed {
            t.table_mut(doomed_node.kind).remove(&doomed_node.id);
        }

        Ok(Removed {
            nodes: doomed,
            reports: report_ids.len(),
            plans: plans_before - t.plans.len(),
            stories: stories_before - t.stories.len(),
        })
    }

    // ===== Contracts and technologies =====

    /// Validates and stores a contract.
    ///
    /// # Errors
    ///
    /// `GeoError::Validation` for a blank name, an end date before the start
    /// date or a negative budget.
    pub fn insert_contract(&mut self, new: NewContract) -> Result<Id> {
        self.tables.validate_contract(&new).into_result()?;
        let id = self.tables.next_contract_id();
        self.tables.contracts.insert(
            id,
            Contract {
                id,
                name: new.name.trim().to_string(),
                start_date: new.start_date,
                end_date: new.end_date,
                budget: new.budget,
                household_goal: new.household_goal,
                people_goal: new.people_goal,
            },
        );
        Ok(id)
    }

    /// Contract by id.
    pub fn contract(&self, id: Id) -> Result<&Contract> {
        self.tables.contracts.get(&id).ok_or(GeoError::RecordNotFound {
            record: "Contract",
            id,
        })
    }

    /// Every contract, ascending by id.
    pub fn contracts(&self) -> impl Iterator<Item = &Contract> {
        self.tables.contracts.values()
    }

    /// Validates and stores a technology. Names are unique, ignoring ASCII case.
    pub fn insert_technology(&mut self, new: NewTechnology) -> Result<Id> {
        self.tables.validate_technology(&new).into_result()?;
        let id = self.tables.next_technology_id();
        self.tables.technologies.insert(
            id,
            Technology {
                id,
                name: new.name.trim().to_string(),
                short_name: new.short_name,
                scale: new.scale,
                default_cost: new.default_cost,
                direct_cost: new.direct_cost,
                indirect_cost: new.indirect_cost,
                people_served: new.people_served,
                liters_per_day: new.liters_per_day,
            },
        );
        Ok(id)
    }

    /// Technology by id.
    pub fn technology(&self, id: Id) -> Result<&Technology> {
        self.tables
            .technologies
            .get(&id)
            .ok_or(GeoError::RecordNotFound {
                record: "Technology",
                id,
            })
    }

    /// Every technology, ascending by id.
    pub fn technologies(&self) -> impl Iterator<Item = &Technology> {
        self.tables.technologies.values()
    }

    // ===== Reports, plans and stories =====

    /// Stores a report with its hierarchy copied from the target.
    pub fn insert_report(&mut self, new: NewReport) -> Result<Id> {
        let mut errors = ValidationErrors::new();
        self.tables
            .validate_attachment(new.target, new.technology_id, new.contract_id, &mut errors);
        if new.hours.is_some_and(|h| !h.is_finite() || h < 0.0) {
            errors.add("hours", "must be a non-negative number");
        }
        errors.into_result()?;

        let hierarchy = self.node(new.target)?.hierarchy.clone();
        let id = self.tables.next_report_id();
        self.tables.reports.insert(
            id,
            Report {
                id,
                date: new.date,
                technology_id: new.technology_id,
                contract_id: new.contract_id,
                target: new.target,
                distributed: new.distributed,
                checked: new.checked,
                people: new.people,
                households: new.households,
                hours: new.hours,
                hierarchy,
            },
        );
        Ok(id)
    }

    /// Report by id.
    pub fn report(&self, id: Id) -> Result<&Report> {
        self.tables.reports.get(&id).ok_or(GeoError::RecordNotFound {
            record: "Report",
            id,
        })
    }

    pub(crate) fn report_mut(&mut self, id: Id) -> Result<&mut Report> {
        self.tables
            .reports
            .get_mut(&id)
            .ok_or(GeoError::RecordNotFound {
                record: "Report",
                id,
            })
    }

    /// Every report, ascending by id.
    pub fn reports(&self) -> impl Iterator<Item = &Report> {
        self.tables.reports.values()
    }

    /// Stores a plan with its hierarchy copied from the target.
    pub fn insert_plan(&mut self, new: NewPlan) -> Result<Id> {
        let mut errors = ValidationErrors::new();
        self.tables.validate_attachment(
            new.target,
            new.technology_id,
            Some(new.contract_id),
            &mut errors,
        );
        errors.into_result()?;

        let hierarchy = self.node(new.target)?.hierarchy.clone();
        let id = self.tables.next_plan_id();
        self.tables.plans.insert(
            id,
            Plan {
                id,
                contract_id: new.contract_id,
                technology_id: new.technology_id,
                target: new.target,
                goal: new.goal,
                people_goal: new.people_goal,
                hierarchy,
            },
        );
        Ok(id)
    }

    /// Plan by id.
    pub fn plan(&self, id: Id) -> Result<&Plan> {
        self.tables.plans.get(&id).ok_or(GeoError::RecordNotFound {
            record: "Plan",
            id,
        })
    }

    pub(crate) fn plan_mut(&mut self, id: Id) -> Result<&mut Plan> {
        self.tables.plans.get_mut(&id).ok_or(GeoError::RecordNotFound {
            record: "Plan",
            id,
        })
    }

    /// Every plan, ascending by id.
    pub fn plans(&self) -> impl Iterator<Item = &Plan> {
        self.tables.plans.values()
    }

    /// Stores a story about an existing report.
    pub fn insert_story(&mut self, new: NewStory) -> Result<Id> {
        let mut errors = ValidationErrors::new();
        if !self.tables.reports.contains_key(&new.report_id) {
            errors.add("report_id", "must reference an existing report");
        }
        if new.title.trim().is_empty() {
            errors.add("title", "can't be blank");
        }
        errors.into_result()?;

        let id = self.tables.next_story_id();
        self.tables.stories.insert(
            id,
            Story {
                id,
                report_id: new.report_id,
                title: new.title.trim().to_string(),
                text: new.text,
                image: new.image,
            },
        );
        Ok(id)
    }

    /// Story by id.
    pub fn story(&self, id: Id) -> Result<&Story> {
        self.tables.stories.get(&id).ok_or(GeoError::RecordNotFound {
            record: "Story",
            id,
        })
    }

    /// Every story, ascending by id.
    pub fn stories(&self) -> impl Iterator<Item = &Story> {
        self.tables.stories.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::TechnologyScale;
    use chrono::NaiveDate;

    struct Tree {
        store: GeoStore,
        rwanda: NodeRef,
        kigali: NodeRef,
        nyarugenge: NodeRef,
        muhima: NodeRef,
        kiyovu: NodeRef,
        village: NodeRef,
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
        Tree {
            store,
            rwanda,
            kigali,
            nyarugenge,
            muhima,
            kiyovu,
            village,
        }
    }

    #[test]
    fn test_insert_derives_hierarchy() {
        let t = tree();
        let village = t.store.node(t.village).unwrap();
        assert_eq!(village.hierarchy.len(), 4);
        assert_eq!(village.hierarchy.last().unwrap().parent_id, t.kiyovu.id);
        assert_eq!(
            village.hierarchy.breadcrumb("/"),
            "Rwanda/Kigali/Nyarugenge/Kiyovu"
        );
    }

    #[test]
    fn test_insert_rejects_missing_parent() {
        let mut store = GeoStore::new();
        let err = store
            .insert_node(NewNode::new(Kind::Sector, "Nowhere").parent(3))
            .unwrap_err();
        match err {
            GeoError::Validation(errors) => {
                assert_eq!(errors.on("parent_id"), vec!["must reference an existing District"])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_descendant_and_parent_lookups() {
        let t = tree();

        assert_eq!(t.store.descendant_ids(t.rwanda, Kind::Sector), vec![1, 2]);
        assert_eq!(t.store.descendant_ids(t.kigali, Kind::Village), vec![t.village.id]);
        assert!(t.store.descendant_ids(t.muhima, Kind::Village).is_empty());
        assert!(t.store.descendant_ids(t.kiyovu, Kind::Sector).is_empty());

        let parents = t
            .store
            .parent_ids_of(Kind::Sector, &BTreeSet::from([t.nyarugenge.id, t.muhima.id]));
        assert_eq!(parents, BTreeSet::from([t.kigali.id]));
    }

    #[test]
    fn test_subtree_is_parent_first() {
        let t = tree();
        let order = t.store.subtree(t.kigali);
        assert_eq!(order[0], t.kigali);
        let pos = |n: NodeRef| order.iter().position(|x| *x == n).unwrap();
        assert!(pos(t.nyarugenge) < pos(t.kiyovu));
        assert!(pos(t.kiyovu) < pos(t.village));
        assert_eq!(order.len(), 5);
    }

    #[test]
    fn test_ancestor_of_kind() {
        let t = tree();
        assert_eq!(
            t.store.ancestor_of_kind(t.village, Kind::District).unwrap(),
            Some(t.kigali)
        );
        assert_eq!(
            t.store.ancestor_of_kind(t.village, Kind::Village).unwrap(),
            Some(t.village)
        );
        assert_eq!(
            t.store.ancestor_of_kind(t.kigali, Kind::Cell).unwrap(),
            None
        );
        assert_eq!(
            t.store.ancestors(t.kiyovu).unwrap(),
            vec![t.nyarugenge, t.kigali, t.rwanda]
        );
    }

    #[test]
    fn test_apply_update_reports_parent_change() {
        let mut t = tree();
        let unchanged = t
            .store
            .apply_node_update(t.kiyovu, &NodeUpdate::new().name("Kiyovu II"))
            .unwrap();
        assert_eq!(unchanged, None);

        let moved = t
            .store
            .apply_node_update(t.kiyovu, &NodeUpdate::new().parent(t.muhima.id))
            .unwrap();
        assert_eq!(moved, Some(Some(t.nyarugenge.id)));
        assert_eq!(t.store.node(t.kiyovu).unwrap().name, "Kiyovu II");
    }

    #[test]
    fn test_remove_subtree_takes_attached_records() {
        let mut t = tree();
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let tech = t
            .store
            .insert_technology(NewTechnology::new("SAM3", TechnologyScale::Family))
            .unwrap();
        let contract = t
            .store
            .insert_contract(NewContract::new(
                "2024",
                day,
                NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            ))
            .unwrap();
        let report = t
            .store
            .insert_report(NewReport::new(day, tech, t.village).distributed(10))
            .unwrap();
        t.store
            .insert_story(NewStory::new(report, "Clean water", "..."))
            .unwrap();
        t.store
            .insert_plan(NewPlan::new(contract, tech, t.kiyovu, 50))
            .unwrap();
        t.store
            .insert_plan(NewPlan::new(contract, tech, t.muhima, 20))
            .unwrap();

        let removed = t.store.remove_subtree(t.nyarugenge).unwrap();
        assert_eq!(removed.nodes.len(), 3);
        assert_eq!(removed.reports, 1);
        assert_eq!(removed.stories, 1);
        assert_eq!(removed.plans, 1);

        let stats = t.store.stats();
        assert_eq!(stats.nodes_of(Kind::Sector), 1);
        assert_eq!(stats.plans, 1);
        assert!(!t.store.contains(t.village));
    }

    #[test]
    fn test_report_copies_target_hierarchy() {
        let mut t = tree();
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let tech = t
            .store
            .insert_technology(NewTechnology::new("Rain tank", TechnologyScale::Community))
            .unwrap();
        let id = t
            .store
            .insert_report(NewReport::new(day, tech, t.kiyovu).checked(3))
            .unwrap();
        let report = t.store.report(id).unwrap();
        assert_eq!(report.hierarchy, t.store.node(t.kiyovu).unwrap().hierarchy);

        let err = t
            .store
            .insert_report(NewReport::new(day, 99, NodeRef::new(Kind::Cell, 99)))
            .unwrap_err();
        assert!(matches!(err, GeoError::Validation(ref e) if e.len() == 2));
    }
}
