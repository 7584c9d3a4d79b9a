//! Records attached anywhere in a subtree, and the reverse walk from records
//! to their ancestors at one level.
//!
//! A query holds one clause per kind: the node itself plus the cached
//! descendant ids of every deeper kind. Callers narrow it and execute it
//! against the store.

use crate::cache::Lookup;
use crate::db::GeoStore;
use crate::geography::{DescendantResolvable, Id, Kind, NodeRef};
use crate::records::{DateRange, Plan, Report, Story};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Per-kind id lists a record target must fall in.
#[derive(Debug, Clone)]
pub struct TargetClauses {
    root: NodeRef,
    clauses: Vec<(Kind, Arc<[Id]>)>,
}

impl TargetClauses {
    pub fn for_node<N: DescendantResolvable>(lookup: &mut Lookup<'_>, node: N) -> Self {
        let root = node.subtree_root();
        let mut clauses: Vec<(Kind, Arc<[Id]>)> = vec![(root.kind, Arc::from(vec![root.id]))];
        clauses.extend(lookup.all_descendants(root));
        Self { root, clauses }
    }

    pub fn root(&self) -> NodeRef {
        self.root
    }

    pub fn clauses(&self) -> &[(Kind, Arc<[Id]>)] {
        &self.clauses
    }

    /// Descendant lists are ascending, so membership is a binary search.
    pub fn contains(&self, target: NodeRef) -> bool {
        self.clauses
            .iter()
            .any(|(kind, ids)| *kind == target.kind && ids.binary_search(&target.id).is_ok())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReportTotals {
    pub reports: usize,
    pub distributed: u64,
    pub checked: u64,
    pub people: u64,
    pub households: u64,
    pub hours: f64,
}

/// Reports on a node or anywhere below it.
#[derive(Debug, Clone)]
pub struct ReportQuery {
    targets: TargetClauses,
    range: Option<DateRange>,
    technology: Option<Id>,
    contract: Option<Id>,
}

impl ReportQuery {
    pub fn new(targets: TargetClauses) -> Self {
        Self {
            targets,
            range: None,
            technology: None,
            contract: None,
        }
    }

    /// Only reports dated inside `range`.
    pub fn within(mut self, range: DateRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn technology(mut self, technology_id: Id) -> Self {
        self.technology = Some(technology_id);
        self
    }

    pub fn contract(mut self, contract_id: Id) -> Self {
        self.contract = Some(contract_id);
        self
    }

    pub fn targets(&self) -> &TargetClauses {
        &self.targets
    }

    pub fn matches(&self, report: &Report) -> bool {
        self.targets.contains(report.target)
            && self.range.is_none_or(|range| range.contains(report.date))
            && self.technology.is_none_or(|id| report.technology_id == id)
            && self
                .contract
                .is_none_or(|id| report.contract_id == Some(id))
    }

    /// Matching reports in id order.
    pub fn execute<'s>(&self, store: &'s GeoStore) -> Vec<&'s Report> {
        store.reports().filter(|r| self.matches(r)).collect()
    }

    pub fn count(&self, store: &GeoStore) -> usize {
        store.reports().filter(|r| self.matches(r)).count()
    }

    pub fn ids(&self, store: &GeoStore) -> BTreeSet<Id> {
        store
            .reports()
            .filter(|r| self.matches(r))
            .map(|r| r.id)
            .collect()
    }

    pub fn totals(&self, store: &GeoStore) -> ReportTotals {
        store
            .reports()
            .filter(|r| self.matches(r))
            .fold(ReportTotals::default(), |mut acc, r| {
                acc.reports += 1;
                acc.distributed += r.distributed.unwrap_or(0);
                acc.checked += r.checked.unwrap_or(0);
                acc.people += r.people.unwrap_or(0);
                acc.households += r.households.unwrap_or(0);
                acc.hours += r.hours.unwrap_or(0.0);
                acc
            })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanTotals {
    pub plans: usize,
    pub goal: u64,
    pub people_goal: u64,
}

/// Plans on a node or anywhere below it.
#[derive(Debug, Clone)]
pub struct PlanQuery {
    targets: TargetClauses,
    range: Option<DateRange>,
    technology: Option<Id>,
    contract: Option<Id>,
}

impl PlanQuery {
    pub fn new(targets: TargetClauses) -> Self {
        Self {
            targets,
            range: None,
            technology: None,
            contract: None,
        }
    }

    /// Only plans whose contract span overlaps `range`.
    pub fn within(mut self, range: DateRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn technology(mut self, technology_id: Id) -> Self {
        self.technology = Some(technology_id);
        self
    }

    pub fn contract(mut self, contract_id: Id) -> Self {
        self.contract = Some(contract_id);
        self
    }

    pub fn targets(&self) -> &TargetClauses {
        &self.targets
    }

    pub fn matches(&self, store: &GeoStore, plan: &Plan) -> bool {
        if !self.targets.contains(plan.target)
            || self.technology.is_some_and(|id| plan.technology_id != id)
            || self.contract.is_some_and(|id| plan.contract_id != id)
        {
            return false;
        }

        match self.range {
            None => true,
            Some(range) => store
                .contract(plan.contract_id)
                .is_ok_and(|contract| contract.span().overlaps(&range)),
        }
    }

    pub fn execute<'s>(&self, store: &'s GeoStore) -> Vec<&'s Plan> {
        store.plans().filter(|p| self.matches(store, p)).collect()
    }

    pub fn count(&self, store: &GeoStore) -> usize {
        store.plans().filter(|p| self.matches(store, p)).count()
    }

    pub fn ids(&self, store: &GeoStore) -> BTreeSet<Id> {
        store
            .plans()
            .filter(|p| self.matches(store, p))
            .map(|p| p.id)
            .collect()
    }

    pub fn totals(&self, store: &GeoStore) -> PlanTotals {
        store
            .plans()
            .filter(|p| self.matches(store, p))
            .fold(PlanTotals::default(), |mut acc, p| {
                acc.plans += 1;
                acc.goal += p.goal;
                acc.people_goal += p.people_goal.unwrap_or(0);
                acc
            })
    }
}

/// Stories whose report falls in a [`ReportQuery`].
#[derive(Debug, Clone)]
pub struct StoryQuery {
    reports: ReportQuery,
}

impl StoryQuery {
    pub fn new(reports: ReportQuery) -> Self {
        Self { reports }
    }

    /// Narrows by the owning report's date.
    pub fn within(mut self, range: DateRange) -> Self {
        self.reports = self.reports.within(range);
        self
    }

    pub fn reports(&self) -> &ReportQuery {
        &self.reports
    }

    pub fn execute<'s>(&self, store: &'s GeoStore) -> Vec<&'s Story> {
        let report_ids = self.reports.ids(store);
        store
            .stories()
            .filter(|s| report_ids.contains(&s.report_id))
            .collect()
    }

    pub fn count(&self, store: &GeoStore) -> usize {
        self.execute(store).len()
    }

    pub fn ids(&self, store: &GeoStore) -> BTreeSet<Id> {
        self.execute(store).into_iter().map(|s| s.id).collect()
    }
}

pub fn related_reports<N: DescendantResolvable>(lookup: &mut Lookup<'_>, node: N) -> ReportQuery {
    ReportQuery::new(TargetClauses::for_node(lookup, node))
}

pub fn related_plans<N: DescendantResolvable>(lookup: &mut Lookup<'_>, node: N) -> PlanQuery {
    PlanQuery::new(TargetClauses::for_node(lookup, node))
}

pub fn related_stories<N: DescendantResolvable>(lookup: &mut Lookup<'_>, node: N) -> StoryQuery {
    StoryQuery::new(related_reports(lookup, node))
}

/// Ids of the `level` nodes that contain at least one of `targets`.
///
/// Walks up from the deepest kind present, one bulk parent lookup per hop,
/// merging targets met on the way. Targets shallower than `level` are
/// ignored, and dangling parent links simply drop out.
pub fn ancestors_at(store: &GeoStore, targets: &[NodeRef], level: Kind) -> BTreeSet<Id> {
    let mut by_kind: BTreeMap<Kind, BTreeSet<Id>> = BTreeMap::new();
    for target in targets {
        if target.kind == level || target.kind.is_deeper_than(level) {
            by_kind.entry(target.kind).or_default().insert(target.id);
        }
    }

    let Some(deepest) = by_kind.keys().next_back().copied() else {
        return BTreeSet::new();
    };

    let mut kind = deepest;
    let mut frontier = by_kind.remove(&kind).unwrap_or_default();
    while kind != level {
        let Some(parent) = kind.parent() else {
            break;
        };
        frontier = store.parent_ids_of(kind, &frontier);
        kind = parent;
        if let Some(own) = by_kind.remove(&kind) {
            frontier.extend(own);
        }
    }
    frontier
}
