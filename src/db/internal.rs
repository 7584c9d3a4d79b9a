//! Table storage, id allocation and record validation.

use crate::error::ValidationErrors;
use crate::geography::{GeographyNode, Id, Kind, NewNode, NodeRef};
use crate::records::{Contract, NewContract, NewTechnology, Plan, Report, Story, Technology};
use geo::Point;
use std::collections::BTreeMap;

/// Every table of the store. Cloned wholesale to checkpoint a transaction.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    pub nodes: [BTreeMap<Id, GeographyNode>; 6],
    pub reports: BTreeMap<Id, Report>,
    pub plans: BTreeMap<Id, Plan>,
    pub stories: BTreeMap<Id, Story>,
    pub contracts: BTreeMap<Id, Contract>,
    pub technologies: BTreeMap<Id, Technology>,
    pub sequences: Sequences,
}

/// Next free id per table.
#[derive(Debug, Clone)]
pub(crate) struct Sequences {
    pub nodes: [Id; 6],
    pub reports: Id,
    pub plans: Id,
    pub stories: Id,
    pub contracts: Id,
    pub technologies: Id,
}

impl Default for Sequences {
    fn default() -> Self {
        Self {
            nodes: [1; 6],
            reports: 1,
            plans: 1,
            stories: 1,
            contracts: 1,
            technologies: 1,
        }
    }
}

fn bump(seq: &mut Id) -> Id {
    let id = *seq;
    *seq += 1;
    id
}

fn next_after<V>(table: &BTreeMap<Id, V>) -> Id {
    table.keys().next_back().map_or(1, |max| max + 1)
}

impl Tables {
    pub fn table(&self, kind: Kind) -> &BTreeMap<Id, GeographyNode> {
        &self.nodes[kind.depth()]
    }

    pub fn table_mut(&mut self, kind: Kind) -> &mut BTreeMap<Id, GeographyNode> {
        &mut self.nodes[kind.depth()]
    }

    pub fn node(&self, node: NodeRef) -> Option<&GeographyNode> {
        self.table(node.kind).get(&node.id)
    }

    pub fn node_mut(&mut self, node: NodeRef) -> Option<&mut GeographyNode> {
        self.table_mut(node.kind).get_mut(&node.id)
    }

    pub fn contains(&self, node: NodeRef) -> bool {
        self.table(node.kind).contains_key(&node.id)
    }

    pub fn next_node_id(&mut self, kind: Kind) -> Id {
        bump(&mut self.sequences.nodes[kind.depth()])
    }

    pub fn next_report_id(&mut self) -> Id {
        bump(&mut self.sequences.reports)
    }

    pub fn next_plan_id(&mut self) -> Id {
        bump(&mut self.sequences.plans)
    }

    pub fn next_story_id(&mut self) -> Id {
        bump(&mut self.sequences.stories)
    }

    pub fn next_contract_id(&mut self) -> Id {
        bump(&mut self.sequences.contracts)
    }

    pub fn next_technology_id(&mut self) -> Id {
        bump(&mut self.sequences.technologies)
    }

    /// Resets every sequence past the largest stored id, after a load.
    pub fn reseed_sequences(&mut self) {
        for kind in Kind::ALL {
            self.sequences.nodes[kind.depth()] = next_after(self.table(kind));
        }
        self.sequences.reports = next_after(&self.reports);
        self.sequences.plans = next_after(&self.plans);
        self.sequences.stories = next_after(&self.stories);
        self.sequences.contracts = next_after(&self.contracts);
        self.sequences.technologies = next_after(&self.technologies);
    }

    fn gis_code_taken(&self, kind: Kind, code: &str, except: Option<Id>) -> bool {
        self.table(kind)
            .values()
            .any(|n| Some(n.id) != except && n.gis_code.as_deref() == Some(code))
    }

    /// Checks a new node, or an existing one (`existing`) about to change.
    pub fn validate_node(&self, node: &NewNode, existing: Option<Id>) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        if node.name.trim().is_empty() {
            errors.add("name", "can't be blank");
        }

        if let Some(code) = &node.gis_code {
            if code.trim().is_empty() {
                errors.add("gis_code", "can't be blank");
            } else if self.gis_code_taken(node.kind, code, existing) {
                errors.add("gis_code", "has already been taken");
            }
        }

        match (node.kind.parent(), node.parent_id) {
            (None, Some(_)) => errors.add("parent_id", "must be blank for a Country"),
            (Some(_), None) => errors.add("parent_id", "can't be blank"),
            (Some(parent_kind), Some(parent_id)) => {
                if !self.contains(NodeRef::new(parent_kind, parent_id)) {
                    errors.add(
                        "parent_id",
                        format!("must reference an existing {}", parent_kind),
                    );
                }
            }
            (None, None) => {}
        }

        if let Some(location) = node.location {
            validate_location(location, &mut errors);
        }

        errors
    }

    pub fn validate_contract(&self, contract: &NewContract) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        if contract.name.trim().is_empty() {
            errors.add("name", "can't be blank");
        }
        if contract.end_date < contract.start_date {
            errors.add("end_date", "must be on or after the start date");
        }
        if contract.budget.is_some_and(|b| !b.is_finite() || b < 0.0) {
            errors.add("budget", "must be a non-negative number");
        }

        errors
    }

    pub fn validate_technology(&self, technology: &NewTechnology) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        let name = technology.name.trim();

        if name.is_empty() {
            errors.add("name", "can't be blank");
        } else if self
            .technologies
            .values()
            .any(|t| t.name.eq_ignore_ascii_case(name))
        {
            errors.add("name", "has already been taken");
        }

        for (field, value) in [
            ("default_cost", technology.default_cost),
            ("direct_cost", technology.direct_cost),
            ("indirect_cost", technology.indirect_cost),
        ] {
            if value.is_some_and(|v| !v.is_finite() || v < 0.0) {
                errors.add(field, "must be a non-negative number");
            }
        }

        errors
    }

    /// Shared checks for anything attached to a node through a technology
    /// and (optionally) a contract.
    pub fn validate_attachment(
        &self,
        target: NodeRef,
        technology_id: Id,
        contract_id: Option<Id>,
        errors: &mut ValidationErrors,
    ) {
        if !self.contains(target) {
            errors.add("target", format!("must reference an existing {}", target.kind));
        }
        if !self.technologies.contains_key(&technology_id) {
            errors.add("technology_id", "must reference an existing technology");
        }
        if let Some(contract_id) = contract_id
            && !self.contracts.contains_key(&contract_id)
        {
            errors.add("contract_id", "must reference an existing contract");
        }
    }
}

fn validate_location(location: Point<f64>, errors: &mut ValidationErrors) {
    if !(-90.0..=90.0).contains(&location.y()) {
        errors.add("latitude", "must be between -90 and 90");
    }
    if !(-180.0..=180.0).contains(&location.x()) {
        errors.add("longitude", "must be between -180 and 180");
    }
}
