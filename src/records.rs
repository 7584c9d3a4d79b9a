//! Records attached to the geography tree: reports, plans, stories, and the
//! contracts and technologies they reference.

use crate::geography::{Hierarchy, HierarchyBearing, Id, NodeRef};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    /// Builds a range, swapping the bounds if they arrive reversed.
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        if from <= to {
            Self { from, to }
        } else {
            Self { from: to, to: from }
        }
    }

    /// True when `date` falls inside the range, bounds included.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }

    /// True when the two ranges share at least one day.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.from <= other.to && other.from <= self.to
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: Id,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub budget: Option<f64>,
    pub household_goal: Option<u64>,
    pub people_goal: Option<u64>,
}

impl Contract {
    /// Start to end date, inclusive.
    pub fn span(&self) -> DateRange {
        DateRange::new(self.start_date, self.end_date)
    }

    /// True when `today` is inside the contract span.
    pub fn is_current(&self, today: NaiveDate) -> bool {
        self.span().contains(today)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewContract {
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub budget: Option<f64>,
    pub household_goal: Option<u64>,
    pub people_goal: Option<u64>,
}

impl NewContract {
    /// Contract over `start_date..=end_date` without budget or goals.
    pub fn new(name: impl Into<String>, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            name: name.into(),
            start_date,
            end_date,
            budget: None,
            household_goal: None,
            people_goal: None,
        }
    }

    /// Total budget in the contract currency.
    pub fn budget(mut self, budget: f64) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Household and people targets for the whole contract.
    pub fn goals(mut self, households: u64, people: u64) -> Self {
        self.household_goal = Some(households);
        self.people_goal = Some(people);
        self
    }
}

/// Whether a technology serves one family or a whole community.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TechnologyScale {
    #[default]
    Family,
    Community,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Technology {
    pub id: Id,
    pub name: String,
    pub short_name: Option<String>,
    pub scale: TechnologyScale,
    pub default_cost: Option<f64>,
    pub direct_cost: Option<f64>,
    pub indirect_cost: Option<f64>,
    pub people_served: Option<u64>,
    pub liters_per_day: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewTechnology {
    pub name: String,
    pub short_name: Option<String>,
    pub scale: TechnologyScale,
    pub default_cost: Option<f64>,
    pub direct_cost: Option<f64>,
    pub indirect_cost: Option<f64>,
    pub people_served: Option<u64>,
    pub liters_per_day: Option<f64>,
}

impl NewTechnology {
    /// Technology with no costs or impact figures.
    pub fn new(name: impl Into<String>, scale: TechnologyScale) -> Self {
        Self {
            name: name.into(),
            scale,
            ..Self::default()
        }
    }

    /// Abbreviation used in reports, e.g. `SAM3`.
    pub fn short_name(mut self, short_name: impl Into<String>) -> Self {
        self.short_name = Some(short_name.into());
        self
    }

    /// Unit costs.
    ///
    /// # Arguments
    ///
    /// * `default_cost` - Cost quoted when no breakdown is known
    /// * `direct_cost` - Hardware and distribution cost
    /// * `indirect_cost` - Training and follow-up cost
    pub fn costs(mut self, default_cost: f64, direct_cost: f64, indirect_cost: f64) -> Self {
        self.default_cost = Some(default_cost);
        self.direct_cost = Some(direct_cost);
        self.indirect_cost = Some(indirect_cost);
        self
    }

    /// Expected impact of one unit.
    ///
    /// # Arguments
    ///
    /// * `people_served` - People one unit serves
    /// * `liters_per_day` - Clean water one unit produces per day
    pub fn impact(mut self, people_served: u64, liters_per_day: f64) -> Self {
        self.people_served = Some(people_served);
        self.liters_per_day = Some(liters_per_day);
        self
    }
}

/// An actual distribution, check or hours event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: Id,
    pub date: NaiveDate,
    pub technology_id: Id,
    pub contract_id: Option<Id>,
    pub target: NodeRef,
    pub distributed: Option<u64>,
    pub checked: Option<u64>,
    pub people: Option<u64>,
    pub households: Option<u64>,
    pub hours: Option<f64>,
    #[serde(default)]
    pub hierarchy: Hierarchy,
}

impl HierarchyBearing for Report {
    fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    fn set_hierarchy(&mut self, hierarchy: Hierarchy) {
        self.hierarchy = hierarchy;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewReport {
    pub date: NaiveDate,
    pub technology_id: Id,
    pub contract_id: Option<Id>,
    pub target: NodeRef,
    pub distributed: Option<u64>,
    pub checked: Option<u64>,
    pub people: Option<u64>,
    pub households: Option<u64>,
    pub hours: Option<f64>,
}

impl NewReport {
    /// Report on `target` with no counts yet.
    pub fn new(date: NaiveDate, technology_id: Id, target: NodeRef) -> Self {
        Self {
            date,
            technology_id,
            contract_id: None,
            target,
            distributed: None,
            checked: None,
            people: None,
            households: None,
            hours: None,
        }
    }

    /// Attributes the report to a contract.
    pub fn contract(mut self, contract_id: Id) -> Self {
        self.contract_id = Some(contract_id);
        self
    }

    /// Units handed out.
    pub fn distributed(mut self, count: u64) -> Self {
        self.distributed = Some(count);
        self
    }

    /// Units verified in use on a follow-up visit.
    pub fn checked(mut self, count: u64) -> Self {
        self.checked = Some(count);
        self
    }

    pub fn people(mut self, people: u64) -> Self {
        self.people = Some(people);
        self
    }

    pub fn households(mut self, households: u64) -> Self {
        self.households = Some(households);
        self
    }

    /// Volunteer hours. Must be non-negative.
    pub fn hours(mut self, hours: f64) -> Self {
        self.hours = Some(hours);
        self
    }
}

/// A goal for one technology under a contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: Id,
    pub contract_id: Id,
    pub technology_id: Id,
    pub target: NodeRef,
    pub goal: u64,
    pub people_goal: Option<u64>,
    #[serde(default)]
    pub hierarchy: Hierarchy,
}

impl HierarchyBearing for Plan {
    fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    fn set_hierarchy(&mut self, hierarchy: Hierarchy) {
        self.hierarchy = hierarchy;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPlan {
    pub contract_id: Id,
    pub technology_id: Id,
    pub target: NodeRef,
    pub goal: u64,
    pub people_goal: Option<u64>,
}

impl NewPlan {
    /// Goal of `goal` units of a technology on `target` under a contract.
    pub fn new(contract_id: Id, technology_id: Id, target: NodeRef, goal: u64) -> Self {
        Self {
            contract_id,
            technology_id,
            target,
            goal,
            people_goal: None,
        }
    }

    pub fn people_goal(mut self, people_goal: u64) -> Self {
        self.people_goal = Some(people_goal);
        self
    }
}

/// Narrative post about a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: Id,
    pub report_id: Id,
    pub title: String,
    pub text: String,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewStory {
    pub report_id: Id,
    pub title: String,
    pub text: String,
    pub image: Option<String>,
}

impl NewStory {
    /// Story about an existing report.
    pub fn new(report_id: Id, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            report_id,
            title: title.into(),
            text: text.into(),
            image: None,
        }
    }

    /// Path or URL of an attached image.
    pub fn image(mut self, path: impl Into<String>) -> Self {
        self.image = Some(path.into());
        self
    }
}
