//! Geography tree types.
//!
//! The tree is a strict chain of six kinds. Everything that depends on the
//! shape of the chain (parent/child kind, depth, route segment) is derived
//! from [`Kind`] so that node behaviour is written once for every level.

use crate::error::{GeoError, Result};
use geo::Point;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;

/// Row identifier. Ids are allocated per table, so the same id can exist
/// under several kinds; pair it with a [`Kind`] through [`NodeRef`].
pub type Id = u64;

/// Maximum depth of the chain (Facility).
pub const MAX_DEPTH: usize = 5;

/// Level of a geography node, root first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    Country,
    District,
    Sector,
    Cell,
    Village,
    Facility,
}

impl Kind {
    pub const ALL: [Kind; 6] = [
        Kind::Country,
        Kind::District,
        Kind::Sector,
        Kind::Cell,
        Kind::Village,
        Kind::Facility,
    ];

    /// Number of ancestors a node of this kind has.
    pub const fn depth(self) -> usize {
        match self {
            Kind::Country => 0,
            Kind::District => 1,
            Kind::Sector => 2,
            Kind::Cell => 3,
            Kind::Village => 4,
            Kind::Facility => 5,
        }
    }

    pub fn from_depth(depth: usize) -> Option<Kind> {
        Self::ALL.get(depth).copied()
    }

    pub fn parent(self) -> Option<Kind> {
        self.depth().checked_sub(1).and_then(Self::from_depth)
    }

    pub fn child(self) -> Option<Kind> {
        Self::from_depth(self.depth() + 1)
    }

    pub fn is_root(self) -> bool {
        self.depth() == 0
    }

    /// Kinds strictly below this one, nearest first.
    pub fn descendants(self) -> impl Iterator<Item = Kind> {
        Self::ALL.into_iter().skip(self.depth() + 1)
    }

    /// Kinds strictly above this one, root first.
    pub fn ancestors(self) -> impl Iterator<Item = Kind> {
        Self::ALL.into_iter().take(self.depth())
    }

    pub fn is_deeper_than(self, other: Kind) -> bool {
        self.depth() > other.depth()
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Kind::Country => "country",
            Kind::District => "district",
            Kind::Sector => "sector",
            Kind::Cell => "cell",
            Kind::Village => "village",
            Kind::Facility => "facility",
        }
    }

    /// Route segment used in hierarchy links.
    pub const fn plural(self) -> &'static str {
        match self {
            Kind::Country => "countries",
            Kind::District => "districts",
            Kind::Sector => "sectors",
            Kind::Cell => "cells",
            Kind::Village => "villages",
            Kind::Facility => "facilities",
        }
    }

    const fn title(self) -> &'static str {
        match self {
            Kind::Country => "Country",
            Kind::District => "District",
            Kind::Sector => "Sector",
            Kind::Cell => "Cell",
            Kind::Village => "Village",
            Kind::Facility => "Facility",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.title())
    }
}

impl FromStr for Kind {
    type Err = GeoError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        Kind::ALL
            .into_iter()
            .find(|k| k.as_str() == lowered || k.plural() == lowered)
            .ok_or_else(|| GeoError::Other(format!("Unknown geography kind '{}'", s)))
    }
}

/// Tagged reference to a node of any kind: the polymorphic target of a
/// Report or Plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeRef {
    pub kind: Kind,
    pub id: Id,
}

impl NodeRef {
    pub const fn new(kind: Kind, id: Id) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// Link rendered for a node in breadcrumbs, e.g. `/sectors/12`.
pub fn path_for(node: NodeRef) -> String {
    format!("/{}/{}", node.kind.plural(), node.id)
}

/// One ancestor in a hierarchy snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyEntry {
    pub parent_id: Id,
    pub parent_name: String,
    pub parent_type: Kind,
    pub link: String,
}

impl HierarchyEntry {
    pub fn for_node(node: &GeographyNode) -> Self {
        Self {
            parent_id: node.id,
            parent_name: node.name.clone(),
            parent_type: node.kind,
            link: path_for(node.node_ref()),
        }
    }

    pub fn node_ref(&self) -> NodeRef {
        NodeRef::new(self.parent_type, self.parent_id)
    }
}

/// Ancestor path from the root to the immediate parent.
///
/// Stored as a JSON array wherever it is persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hierarchy(SmallVec<[HierarchyEntry; MAX_DEPTH]>);

impl Hierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// The hierarchy a child of `parent` should carry.
    pub fn below(parent: &GeographyNode) -> Self {
        let mut entries = parent.hierarchy.0.clone();
        entries.push(HierarchyEntry::for_node(parent));
        Self(entries)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The immediate parent.
    pub fn last(&self) -> Option<&HierarchyEntry> {
        self.0.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HierarchyEntry> {
        self.0.iter()
    }

    pub fn entry_for(&self, kind: Kind) -> Option<&HierarchyEntry> {
        self.0.iter().find(|e| e.parent_type == kind)
    }

    /// Ancestor names joined root first, e.g. `Rwanda > Kigali > Nyarugenge`.
    pub fn breadcrumb(&self, separator: &str) -> String {
        self.0
            .iter()
            .map(|e| e.parent_name.as_str())
            .collect::<Vec<_>>()
            .join(separator)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl FromIterator<HierarchyEntry> for Hierarchy {
    fn from_iter<I: IntoIterator<Item = HierarchyEntry>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A node in the geography tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeographyNode {
    pub id: Id,
    pub kind: Kind,
    pub name: String,
    pub gis_code: Option<String>,
    pub location: Option<Point<f64>>,
    pub population: Option<u64>,
    pub households: Option<u64>,
    pub hidden: bool,
    pub parent_id: Option<Id>,
    #[serde(default)]
    pub hierarchy: Hierarchy,
}

impl GeographyNode {
    pub fn node_ref(&self) -> NodeRef {
        NodeRef::new(self.kind, self.id)
    }

    pub fn parent_ref(&self) -> Option<NodeRef> {
        self.kind
            .parent()
            .zip(self.parent_id)
            .map(|(kind, id)| NodeRef::new(kind, id))
    }

    pub fn depth(&self) -> usize {
        self.kind.depth()
    }

    pub fn latitude(&self) -> Option<f64> {
        self.location.map(|p| p.y())
    }

    pub fn longitude(&self) -> Option<f64> {
        self.location.map(|p| p.x())
    }

    /// `Kiyovu Cell`
    pub fn display_name(&self) -> String {
        format!("{} {}", self.name, self.kind)
    }
}

/// Shared access to a stored hierarchy snapshot.
pub trait HierarchyBearing {
    fn hierarchy(&self) -> &Hierarchy;

    fn set_hierarchy(&mut self, hierarchy: Hierarchy);

    fn breadcrumb(&self) -> String {
        self.hierarchy().breadcrumb(" > ")
    }
}

impl HierarchyBearing for GeographyNode {
    fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    fn set_hierarchy(&mut self, hierarchy: Hierarchy) {
        self.hierarchy = hierarchy;
    }
}

/// Anything that identifies a subtree root for descendant lookups.
pub trait DescendantResolvable {
    fn subtree_root(&self) -> NodeRef;
}

impl DescendantResolvable for NodeRef {
    fn subtree_root(&self) -> NodeRef {
        *self
    }
}

impl DescendantResolvable for GeographyNode {
    fn subtree_root(&self) -> NodeRef {
        self.node_ref()
    }
}

impl<T: DescendantResolvable + ?Sized> DescendantResolvable for &T {
    fn subtree_root(&self) -> NodeRef {
        (**self).subtree_root()
    }
}

/// Attributes for a node that does not exist yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    pub kind: Kind,
    pub name: String,
    pub parent_id: Option<Id>,
    pub gis_code: Option<String>,
    pub location: Option<Point<f64>>,
    pub population: Option<u64>,
    pub households: Option<u64>,
    pub hidden: bool,
}

impl NewNode {
    pub fn new(kind: Kind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            parent_id: None,
            gis_code: None,
            location: None,
            population: None,
            households: None,
            hidden: false,
        }
    }

    pub fn parent(mut self, parent_id: Id) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn gis_code(mut self, code: impl Into<String>) -> Self {
        self.gis_code = Some(code.into());
        self
    }

    pub fn location(mut self, latitude: f64, longitude: f64) -> Self {
        self.location = Some(Point::new(longitude, latitude));
        self
    }

    pub fn population(mut self, population: u64) -> Self {
        self.population = Some(population);
        self
    }

    pub fn households(mut self, households: u64) -> Self {
        self.households = Some(households);
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }
}

/// Partial update of a node. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeUpdate {
    pub name: Option<String>,
    pub gis_code: Option<Option<String>>,
    pub location: Option<Option<Point<f64>>>,
    pub population: Option<Option<u64>>,
    pub households: Option<Option<u64>>,
    pub parent_id: Option<Id>,
    pub hidden: Option<bool>,
}

impl NodeUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn gis_code(mut self, code: Option<String>) -> Self {
        self.gis_code = Some(code);
        self
    }

    pub fn location(mut self, latitude: f64, longitude: f64) -> Self {
        self.location = Some(Some(Point::new(longitude, latitude)));
        self
    }

    pub fn population(mut self, population: Option<u64>) -> Self {
        self.population = Some(population);
        self
    }

    pub fn households(mut self, households: Option<u64>) -> Self {
        self.households = Some(households);
        self
    }

    pub fn parent(mut self, parent_id: Id) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = Some(hidden);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(kind: Kind, id: Id, name: &str, parent: Option<&GeographyNode>) -> GeographyNode {
        GeographyNode {
            id,
            kind,
            name: name.to_string(),
            gis_code: None,
            location: None,
            population: None,
            households: None,
            hidden: false,
            parent_id: parent.map(|p| p.id),
            hierarchy: parent.map(Hierarchy::below).unwrap_or_default(),
        }
    }

    #[test]
    fn test_kind_chain() {
        assert_eq!(Kind::Country.parent(), None);
        assert_eq!(Kind::Sector.parent(), Some(Kind::District));
        assert_eq!(Kind::Village.child(), Some(Kind::Facility));
        assert_eq!(Kind::Facility.child(), None);
        assert_eq!(Kind::Facility.depth(), MAX_DEPTH);

        let below_sector: Vec<_> = Kind::Sector.descendants().collect();
        assert_eq!(below_sector, vec![Kind::Cell, Kind::Village, Kind::Facility]);

        let above_cell: Vec<_> = Kind::Cell.ancestors().collect();
        assert_eq!(above_cell, vec![Kind::Country, Kind::District, Kind::Sector]);
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("sectors".parse::<Kind>().unwrap(), Kind::Sector);
        assert_eq!("Village".parse::<Kind>().unwrap(), Kind::Village);
        assert!("province".parse::<Kind>().is_err());
    }

    #[test]
    fn test_hierarchy_below_parent() {
        let rwanda = node(Kind::Country, 1, "Rwanda", None);
        let kigali = node(Kind::District, 4, "Kigali", Some(&rwanda));
        let nyarugenge = node(Kind::Sector, 9, "Nyarugenge", Some(&kigali));

        assert!(rwanda.hierarchy.is_empty());
        assert_eq!(nyarugenge.hierarchy.len(), nyarugenge.depth());

        let last = nyarugenge.hierarchy.last().unwrap();
        assert_eq!(last.parent_id, 4);
        assert_eq!(last.parent_type, Kind::District);
        assert_eq!(last.link, "/districts/4");
        assert_eq!(nyarugenge.breadcrumb(), "Rwanda > Kigali");
        assert_eq!(
            nyarugenge.hierarchy.entry_for(Kind::Country).unwrap().parent_id,
            1
        );
    }

    #[test]
    fn test_hierarchy_json_is_an_array() {
        let rwanda = node(Kind::Country, 1, "Rwanda", None);
        let kigali = node(Kind::District, 2, "Kigali", Some(&rwanda));

        let json = kigali.hierarchy.to_json().unwrap();
        assert!(json.starts_with('['));
        assert!(json.contains("\"parent_type\":\"Country\""));
        assert_eq!(Hierarchy::from_json(&json).unwrap(), kigali.hierarchy);
    }

    #[test]
    fn test_parent_ref_and_location() {
        let rwanda = node(Kind::Country, 1, "Rwanda", None);
        let mut kigali = node(Kind::District, 2, "Kigali", Some(&rwanda));
        kigali.location = Some(Point::new(30.06, -1.95));

        assert_eq!(rwanda.parent_ref(), None);
        assert_eq!(kigali.parent_ref(), Some(NodeRef::new(Kind::Country, 1)));
        assert_eq!(kigali.latitude(), Some(-1.95));
        assert_eq!(kigali.longitude(), Some(30.06));
        assert_eq!(kigali.display_name(), "Kigali District");
    }
}
