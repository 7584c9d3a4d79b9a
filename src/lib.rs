//! Geography hierarchy aggregation for aid distribution tracking.
//!
//! Countries, Districts, Sectors, Cells, Villages and Facilities form a strict
//! chain. Reports and plans attach to any level; this crate answers "what
//! happened under this node" with cached descendant lookups, keeps the
//! denormalized ancestor paths up to date, and cascades visibility.
//!
//! ```rust
//! use liters_geo::{Atlas, Kind, NewNode, NewReport, NewTechnology, TechnologyScale};
//! use chrono::NaiveDate;
//!
//! let mut atlas = Atlas::memory()?;
//! let rwanda = atlas.create_node(NewNode::new(Kind::Country, "Rwanda"))?;
//! let kigali = atlas.create_node(NewNode::new(Kind::District, "Kigali").parent(rwanda.id))?;
//!
//! let tech = atlas.create_technology(NewTechnology::new("SAM3", TechnologyScale::Family))?;
//! let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
//! atlas.create_report(NewReport::new(day, tech, kigali).distributed(12))?;
//!
//! let totals = atlas.related_reports(rwanda)?.totals(atlas.store());
//! assert_eq!(totals.distributed, 12);
//! # Ok::<(), liters_geo::GeoError>(())
//! ```

pub mod atlas;
pub mod builder;
pub mod cache;
pub mod db;
pub mod error;
pub mod geography;
pub mod hierarchy;
pub mod import;
pub mod namespace;
pub mod persistence;
pub mod records;
pub mod resolver;
pub mod storage;
pub mod types;
pub mod visibility;

pub use atlas::{Atlas, NodeChange};
#[cfg(feature = "sync")]
pub use atlas::sync::SyncAtlas;
pub use builder::AtlasBuilder;
pub use error::{GeoError, Result, ValidationErrors};

pub use geo::Point;

pub use cache::{DescendantCache, Lookup, SharedBackend};
pub use db::{GeoStore, Removed, StoreStats, Transaction};
pub use geography::{
    DescendantResolvable, GeographyNode, Hierarchy, HierarchyBearing, HierarchyEntry, Id, Kind,
    NewNode, NodeRef, NodeUpdate, path_for,
};
pub use hierarchy::{HierarchyFailure, HierarchyReport, Subject};
pub use import::{ImportSummary, RowError};
pub use namespace::Namespace;
pub use persistence::{SnapshotConfig, SnapshotFile};
pub use records::{
    Contract, DateRange, NewContract, NewPlan, NewReport, NewStory, NewTechnology, Plan, Report,
    Story, Technology, TechnologyScale,
};
pub use resolver::{PlanQuery, PlanTotals, ReportQuery, ReportTotals, StoryQuery};
pub use storage::{CacheBackend, CacheOp, CacheStats, MemoryBackend};
pub use types::{CacheItem, Config, SetOptions};
pub use visibility::VisibilityChange;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{Atlas, AtlasBuilder, GeoError, Result};

    pub use crate::{Kind, NewNode, NodeRef, NodeUpdate};

    pub use crate::{DateRange, NewPlan, NewReport, NewStory};

    pub use crate::{CacheBackend, Config, MemoryBackend};

    #[cfg(feature = "sync")]
    pub use crate::SyncAtlas;

    pub use std::time::Duration;
}
