//! Snapshot persistence for the record store.
//!
//! The whole store is written as one JSON document. Hierarchy snapshots keep
//! their JSON array form inside it. Writes go to a temp file that atomically
//! replaces the previous snapshot.

use crate::db::GeoStore;
use crate::db::internal::Tables;
use crate::error::{GeoError, Result};
use crate::geography::{GeographyNode, Kind};
use crate::records::{Contract, Plan, Report, Story, Technology};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const SNAPSHOT_FORMAT: &str = "liters-geo-snapshot";
const SNAPSHOT_VERSION: u8 = 1;

#[derive(Debug, Clone, Default)]
pub struct SnapshotConfig {
    pub auto_snapshot_ops: Option<usize>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotDocument {
    format: String,
    version: u8,
    saved_at: u64,
    nodes: Vec<GeographyNode>,
    contracts: Vec<Contract>,
    technologies: Vec<Technology>,
    reports: Vec<Report>,
    plans: Vec<Plan>,
    stories: Vec<Story>,
}

impl SnapshotDocument {
    fn capture(store: &GeoStore) -> Result<Self> {
        let saved_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| GeoError::Other(format!("System clock before epoch: {}", e)))?
            .as_secs();
        let t = &store.tables;

        Ok(Self {
            format: SNAPSHOT_FORMAT.to_string(),
            version: SNAPSHOT_VERSION,
            saved_at,
            nodes: Kind::ALL
                .into_iter()
                .flat_map(|kind| t.table(kind).values().cloned())
                .collect(),
            contracts: t.contracts.values().cloned().collect(),
            technologies: t.technologies.values().cloned().collect(),
            reports: t.reports.values().cloned().collect(),
            plans: t.plans.values().cloned().collect(),
            stories: t.stories.values().cloned().collect(),
        })
    }

    /// Rebuilds tables as stored. Parent links are not re-validated here; a
    /// hierarchy rebuild reports any that are dangling.
    fn restore(self) -> Result<GeoStore> {
        if self.format != SNAPSHOT_FORMAT || self.version != SNAPSHOT_VERSION {
            return Err(GeoError::InvalidFormat);
        }

        let mut tables = Tables::default();
        for node in self.nodes {
            tables.table_mut(node.kind).insert(node.id, node);
        }
        tables.contracts = self.contracts.into_iter().map(|c| (c.id, c)).collect();
        tables.technologies = self.technologies.into_iter().map(|t| (t.id, t)).collect();
        tables.reports = self.reports.into_iter().map(|r| (r.id, r)).collect();
        tables.plans = self.plans.into_iter().map(|p| (p.id, p)).collect();
        tables.stories = self.stories.into_iter().map(|s| (s.id, s)).collect();
        tables.reseed_sequences();

        Ok(GeoStore { tables })
    }
}

pub struct SnapshotFile {
    path: PathBuf,
    config: SnapshotConfig,
    ops_since_snapshot: usize,
}

impl SnapshotFile {
    pub fn new<P: AsRef<Path>>(path: P, config: SnapshotConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config,
            ops_since_snapshot: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Loads the stored state, or an empty store when there is no snapshot.
    pub fn load(&self) -> Result<GeoStore> {
        if !self.exists() {
            return Ok(GeoStore::new());
        }

        let file = File::open(&self.path)?;
        if file.metadata()?.len() == 0 {
            return Ok(GeoStore::new());
        }

        let document: SnapshotDocument = serde_json::from_reader(BufReader::new(file))?;
        let store = document.restore()?;
        log::info!(
            "Loaded snapshot {:?}: {} nodes",
            self.path,
            store.stats().nodes.iter().sum::<usize>()
        );
        Ok(store)
    }

    pub fn save(&mut self, store: &GeoStore) -> Result<()> {
        let temp_path = self.temp_path();

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &SnapshotDocument::capture(store)?)?;

        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&temp_path, &self.path)?;

        self.ops_since_snapshot = 0;
        log::debug!("Saved snapshot to {:?}", self.path);

        Ok(())
    }

    pub fn record_operation(&mut self) {
        self.ops_since_snapshot += 1;
    }

    /// Writes counted since the last successful save.
    pub fn pending_operations(&self) -> usize {
        self.ops_since_snapshot
    }

    pub fn should_snapshot(&self) -> bool {
        self.config
            .auto_snapshot_ops
            .is_some_and(|threshold| self.ops_since_snapshot >= threshold)
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        if let Some(name) = temp.file_name() {
            let mut new_name = name.to_string_lossy().into_owned();
            new_name.push_str(".tmp");
            temp.set_file_name(new_name);
        }
        temp
    }
}
