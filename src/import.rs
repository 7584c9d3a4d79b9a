//! Bulk CSV import of geography nodes.
//!
//! One file holds rows of a single kind. Rows are create-or-find on
//! `(name, gis_code)`. A row's parent is the node one level up whose geocode
//! is this row's geocode minus its last segment.

use crate::db::GeoStore;
use crate::error::{GeoError, Result};
use crate::geography::{Kind, NewNode, NodeRef};
use crate::types::Config;
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Deserialize;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

#[derive(Debug, Deserialize)]
struct ImportRow {
    name: String,
    gis_code: String,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    population: Option<u64>,
    #[serde(default)]
    households: Option<u64>,
}

/// A row that could not be imported. `line` is 1-based and counts the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub line: u64,
    pub message: String,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub kind: Kind,
    pub created: Vec<NodeRef>,
    pub existing: usize,
    pub errors: Vec<RowError>,
}

impl ImportSummary {
    fn new(kind: Kind) -> Self {
        Self {
            kind,
            created: Vec::new(),
            existing: 0,
            errors: Vec::new(),
        }
    }

    pub fn created_count(&self) -> usize {
        self.created.len()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn message(&self) -> String {
        format!("{} records created.", self.created.len())
    }
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Imports `kind` rows from the CSV file at `path`.
pub fn import_path<P: AsRef<Path>>(
    store: &mut GeoStore,
    kind: Kind,
    path: P,
    config: &Config,
) -> Result<ImportSummary> {
    let file = File::open(path.as_ref())?;
    log::info!("Importing {} rows from {:?}", kind, path.as_ref());
    import_reader(store, kind, BufReader::new(file), config)
}

/// Imports `kind` rows from any CSV source.
///
/// Row problems are collected in the summary and never abort the import. A
/// missing header is an error for the whole file.
pub fn import_reader<R: Read>(
    store: &mut GeoStore,
    kind: Kind,
    reader: R,
    config: &Config,
) -> Result<ImportSummary> {
    let mut rows = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    let headers = rows.headers()?.clone();
    for required in ["name", "gis_code"] {
        if !headers.iter().any(|h| h == required) {
            return Err(GeoError::Other(format!(
                "CSV header is missing the '{}' column",
                required
            )));
        }
    }

    let importer = RowImporter {
        kind,
        segment_width: config.geocode_segment_width,
        headers,
    };

    let summary = store.transaction(|s| {
        let mut summary = ImportSummary::new(kind);
        for (index, record) in rows.records().enumerate() {
            let line = index as u64 + 2;
            let outcome = record
                .map_err(GeoError::from)
                .and_then(|record| importer.apply(s, &record));
            match outcome {
                Ok(Some(created)) => summary.created.push(created),
                Ok(None) => summary.existing += 1,
                Err(e) => {
                    log::warn!("Skipping {} row on line {}: {}", kind, line, e);
                    summary.errors.push(RowError {
                        line,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(summary)
    })?;

    log::info!(
        "{} ({} existing, {} rejected)",
        summary.message(),
        summary.existing,
        summary.errors.len()
    );
    Ok(summary)
}

struct RowImporter {
    kind: Kind,
    segment_width: usize,
    headers: StringRecord,
}

impl RowImporter {
    /// `Some` with the new node, or `None` when the row already exists.
    fn apply(&self, store: &mut GeoStore, record: &StringRecord) -> Result<Option<NodeRef>> {
        let row: ImportRow = record.deserialize(Some(&self.headers))?;
        let code = row.gis_code.trim();
        let name = row.name.trim();

        if !name.is_empty()
            && !code.is_empty()
            && store.find_by_name_and_code(self.kind, name, code).is_some()
        {
            return Ok(None);
        }

        let mut new = NewNode::new(self.kind, name).gis_code(code);
        if !code.is_empty() {
            new.parent_id = self.parent_id(store, code)?;
        }
        if let (Some(lat), Some(lon)) = (row.latitude, row.longitude) {
            new = new.location(lat, lon);
        }
        new.population = row.population;
        new.households = row.households;

        store.insert_node(new).map(Some)
    }

    fn parent_id(&self, store: &GeoStore, code: &str) -> Result<Option<u64>> {
        let expected = (self.kind.depth() + 1) * self.segment_width;
        let length = code.chars().count();
        if length != expected {
            return Err(GeoError::InvalidGeocode {
                kind: self.kind,
                code: code.to_string(),
                reason: format!("expected {} characters, got {}", expected, length),
            });
        }

        let Some(parent_kind) = self.kind.parent() else {
            return Ok(None);
        };
        let cut = code
            .char_indices()
            .nth(length - self.segment_width)
            .map_or(code.len(), |(i, _)| i);
        let parent_code = &code[..cut];

        match store.find_by_gis_code(parent_kind, parent_code) {
            Some(parent) => Ok(Some(parent.id)),
            None => Err(GeoError::InvalidGeocode {
                kind: self.kind,
                code: code.to_string(),
                reason: format!("no {} with geocode '{}'", parent_kind, parent_code),
            }),
        }
    }
}
