//! Error types for liters-geo.

use crate::geography::{Id, Kind};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GeoError>;

/// A single field-level validation message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Collected validation failures for one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Messages recorded against `field`.
    pub fn on(&self, field: &str) -> Vec<&str> {
        self.errors
            .iter()
            .filter(|e| e.field == field)
            .map(|e| e.message.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.errors.iter()
    }

    /// `Ok(())` when nothing was recorded, otherwise a validation error.
    pub fn into_result(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(GeoError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .errors
            .iter()
            .map(|e| format!("{} {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}", joined)
    }
}

#[derive(Error, Debug)]
pub enum GeoError {
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("{kind} {id} not found")]
    NodeNotFound { kind: Kind, id: Id },

    #[error("{record} {id} not found")]
    RecordNotFound { record: &'static str, id: Id },

    #[error("Invalid geocode '{code}' for {kind}: {reason}")]
    InvalidGeocode {
        kind: Kind,
        code: String,
        reason: String,
    },

    #[error("Cache backend error: {0}")]
    Cache(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid snapshot format")]
    InvalidFormat,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(String),
}

impl GeoError {
    /// True for failures that belong to one node and should not abort a batch.
    pub fn is_per_node(&self) -> bool {
        matches!(
            self,
            GeoError::NodeNotFound { .. } | GeoError::Validation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_collect_by_field() {
        let mut errors = ValidationErrors::new();
        errors.add("name", "can't be blank");
        errors.add("gis_code", "has already been taken");
        errors.add("name", "is too long");

        assert_eq!(errors.len(), 3);
        assert_eq!(errors.on("name"), vec!["can't be blank", "is too long"]);
        assert!(errors.on("population").is_empty());

        let err = errors.into_result().unwrap_err();
        assert!(err.to_string().contains("gis_code has already been taken"));
    }

    #[test]
    fn test_empty_validation_is_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }

    #[test]
    fn test_not_found_message() {
        let err = GeoError::NodeNotFound {
            kind: Kind::Sector,
            id: 7,
        };
        assert_eq!(err.to_string(), "Sector 7 not found");
        assert!(err.is_per_node());
        assert!(!GeoError::InvalidFormat.is_per_node());
    }
}
