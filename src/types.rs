//! Configuration and cache value types.
//!
//! `Config` is serializable so it can be loaded from JSON (or TOML with the
//! `toml` feature) alongside the rest of an application's settings.
use bytes::Bytes;
use serde::de::Error;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Settings for the aggregation services.
///
/// # Example
///
/// ```rust
/// use liters_geo::Config;
///
/// let json = r#"{
///     "cache_ttl_seconds": 600,
///     "geocode_segment_width": 2
/// }"#;
/// let config = Config::from_json(json).unwrap();
/// assert_eq!(config.cache_ttl().unwrap().as_secs(), 600);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Lifetime of descendant-id cache entries in seconds (None keeps them
    /// until invalidated)
    #[serde(default = "Config::default_cache_ttl_seconds")]
    pub cache_ttl_seconds: Option<f64>,

    /// When false every descendant lookup goes straight to the store
    #[serde(default = "Config::default_cache_enabled")]
    pub cache_enabled: bool,

    /// Characters added to a geocode per tree level
    #[serde(default = "Config::default_geocode_segment_width")]
    pub geocode_segment_width: usize,

    /// Save the snapshot after this many mutating operations
    #[serde(default)]
    pub snapshot_auto_ops: Option<usize>,
}

impl Config {
    const fn default_cache_ttl_seconds() -> Option<f64> {
        Some(3600.0)
    }

    const fn default_cache_enabled() -> bool {
        true
    }

    const fn default_geocode_segment_width() -> usize {
        2
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_seconds = Some(ttl.as_secs_f64());
        self
    }

    pub fn without_cache_ttl(mut self) -> Self {
        self.cache_ttl_seconds = None;
        self
    }

    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_geocode_segment_width(mut self, width: usize) -> Self {
        assert!(width > 0, "Geocode segment width must be greater than zero");
        self.geocode_segment_width = width;
        self
    }

    pub fn with_snapshot_auto_ops(mut self, ops: usize) -> Self {
        assert!(ops > 0, "Snapshot interval must be greater than zero");
        self.snapshot_auto_ops = Some(ops);
        self
    }

    /// Cache TTL as a Duration
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_seconds.and_then(|ttl| {
            if ttl.is_finite() && ttl > 0.0 && ttl <= u64::MAX as f64 {
                Some(Duration::from_secs_f64(ttl))
            } else {
                None
            }
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if let Some(ttl) = self.cache_ttl_seconds {
            if !ttl.is_finite() {
                return Err("Cache TTL must be finite (not NaN or infinity)".to_string());
            }
            if ttl <= 0.0 {
                return Err("Cache TTL must be positive".to_string());
            }
            if ttl > u64::MAX as f64 {
                return Err("Cache TTL is too large".to_string());
            }
        }

        if self.geocode_segment_width == 0 {
            return Err("Geocode segment width must be greater than zero".to_string());
        }

        if let Some(ops) = self.snapshot_auto_ops
            && ops == 0
        {
            return Err("Snapshot interval must be greater than zero".to_string());
        }

        Ok(())
    }

    /// Load configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: Config = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(serde_json::Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load configuration from TOML string (requires toml feature)
    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        let config: Config = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as TOML string (requires toml feature)
    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: Self::default_cache_ttl_seconds(),
            cache_enabled: Self::default_cache_enabled(),
            geocode_segment_width: Self::default_geocode_segment_width(),
            snapshot_auto_ops: None,
        }
    }
}

/// Options for setting cache values with optional TTL
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Time-to-live for this item
    pub ttl: Option<Duration>,
    /// Absolute expiration time (takes precedence over TTL)
    pub expires_at: Option<SystemTime>,
}

impl SetOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            expires_at: None,
        }
    }

    /// Get the effective expiration time
    pub fn effective_expires_at(&self) -> Option<SystemTime> {
        self.expires_at
            .or_else(|| self.ttl.map(|ttl| SystemTime::now() + ttl))
    }
}

/// A value held by a cache backend
#[derive(Debug, Clone)]
pub struct CacheItem {
    pub value: Bytes,
    pub created_at: SystemTime,
    /// Expiration time (if any)
    pub expires_at: Option<SystemTime>,
}

impl CacheItem {
    pub fn new(value: impl Into<Bytes>) -> Self {
        Self {
            value: value.into(),
            created_at: SystemTime::now(),
            expires_at: None,
        }
    }

    pub fn with_expiration(value: impl Into<Bytes>, expires_at: SystemTime) -> Self {
        Self {
            value: value.into(),
            created_at: SystemTime::now(),
            expires_at: Some(expires_at),
        }
    }

    pub fn from_options(value: impl Into<Bytes>, opts: Option<&SetOptions>) -> Self {
        match opts.and_then(SetOptions::effective_expires_at) {
            Some(expires_at) => Self::with_expiration(value, expires_at),
            None => Self::new(value),
        }
    }

    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    /// Remaining TTL, zero once expired
    pub fn remaining_ttl(&self) -> Option<Duration> {
        self.expires_at.map(|exp| {
            exp.duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO)
        })
    }
}
