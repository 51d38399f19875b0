//! Core record and configuration types for the spatial index.

use crate::error::{GeodexError, Result};
use bytes::Bytes;
use geo::{BoundingRect, Geometry, Rect};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding rectangle in the canonical spatial reference.
///
/// Invariant: `min_x <= max_x` and `min_y <= max_y`, enforced at
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    /// Create an envelope, validating coordinate order.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if min > max for either axis.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Result<Self> {
        if min_x > max_x {
            return Err(GeodexError::InvalidInput(format!(
                "min_x ({}) must be <= max_x ({})",
                min_x, max_x
            )));
        }
        if min_y > max_y {
            return Err(GeodexError::InvalidInput(format!(
                "min_y ({}) must be <= max_y ({})",
                min_y, max_y
            )));
        }
        Ok(Self {
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }

    /// Envelope of a geometry, or `None` for an empty geometry.
    pub fn of(geometry: &Geometry<f64>) -> Option<Self> {
        geometry.bounding_rect().map(Self::from_rect)
    }

    /// Convert from a `geo::Rect`, which already guarantees ordering.
    pub fn from_rect(rect: Rect<f64>) -> Self {
        Self {
            min_x: rect.min().x,
            min_y: rect.min().y,
            max_x: rect.max().x,
            max_y: rect.max().y,
        }
    }

    /// Whether two envelopes share at least one point (boundaries count).
    pub fn intersects(&self, other: &Envelope) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    /// Whether two envelopes share no point.
    pub fn is_disjoint(&self, other: &Envelope) -> bool {
        !self.intersects(other)
    }
}

/// One persisted row per indexed geometry-bearing fragment.
///
/// The stored geometry is always encoded in the canonical SRS; `srs` retains
/// the fragment's declared reference for provenance only.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialRecord {
    /// Collection path plus document identity; stable for the document's lifetime.
    pub document_key: String,
    /// Identifier of the fragment's root node, unique within a document.
    pub node_id: u64,
    /// Bounding envelope in the canonical SRS.
    pub envelope: Envelope,
    /// Canonical-SRS geometry, WKB-encoded.
    pub geometry: Bytes,
    /// Original spatial reference identifier of the source fragment.
    pub srs: String,
}

/// A query hit: the node a matching record was extracted from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeMatch {
    pub document_key: String,
    pub node_id: u64,
}

/// Index worker configuration.
///
/// Serializable so hosts can load it from JSON alongside their own
/// configuration.
///
/// # Example
///
/// ```rust
/// use geodex::IndexConfig;
///
/// let json = r#"{
///     "canonical_srs": "EPSG:4326",
///     "max_idle_connections": 2
/// }"#;
/// let config: IndexConfig = serde_json::from_str(json).unwrap();
/// assert_eq!(config.busy_timeout_ms, 5000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Spatial reference all stored geometries are normalized to.
    #[serde(default = "IndexConfig::default_canonical_srs")]
    pub canonical_srs: String,

    /// Upper bound on pooled idle connections kept open between calls.
    #[serde(default = "IndexConfig::default_max_idle_connections")]
    pub max_idle_connections: usize,

    /// SQLite busy timeout applied to every pooled connection.
    #[serde(default = "IndexConfig::default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl IndexConfig {
    fn default_canonical_srs() -> String {
        crate::transform::DEFAULT_CANONICAL_SRS.to_string()
    }

    const fn default_max_idle_connections() -> usize {
        4
    }

    const fn default_busy_timeout_ms() -> u64 {
        5000
    }

    pub fn with_canonical_srs<S: Into<String>>(mut self, srs: S) -> Self {
        self.canonical_srs = srs.into();
        self
    }

    /// Zero disables idle pooling: every call opens a fresh connection and
    /// closes it on release.
    pub fn with_max_idle_connections(mut self, max: usize) -> Self {
        self.max_idle_connections = max;
        self
    }

    pub fn with_busy_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.busy_timeout_ms = timeout_ms;
        self
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            canonical_srs: Self::default_canonical_srs(),
            max_idle_connections: Self::default_max_idle_connections(),
            busy_timeout_ms: Self::default_busy_timeout_ms(),
        }
    }
}
