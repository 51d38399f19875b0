//! Coordinate transforms between spatial reference systems.
//!
//! Transforms are pure coordinate functions keyed by the ordered
//! (source, target) pair. Construction goes through an [`SrsAuthority`];
//! constructed transforms are memoized process-wide because building one is
//! not free and the result is immutable.

use crate::error::{GeodexError, Result};
use geo::{Coord, Geometry, MapCoords};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// Spatial reference all stored geometries are normalized to by default.
pub const DEFAULT_CANONICAL_SRS: &str = "EPSG:4326";

/// Spherical web-mercator, the one projected pair the built-in authority knows.
pub const WEB_MERCATOR_SRS: &str = "EPSG:3857";

/// Earth radius of the web-mercator sphere, in meters.
const MERCATOR_RADIUS: f64 = 6_378_137.0;

type CoordFn = dyn Fn(Coord<f64>) -> Coord<f64> + Send + Sync;

/// A reusable coordinate transform between two spatial references.
///
/// Immutable once constructed and cheap to clone; concurrent application is
/// safe. Applying it maps every coordinate of a geometry, which preserves
/// ring structure and closedness (the geometry library rebuilds the shape
/// around the mapped coordinates).
#[derive(Clone)]
pub struct Transform {
    source: String,
    target: String,
    func: Arc<CoordFn>,
}

impl Transform {
    pub fn new<S, T>(source: S, target: T, func: Arc<CoordFn>) -> Self
    where
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            source: source.into(),
            target: target.into(),
            func,
        }
    }

    /// The do-nothing transform for a same-SRS pair.
    pub fn identity(srs: &str) -> Self {
        Self::new(srs, srs, Arc::new(|c| c))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Apply to a single coordinate.
    pub fn apply_coord(&self, coord: Coord<f64>) -> Coord<f64> {
        (self.func)(coord)
    }

    /// Apply to every coordinate of a geometry.
    pub fn apply(&self, geometry: &Geometry<f64>) -> Geometry<f64> {
        geometry.map_coords(|c| (self.func)(c))
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform")
            .field("source", &self.source)
            .field("target", &self.target)
            .finish()
    }
}

/// Resolves an ordered SRS pair to a transform.
///
/// Directionality matters: (A, B) and (B, A) are constructed independently.
pub trait SrsAuthority: Send + Sync {
    /// Construct a transform, or fail with `UnknownSrs` if either identifier
    /// is not resolvable.
    fn construct(&self, source: &str, target: &str) -> Result<Transform>;
}

/// Built-in authority: geographic EPSG:4326 paired with web-mercator
/// EPSG:3857, in both directions.
///
/// Hosts with richer projection needs supply their own [`SrsAuthority`].
#[derive(Debug, Default)]
pub struct EpsgAuthority;

impl EpsgAuthority {
    pub fn new() -> Self {
        Self
    }
}

impl SrsAuthority for EpsgAuthority {
    fn construct(&self, source: &str, target: &str) -> Result<Transform> {
        let src = source.to_ascii_uppercase();
        let dst = target.to_ascii_uppercase();
        match (src.as_str(), dst.as_str()) {
            (DEFAULT_CANONICAL_SRS, WEB_MERCATOR_SRS) => Ok(Transform::new(
                source,
                target,
                Arc::new(geographic_to_mercator),
            )),
            (WEB_MERCATOR_SRS, DEFAULT_CANONICAL_SRS) => Ok(Transform::new(
                source,
                target,
                Arc::new(mercator_to_geographic),
            )),
            _ => Err(GeodexError::UnknownSrs(format!(
                "no transform from {} to {}",
                source, target
            ))),
        }
    }
}

fn geographic_to_mercator(coord: Coord<f64>) -> Coord<f64> {
    let x = coord.x.to_radians() * MERCATOR_RADIUS;
    let y = (std::f64::consts::FRAC_PI_4 + coord.y.to_radians() / 2.0)
        .tan()
        .ln()
        * MERCATOR_RADIUS;
    Coord { x, y }
}

fn mercator_to_geographic(coord: Coord<f64>) -> Coord<f64> {
    let x = (coord.x / MERCATOR_RADIUS).to_degrees();
    let y = (2.0 * (coord.y / MERCATOR_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2)
        .to_degrees();
    Coord { x, y }
}

/// Memoizing cache over an [`SrsAuthority`].
///
/// Reads are lock-shared; population takes the write lock so two callers
/// racing on the same missing pair converge on one cached instance.
pub struct TransformCache {
    authority: Arc<dyn SrsAuthority>,
    cache: RwLock<FxHashMap<(String, String), Transform>>,
}

impl TransformCache {
    pub fn new(authority: Arc<dyn SrsAuthority>) -> Self {
        Self {
            authority,
            cache: RwLock::new(FxHashMap::default()),
        }
    }

    /// Cache over the built-in EPSG authority.
    pub fn with_builtin() -> Self {
        Self::new(Arc::new(EpsgAuthority::new()))
    }

    /// Look up or construct the transform for an ordered SRS pair.
    ///
    /// The same-SRS pair short-circuits to an identity transform without
    /// consulting the authority.
    pub fn get(&self, source: &str, target: &str) -> Result<Transform> {
        if source == target {
            return Ok(Transform::identity(source));
        }

        let key = (source.to_string(), target.to_string());
        if let Some(transform) = self.cache.read().get(&key) {
            return Ok(transform.clone());
        }

        let mut cache = self.cache.write();
        // Another caller may have populated the entry while we waited.
        if let Some(transform) = cache.get(&key) {
            return Ok(transform.clone());
        }
        log::debug!("constructing transform {} -> {}", source, target);
        let transform = self.authority.construct(source, target)?;
        cache.insert(key, transform.clone());
        Ok(transform)
    }

    /// Number of memoized pairs, for tests and diagnostics.
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    /// Drop all memoized transforms.
    pub fn invalidate(&self) {
        self.cache.write().clear();
    }
}

static GLOBAL_CACHE: Lazy<TransformCache> = Lazy::new(TransformCache::with_builtin);

/// Process-wide transform cache over the built-in authority.
pub fn global() -> &'static TransformCache {
    &GLOBAL_CACHE
}
