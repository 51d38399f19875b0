//! Spatial index worker for GML geometries embedded in XML documents.
//!
//! ```rust
//! use geodex::{Fragment, FragmentEvent, IndexWorker, ShapeKind, SpatialOperator};
//! use geo::{Geometry, Point};
//!
//! let worker = IndexWorker::memory()?;
//!
//! let fragment = Fragment::new(1, vec![
//!     FragmentEvent::ShapeStart { kind: ShapeKind::Point, srs: None },
//!     FragmentEvent::Coord { x: -3.75, y: 51.57 },
//!     FragmentEvent::ShapeEnd,
//! ]);
//! worker.store_document("/db/mondial#1", &[fragment])?;
//!
//! let query = Geometry::Point(Point::new(-3.75, 51.57));
//! let hits = worker.search(Some(&query), "EPSG:4326", SpatialOperator::Equals, None)?;
//! assert_eq!(hits.len(), 1);
//! # Ok::<(), geodex::GeodexError>(())
//! ```

pub mod builder;
pub mod codec;
pub mod error;
pub mod evaluate;
pub mod extract;
pub mod functions;
pub mod store;
pub mod transform;
pub mod types;
pub mod worker;

pub use builder::IndexWorkerBuilder;
pub use error::{GeodexError, Result};

pub use geo::{Geometry, LineString, Point, Polygon};

pub use evaluate::{PredicateEvaluator, SpatialOperator};

pub use extract::{ExtractedGeometry, FragmentEvent, GeometryExtractor, ShapeKind};

pub use store::SpatialStore;

pub use transform::{EpsgAuthority, SrsAuthority, Transform, TransformCache};

pub use types::{Envelope, IndexConfig, NodeMatch, SpatialRecord};

pub use worker::{DocumentIndex, Fragment, IndexRegistry, IndexSummary, IndexWorker};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{GeodexError, IndexWorkerBuilder, Result};

    pub use geo::{Geometry, LineString, Point, Polygon};

    pub use crate::{Fragment, FragmentEvent, ShapeKind, SpatialOperator};

    pub use crate::{DocumentIndex, IndexConfig, IndexWorker};

    pub use crate::{Envelope, NodeMatch};
}
