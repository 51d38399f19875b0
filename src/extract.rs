//! Geometry extraction from markup parse events.
//!
//! The host engine's streaming parser walks one GML fragment and reports
//! structural events (shape and ring boundaries, coordinates, the declared
//! spatial reference). [`GeometryExtractor`] folds that event sequence into
//! exactly one geometry value. One extractor instance processes one fragment
//! and is consumed by [`GeometryExtractor::finish`], so no geometry state can
//! leak between fragments of the same parse pass.

use crate::error::{GeodexError, Result};
use geo::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};

/// Shape kinds a fragment may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
}

impl ShapeKind {
    /// The member kind a homogeneous collection accepts, if this is a collection.
    pub fn member_kind(self) -> Option<ShapeKind> {
        match self {
            ShapeKind::MultiPoint => Some(ShapeKind::Point),
            ShapeKind::MultiLineString => Some(ShapeKind::LineString),
            ShapeKind::MultiPolygon => Some(ShapeKind::Polygon),
            _ => None,
        }
    }
}

/// One structural parse event within a fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum FragmentEvent {
    /// Fragment root opens, carrying the declared spatial reference if any.
    ShapeStart {
        kind: ShapeKind,
        srs: Option<String>,
    },
    /// A member of a homogeneous collection opens.
    MemberStart(ShapeKind),
    /// The current collection member closes.
    MemberEnd,
    /// A polygon ring opens (first ring is the exterior).
    RingStart,
    /// The current ring closes.
    RingEnd,
    /// One coordinate pair, in document order.
    Coord { x: f64, y: f64 },
    /// Fragment root closes.
    ShapeEnd,
}

/// The extractor's output: one geometry plus the fragment's declared SRS.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedGeometry {
    pub geometry: Geometry<f64>,
    pub srs: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Shape,
    Member,
    Done,
}

/// Folds one fragment's event sequence into a geometry.
#[derive(Debug)]
pub struct GeometryExtractor {
    state: State,
    kind: Option<ShapeKind>,
    srs: Option<String>,
    in_ring: bool,
    coords: Vec<Coord<f64>>,
    ring: Vec<Coord<f64>>,
    rings: Vec<LineString<f64>>,
    points: Vec<Point<f64>>,
    lines: Vec<LineString<f64>>,
    polygons: Vec<Polygon<f64>>,
}

impl GeometryExtractor {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            kind: None,
            srs: None,
            in_ring: false,
            coords: Vec::new(),
            ring: Vec::new(),
            rings: Vec::new(),
            points: Vec::new(),
            lines: Vec::new(),
            polygons: Vec::new(),
        }
    }

    /// Run a fresh extractor over a complete event sequence.
    pub fn extract<I>(events: I) -> Result<ExtractedGeometry>
    where
        I: IntoIterator<Item = FragmentEvent>,
    {
        let mut extractor = Self::new();
        for event in events {
            extractor.push(event)?;
        }
        extractor.finish()
    }

    /// Feed one event.
    ///
    /// # Errors
    ///
    /// `UnrecognizedGeometry` for events that violate the shape grammar,
    /// `MalformedRing` when a ring closes unclosed or too short.
    pub fn push(&mut self, event: FragmentEvent) -> Result<()> {
        match event {
            FragmentEvent::ShapeStart { kind, srs } => {
                if self.state != State::Idle {
                    return Err(GeodexError::UnrecognizedGeometry(
                        "nested or repeated shape root".to_string(),
                    ));
                }
                self.kind = Some(kind);
                self.srs = srs;
                self.state = State::Shape;
                Ok(())
            }
            FragmentEvent::MemberStart(member) => {
                if self.state != State::Shape {
                    return Err(GeodexError::UnrecognizedGeometry(
                        "member outside a collection".to_string(),
                    ));
                }
                let expected = self.kind.and_then(ShapeKind::member_kind);
                match expected {
                    Some(kind) if kind == member => {
                        self.state = State::Member;
                        Ok(())
                    }
                    Some(kind) => Err(GeodexError::UnrecognizedGeometry(format!(
                        "collection of {:?} cannot hold a {:?} member",
                        kind, member
                    ))),
                    None => Err(GeodexError::UnrecognizedGeometry(format!(
                        "{:?} is not a collection",
                        self.kind.unwrap_or(ShapeKind::Point)
                    ))),
                }
            }
            FragmentEvent::RingStart => {
                if self.in_ring || !self.current_kind_is(ShapeKind::Polygon) {
                    return Err(GeodexError::UnrecognizedGeometry(
                        "ring outside a polygon".to_string(),
                    ));
                }
                self.in_ring = true;
                self.ring.clear();
                Ok(())
            }
            FragmentEvent::RingEnd => {
                if !self.in_ring {
                    return Err(GeodexError::UnrecognizedGeometry(
                        "ring end without ring start".to_string(),
                    ));
                }
                self.in_ring = false;
                let ring = close_ring(std::mem::take(&mut self.ring))?;
                self.rings.push(ring);
                Ok(())
            }
            FragmentEvent::Coord { x, y } => {
                if self.in_ring {
                    self.ring.push(Coord { x, y });
                    return Ok(());
                }
                let kind = self.current_kind();
                match kind {
                    Some(ShapeKind::Point) | Some(ShapeKind::LineString) => {
                        self.coords.push(Coord { x, y });
                        Ok(())
                    }
                    _ => Err(GeodexError::UnrecognizedGeometry(
                        "coordinate outside point, line or ring".to_string(),
                    )),
                }
            }
            FragmentEvent::MemberEnd => {
                if self.state != State::Member || self.in_ring {
                    return Err(GeodexError::UnrecognizedGeometry(
                        "member end without open member".to_string(),
                    ));
                }
                self.finish_member()?;
                self.state = State::Shape;
                Ok(())
            }
            FragmentEvent::ShapeEnd => {
                if self.state != State::Shape || self.in_ring {
                    return Err(GeodexError::UnrecognizedGeometry(
                        "shape end in unexpected position".to_string(),
                    ));
                }
                self.state = State::Done;
                Ok(())
            }
        }
    }

    /// Consume the extractor and produce the fragment's geometry.
    pub fn finish(self) -> Result<ExtractedGeometry> {
        if self.state != State::Done {
            return Err(GeodexError::UnrecognizedGeometry(
                "truncated event sequence".to_string(),
            ));
        }
        let kind = self.kind.ok_or_else(|| {
            GeodexError::UnrecognizedGeometry("no shape declared".to_string())
        })?;

        let geometry = match kind {
            ShapeKind::Point => Geometry::Point(point_from(self.coords)?),
            ShapeKind::LineString => Geometry::LineString(line_from(self.coords)?),
            ShapeKind::Polygon => Geometry::Polygon(polygon_from(self.rings)?),
            ShapeKind::MultiPoint => {
                if self.points.is_empty() {
                    return Err(GeodexError::UnrecognizedGeometry(
                        "empty point collection".to_string(),
                    ));
                }
                Geometry::MultiPoint(MultiPoint::new(self.points))
            }
            ShapeKind::MultiLineString => {
                if self.lines.is_empty() {
                    return Err(GeodexError::UnrecognizedGeometry(
                        "empty line collection".to_string(),
                    ));
                }
                Geometry::MultiLineString(MultiLineString::new(self.lines))
            }
            ShapeKind::MultiPolygon => {
                if self.polygons.is_empty() {
                    return Err(GeodexError::UnrecognizedGeometry(
                        "empty polygon collection".to_string(),
                    ));
                }
                Geometry::MultiPolygon(MultiPolygon::new(self.polygons))
            }
        };

        Ok(ExtractedGeometry {
            geometry,
            srs: self.srs,
        })
    }

    /// Kind of the element coordinates currently belong to.
    fn current_kind(&self) -> Option<ShapeKind> {
        match self.state {
            State::Shape => self.kind,
            State::Member => self.kind.and_then(ShapeKind::member_kind),
            _ => None,
        }
    }

    fn current_kind_is(&self, kind: ShapeKind) -> bool {
        self.current_kind() == Some(kind)
    }

    fn finish_member(&mut self) -> Result<()> {
        let member = self
            .kind
            .and_then(ShapeKind::member_kind)
            .expect("member state implies collection kind");
        match member {
            ShapeKind::Point => {
                let point = point_from(std::mem::take(&mut self.coords))?;
                self.points.push(point);
            }
            ShapeKind::LineString => {
                let line = line_from(std::mem::take(&mut self.coords))?;
                self.lines.push(line);
            }
            ShapeKind::Polygon => {
                let polygon = polygon_from(std::mem::take(&mut self.rings))?;
                self.polygons.push(polygon);
            }
            _ => unreachable!("collections hold simple members only"),
        }
        Ok(())
    }
}

impl Default for GeometryExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn point_from(coords: Vec<Coord<f64>>) -> Result<Point<f64>> {
    match coords.as_slice() {
        [coord] => Ok(Point::from(*coord)),
        _ => Err(GeodexError::UnrecognizedGeometry(format!(
            "point with {} coordinates",
            coords.len()
        ))),
    }
}

fn line_from(coords: Vec<Coord<f64>>) -> Result<LineString<f64>> {
    if coords.len() < 2 {
        return Err(GeodexError::UnrecognizedGeometry(format!(
            "line with {} coordinates",
            coords.len()
        )));
    }
    Ok(LineString::new(coords))
}

/// Validate ring closure: at least four coordinates, first equal to last.
fn close_ring(coords: Vec<Coord<f64>>) -> Result<LineString<f64>> {
    if coords.len() < 4 {
        return Err(GeodexError::MalformedRing(format!(
            "ring has {} coordinates, need at least 4",
            coords.len()
        )));
    }
    let first = coords[0];
    let last = coords[coords.len() - 1];
    if first != last {
        return Err(GeodexError::MalformedRing(format!(
            "ring not closed: ({}, {}) != ({}, {})",
            first.x, first.y, last.x, last.y
        )));
    }
    Ok(LineString::new(coords))
}

fn polygon_from(mut rings: Vec<LineString<f64>>) -> Result<Polygon<f64>> {
    if rings.is_empty() {
        return Err(GeodexError::UnrecognizedGeometry(
            "polygon without rings".to_string(),
        ));
    }
    let exterior = rings.remove(0);
    Ok(Polygon::new(exterior, rings))
}
