//! Geometry functions for the host's query runtime.
//!
//! These back the query-language function surface: pairwise predicates,
//! scalar properties and geometry producers. Operands follow the query
//! engine's empty-sequence conventions, so every function takes optional
//! geometries: predicates are `false` when either operand is absent,
//! properties propagate absence, and the set operations treat an absent
//! operand as the empty geometry.

use crate::error::{GeodexError, Result};
use crate::transform;
use crate::types::Envelope;
use bytes::Bytes;
use geo::line_intersection::{line_intersection, LineIntersection};
use geo::{
    Area, BooleanOps, Centroid, ConvexHull, Coord, CoordsIter, Geometry, Line, LineString,
    MultiLineString, MultiPoint, MultiPolygon, Point, Polygon, Relate, Validation,
};
use rustc_hash::FxHashMap;

/// Default circular-arc resolution for [`buffer`], in segments per quadrant.
pub const DEFAULT_QUADRANT_SEGMENTS: usize = 8;

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

macro_rules! predicate {
    ($name:ident, $check:ident) => {
        pub fn $name(a: Option<&Geometry<f64>>, b: Option<&Geometry<f64>>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => a.relate(b).$check(),
                _ => false,
            }
        }
    };
}

predicate!(equals, is_equal_topo);
predicate!(disjoint, is_disjoint);
predicate!(intersects, is_intersects);
predicate!(touches, is_touches);
predicate!(crosses, is_crosses);
predicate!(within, is_within);
predicate!(contains, is_contains);
predicate!(overlaps, is_overlaps);

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

/// Bounding envelope, absent for an absent or empty geometry.
pub fn envelope(geometry: Option<&Geometry<f64>>) -> Option<Envelope> {
    geometry.and_then(Envelope::of)
}

pub fn min_x(geometry: Option<&Geometry<f64>>) -> Option<f64> {
    envelope(geometry).map(|e| e.min_x)
}

pub fn max_x(geometry: Option<&Geometry<f64>>) -> Option<f64> {
    envelope(geometry).map(|e| e.max_x)
}

pub fn min_y(geometry: Option<&Geometry<f64>>) -> Option<f64> {
    envelope(geometry).map(|e| e.min_y)
}

pub fn max_y(geometry: Option<&Geometry<f64>>) -> Option<f64> {
    envelope(geometry).map(|e| e.max_y)
}

pub fn centroid_x(geometry: Option<&Geometry<f64>>) -> Option<f64> {
    geometry.and_then(Centroid::centroid).map(|p| p.x())
}

pub fn centroid_y(geometry: Option<&Geometry<f64>>) -> Option<f64> {
    geometry.and_then(Centroid::centroid).map(|p| p.y())
}

/// Unsigned area; zero for puntal and lineal geometries.
pub fn area(geometry: Option<&Geometry<f64>>) -> Option<f64> {
    geometry.map(Area::unsigned_area)
}

pub fn as_wkt(geometry: Option<&Geometry<f64>>) -> Result<Option<String>> {
    geometry.map(crate::codec::encode_wkt).transpose()
}

pub fn as_wkb(geometry: Option<&Geometry<f64>>) -> Result<Option<Bytes>> {
    geometry.map(|g| crate::codec::encode_geometry(g)).transpose()
}

pub fn geometry_type(geometry: Option<&Geometry<f64>>) -> Option<&'static str> {
    geometry.map(|g| match g {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    })
}

/// Whether every lineal component ends where it starts. Puntal and areal
/// geometries count as closed.
pub fn is_closed(geometry: Option<&Geometry<f64>>) -> Option<bool> {
    geometry.map(geometry_is_closed)
}

fn geometry_is_closed(geometry: &Geometry<f64>) -> bool {
    match geometry {
        Geometry::Line(line) => line.start == line.end,
        Geometry::LineString(line) => line.is_closed(),
        Geometry::MultiLineString(lines) => lines.iter().all(LineString::is_closed),
        Geometry::GeometryCollection(gc) => gc.iter().all(geometry_is_closed),
        _ => true,
    }
}

/// OGC simplicity: no self-intersection apart from shared segment endpoints.
pub fn is_simple(geometry: Option<&Geometry<f64>>) -> Option<bool> {
    geometry.map(geometry_is_simple)
}

fn geometry_is_simple(geometry: &Geometry<f64>) -> bool {
    match geometry {
        Geometry::Point(_) | Geometry::Line(_) | Geometry::Rect(_) | Geometry::Triangle(_) => {
            true
        }
        Geometry::MultiPoint(points) => {
            let mut seen = FxHashMap::default();
            points
                .iter()
                .all(|p| seen.insert(coord_key(p.0), ()).is_none())
        }
        Geometry::LineString(line) => line_is_simple(line),
        Geometry::MultiLineString(lines) => lines.iter().all(line_is_simple),
        // Areal simplicity coincides with validity.
        Geometry::Polygon(_) | Geometry::MultiPolygon(_) => geometry.is_valid(),
        Geometry::GeometryCollection(gc) => gc.iter().all(geometry_is_simple),
    }
}

fn line_is_simple(line: &LineString<f64>) -> bool {
    let segments: Vec<Line<f64>> = line.lines().collect();
    for i in 0..segments.len() {
        for j in (i + 1)..segments.len() {
            let Some(hit) = line_intersection(segments[i], segments[j]) else {
                continue;
            };
            match hit {
                LineIntersection::SinglePoint { intersection, .. } => {
                    let adjacent = j == i + 1 && intersection == segments[i].end;
                    let wraps = line.is_closed()
                        && i == 0
                        && j == segments.len() - 1
                        && intersection == segments[i].start;
                    if !adjacent && !wraps {
                        return false;
                    }
                }
                LineIntersection::Collinear { .. } => return false,
            }
        }
    }
    true
}

pub fn is_valid(geometry: Option<&Geometry<f64>>) -> Option<bool> {
    geometry.map(Validation::is_valid)
}

// ---------------------------------------------------------------------------
// Producers
// ---------------------------------------------------------------------------

/// Reproject through the process-wide transform cache.
pub fn transform_to(
    geometry: Option<&Geometry<f64>>,
    source: &str,
    target: &str,
) -> Result<Option<Geometry<f64>>> {
    let Some(geometry) = geometry else {
        return Ok(None);
    };
    let transform = transform::global().get(source, target)?;
    Ok(Some(transform.apply(geometry)))
}

/// Area within `distance` of the geometry, approximated with circular arcs
/// of `quadrant_segments` segments per quadrant (defaulting to
/// [`DEFAULT_QUADRANT_SEGMENTS`]).
///
/// # Errors
///
/// `InvalidInput` when the distance is not finite and positive, or when the
/// segment count is zero.
pub fn buffer(
    geometry: Option<&Geometry<f64>>,
    distance: f64,
    quadrant_segments: Option<usize>,
) -> Result<Option<Geometry<f64>>> {
    if !distance.is_finite() || distance <= 0.0 {
        return Err(GeodexError::InvalidInput(format!(
            "buffer distance must be finite and positive, got {}",
            distance
        )));
    }
    let segments = quadrant_segments.unwrap_or(DEFAULT_QUADRANT_SEGMENTS);
    if segments == 0 {
        return Err(GeodexError::InvalidInput(
            "quadrant segment count must be at least 1".to_string(),
        ));
    }
    let Some(geometry) = geometry else {
        return Ok(None);
    };

    let mut acc = MultiPolygon::new(Vec::new());
    accumulate_buffer(geometry, distance, segments, &mut acc);
    Ok(Some(areal_to_geometry(acc)))
}

fn accumulate_buffer(
    geometry: &Geometry<f64>,
    radius: f64,
    segments: usize,
    acc: &mut MultiPolygon<f64>,
) {
    match geometry {
        Geometry::Point(point) => union_into(acc, circle(point.0, radius, segments)),
        Geometry::MultiPoint(points) => {
            for point in points {
                union_into(acc, circle(point.0, radius, segments));
            }
        }
        Geometry::Line(segment) => union_into(acc, capsule(*segment, radius, segments)),
        Geometry::LineString(line) => buffer_segments(line, radius, segments, acc),
        Geometry::MultiLineString(lines) => {
            for line in lines {
                buffer_segments(line, radius, segments, acc);
            }
        }
        Geometry::Polygon(polygon) => buffer_polygon(polygon, radius, segments, acc),
        Geometry::MultiPolygon(polygons) => {
            for polygon in polygons {
                buffer_polygon(polygon, radius, segments, acc);
            }
        }
        Geometry::Rect(rect) => buffer_polygon(&rect.to_polygon(), radius, segments, acc),
        Geometry::Triangle(tri) => buffer_polygon(&tri.to_polygon(), radius, segments, acc),
        Geometry::GeometryCollection(gc) => {
            for member in gc {
                accumulate_buffer(member, radius, segments, acc);
            }
        }
    }
}

fn buffer_segments(
    line: &LineString<f64>,
    radius: f64,
    segments: usize,
    acc: &mut MultiPolygon<f64>,
) {
    if line.0.len() == 1 {
        union_into(acc, circle(line.0[0], radius, segments));
        return;
    }
    for segment in line.lines() {
        union_into(acc, capsule(segment, radius, segments));
    }
}

fn buffer_polygon(
    polygon: &Polygon<f64>,
    radius: f64,
    segments: usize,
    acc: &mut MultiPolygon<f64>,
) {
    union_into(acc, polygon.clone());
    buffer_segments(polygon.exterior(), radius, segments, acc);
    for interior in polygon.interiors() {
        buffer_segments(interior, radius, segments, acc);
    }
}

fn union_into(acc: &mut MultiPolygon<f64>, polygon: Polygon<f64>) {
    *acc = acc.union(&MultiPolygon::new(vec![polygon]));
}

/// Regular polygon approximating a circle, counter-clockwise, closed.
fn circle(center: Coord<f64>, radius: f64, quadrant_segments: usize) -> Polygon<f64> {
    let steps = quadrant_segments * 4;
    let mut coords = Vec::with_capacity(steps + 1);
    for i in 0..steps {
        let angle = std::f64::consts::TAU * (i as f64) / (steps as f64);
        coords.push(Coord {
            x: center.x + radius * angle.cos(),
            y: center.y + radius * angle.sin(),
        });
    }
    coords.push(coords[0]);
    Polygon::new(LineString::new(coords), Vec::new())
}

/// Buffered segment: the convex hull of the two end circles.
fn capsule(segment: Line<f64>, radius: f64, quadrant_segments: usize) -> Polygon<f64> {
    let mut points: Vec<Point<f64>> = circle(segment.start, radius, quadrant_segments)
        .exterior()
        .points()
        .collect();
    points.extend(circle(segment.end, radius, quadrant_segments).exterior().points());
    MultiPoint::new(points).convex_hull()
}

/// Convex hull of the geometry's coordinates.
pub fn convex_hull(geometry: Option<&Geometry<f64>>) -> Option<Geometry<f64>> {
    let geometry = geometry?;
    let points: Vec<Point<f64>> = geometry.coords_iter().map(Point::from).collect();
    if points.is_empty() {
        return None;
    }
    Some(Geometry::Polygon(MultiPoint::new(points).convex_hull()))
}

/// OGC boundary: ring lines for areal geometries, endpoints for lineal ones
/// (mod-2 rule across a multi-line), nothing for puntal ones.
pub fn boundary(geometry: Option<&Geometry<f64>>) -> Option<Geometry<f64>> {
    match geometry? {
        Geometry::Point(_) | Geometry::MultiPoint(_) => None,
        Geometry::Line(line) => {
            if line.start == line.end {
                None
            } else {
                Some(Geometry::MultiPoint(MultiPoint::new(vec![
                    Point::from(line.start),
                    Point::from(line.end),
                ])))
            }
        }
        Geometry::LineString(line) => {
            lineal_boundary(std::slice::from_ref(line))
        }
        Geometry::MultiLineString(lines) => lineal_boundary(&lines.0),
        Geometry::Polygon(polygon) => Some(Geometry::MultiLineString(MultiLineString::new(
            polygon_rings(polygon),
        ))),
        Geometry::MultiPolygon(polygons) => {
            let rings: Vec<LineString<f64>> =
                polygons.iter().flat_map(polygon_rings).collect();
            Some(Geometry::MultiLineString(MultiLineString::new(rings)))
        }
        Geometry::Rect(rect) => boundary(Some(&Geometry::Polygon(rect.to_polygon()))),
        Geometry::Triangle(tri) => boundary(Some(&Geometry::Polygon(tri.to_polygon()))),
        Geometry::GeometryCollection(_) => None,
    }
}

/// Endpoints occurring an odd number of times across the component lines.
fn lineal_boundary(lines: &[LineString<f64>]) -> Option<Geometry<f64>> {
    let mut counts: FxHashMap<(u64, u64), (Coord<f64>, usize)> = FxHashMap::default();
    for line in lines {
        if line.0.len() < 2 || line.is_closed() {
            continue;
        }
        for coord in [line.0[0], line.0[line.0.len() - 1]] {
            counts.entry(coord_key(coord)).or_insert((coord, 0)).1 += 1;
        }
    }
    let mut points: Vec<Point<f64>> = counts
        .into_values()
        .filter(|(_, count)| count % 2 == 1)
        .map(|(coord, _)| Point::from(coord))
        .collect();
    if points.is_empty() {
        return None;
    }
    points.sort_by(|a, b| a.x().total_cmp(&b.x()).then(a.y().total_cmp(&b.y())));
    Some(Geometry::MultiPoint(MultiPoint::new(points)))
}

fn polygon_rings(polygon: &Polygon<f64>) -> Vec<LineString<f64>> {
    let mut rings = vec![polygon.exterior().clone()];
    rings.extend(polygon.interiors().iter().cloned());
    rings
}

fn coord_key(coord: Coord<f64>) -> (u64, u64) {
    (coord.x.to_bits(), coord.y.to_bits())
}

// ---------------------------------------------------------------------------
// Set operations (areal)
// ---------------------------------------------------------------------------

/// Union of two areal geometries. One absent operand yields the other.
pub fn union(
    a: Option<&Geometry<f64>>,
    b: Option<&Geometry<f64>>,
) -> Result<Option<Geometry<f64>>> {
    match (a, b) {
        (None, None) => Ok(None),
        (Some(g), None) | (None, Some(g)) => Ok(Some(g.clone())),
        (Some(a), Some(b)) => {
            let result = as_areal(a)?.union(&as_areal(b)?);
            Ok(Some(areal_to_geometry(result)))
        }
    }
}

/// Intersection of two areal geometries. Absent with either operand absent.
pub fn intersection(
    a: Option<&Geometry<f64>>,
    b: Option<&Geometry<f64>>,
) -> Result<Option<Geometry<f64>>> {
    match (a, b) {
        (Some(a), Some(b)) => {
            let result = as_areal(a)?.intersection(&as_areal(b)?);
            Ok(Some(areal_to_geometry(result)))
        }
        _ => Ok(None),
    }
}

/// `a` minus `b`. An absent `b` leaves `a` untouched; an absent `a` is
/// absent.
pub fn difference(
    a: Option<&Geometry<f64>>,
    b: Option<&Geometry<f64>>,
) -> Result<Option<Geometry<f64>>> {
    match (a, b) {
        (None, _) => Ok(None),
        (Some(a), None) => Ok(Some(a.clone())),
        (Some(a), Some(b)) => {
            let result = as_areal(a)?.difference(&as_areal(b)?);
            Ok(Some(areal_to_geometry(result)))
        }
    }
}

/// Symmetric difference. One absent operand yields the other.
pub fn sym_difference(
    a: Option<&Geometry<f64>>,
    b: Option<&Geometry<f64>>,
) -> Result<Option<Geometry<f64>>> {
    match (a, b) {
        (None, None) => Ok(None),
        (Some(g), None) | (None, Some(g)) => Ok(Some(g.clone())),
        (Some(a), Some(b)) => {
            let result = as_areal(a)?.xor(&as_areal(b)?);
            Ok(Some(areal_to_geometry(result)))
        }
    }
}

/// The set operations are defined over areal geometries only.
fn as_areal(geometry: &Geometry<f64>) -> Result<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(polygon) => Ok(MultiPolygon::new(vec![polygon.clone()])),
        Geometry::MultiPolygon(polygons) => Ok(polygons.clone()),
        Geometry::Rect(rect) => Ok(MultiPolygon::new(vec![rect.to_polygon()])),
        Geometry::Triangle(tri) => Ok(MultiPolygon::new(vec![tri.to_polygon()])),
        other => Err(GeodexError::InvalidInput(format!(
            "set operation requires an areal geometry, got {}",
            geometry_type(Some(other)).unwrap_or("unknown")
        ))),
    }
}

fn areal_to_geometry(mut areal: MultiPolygon<f64>) -> Geometry<f64> {
    if areal.0.len() == 1 {
        Geometry::Polygon(areal.0.remove(0))
    } else {
        Geometry::MultiPolygon(areal)
    }
}
