//! Canonical geometry encoding.
//!
//! Stored geometries use well-known binary so rows can be read by any
//! WKB-aware tool. WKT is only produced for the query-function surface.

use crate::error::Result;
use bytes::Bytes;
use geo::Geometry;
use geozero::wkb::Wkb;
use geozero::{CoordDimensions, ToGeo, ToWkb, ToWkt};

/// Encode a geometry as WKB.
pub fn encode_geometry(geometry: &Geometry<f64>) -> Result<Bytes> {
    let wkb = geometry.to_wkb(CoordDimensions::xy())?;
    Ok(Bytes::from(wkb))
}

/// Decode a WKB blob back into a geometry.
pub fn decode_geometry(wkb: &[u8]) -> Result<Geometry<f64>> {
    let geometry = Wkb(wkb).to_geo()?;
    Ok(geometry)
}

/// Render a geometry as well-known text.
pub fn encode_wkt(geometry: &Geometry<f64>) -> Result<String> {
    Ok(geometry.to_wkt()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Point, polygon};

    #[test]
    fn test_wkb_round_trip() {
        let poly = Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 0.0, y: 10.0),
            (x: 0.0, y: 0.0),
        ]);

        let wkb = encode_geometry(&poly).unwrap();
        assert!(!wkb.is_empty());

        let decoded = decode_geometry(&wkb).unwrap();
        assert_eq!(decoded, poly);
    }

    #[test]
    fn test_wkt_output() {
        let point = Geometry::Point(Point::new(5.0, 7.0));
        let wkt = encode_wkt(&point).unwrap();
        assert!(wkt.starts_with("POINT"));
        assert!(wkt.contains('5') && wkt.contains('7'));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_geometry(&[0x00, 0x01, 0x02]).is_err());
    }
}
