use geo::{BoundingRect, CoordsIter};
use geo_traits::to_geo::ToGeoGeometry;
use geo_types::{Geometry, MultiLineString, MultiPoint, MultiPolygon};
use wkt::{ToWkt, TryFromWkt};

use crate::engine::{ByteOrder, EngineGeometry, Envelope, WkVariant};
use crate::errors::{GdalError, Result};

/// A geometry of the memory engine, backed by [`geo_types::Geometry`].
///
/// Only planar XY geometries are represented.
#[derive(Clone, Debug, PartialEq)]
pub struct MemGeometry(pub(crate) Geometry<f64>);

impl MemGeometry {
    pub fn new(geometry: Geometry<f64>) -> Self {
        MemGeometry(geometry)
    }

    pub fn geo(&self) -> &Geometry<f64> {
        &self.0
    }

    pub fn into_geo(self) -> Geometry<f64> {
        self.0
    }

    /// The polygonal part of this geometry, for the set operations of the layer
    /// algebra. `None` when the geometry is not polygonal.
    pub(crate) fn to_multi_polygon(&self) -> Option<MultiPolygon<f64>> {
        match &self.0 {
            Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p.clone()])),
            Geometry::MultiPolygon(mp) => Some(mp.clone()),
            Geometry::Rect(r) => Some(MultiPolygon::new(vec![r.to_polygon()])),
            Geometry::Triangle(t) => Some(MultiPolygon::new(vec![t.to_polygon()])),
            Geometry::GeometryCollection(gc) if gc.0.is_empty() => Some(MultiPolygon::new(vec![])),
            _ => None,
        }
    }
}

impl From<Geometry<f64>> for MemGeometry {
    fn from(geometry: Geometry<f64>) -> Self {
        MemGeometry(geometry)
    }
}

impl EngineGeometry for MemGeometry {
    fn from_wkb(wkb: &[u8]) -> Result<Self> {
        let parsed = wkb::reader::read_wkb(wkb).map_err(|e| GdalError::GeometryParse {
            method_name: "OGR_G_CreateFromWkb",
            msg: e.to_string(),
        })?;
        let geometry = parsed
            .try_to_geometry()
            .ok_or_else(|| GdalError::GeometryParse {
                method_name: "OGR_G_CreateFromWkb",
                msg: "geometry cannot be represented".to_string(),
            })?;
        Ok(MemGeometry(geometry))
    }

    fn from_wkt(wkt: &str) -> Result<Self> {
        let geometry =
            Geometry::<f64>::try_from_wkt_str(wkt).map_err(|e| GdalError::GeometryParse {
                method_name: "OGR_G_CreateFromWkt",
                msg: e.to_string(),
            })?;
        Ok(MemGeometry(geometry))
    }

    // XY geometries encode identically in the legacy and ISO flavors.
    fn wkb(&self, byte_order: ByteOrder, _variant: WkVariant) -> Result<Vec<u8>> {
        let endianness = match byte_order {
            ByteOrder::Lsb => wkb::Endianness::LittleEndian,
            ByteOrder::Msb => wkb::Endianness::BigEndian,
        };
        let mut buf = Vec::new();
        wkb::writer::write_geometry(&mut buf, &self.0, &wkb::writer::WriteOptions { endianness })
            .map_err(|e| GdalError::OgrError {
                err: crate::errors::OgrErr::Failure,
                method_name: "OGR_G_ExportToWkb",
                msg: e.to_string(),
            })?;
        Ok(buf)
    }

    fn wkt(&self, _variant: WkVariant) -> Result<String> {
        Ok(self.0.wkt_string())
    }

    fn wkb_size(&self) -> usize {
        self.wkb(ByteOrder::Lsb, WkVariant::Legacy)
            .map(|buf| buf.len())
            .unwrap_or(0)
    }

    fn geometry_name(&self) -> String {
        match &self.0 {
            Geometry::Point(_) => "POINT",
            Geometry::Line(_) | Geometry::LineString(_) => "LINESTRING",
            Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => "POLYGON",
            Geometry::MultiPoint(_) => "MULTIPOINT",
            Geometry::MultiLineString(_) => "MULTILINESTRING",
            Geometry::MultiPolygon(_) => "MULTIPOLYGON",
            Geometry::GeometryCollection(_) => "GEOMETRYCOLLECTION",
        }
        .to_string()
    }

    fn summary(&self) -> String {
        let name = self.geometry_name();
        match &self.0 {
            Geometry::Point(_) => name,
            Geometry::Polygon(p) => format!(
                "{name} : {} rings, {} points",
                p.interiors().len() + 1,
                p.coords_count()
            ),
            Geometry::MultiPoint(_)
            | Geometry::MultiLineString(_)
            | Geometry::MultiPolygon(_)
            | Geometry::GeometryCollection(_) => format!(
                "{name} : {} geometries, {} points",
                geometry_count(&self.0),
                self.0.coords_count()
            ),
            _ => format!("{name} : {} points", self.0.coords_count()),
        }
    }

    fn envelope(&self) -> Envelope {
        match self.0.bounding_rect() {
            Some(rect) => Envelope::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y),
            None => Envelope::default(),
        }
    }

    fn is_empty(&self) -> bool {
        self.0.coords_count() == 0
    }

    fn force_to_multi(self) -> Self {
        let promoted = match self.0 {
            Geometry::Point(p) => Geometry::MultiPoint(MultiPoint::new(vec![p])),
            Geometry::Line(l) => {
                Geometry::MultiLineString(MultiLineString::new(vec![l.into()]))
            }
            Geometry::LineString(ls) => Geometry::MultiLineString(MultiLineString::new(vec![ls])),
            Geometry::Polygon(p) => Geometry::MultiPolygon(MultiPolygon::new(vec![p])),
            Geometry::Rect(r) => Geometry::MultiPolygon(MultiPolygon::new(vec![r.to_polygon()])),
            Geometry::Triangle(t) => {
                Geometry::MultiPolygon(MultiPolygon::new(vec![t.to_polygon()]))
            }
            other => other,
        };
        MemGeometry(promoted)
    }
}

fn geometry_count(geometry: &Geometry<f64>) -> usize {
    match geometry {
        Geometry::MultiPoint(g) => g.0.len(),
        Geometry::MultiLineString(g) => g.0.len(),
        Geometry::MultiPolygon(g) => g.0.len(),
        Geometry::GeometryCollection(g) => g.0.len(),
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: &str = "POLYGON ((0 0, 10 0, 10 10, 0 10, 0 0))";

    #[test]
    fn test_wkt_round_trip() {
        let geom = MemGeometry::from_wkt(SQUARE).unwrap();
        assert_eq!(geom.geometry_name(), "POLYGON");
        let again = MemGeometry::from_wkt(&geom.wkt(WkVariant::Legacy).unwrap()).unwrap();
        assert_eq!(geom, again);
    }

    #[test]
    fn test_wkb_byte_order() {
        let geom = MemGeometry::from_wkt("POINT (1 2)").unwrap();
        let lsb = geom.wkb(ByteOrder::Lsb, WkVariant::Legacy).unwrap();
        let msb = geom.wkb(ByteOrder::Msb, WkVariant::Iso).unwrap();
        assert_eq!(lsb.len(), 21);
        assert_eq!(geom.wkb_size(), 21);
        assert_eq!(lsb[0], 1);
        assert_eq!(msb[0], 0);
        assert_eq!(MemGeometry::from_wkb(&msb).unwrap(), geom);
    }

    #[test]
    fn test_invalid_input() {
        assert!(matches!(
            MemGeometry::from_wkt("POLYGON ((0 0, 1"),
            Err(GdalError::GeometryParse { .. })
        ));
        assert!(MemGeometry::from_wkb(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_envelope_and_summary() {
        let geom = MemGeometry::from_wkt(SQUARE).unwrap();
        assert_eq!(geom.envelope().to_array(), [0.0, 0.0, 10.0, 10.0]);
        assert_eq!(geom.summary(), "POLYGON : 1 rings, 5 points");
        assert!(!geom.is_empty());
        assert!(MemGeometry::from_wkt("GEOMETRYCOLLECTION EMPTY")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_force_to_multi() {
        let multi = MemGeometry::from_wkt(SQUARE).unwrap().force_to_multi();
        assert_eq!(multi.geometry_name(), "MULTIPOLYGON");
        let point = MemGeometry::from_wkt("POINT (1 2)").unwrap().force_to_multi();
        assert_eq!(point.geometry_name(), "MULTIPOINT");
        let unchanged = MemGeometry::from_wkt("MULTIPOINT ((1 2))").unwrap();
        assert_eq!(unchanged.clone().force_to_multi(), unchanged);
    }
}
