use geo_types::{line_string, point, polygon, Geometry};

use crate::config::GeomFormat;
use crate::engine::ByteOrder;
use crate::test_utils::parcels_fixture;
use crate::vector::{FetchSize, GeometryValue, Row};

#[test]
fn test_write_geo_read_wkt() {
    let fixture = parcels_fixture("geo-write");
    let mut layer = fixture.open_rw();
    let square = polygon![
        (x: 30.0, y: 0.0),
        (x: 40.0, y: 0.0),
        (x: 40.0, y: 10.0),
        (x: 30.0, y: 10.0),
        (x: 30.0, y: 0.0),
    ];
    let value = GeometryValue::from_geo(&square.clone().into(), ByteOrder::Msb).unwrap();
    let fid = layer
        .create_feature(&Row::new().with("owner", "Dunn").with("geom", value))
        .unwrap();

    layer.config_mut().geom_format = GeomFormat::Wkt;
    let row = layer.feature(fid).unwrap().unwrap();
    let geometry = row.get("geometry").cloned().unwrap().into_geometry().unwrap();
    assert!(matches!(geometry, GeometryValue::Wkt(_)));
    assert_eq!(geometry.to_geo().unwrap(), Geometry::Polygon(square));
}

#[test]
fn test_promote_to_multi_in_tables() {
    let fixture = parcels_fixture("geo-promote");
    let mut layer = fixture.open();
    layer.config_mut().promote_to_multi = true;
    let table = layer.fetch(FetchSize::All).unwrap();
    for row in table.rows() {
        let geometry = row.get("geometry").cloned().unwrap().into_geometry().unwrap();
        assert!(matches!(geometry.to_geo().unwrap(), Geometry::MultiPolygon(_)));
    }
}

#[test]
fn test_bbox_column() {
    let fixture = parcels_fixture("geo-bbox");
    let mut layer = fixture.open();
    layer.config_mut().geom_format = GeomFormat::BBox;
    let table = layer.fetch(FetchSize::All).unwrap();
    let row = table.row(2).unwrap();
    assert_eq!(
        row.get("geometry").cloned().unwrap().into_geometry(),
        Some(GeometryValue::BBox([20.0, 0.0, 30.0, 10.0]))
    );
}

#[test]
fn test_spatial_filter_from_geo() {
    let fixture = parcels_fixture("geo-filter");
    let mut layer = fixture.open();
    let line: Geometry<f64> = line_string![(x: 5.0, y: 5.0), (x: 15.0, y: 5.0)].into();
    layer.set_spatial_filter_geo(&line).unwrap();
    assert_eq!(layer.feature_count().unwrap(), 2);

    layer.set_spatial_filter_geo(&point!(x: 25.0, y: 5.0).into()).unwrap();
    let table = layer.fetch(FetchSize::All).unwrap();
    assert_eq!(table.num_rows(), 1);
    assert_eq!(table.row(0).unwrap().fid(), Some(3));
}
