use crate::config::GeomFormat;
use crate::errors::GdalError;
use crate::test_utils::{parcels_fixture, year_fixture};

use super::{FetchSize, FieldValue, GeometryValue, Row, SpatialFilter};

mod convert_geo;
mod sql;

#[test]
fn test_filtered_scan_ends_without_error() {
    let fixture = year_fixture("scenario-filtered-scan");
    let mut layer = fixture.open();
    layer.set_attribute_filter("ig_year = 2020").unwrap();
    assert_eq!(layer.feature_count().unwrap(), 1);

    let row = layer.next_feature().unwrap().unwrap();
    assert_eq!(row.get("ig_year"), Some(&FieldValue::IntegerValue(2020)));
    assert!(layer.next_feature().unwrap().is_none());
    assert!(layer.next_feature().unwrap().is_none());
}

#[test]
fn test_missing_fid_leaves_filters_untouched() {
    let fixture = parcels_fixture("scenario-missing-fid");
    let mut layer = fixture.open();
    layer.set_attribute_filter("owner <> 'Cole'").unwrap();
    layer
        .set_spatial_filter_wkt("POLYGON ((0 0, 15 0, 15 5, 0 5, 0 0))")
        .unwrap();
    let attribute = layer.attribute_filter().unwrap().to_string();
    let spatial = layer.spatial_filter_wkt().unwrap();

    assert!(layer.feature(1234).unwrap().is_none());

    assert_eq!(layer.attribute_filter().unwrap(), attribute);
    assert_eq!(layer.spatial_filter_wkt().unwrap(), spatial);
    assert!(matches!(
        layer.spatial_filter().unwrap(),
        Some(SpatialFilter::Geometry(_))
    ));
    assert_eq!(layer.feature_count().unwrap(), 2);
}

#[test]
fn test_empty_geometry_buffer_writes_null_geometry() {
    let fixture = parcels_fixture("scenario-empty-wkb");
    let mut layer = fixture.open_rw();
    let fid = layer
        .create_feature(
            &Row::new()
                .with("owner", "Dunn")
                .with("geometry", FieldValue::BinaryValue(Vec::new())),
        )
        .unwrap();

    let row = layer.feature(fid).unwrap().unwrap();
    assert_eq!(row.get("geometry"), Some(&FieldValue::NullValue));
    let table = layer.fetch(FetchSize::All).unwrap();
    let geometries = table.column("geometry").unwrap();
    assert_eq!(geometries.get(3), Some(FieldValue::NullValue));
}

#[test]
fn test_no_geometry_columns() {
    let fixture = parcels_fixture("scenario-no-geometry");
    let mut layer = fixture.open();
    layer.config_mut().geom_format = "NONE".parse().unwrap();
    let table = layer.fetch(FetchSize::All).unwrap();
    assert_eq!(table.num_columns(), 1 + 3);
    assert_eq!(table.column_names(), ["FID", "owner", "area", "zoned"]);

    layer.set_ignored_fields(&["zoned"]).unwrap();
    let table = layer.fetch(FetchSize::All).unwrap();
    assert_eq!(table.num_columns(), 1 + 2);
    assert!(table.column("geometry").is_none());
}

#[test]
fn test_fetch_truncates_at_end() {
    let fixture = year_fixture("scenario-truncate");
    let mut layer = fixture.open();
    assert_eq!(layer.fetch(FetchSize::Rows(50)).unwrap().num_rows(), 50);

    let rest = layer.fetch(FetchSize::Rows(100)).unwrap();
    assert_eq!(rest.num_rows(), 11);
    for (_, column) in rest.columns() {
        assert_eq!(column.len(), 11);
    }
    assert_eq!(
        rest.row(10).unwrap().get("ig_year"),
        Some(&FieldValue::IntegerValue(2020))
    );
    assert_eq!(layer.fetch(FetchSize::Rows(100)).unwrap().num_rows(), 0);
}

#[test]
fn test_fetch_replace_round_trip() {
    let fixture = parcels_fixture("roundtrip");
    let mut layer = fixture.open_rw();
    for fid in 1..=3 {
        layer.set_next_by_index(fid - 1).unwrap();
        let before = layer.fetch(FetchSize::Rows(1)).unwrap().row(0).unwrap();
        assert_eq!(before.fid(), Some(fid));
        assert_eq!(layer.set_feature(&before).unwrap(), fid);
        let after = layer.feature(fid).unwrap().unwrap();
        assert_eq!(before, after);
    }
    let baker = layer.feature(2).unwrap().unwrap();
    assert_eq!(baker.get("zoned"), Some(&FieldValue::NullValue));
}

#[test]
fn test_reset_and_close_are_idempotent() {
    let fixture = parcels_fixture("idempotent");
    let mut layer = fixture.open();
    layer.next_feature().unwrap();
    layer.reset_reading().unwrap();
    layer.reset_reading().unwrap();
    assert_eq!(layer.next_feature().unwrap().unwrap().fid(), Some(1));
    layer.close();
    layer.close();
    assert!(matches!(layer.reset_reading(), Err(GdalError::LayerClosed)));
}

#[test]
fn test_seek_matches_scan_order() {
    let fixture = year_fixture("seek-order");
    let mut layer = fixture.open();
    layer.set_attribute_filter("ig_year >= 2000").unwrap();
    let scanned: Vec<_> = layer
        .fetch(FetchSize::All)
        .unwrap()
        .rows()
        .map(|row| row.fid())
        .collect();
    assert_eq!(scanned.len() as i64, layer.feature_count().unwrap());
    for (i, fid) in scanned.iter().enumerate() {
        layer.set_next_by_index(i as i64).unwrap();
        assert_eq!(layer.next_feature().unwrap().unwrap().fid(), *fid);
    }
}

#[test]
fn test_ignored_fields_apply_to_next_fetch() {
    let fixture = parcels_fixture("ignored-next-fetch");
    let mut layer = fixture.open();
    let before = layer.fetch(FetchSize::Rows(1)).unwrap();
    layer.set_ignored_fields(&["area", "geometry"]).unwrap();
    assert_eq!(before.num_columns(), 5);
    assert_eq!(before.column_names(), ["FID", "owner", "area", "zoned", "geometry"]);

    let after = layer.fetch(FetchSize::Rows(1)).unwrap();
    assert_eq!(after.column_names(), ["FID", "owner", "zoned"]);
    assert_eq!(after.row(0).unwrap().fid(), Some(2));
}

#[test]
fn test_empty_predicate_restores_count() {
    let fixture = year_fixture("empty-predicate");
    let mut layer = fixture.open();
    layer.set_attribute_filter("ig_year < 1970").unwrap();
    assert_eq!(layer.feature_count().unwrap(), 10);
    layer.set_attribute_filter("").unwrap();
    assert_eq!(layer.attribute_filter().unwrap(), "");
    assert_eq!(layer.feature_count().unwrap(), 61);
}

#[test]
fn test_column_types() {
    let fixture = parcels_fixture("column-types");
    let mut layer = fixture.open();
    layer.config_mut().geom_format = GeomFormat::TypeName;
    let table = layer.fetch(FetchSize::All).unwrap();

    let owners = table.column("owner").unwrap();
    assert_eq!(owners.get(1), Some(FieldValue::StringValue("Baker".to_string())));
    let zoned = table.column("zoned").unwrap();
    // 2001-05-04
    assert_eq!(zoned.get(0), Some(FieldValue::DateValue(11446)));
    assert_eq!(zoned.get(1), Some(FieldValue::NullValue));
    let geometry = table.column("geometry").unwrap();
    assert_eq!(
        geometry.get(2),
        Some(FieldValue::GeometryValue(GeometryValue::TypeName(
            "POLYGON".to_string()
        )))
    );
    let fids = table.column("FID").unwrap();
    assert_eq!(fids.get(2), Some(FieldValue::Integer64Value(3)));
}
