use crate::engine::mem::MemEngine;
use crate::errors::GdalError;
use crate::options::{LayerOptions, LayerSource};
use crate::test_utils::{parcels_fixture, year_fixture};
use crate::vector::{FetchSize, FieldValue, VectorLayer};

#[test]
fn test_sql() {
    let fixture = parcels_fixture("sql-select");
    let query = "SELECT * FROM parcels WHERE area > 100";
    let mut layer = VectorLayer::<MemEngine>::open(fixture.dsn(), query).unwrap();
    assert_eq!(layer.source(), &LayerSource::Sql(query.to_string()));
    assert_eq!(layer.feature_count().unwrap(), 1);
    assert_eq!(layer.field_names().unwrap(), ["owner", "area", "zoned", "geometry"]);

    let row = layer.next_feature().unwrap().unwrap();
    assert_eq!(row.fid(), Some(3));
    assert_eq!(row.get("area"), Some(&FieldValue::RealValue(150.5)));
    assert!(layer.next_feature().unwrap().is_none());
}

#[test]
fn test_sql_with_open_spatial_filter() {
    let fixture = parcels_fixture("sql-spatial-filter");
    let options = LayerOptions {
        spatial_filter: Some("POINT (15 5)".to_string()),
        ..LayerOptions::default()
    };
    let mut layer =
        VectorLayer::<MemEngine>::open_with_options(fixture.dsn(), "SELECT * FROM parcels", options)
            .unwrap();
    let table = layer.fetch(FetchSize::All).unwrap();
    assert_eq!(table.num_rows(), 1);
    assert_eq!(table.row(0).unwrap().fid(), Some(2));
}

#[test]
fn test_sql_with_dialect() {
    let fixture = year_fixture("sql-dialect");
    let options = LayerOptions {
        dialect: Some("SQLITE".to_string()),
        ..LayerOptions::default()
    };
    let mut layer = VectorLayer::<MemEngine>::open_with_options(
        fixture.dsn(),
        "SELECT * FROM years WHERE ig_year >= 1990 AND ig_year < 2000",
        options,
    )
    .unwrap();
    assert_eq!(layer.fetch(FetchSize::All).unwrap().num_rows(), 10);
}

#[test]
fn test_sql_errors() {
    let fixture = parcels_fixture("sql-errors");
    let err = VectorLayer::<MemEngine>::open(fixture.dsn(), "SELECT * FROM nowhere").unwrap_err();
    assert!(matches!(err, GdalError::OpenFailure { .. }));

    let options = LayerOptions {
        dialect: Some("INDIRECT_SQLITE".to_string()),
        ..LayerOptions::default()
    };
    let err =
        VectorLayer::<MemEngine>::open_with_options(fixture.dsn(), "SELECT * FROM parcels", options)
            .unwrap_err();
    match err {
        GdalError::OpenFailure { msg, .. } => assert!(msg.contains("dialect")),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(MemEngine::result_set_count(fixture.dsn()), 0);
}

#[test]
fn test_sql_result_set_survives_reopen() {
    let fixture = parcels_fixture("sql-reopen");
    let mut layer =
        VectorLayer::<MemEngine>::open(fixture.dsn(), "SELECT * FROM parcels WHERE owner = 'Cole'")
            .unwrap();
    layer.set_attribute_filter("area < 100").unwrap();
    assert_eq!(layer.feature_count().unwrap(), 0);
    layer.reopen(crate::options::Access::ReadOnly).unwrap();
    assert_eq!(MemEngine::result_set_count(fixture.dsn()), 1);
    assert_eq!(layer.feature_count().unwrap(), 1);
    layer.close();
    assert_eq!(MemEngine::result_set_count(fixture.dsn()), 0);
}
