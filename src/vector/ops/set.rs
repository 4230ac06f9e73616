use crate::cpl::CslStringList;
use crate::engine::{AlgebraOp, Engine, EngineLayer, ProgressFn};
use crate::errors::{GdalError, OgrErr, Result};
use crate::vector::cursor::CursorState;
use crate::vector::layer::{engine_msg, VectorLayer};

/// # Set Operations
///
/// These methods overlay the features of this layer (the input) with those of a method
/// layer and write the pieces into a result layer, which must be open for update.
///
/// `options` are passed to the engine unchanged (`SKIP_FAILURES`, `PROMOTE_TO_MULTI`,
/// `INPUT_PREFIX`, `METHOD_PREFIX`, ...). When a `progress` callback returns `false`
/// the operation stops with an error.
///
/// See: [`OGR_L_Intersection`](https://gdal.org/api/vector_c_api.html#_CPPv418OGR_L_Intersection9OGRLayerH9OGRLayerH9OGRLayerHPPc16GDALProgressFuncPv)
impl<E: Engine> VectorLayer<E> {
    fn overlay(
        &mut self,
        op: AlgebraOp,
        method: &mut VectorLayer<E>,
        result: &mut VectorLayer<E>,
        options: &CslStringList,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<()> {
        let input = self.open_mut()?;
        let method_open = method.open_mut()?;
        let result_open = result.open_mut()?;
        let outcome = input.layer.algebra(
            op,
            &mut method_open.layer,
            &mut result_open.layer,
            options,
            progress,
        );
        for open in [input, method_open, result_open] {
            open.layer.reset_reading();
            open.cursor = CursorState::Idle;
        }
        if let Err(e) = outcome {
            let engine_text = self.open_ref()?.layer.last_error_msg();
            let err = match &e {
                GdalError::OgrError { err, .. } => *err,
                _ => OgrErr::Failure,
            };
            return Err(GdalError::OgrError {
                err,
                method_name: op.method_name(),
                msg: if engine_text.is_empty() {
                    engine_msg(&e)
                } else {
                    engine_text
                },
            });
        }
        result.refresh_schema();
        Ok(())
    }

    /// Pieces of the input covered by the method layer, carrying the attributes of both.
    pub fn intersection(
        &mut self,
        method: &mut VectorLayer<E>,
        result: &mut VectorLayer<E>,
        options: &CslStringList,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<()> {
        self.overlay(AlgebraOp::Intersection, method, result, options, progress)
    }

    /// Intersections plus the parts of each layer not covered by the other.
    pub fn union(
        &mut self,
        method: &mut VectorLayer<E>,
        result: &mut VectorLayer<E>,
        options: &CslStringList,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<()> {
        self.overlay(AlgebraOp::Union, method, result, options, progress)
    }

    /// Parts of either layer not covered by the other.
    pub fn sym_difference(
        &mut self,
        method: &mut VectorLayer<E>,
        result: &mut VectorLayer<E>,
        options: &CslStringList,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<()> {
        self.overlay(AlgebraOp::SymDifference, method, result, options, progress)
    }

    /// The input split along the method layer; pieces covered by it also carry its
    /// attributes.
    pub fn identity(
        &mut self,
        method: &mut VectorLayer<E>,
        result: &mut VectorLayer<E>,
        options: &CslStringList,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<()> {
        self.overlay(AlgebraOp::Identity, method, result, options, progress)
    }

    /// The input with the areas of the method layer replaced by the method features.
    pub fn update(
        &mut self,
        method: &mut VectorLayer<E>,
        result: &mut VectorLayer<E>,
        options: &CslStringList,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<()> {
        self.overlay(AlgebraOp::Update, method, result, options, progress)
    }

    /// Parts of the input covered by the method layer, with input attributes only.
    pub fn clip(
        &mut self,
        method: &mut VectorLayer<E>,
        result: &mut VectorLayer<E>,
        options: &CslStringList,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<()> {
        self.overlay(AlgebraOp::Clip, method, result, options, progress)
    }

    /// Parts of the input not covered by the method layer.
    pub fn erase(
        &mut self,
        method: &mut VectorLayer<E>,
        result: &mut VectorLayer<E>,
        options: &CslStringList,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<()> {
        self.overlay(AlgebraOp::Erase, method, result, options, progress)
    }
}

#[cfg(test)]
mod tests {
    use geo::Area;

    use crate::cpl::CslStringList;
    use crate::engine::mem::MemEngine;
    use crate::errors::{GdalError, OgrErr};
    use crate::options::LayerOptions;
    use crate::test_utils::{assert_near, parcels_fixture, MemFixture};
    use crate::vector::{
        FetchSize, FieldDefn, FieldType, FieldValue, GeomFieldDefn, GeometryValue, Row, VectorLayer,
    };

    fn zones(fixture: &MemFixture, wkts: &[&str]) -> VectorLayer<MemEngine> {
        fixture
            .engine()
            .create_layer(
                "zones",
                vec![FieldDefn::new("zone", FieldType::String)],
                vec![GeomFieldDefn::new("", "Polygon")],
            )
            .unwrap();
        let mut layer = VectorLayer::open_with_options(
            fixture.dsn(),
            "zones",
            LayerOptions::read_write(),
        )
        .unwrap();
        for (i, wkt) in wkts.iter().enumerate() {
            let row = Row::new()
                .with("zone", format!("Z{}", i + 1))
                .with("geometry", GeometryValue::Wkt(wkt.to_string()));
            layer.create_feature(&row).unwrap();
        }
        layer
    }

    fn result_layer(fixture: &MemFixture, name: &str) -> VectorLayer<MemEngine> {
        fixture.engine().create_layer(name, vec![], vec![]).unwrap();
        VectorLayer::open_with_options(fixture.dsn(), name, LayerOptions::read_write()).unwrap()
    }

    fn areas(layer: &mut VectorLayer<MemEngine>) -> Vec<f64> {
        let table = layer.fetch(FetchSize::All).unwrap();
        table
            .rows()
            .map(|row| {
                let geometry = row.get("geometry").cloned().unwrap();
                let geometry = geometry.into_geometry().unwrap().to_geo().unwrap();
                geometry.unsigned_area()
            })
            .collect()
    }

    #[test]
    fn test_intersection() {
        let fixture = parcels_fixture("ops-intersection");
        let mut parcels = fixture.open();
        let mut zones = zones(&fixture, &["POLYGON ((5 0, 25 0, 25 10, 5 10, 5 0))"]);
        let mut result = result_layer(&fixture, "result");
        parcels
            .intersection(&mut zones, &mut result, &CslStringList::new(), None)
            .unwrap();

        assert_eq!(
            result.field_names().unwrap(),
            &["owner", "area", "zoned", "zone", "geometry"]
        );
        let mut found = areas(&mut result);
        found.sort_by(f64::total_cmp);
        assert_eq!(found.len(), 3);
        for (area, expected) in found.iter().zip([50.0, 50.0, 100.0]) {
            assert_near!(area, expected, epsilon = 1e-9);
        }
        let table = result.fetch(FetchSize::All).unwrap();
        let zone = table.column("zone").unwrap();
        assert_eq!(zone.get(0), Some(FieldValue::StringValue("Z1".to_string())));
    }

    #[test]
    fn test_erase_and_clip() {
        let fixture = parcels_fixture("ops-erase");
        let mut parcels = fixture.open();
        let mut zones = zones(&fixture, &["POLYGON ((5 0, 25 0, 25 10, 5 10, 5 0))"]);

        let mut erased = result_layer(&fixture, "erased");
        parcels
            .erase(&mut zones, &mut erased, &CslStringList::new(), None)
            .unwrap();
        let total: f64 = areas(&mut erased).iter().sum();
        assert_near!(total, 100.0, epsilon = 1e-9);
        assert_eq!(erased.field_names().unwrap(), &["owner", "area", "zoned", "geometry"]);

        let mut clipped = result_layer(&fixture, "clipped");
        parcels
            .clip(&mut zones, &mut clipped, &CslStringList::new(), None)
            .unwrap();
        let total: f64 = areas(&mut clipped).iter().sum();
        assert_near!(total, 200.0, epsilon = 1e-9);
    }

    #[test]
    fn test_union_reports_progress() {
        let fixture = parcels_fixture("ops-union");
        let mut parcels = fixture.open();
        let mut zones = zones(&fixture, &["POLYGON ((25 0, 40 0, 40 10, 25 10, 25 0))"]);
        let mut result = result_layer(&fixture, "result");
        let mut calls = 0;
        let mut progress = |_: f64, _: &str| {
            calls += 1;
            true
        };
        parcels
            .union(&mut zones, &mut result, &CslStringList::new(), Some(&mut progress))
            .unwrap();
        assert!(calls > 0);
        let total: f64 = areas(&mut result).iter().sum();
        assert_near!(total, 400.0, epsilon = 1e-9);
    }

    #[test]
    fn test_failure_carries_engine_message() {
        let fixture = parcels_fixture("ops-failure");
        let mut parcels = fixture.open();
        let mut zones = zones(&fixture, &["POLYGON ((5 0, 25 0, 25 10, 5 10, 5 0))"]);
        let mut result = result_layer(&fixture, "result");

        let mut cancel = |_: f64, _: &str| false;
        let err = parcels
            .identity(&mut zones, &mut result, &CslStringList::new(), Some(&mut cancel))
            .unwrap_err();
        match err {
            GdalError::OgrError {
                err,
                method_name,
                msg,
            } => {
                assert_eq!(err, OgrErr::Failure);
                assert_eq!(method_name, "OGR_L_Identity");
                assert_eq!(msg, "User terminated");
            }
            other => panic!("unexpected {other:?}"),
        }

        let mut read_only = VectorLayer::<MemEngine>::open(fixture.dsn(), "result").unwrap();
        assert!(matches!(
            parcels.sym_difference(&mut zones, &mut read_only, &CslStringList::new(), None),
            Err(GdalError::OgrError {
                err: OgrErr::UnsupportedOperation,
                method_name: "OGR_L_SymDifference",
                ..
            })
        ));
    }

    #[test]
    fn test_update_replaces_covered_area() {
        let fixture = parcels_fixture("ops-update");
        let mut parcels = fixture.open();
        let mut zones = zones(&fixture, &["POLYGON ((5 0, 25 0, 25 10, 5 10, 5 0))"]);
        let mut result = result_layer(&fixture, "result");
        parcels
            .update(&mut zones, &mut result, &CslStringList::new(), None)
            .unwrap();
        let total: f64 = areas(&mut result).iter().sum();
        assert_near!(total, 300.0, epsilon = 1e-9);
        assert_eq!(result.feature_count().unwrap(), 3);
    }

    #[test]
    fn test_closed_layers() {
        let fixture = parcels_fixture("ops-closed");
        let mut parcels = fixture.open();
        let mut zones = zones(&fixture, &["POLYGON ((5 0, 25 0, 25 10, 5 10, 5 0))"]);
        let mut result = result_layer(&fixture, "result");
        result.close();
        assert!(matches!(
            parcels.intersection(&mut zones, &mut result, &CslStringList::new(), None),
            Err(GdalError::LayerClosed)
        ));
    }
}
