use log::{debug, warn};

use crate::engine::{Engine, EngineLayer, NativeFeature};
use crate::errors::{GdalError, Result};
use crate::vector::codec::RowEncoder;
use crate::vector::layer::{engine_msg, VectorLayer};
use crate::vector::value::Row;

impl<E: Engine> VectorLayer<E> {
    /// Validates `row` against the schema and builds the engine record.
    fn encode_row(&self, row: &Row) -> Result<NativeFeature<E::Geometry>> {
        let open = self.open_ref()?;
        let layer_name = open.layer.name();
        let fid_column = open.layer.fid_column();
        let encoder = RowEncoder {
            schema: &open.schema,
            layer_name: &layer_name,
            fid_column: &fid_column,
            default_geom_name: &self.config.default_geom_col_name,
        };
        encoder.encode(row)
    }

    fn write_error(method_name: &'static str, err: &GdalError) -> GdalError {
        GdalError::Write {
            method_name,
            msg: engine_msg(err),
        }
    }

    /// Inserts `row` as a new feature and returns its identifier.
    ///
    /// Keys must name fields of the layer (or be `FID`, or a name of the geometry
    /// field); fields left out get their default. Nothing is written when the row
    /// does not validate.
    pub fn create_feature(&mut self, row: &Row) -> Result<i64> {
        let mut feature = self.encode_row(row)?;
        let result = self.open_mut()?.layer.create_feature(&mut feature);
        if let Err(e) = result {
            return Err(Self::write_error("OGR_L_CreateFeature", &e));
        }
        self.open_mut()?.last_write_fid = Some(feature.fid);
        debug!("Created feature {}", feature.fid);
        Ok(feature.fid)
    }

    /// Replaces the feature identified by the `FID` of `row`.
    pub fn set_feature(&mut self, row: &Row) -> Result<i64> {
        let feature = self.encode_row(row)?;
        let Some(fid) = feature.fid() else {
            return Err(GdalError::Write {
                method_name: "OGR_L_SetFeature",
                msg: "row has no FID".to_string(),
            });
        };
        let result = self.open_mut()?.layer.set_feature(&feature);
        if let Err(e) = result {
            return Err(Self::write_error("OGR_L_SetFeature", &e));
        }
        self.open_mut()?.last_write_fid = Some(fid);
        Ok(fid)
    }

    /// Replaces the feature identified by the `FID` of `row`, or inserts it when
    /// there is none. Requires the `UpsertFeature` capability.
    pub fn upsert_feature(&mut self, row: &Row) -> Result<i64> {
        let open = self.open_ref()?;
        if !open.layer.test_capability("UpsertFeature") {
            return Err(GdalError::CapabilityUnsupported {
                capability: "UpsertFeature",
                layer_name: open.layer.name(),
            });
        }
        let mut feature = self.encode_row(row)?;
        let result = self.open_mut()?.layer.upsert_feature(&mut feature);
        if let Err(e) = result {
            return Err(Self::write_error("OGR_L_UpsertFeature", &e));
        }
        self.open_mut()?.last_write_fid = Some(feature.fid);
        Ok(feature.fid)
    }

    /// Deletes feature `fid`.
    ///
    /// Returns `false` when the layer is closed, read-only or cannot delete features,
    /// or when the engine refuses.
    pub fn delete_feature(&mut self, fid: i64) -> bool {
        let quiet = self.config.quiet;
        let Some(open) = self.state.as_mut() else {
            return false;
        };
        if !open.access.is_update() || !open.layer.test_capability("DeleteFeature") {
            debug!("Layer '{}' cannot delete features", open.layer.name());
            return false;
        }
        match open.layer.delete_feature(fid) {
            Ok(()) => true,
            Err(e) => {
                if !quiet {
                    warn!("Failed to delete feature {fid}: {}", engine_msg(&e));
                }
                false
            }
        }
    }

    /// Identifier of the feature most recently written through this handle.
    pub fn last_write_fid(&self) -> Option<i64> {
        self.state.as_ref().and_then(|open| open.last_write_fid)
    }

    /// Flushes pending writes to storage.
    pub fn sync_to_disk(&mut self) -> Result<()> {
        let result = self.open_mut()?.layer.sync_to_disk();
        result.map_err(|e| Self::write_error("OGR_L_SyncToDisk", &e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mem::DEFAULT_LAYER_CAPS;
    use crate::engine::LayerCaps;
    use crate::test_utils::parcels_fixture;
    use crate::vector::value::{FieldValue, GeometryValue};
    use crate::vector::FetchSize;

    fn new_parcel() -> Row {
        Row::new()
            .with("owner", "Dunn")
            .with("area", 42.5)
            .with(
                "geometry",
                GeometryValue::Wkt("POLYGON ((30 0, 40 0, 40 10, 30 10, 30 0))".to_string()),
            )
    }

    #[test]
    fn test_create_feature() {
        let fixture = parcels_fixture("write-create");
        let mut layer = fixture.open_rw();
        let fid = layer.create_feature(&new_parcel()).unwrap();
        assert_eq!(fid, 4);
        assert_eq!(layer.last_write_fid(), Some(4));
        let row = layer.feature(fid).unwrap().unwrap();
        assert_eq!(row.get("area"), Some(&FieldValue::RealValue(42.5)));
        assert_eq!(row.get("zoned"), Some(&FieldValue::NullValue));
    }

    #[test]
    fn test_create_on_read_only_layer() {
        let fixture = parcels_fixture("write-readonly");
        let mut layer = fixture.open();
        assert!(matches!(
            layer.create_feature(&new_parcel()),
            Err(GdalError::Write {
                method_name: "OGR_L_CreateFeature",
                ..
            })
        ));
        assert_eq!(layer.last_write_fid(), None);
    }

    #[test]
    fn test_invalid_rows_write_nothing() {
        let fixture = parcels_fixture("write-invalid");
        let mut layer = fixture.open_rw();
        let unmapped = new_parcel().with("colour", "red");
        assert!(matches!(
            layer.create_feature(&unmapped),
            Err(GdalError::UnmappedField { .. })
        ));
        let mismatch = new_parcel().with("zoned", 12.0);
        assert!(matches!(
            layer.create_feature(&mismatch),
            Err(GdalError::TypeMismatch { .. })
        ));
        let null_owner = new_parcel().with("owner", FieldValue::NullValue);
        assert!(matches!(
            layer.create_feature(&null_owner),
            Err(GdalError::NotNullable { .. })
        ));
        assert_eq!(layer.feature_count().unwrap(), 3);
    }

    #[test]
    fn test_engine_rejection_carries_message() {
        let fixture = parcels_fixture("write-reject");
        let mut layer = fixture.open_rw();
        let missing_owner = Row::new().with("area", 1.0);
        match layer.create_feature(&missing_owner) {
            Err(GdalError::Write { msg, .. }) => assert!(msg.contains("owner")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_set_feature() {
        let fixture = parcels_fixture("write-set");
        let mut layer = fixture.open_rw();
        let row = new_parcel().with("FID", 2i64);
        assert_eq!(layer.set_feature(&row).unwrap(), 2);
        let stored = layer.feature(2).unwrap().unwrap();
        assert_eq!(
            stored.get("owner"),
            Some(&FieldValue::StringValue("Dunn".to_string()))
        );
        assert!(matches!(
            layer.set_feature(&new_parcel()),
            Err(GdalError::Write { .. })
        ));
        assert!(layer.set_feature(&new_parcel().with("FID", 77i64)).is_err());
    }

    #[test]
    fn test_upsert_feature() {
        let fixture = parcels_fixture("write-upsert");
        let mut layer = fixture.open_rw();
        assert_eq!(layer.upsert_feature(&new_parcel().with("FID", 1i64)).unwrap(), 1);
        assert_eq!(layer.upsert_feature(&new_parcel().with("FID", 10i64)).unwrap(), 10);
        assert_eq!(layer.feature_count().unwrap(), 4);
    }

    #[test]
    fn test_largest_fid() {
        let fixture = parcels_fixture("write-max-fid");
        let mut layer = fixture.open_rw();
        let row = new_parcel().with("FID", i64::MAX);
        match layer.create_feature(&row) {
            Err(GdalError::Write { msg, .. }) => assert!(msg.contains("out of range")),
            other => panic!("unexpected {other:?}"),
        }
        match layer.upsert_feature(&row) {
            Err(GdalError::Write { msg, .. }) => assert!(msg.contains("out of range")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(layer.feature_count().unwrap(), 3);
        assert_eq!(layer.create_feature(&new_parcel()).unwrap(), 4);
    }

    #[test]
    fn test_upsert_needs_capability() {
        let fixture = parcels_fixture("write-upsert-cap");
        fixture
            .layer()
            .set_capabilities(DEFAULT_LAYER_CAPS.difference(LayerCaps::UPSERT_FEATURE));
        let mut layer = fixture.open_rw();
        assert!(matches!(
            layer.upsert_feature(&new_parcel()),
            Err(GdalError::CapabilityUnsupported {
                capability: "UpsertFeature",
                ..
            })
        ));
    }

    #[test]
    fn test_delete_feature() {
        let fixture = parcels_fixture("write-delete");
        let mut layer = fixture.open();
        assert!(!layer.delete_feature(1));

        layer.reopen(crate::options::Access::ReadWrite).unwrap();
        layer.config_mut().quiet = true;
        assert!(layer.delete_feature(1));
        assert!(!layer.delete_feature(1));
        let table = layer.fetch(FetchSize::All).unwrap();
        assert_eq!(table.num_rows(), 2);
        layer.close();
        assert!(!layer.delete_feature(2));
    }

    #[test]
    fn test_sync_to_disk() {
        let fixture = parcels_fixture("write-sync");
        let mut layer = fixture.open_rw();
        layer.sync_to_disk().unwrap();
        layer.close();
        assert!(matches!(layer.sync_to_disk(), Err(GdalError::LayerClosed)));
    }
}
