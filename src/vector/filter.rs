use std::ops::{Deref, DerefMut};

use log::warn;

use crate::engine::{
    ByteOrder, Engine, EngineGeometry, EngineLayer, Envelope, WkVariant, OGR_GEOMETRY,
};
use crate::errors::{GdalError, Result};
use crate::vector::cursor::CursorState;
use crate::vector::layer::{engine_msg, VectorLayer};
use crate::vector::value::GeometryValue;

/// Fields left out of reads, by position in the schema.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct IgnoredFields {
    pub(crate) fields: Vec<usize>,
    pub(crate) geom_fields: Vec<usize>,
}

impl IgnoredFields {
    pub(crate) fn is_field_ignored(&self, idx: usize) -> bool {
        self.fields.contains(&idx)
    }

    pub(crate) fn is_geom_field_ignored(&self, idx: usize) -> bool {
        self.geom_fields.contains(&idx)
    }
}

/// The spatial filter of a layer.
#[derive(Clone, Debug, PartialEq)]
pub enum SpatialFilter<G> {
    Geometry(G),
    Rect(Envelope),
}

/// Filters as last accepted by the engine.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct FilterState<G> {
    /// Empty when there is no attribute filter.
    pub(crate) attribute: String,
    pub(crate) spatial: Option<SpatialFilter<G>>,
}

impl<G> Default for FilterState<G> {
    fn default() -> Self {
        FilterState {
            attribute: String::new(),
            spatial: None,
        }
    }
}

impl<G: EngineGeometry> FilterState<G> {
    /// Installs these filters on `layer`, replacing whatever it has.
    pub(crate) fn apply<L: EngineLayer<Geometry = G>>(&self, layer: &mut L) -> Result<()> {
        let predicate = (!self.attribute.is_empty()).then_some(self.attribute.as_str());
        layer.set_attribute_filter(predicate)?;
        match &self.spatial {
            None => layer.set_spatial_filter(None),
            Some(SpatialFilter::Geometry(geometry)) => layer.set_spatial_filter(Some(geometry)),
            Some(SpatialFilter::Rect(envelope)) => layer.set_spatial_filter_rect(envelope),
        }
        Ok(())
    }
}

/// `POLYGON` WKT of the outline of `envelope`.
fn envelope_wkt(e: &Envelope) -> String {
    format!(
        "POLYGON (({0} {1},{2} {1},{2} {3},{0} {3},{0} {1}))",
        e.min_x, e.min_y, e.max_x, e.max_y
    )
}

/// Temporarily replaces the filters of a layer; the stored filters are installed again
/// when the guard is dropped, whether the work in between succeeded or not.
pub(crate) struct FilterGuard<'a, E: Engine> {
    layer: &'a mut VectorLayer<E>,
}

impl<'a, E: Engine> FilterGuard<'a, E> {
    /// Replaces the attribute filter with `predicate` and drops the spatial filter.
    pub(crate) fn attribute_only(layer: &'a mut VectorLayer<E>, predicate: &str) -> Result<Self> {
        let mut guard = FilterGuard { layer };
        {
            let open = guard.layer.open_mut()?;
            open.layer.set_spatial_filter(None);
            open.layer
                .set_attribute_filter(Some(predicate))
                .map_err(|e| GdalError::FilterSyntax {
                    predicate: predicate.to_string(),
                    msg: engine_msg(&e),
                })?;
        }
        Ok(guard)
    }
}

impl<E: Engine> Deref for FilterGuard<'_, E> {
    type Target = VectorLayer<E>;

    fn deref(&self) -> &Self::Target {
        self.layer
    }
}

impl<E: Engine> DerefMut for FilterGuard<'_, E> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.layer
    }
}

impl<E: Engine> Drop for FilterGuard<'_, E> {
    fn drop(&mut self) {
        let VectorLayer { state, config, .. } = &mut *self.layer;
        if let Some(open) = state.as_mut() {
            if let Err(e) = open.filters.apply(&mut open.layer) {
                // nothing else can report from here
                if !config.quiet {
                    warn!("Unable to restore layer filters: {e}");
                }
            }
            open.layer.reset_reading();
            open.cursor = CursorState::Idle;
        }
    }
}

impl<E: Engine> VectorLayer<E> {
    /// The current attribute filter, empty when there is none.
    pub fn attribute_filter(&self) -> Result<&str> {
        Ok(&self.open_ref()?.filters.attribute)
    }

    /// Sets the attribute filter to `predicate`, an OGR SQL `WHERE` clause. An empty
    /// predicate clears the filter.
    ///
    /// The predicate is validated by the engine. When it is rejected the previous
    /// filter stays in effect and [`GdalError::FilterSyntax`] is returned.
    pub fn set_attribute_filter(&mut self, predicate: &str) -> Result<()> {
        let quiet = self.config.quiet;
        let open = self.open_mut()?;
        let predicate = predicate.trim();
        let requested = (!predicate.is_empty()).then_some(predicate);
        match open.layer.set_attribute_filter(requested) {
            Ok(()) => {
                open.filters.attribute = predicate.to_string();
                open.cursor = CursorState::Idle;
                Ok(())
            }
            Err(e) => {
                // engines may have dropped the previous filter along with the new one
                let previous =
                    (!open.filters.attribute.is_empty()).then_some(open.filters.attribute.as_str());
                if let Err(restore) = open.layer.set_attribute_filter(previous) {
                    if !quiet {
                        warn!("Unable to restore attribute filter: {restore}");
                    }
                }
                Err(GdalError::FilterSyntax {
                    predicate: predicate.to_string(),
                    msg: engine_msg(&e),
                })
            }
        }
    }

    pub fn clear_attribute_filter(&mut self) -> Result<()> {
        self.set_attribute_filter("")
    }

    pub fn spatial_filter(&self) -> Result<Option<&SpatialFilter<E::Geometry>>> {
        Ok(self.open_ref()?.filters.spatial.as_ref())
    }

    /// The spatial filter as WKT; a rectangle is given as its outline polygon.
    pub fn spatial_filter_wkt(&self) -> Result<Option<String>> {
        match self.spatial_filter()? {
            None => Ok(None),
            Some(SpatialFilter::Geometry(geometry)) => {
                Ok(Some(geometry.wkt(WkVariant::Legacy)?))
            }
            Some(SpatialFilter::Rect(envelope)) => Ok(Some(envelope_wkt(envelope))),
        }
    }

    /// Restricts reads to features whose geometry intersects `geometry`.
    pub fn set_spatial_filter(&mut self, geometry: &E::Geometry) -> Result<()> {
        let open = self.open_mut()?;
        open.layer.set_spatial_filter(Some(geometry));
        open.filters.spatial = Some(SpatialFilter::Geometry(geometry.clone()));
        open.cursor = CursorState::Idle;
        Ok(())
    }

    /// Parses `wkt` and uses it as the spatial filter. Invalid WKT leaves the current
    /// filter in place.
    pub fn set_spatial_filter_wkt(&mut self, wkt: &str) -> Result<()> {
        let geometry = <E::Geometry as EngineGeometry>::from_wkt(wkt)?;
        self.set_spatial_filter(&geometry)
    }

    pub fn set_spatial_filter_geo(&mut self, geometry: &geo_types::Geometry<f64>) -> Result<()> {
        let GeometryValue::Wkb(wkb) = GeometryValue::from_geo(geometry, ByteOrder::Lsb)? else {
            return Err(GdalError::BadArgument(
                "geometry could not be encoded".to_string(),
            ));
        };
        let geometry = <E::Geometry as EngineGeometry>::from_wkb(&wkb)?;
        self.set_spatial_filter(&geometry)
    }

    /// Restricts reads to features whose geometry intersects the rectangle.
    pub fn set_spatial_filter_rect(&mut self, envelope: Envelope) -> Result<()> {
        if !envelope.is_valid() {
            return Err(GdalError::BadArgument(format!(
                "invalid spatial filter rectangle {:?}",
                envelope.to_array()
            )));
        }
        let open = self.open_mut()?;
        open.layer.set_spatial_filter_rect(&envelope);
        open.filters.spatial = Some(SpatialFilter::Rect(envelope));
        open.cursor = CursorState::Idle;
        Ok(())
    }

    pub fn clear_spatial_filter(&mut self) -> Result<()> {
        let open = self.open_mut()?;
        open.layer.set_spatial_filter(None);
        open.filters.spatial = None;
        open.cursor = CursorState::Idle;
        Ok(())
    }

    /// Fields left out of reads.
    ///
    /// Geometry fields are named as in [`VectorLayer::field_names`].
    pub fn ignored_fields(&self) -> Result<Vec<String>> {
        let open = self.open_ref()?;
        let fields = open.ignored.fields.iter().map(|&idx| open.schema.fields[idx].name.clone());
        let geom_fields = open.ignored.geom_fields.iter().map(|&idx| {
            open.schema.geom_fields[idx]
                .display_name(&self.config.default_geom_col_name)
                .to_string()
        });
        Ok(fields.chain(geom_fields).collect())
    }

    /// Leaves the named fields out of subsequent reads. An empty list reads every
    /// field again.
    ///
    /// Geometry fields are named as in [`VectorLayer::field_names`]; `OGR_GEOMETRY`
    /// also names the first geometry field.
    pub fn set_ignored_fields<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        let default_geom_name = self.config.default_geom_col_name.clone();
        let open = self.open_mut()?;
        if !open.layer.test_capability("IgnoreFields") {
            return Err(GdalError::CapabilityUnsupported {
                capability: "IgnoreFields",
                layer_name: open.layer.name(),
            });
        }
        let mut ignored = IgnoredFields::default();
        for name in names.iter().map(|n| n.as_ref()) {
            if let Some(idx) = open.schema.field_index(name) {
                if !ignored.fields.contains(&idx) {
                    ignored.fields.push(idx);
                }
                continue;
            }
            let geom_idx = if name.eq_ignore_ascii_case(OGR_GEOMETRY) {
                (!open.schema.geom_fields.is_empty()).then_some(0)
            } else {
                open.schema.geom_field_index(name, &default_geom_name)
            };
            match geom_idx {
                Some(idx) if !ignored.geom_fields.contains(&idx) => ignored.geom_fields.push(idx),
                Some(_) => {}
                None => {
                    return Err(GdalError::UnmappedField {
                        field_name: name.to_string(),
                        layer_name: open.layer.name(),
                    })
                }
            }
        }
        ignored.fields.sort_unstable();
        ignored.geom_fields.sort_unstable();

        let engine_names: Vec<&str> = ignored
            .fields
            .iter()
            .map(|&idx| open.schema.fields[idx].name.as_str())
            .chain(ignored.geom_fields.iter().map(|&idx| {
                match open.schema.geom_fields[idx].name.as_str() {
                    "" => OGR_GEOMETRY,
                    name => name,
                }
            }))
            .collect();
        open.layer.set_ignored_fields(&engine_names)?;
        open.ignored = ignored;
        Ok(())
    }

    /// Reads only the named fields: every other attribute and geometry field is
    /// ignored.
    pub fn set_selected_fields<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        let default_geom_name = self.config.default_geom_col_name.clone();
        let open = self.open_ref()?;
        let mut selected_fields = Vec::with_capacity(names.len());
        let mut selected_geom_fields = Vec::new();
        for name in names.iter().map(|n| n.as_ref()) {
            if let Some(idx) = open.schema.field_index(name) {
                selected_fields.push(idx);
            } else if let Some(idx) = open.schema.geom_field_index(name, &default_geom_name) {
                selected_geom_fields.push(idx);
            } else if name.eq_ignore_ascii_case(OGR_GEOMETRY) && !open.schema.geom_fields.is_empty() {
                selected_geom_fields.push(0);
            } else {
                return Err(GdalError::UnmappedField {
                    field_name: name.to_string(),
                    layer_name: open.layer.name(),
                });
            }
        }
        let fields = &open.schema.fields;
        let geom_fields = &open.schema.geom_fields;
        let ignored: Vec<String> = (0..fields.len())
            .filter(|idx| !selected_fields.contains(idx))
            .map(|idx| fields[idx].name.clone())
            .chain(
                (0..geom_fields.len())
                    .filter(|idx| !selected_geom_fields.contains(idx))
                    .map(|idx| geom_fields[idx].display_name(&default_geom_name).to_string()),
            )
            .collect();
        self.set_ignored_fields(&ignored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mem::{MemGeometry, DEFAULT_LAYER_CAPS};
    use crate::engine::LayerCaps;
    use crate::test_utils::parcels_fixture;
    use crate::vector::FetchSize;

    #[test]
    fn test_attribute_filter() {
        let fixture = parcels_fixture("filter-attr");
        let mut layer = fixture.open();
        layer.set_attribute_filter("area > 100").unwrap();
        assert_eq!(layer.attribute_filter().unwrap(), "area > 100");
        assert_eq!(layer.feature_count().unwrap(), 1);
        layer.clear_attribute_filter().unwrap();
        assert_eq!(layer.feature_count().unwrap(), 3);
    }

    #[test]
    fn test_bad_predicate_keeps_previous_filter() {
        let fixture = parcels_fixture("filter-bad");
        let mut layer = fixture.open();
        layer.set_attribute_filter("owner = 'Ames'").unwrap();
        let err = layer.set_attribute_filter("no_such_field = 1").unwrap_err();
        assert!(matches!(err, GdalError::FilterSyntax { .. }));
        assert_eq!(layer.attribute_filter().unwrap(), "owner = 'Ames'");
        assert_eq!(layer.feature_count().unwrap(), 1);
    }

    #[test]
    fn test_spatial_filters() {
        let fixture = parcels_fixture("filter-spatial");
        let mut layer = fixture.open();
        layer
            .set_spatial_filter_rect(Envelope::new(12.0, 2.0, 14.0, 4.0))
            .unwrap();
        assert_eq!(layer.feature_count().unwrap(), 1);
        assert_eq!(
            layer.spatial_filter_wkt().unwrap().as_deref(),
            Some("POLYGON ((12 2,14 2,14 4,12 4,12 2))")
        );
        layer.set_spatial_filter_wkt("POINT (25 5)").unwrap();
        assert_eq!(layer.feature_count().unwrap(), 1);
        layer.clear_spatial_filter().unwrap();
        assert_eq!(layer.feature_count().unwrap(), 3);
        assert!(layer.spatial_filter().unwrap().is_none());
    }

    #[test]
    fn test_invalid_spatial_filter() {
        let fixture = parcels_fixture("filter-spatial-bad");
        let mut layer = fixture.open();
        layer
            .set_spatial_filter_rect(Envelope::new(0.0, 0.0, 5.0, 5.0))
            .unwrap();
        assert!(matches!(
            layer.set_spatial_filter_wkt("POLYGON ((0 0, 1"),
            Err(GdalError::GeometryParse { .. })
        ));
        assert!(matches!(
            layer.set_spatial_filter_rect(Envelope::new(5.0, 0.0, 0.0, 5.0)),
            Err(GdalError::BadArgument(_))
        ));
        assert!(matches!(
            layer.spatial_filter().unwrap(),
            Some(SpatialFilter::Rect(_))
        ));
    }

    #[test]
    fn test_spatial_filter_geo() {
        let fixture = parcels_fixture("filter-geo");
        let mut layer = fixture.open();
        let point: geo_types::Geometry<f64> = geo_types::point!(x: 5.0, y: 5.0).into();
        layer.set_spatial_filter_geo(&point).unwrap();
        assert_eq!(
            layer.spatial_filter().unwrap(),
            Some(&SpatialFilter::Geometry(MemGeometry::new(point)))
        );
        assert_eq!(layer.feature_count().unwrap(), 1);
    }

    #[test]
    fn test_ignored_fields_change_next_fetch() {
        let fixture = parcels_fixture("filter-ignored");
        let mut layer = fixture.open();
        let before = layer.fetch(FetchSize::Rows(1)).unwrap();
        assert_eq!(before.column_names(), ["FID", "owner", "area", "zoned", "geometry"]);

        layer.set_ignored_fields(&["area", "geometry"]).unwrap();
        assert_eq!(layer.ignored_fields().unwrap(), ["area", "geometry"]);
        assert_eq!(before.num_columns(), 5);
        let after = layer.fetch(FetchSize::Rows(1)).unwrap();
        assert_eq!(after.column_names(), ["FID", "owner", "zoned"]);

        layer.set_ignored_fields::<&str>(&[]).unwrap();
        layer.reset_reading().unwrap();
        assert_eq!(layer.fetch(FetchSize::Rows(1)).unwrap().num_columns(), 5);
    }

    #[test]
    fn test_ignore_geometry_alias_any_case() {
        let fixture = parcels_fixture("filter-ignored-alias");
        let mut layer = fixture.open();
        layer.set_ignored_fields(&["ogr_geometry", "area", "area"]).unwrap();
        assert_eq!(layer.ignored_fields().unwrap(), ["area", "geometry"]);
        let table = layer.fetch(FetchSize::All).unwrap();
        assert_eq!(table.column_names(), ["FID", "owner", "zoned"]);

        layer.config_mut().default_geom_col_name = "shape".to_string();
        assert_eq!(layer.ignored_fields().unwrap(), ["area", "shape"]);
        layer.reset_reading().unwrap();
        let table = layer.fetch(FetchSize::All).unwrap();
        assert_eq!(table.column_names(), ["FID", "owner", "zoned"]);
    }

    #[test]
    fn test_selected_fields() {
        let fixture = parcels_fixture("filter-selected");
        let mut layer = fixture.open();
        layer.set_selected_fields(&["owner", "OGR_GEOMETRY"]).unwrap();
        assert_eq!(layer.ignored_fields().unwrap(), ["area", "zoned"]);
        let table = layer.fetch(FetchSize::All).unwrap();
        assert_eq!(table.column_names(), ["FID", "owner", "geometry"]);

        assert!(matches!(
            layer.set_selected_fields(&["colour"]),
            Err(GdalError::UnmappedField { .. })
        ));
    }

    #[test]
    fn test_ignored_fields_need_capability() {
        let fixture = parcels_fixture("filter-nocap");
        fixture
            .layer()
            .set_capabilities(DEFAULT_LAYER_CAPS.difference(LayerCaps::IGNORE_FIELDS));
        let mut layer = fixture.open();
        assert!(matches!(
            layer.set_selected_fields(&["owner"]),
            Err(GdalError::CapabilityUnsupported {
                capability: "IgnoreFields",
                ..
            })
        ));
        assert!(layer.ignored_fields().unwrap().is_empty());
    }
}
