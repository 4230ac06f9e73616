use std::fmt::{self, Debug, Formatter};

use log::{debug, warn};

use crate::config::ReadConfig;
use crate::cpl::CslStringList;
use crate::engine::{DatasetCaps, Engine, EngineGeometry, EngineLayer, Envelope, LayerCaps};
use crate::errors::{GdalError, Result, Warning};
use crate::metadata::Metadata;
use crate::options::{Access, LayerOptions, LayerSource};
use crate::vector::cursor::CursorState;
use crate::vector::defn::{inspect, LayerSchema};
use crate::vector::domain::DomainInfo;
use crate::vector::filter::{FilterState, IgnoredFields, SpatialFilter};

/// Logs `warning` unless the configuration is quiet.
pub(crate) fn report(config: &ReadConfig, warning: &Warning) {
    if !config.quiet {
        warn!("{warning}");
    }
}

/// The message an engine attached to `err`.
pub(crate) fn engine_msg(err: &GdalError) -> String {
    match err {
        GdalError::OgrError { msg, .. } => msg.clone(),
        other => other.to_string(),
    }
}

/// Everything that only exists while the layer is open.
pub(crate) struct OpenLayer<E: Engine> {
    pub(crate) dataset: E,
    pub(crate) layer: E::Layer,
    pub(crate) access: Access,
    pub(crate) schema: LayerSchema,
    pub(crate) field_names: Vec<String>,
    pub(crate) filters: FilterState<E::Geometry>,
    pub(crate) ignored: IgnoredFields,
    pub(crate) cursor: CursorState,
    pub(crate) last_write_fid: Option<i64>,
}

/// A vector layer opened on a data source of the engine `E`, either by name or as the
/// result set of an SQL query.
///
/// The handle owns the engine data source and layer. Reads are marshaled into
/// [`Row`](crate::vector::Row)s and [`ResultTable`](crate::vector::ResultTable)s as set
/// up by its [`ReadConfig`]; writes are validated against the layer schema.
///
/// ```
/// use gdal_vector::engine::mem::MemEngine;
/// use gdal_vector::options::LayerOptions;
/// use gdal_vector::vector::{FetchSize, FieldDefn, FieldType, Row, VectorLayer};
///
/// # fn main() -> gdal_vector::errors::Result<()> {
/// let mut ds = MemEngine::create("layer-doc")?;
/// ds.create_layer("towns", vec![FieldDefn::new("name", FieldType::String)], vec![])?;
///
/// let mut layer = VectorLayer::<MemEngine>::open_with_options(
///     "layer-doc",
///     "towns",
///     LayerOptions::read_write(),
/// )?;
/// let fid = layer.create_feature(&Row::new().with("name", "Ely"))?;
/// let table = layer.fetch(FetchSize::All)?;
/// assert_eq!(table.num_rows(), 1);
/// assert_eq!(table.row(0).and_then(|row| row.fid()), Some(fid));
/// # MemEngine::remove("layer-doc");
/// # Ok(())
/// # }
/// ```
pub struct VectorLayer<E: Engine> {
    dsn: String,
    source: LayerSource,
    options: LayerOptions,
    pub(crate) config: ReadConfig,
    pub(crate) interrupt: Option<Box<dyn FnMut() -> bool>>,
    pub(crate) state: Option<OpenLayer<E>>,
}

impl<E: Engine> VectorLayer<E> {
    /// Opens `source` read-only on the data source `dsn`.
    ///
    /// `source` is either a layer name or an SQL `SELECT` statement, see
    /// [`LayerSource::detect`].
    pub fn open<S: Into<LayerSource>>(dsn: &str, source: S) -> Result<Self> {
        Self::open_with_options(dsn, source, LayerOptions::default())
    }

    pub fn open_with_options<S: Into<LayerSource>>(
        dsn: &str,
        source: S,
        options: LayerOptions,
    ) -> Result<Self> {
        let mut layer = VectorLayer {
            dsn: dsn.to_string(),
            source: source.into(),
            options,
            config: ReadConfig::default(),
            interrupt: None,
            state: None,
        };
        layer.state = Some(layer.open_handle(layer.options.access)?);
        Ok(layer)
    }

    fn open_handle(&self, access: Access) -> Result<OpenLayer<E>> {
        let dsn = self.dsn.as_str();
        let open_failure = |msg: String| GdalError::OpenFailure {
            dsn: dsn.to_string(),
            msg,
        };
        let mut dataset =
            E::open(dsn, access, &self.options.open_options).map_err(|e| match e {
                e @ GdalError::OpenFailure { .. } => e,
                other => open_failure(engine_msg(&other)),
            })?;
        let spatial_filter = self
            .options
            .spatial_filter
            .as_deref()
            .map(<E::Geometry as EngineGeometry>::from_wkt)
            .transpose()?;

        let mut filters = FilterState::default();
        let mut layer = match &self.source {
            LayerSource::Name(name) => {
                let mut layer = dataset
                    .layer_by_name(name)
                    .map_err(|e| open_failure(engine_msg(&e)))?;
                if let Some(geometry) = spatial_filter {
                    layer.set_spatial_filter(Some(&geometry));
                    filters.spatial = Some(SpatialFilter::Geometry(geometry));
                }
                layer
            }
            LayerSource::Sql(query) => dataset
                .execute_sql(query, spatial_filter.as_ref(), self.options.dialect.as_deref())
                .map_err(|e| open_failure(engine_msg(&e)))?
                .ok_or_else(|| open_failure(format!("'{query}' did not produce a result set")))?,
        };
        layer.reset_reading();

        let (schema, warnings) = inspect(&layer, &self.config.default_geom_col_name);
        for warning in &warnings {
            report(&self.config, warning);
        }
        let field_names = schema.field_names(&self.config.default_geom_col_name);
        debug!(
            "Opened layer '{}' on '{dsn}' ({access:?}, {} fields)",
            layer.name(),
            field_names.len()
        );
        Ok(OpenLayer {
            dataset,
            layer,
            access,
            schema,
            field_names,
            filters,
            ignored: IgnoredFields::default(),
            cursor: CursorState::Idle,
            last_write_fid: None,
        })
    }

    /// Closes the layer, then reopens it with `access`.
    ///
    /// The schema is read again and the cursor, filters and ignored fields start over
    /// from the open options.
    pub fn reopen(&mut self, access: Access) -> Result<()> {
        self.close();
        self.options.access = access;
        self.state = Some(self.open_handle(access)?);
        Ok(())
    }

    /// Releases the layer (and its SQL result set) before the data source. Closing a
    /// closed layer does nothing.
    pub fn close(&mut self) {
        if let Some(open) = self.state.take() {
            let OpenLayer {
                mut dataset, layer, ..
            } = open;
            if self.source.is_sql() {
                dataset.release_result_set(layer);
            } else {
                drop(layer);
            }
            drop(dataset);
            debug!("Closed layer '{}' on '{}'", self.source.as_str(), self.dsn);
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    pub(crate) fn open_ref(&self) -> Result<&OpenLayer<E>> {
        self.state.as_ref().ok_or(GdalError::LayerClosed)
    }

    pub(crate) fn open_mut(&mut self) -> Result<&mut OpenLayer<E>> {
        self.state.as_mut().ok_or(GdalError::LayerClosed)
    }

    /// Reads the schema again, after the engine changed it.
    pub(crate) fn refresh_schema(&mut self) {
        let VectorLayer { state, config, .. } = self;
        if let Some(open) = state.as_mut() {
            let (schema, warnings) = inspect(&open.layer, &config.default_geom_col_name);
            for warning in &warnings {
                report(config, warning);
            }
            open.field_names = schema.field_names(&config.default_geom_col_name);
            open.schema = schema;
        }
    }

    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    pub fn source(&self) -> &LayerSource {
        &self.source
    }

    /// The access the layer is currently opened with.
    pub fn access(&self) -> Access {
        self.state
            .as_ref()
            .map_or(self.options.access, |open| open.access)
    }

    pub fn config(&self) -> &ReadConfig {
        &self.config
    }

    /// Mutable access to the read configuration; changes apply from the next read.
    pub fn config_mut(&mut self) -> &mut ReadConfig {
        &mut self.config
    }

    pub fn set_config(&mut self, config: ReadConfig) {
        self.config = config;
    }

    /// Installs a handler polled during bulk reads; returning `true` aborts the read
    /// with [`GdalError::Interrupted`].
    pub fn set_interrupt_handler<F: FnMut() -> bool + 'static>(&mut self, handler: F) {
        self.interrupt = Some(Box::new(handler));
    }

    pub fn clear_interrupt_handler(&mut self) {
        self.interrupt = None;
    }

    pub fn name(&self) -> Result<String> {
        Ok(self.open_ref()?.layer.name())
    }

    /// Geometry type of the first geometry field, e.g. `Multi Polygon`.
    pub fn geometry_type(&self) -> Result<String> {
        Ok(self.open_ref()?.layer.geometry_type())
    }

    /// Name of the geometry column, empty when the engine does not name it.
    pub fn geometry_column(&self) -> Result<String> {
        Ok(self.open_ref()?.layer.geometry_column())
    }

    /// Name of the identifier column, empty when identifiers are implicit.
    pub fn fid_column(&self) -> Result<String> {
        Ok(self.open_ref()?.layer.fid_column())
    }

    /// Spatial reference of the layer as WKT.
    ///
    /// Layers without a usable spatial reference give `Ok(None)` and a warning.
    pub fn spatial_ref(&self) -> Result<Option<String>> {
        let open = self.open_ref()?;
        match open.layer.spatial_ref() {
            Ok(wkt) if !wkt.is_empty() => Ok(Some(wkt)),
            Ok(_) => Ok(None),
            Err(e) => {
                report(
                    &self.config,
                    &Warning::MissingSpatialRef {
                        field_name: open.layer.geometry_column(),
                        msg: engine_msg(&e),
                    },
                );
                Ok(None)
            }
        }
    }

    /// Extent of the layer. Without `force`, fails when the engine cannot compute it
    /// cheaply.
    pub fn extent(&mut self, force: bool) -> Result<Envelope> {
        self.open_mut()?.layer.extent(force)
    }

    /// Number of features passing the current filters, scanning the layer if the
    /// engine has no faster way. `-1` when the count is unknown.
    pub fn feature_count(&mut self) -> Result<i64> {
        Ok(self.open_mut()?.layer.feature_count(true))
    }

    /// Tests a layer capability by its OGR name, e.g. `RandomRead`. A closed layer has
    /// no capabilities.
    pub fn test_capability(&self, capability: &str) -> bool {
        self.state
            .as_ref()
            .is_some_and(|open| open.layer.test_capability(capability))
    }

    pub fn capabilities(&self) -> LayerCaps {
        LayerCaps::named()
            .filter(|(_, name)| self.test_capability(name))
            .fold(LayerCaps::empty(), |caps, (flag, _)| caps.union(flag))
    }

    pub fn dataset_capabilities(&self) -> DatasetCaps {
        let Some(open) = self.state.as_ref() else {
            return DatasetCaps::empty();
        };
        DatasetCaps::named()
            .filter(|(_, name)| open.dataset.test_capability(name))
            .fold(DatasetCaps::empty(), |caps, (flag, _)| caps.union(flag))
    }

    /// Attribute and geometry field definitions, read from the engine.
    pub fn describe_fields(&self) -> Result<LayerSchema> {
        let open = self.open_ref()?;
        let (schema, warnings) = inspect(&open.layer, &self.config.default_geom_col_name);
        for warning in &warnings {
            report(&self.config, warning);
        }
        Ok(schema)
    }

    /// Attribute field names followed by geometry field names, as read at open time.
    pub fn field_names(&self) -> Result<&[String]> {
        Ok(&self.open_ref()?.field_names)
    }

    /// Describes the field domain `name` of the data source, `None` when there is no
    /// such domain.
    pub fn describe_domain(&self, name: &str) -> Result<Option<DomainInfo>> {
        let open = self.open_ref()?;
        Ok(open
            .dataset
            .field_domain(name)
            .map(|domain| DomainInfo::from(&domain)))
    }
}

impl<E: Engine> Metadata for VectorLayer<E> {
    fn metadata(&self, domain: &str) -> Result<CslStringList> {
        Ok(self.open_ref()?.layer.metadata(domain))
    }

    fn set_metadata(&mut self, metadata: &CslStringList, domain: &str) -> Result<()> {
        self.open_mut()?.layer.set_metadata(metadata, domain)
    }

    fn metadata_item(&self, key: &str, domain: &str) -> Result<Option<String>> {
        Ok(self.open_ref()?.layer.metadata_item(key, domain))
    }
}

impl<E: Engine> Debug for VectorLayer<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorLayer")
            .field("dsn", &self.dsn)
            .field("source", &self.source)
            .field("access", &self.access())
            .field("open", &self.is_open())
            .finish()
    }
}

impl<E: Engine> Drop for VectorLayer<E> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mem::MemEngine;
    use crate::test_utils::{parcels_fixture, MemFixture};
    use crate::vector::{FieldDefn, FieldDomain, FieldType, GeomFieldDefn};

    #[test]
    fn test_open_missing_layer() {
        let fixture = MemFixture::new("layer-missing");
        let err = VectorLayer::<MemEngine>::open(fixture.dsn(), "nope").unwrap_err();
        assert!(matches!(err, GdalError::OpenFailure { .. }));
        let err = VectorLayer::<MemEngine>::open("layer-no-such-dsn", "nope").unwrap_err();
        assert!(matches!(err, GdalError::OpenFailure { .. }));
    }

    #[test]
    fn test_close_is_idempotent() {
        let fixture = parcels_fixture("layer-close");
        let before = MemEngine::handle_count(fixture.dsn());
        let mut layer = fixture.open();
        assert!(MemEngine::handle_count(fixture.dsn()) > before);
        layer.close();
        layer.close();
        assert!(!layer.is_open());
        assert_eq!(MemEngine::handle_count(fixture.dsn()), before);
        assert!(matches!(layer.name(), Err(GdalError::LayerClosed)));
        assert!(matches!(layer.fetch(crate::vector::FetchSize::All), Err(GdalError::LayerClosed)));
        assert!(!layer.test_capability("RandomRead"));
    }

    #[test]
    fn test_sql_result_set_released() {
        let fixture = parcels_fixture("layer-sql");
        let before = MemEngine::handle_count(fixture.dsn());
        let mut layer = VectorLayer::<MemEngine>::open(
            fixture.dsn(),
            "SELECT * FROM parcels WHERE owner = 'Ames'",
        )
        .unwrap();
        assert!(layer.source().is_sql());
        assert_eq!(MemEngine::result_set_count(fixture.dsn()), 1);
        assert_eq!(layer.feature_count().unwrap(), 1);
        drop(layer);
        assert_eq!(MemEngine::result_set_count(fixture.dsn()), 0);
        assert_eq!(MemEngine::handle_count(fixture.dsn()), before);
    }

    #[test]
    fn test_layer_info() {
        let fixture = parcels_fixture("layer-info");
        let mut layer = fixture.open();
        assert_eq!(layer.name().unwrap(), "parcels");
        assert_eq!(layer.geometry_type().unwrap(), "Polygon");
        assert_eq!(layer.fid_column().unwrap(), "");
        assert_eq!(
            layer.field_names().unwrap(),
            ["owner", "area", "zoned", "geometry"]
        );
        let extent = layer.extent(true).unwrap();
        assert_eq!(extent.to_array(), [0.0, 0.0, 30.0, 10.0]);
        assert!(layer.capabilities().contains(LayerCaps::RANDOM_READ));
        assert!(!layer.capabilities().contains(LayerCaps::SEQUENTIAL_WRITE));
    }

    #[test]
    fn test_missing_spatial_ref_is_not_an_error() {
        let fixture = parcels_fixture("layer-srs");
        let layer = fixture.open();
        assert_eq!(layer.spatial_ref().unwrap(), None);
        let schema = layer.describe_fields().unwrap();
        assert_eq!(schema.geom_fields[0].srs, None);
    }

    #[test]
    fn test_spatial_ref() {
        let fixture = MemFixture::new("layer-srs-set");
        fixture
            .engine()
            .create_layer(
                "pts",
                vec![],
                vec![GeomFieldDefn::new("geom", "Point").with_srs("GEOGCS[\"WGS 84\"]")],
            )
            .unwrap();
        let layer = VectorLayer::<MemEngine>::open(fixture.dsn(), "pts").unwrap();
        assert_eq!(
            layer.spatial_ref().unwrap().as_deref(),
            Some("GEOGCS[\"WGS 84\"]")
        );
        assert_eq!(layer.field_names().unwrap(), ["geom"]);
    }

    #[test]
    fn test_reopen_read_write() {
        let fixture = parcels_fixture("layer-reopen");
        let mut layer = fixture.open();
        layer.set_attribute_filter("area > 100").unwrap();
        layer.reopen(Access::ReadWrite).unwrap();
        assert_eq!(layer.access(), Access::ReadWrite);
        assert_eq!(layer.attribute_filter().unwrap(), "");
        assert!(layer.capabilities().contains(LayerCaps::SEQUENTIAL_WRITE));
    }

    #[test]
    fn test_describe_domain() {
        let fixture = parcels_fixture("layer-domain");
        fixture.engine().add_field_domain(FieldDomain::coded(
            "zoning",
            FieldType::String,
            &[("R", Some("Residential")), ("C", None)],
        ));
        let layer = fixture.open();
        let info = layer.describe_domain("zoning").unwrap().unwrap();
        assert_eq!(info.domain_type, "coded");
        assert_eq!(info.coded_value("R"), Some("Residential"));
        assert!(layer.describe_domain("missing").unwrap().is_none());
    }

    #[test]
    fn test_metadata() {
        let fixture = parcels_fixture("layer-metadata");
        let mut layer = fixture.open();
        layer.set_metadata_item("SOURCE", "survey", "").unwrap();
        assert_eq!(
            layer.metadata_item("SOURCE", "").unwrap().as_deref(),
            Some("survey")
        );
        assert_eq!(layer.metadata("").unwrap().len(), 1);
        assert!(layer.metadata_item("MISSING", "").unwrap().is_none());
    }

    #[test]
    fn test_schema_without_geometry() {
        let fixture = MemFixture::new("layer-nogeom");
        fixture
            .engine()
            .create_layer("plain", vec![FieldDefn::new("id", FieldType::Integer)], vec![])
            .unwrap();
        let layer = VectorLayer::<MemEngine>::open(fixture.dsn(), "plain").unwrap();
        assert_eq!(layer.field_names().unwrap(), ["id"]);
        assert_eq!(layer.geometry_type().unwrap(), "None");
    }
}
