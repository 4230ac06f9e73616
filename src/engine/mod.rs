//! The vector engine contract
//!
//! Everything below the cursor and marshaling layer (drivers, predicate evaluation,
//! spatial filtering, geometry parsing and serialization, layer algebra) is performed by
//! an engine. This module fixes the handle-based surface the rest of the crate consumes:
//!
//! * [`Engine`]: an open data source with its layers, SQL result sets, field domains
//!   and transactions.
//! * [`EngineLayer`]: one layer, from schema and filters to writes and layer algebra.
//! * [`EngineGeometry`]: a geometry value owned by the engine.
//!
//! Records cross the boundary as [`NativeFeature`]s holding one [`NativeField`] per
//! schema field, i.e. the engine's own typed values (broken-down date/time with a
//! timezone flag, 32-bit integers, ...). Conversion into host values is the job of the
//! `vector::codec` module.
//!
//! Two engines ship with the crate: [`mem`], an in-process reference engine, and
//! (with the `gdal` feature) `gdal`, which binds GDAL/OGR through `gdal-sys`.

use bitflags::bitflags;

use crate::cpl::CslStringList;
use crate::errors::Result;
use crate::options::Access;
use crate::vector::{FieldDefn, FieldDomain, GeomFieldDefn};

#[cfg(feature = "gdal")]
pub mod gdal;
pub mod mem;

/// `OGRNullFID`: the identifier of a feature that has not been written yet.
pub const NULL_FID: i64 = -1;

/// Name under which OGR exposes an unnamed geometry field in ignore lists and SQL.
pub const OGR_GEOMETRY: &str = "OGR_GEOMETRY";

/// A planar bounding box.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Envelope {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// `[xmin, ymin, xmax, ymax]`
    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }

    pub fn is_valid(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
            && self.min_x <= self.max_x
            && self.min_y <= self.max_y
    }

    pub fn intersects(&self, other: &Envelope) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }
}

/// Broken-down date/time as stored by OGR (`OGRField::Date`).
///
/// `tz_flag` follows OGR: 0 unknown, 1 local time, 100 UTC, and `100 + n` for an
/// offset of `n * 15` minutes east of UTC.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct OgrDateTime {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: f32,
    pub tz_flag: i32,
}

pub const TZFLAG_UNKNOWN: i32 = 0;
pub const TZFLAG_LOCALTIME: i32 = 1;
pub const TZFLAG_UTC: i32 = 100;

/// One attribute value as the engine stores it.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum NativeField {
    /// The field was never set (or is ignored).
    #[default]
    Unset,
    /// The field is explicitly null.
    Null,
    Integer(i32),
    Integer64(i64),
    Real(f64),
    String(String),
    Binary(Vec<u8>),
    Date(OgrDateTime),
    DateTime(OgrDateTime),
    Time(OgrDateTime),
    IntegerList(Vec<i32>),
    Integer64List(Vec<i64>),
    RealList(Vec<f64>),
    StringList(Vec<String>),
}

impl NativeField {
    /// `true` for both `Unset` and `Null`.
    pub fn is_absent(&self) -> bool {
        matches!(self, NativeField::Unset | NativeField::Null)
    }
}

/// A record as produced and consumed by the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct NativeFeature<G> {
    pub fid: i64,
    pub fields: Vec<NativeField>,
    pub geometries: Vec<Option<G>>,
}

impl<G> NativeFeature<G> {
    /// An empty feature shaped for `field_count` fields and `geom_field_count`
    /// geometry fields, with an unset identifier.
    pub fn new(field_count: usize, geom_field_count: usize) -> Self {
        NativeFeature {
            fid: NULL_FID,
            fields: vec![NativeField::Unset; field_count],
            geometries: (0..geom_field_count).map(|_| None).collect(),
        }
    }

    pub fn fid(&self) -> Option<i64> {
        (self.fid != NULL_FID).then_some(self.fid)
    }
}

/// `OGRwkbByteOrder`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little endian (`wkbNDR`).
    #[default]
    Lsb,
    /// Big endian (`wkbXDR`).
    Msb,
}

/// Flavor of the well-known encodings: ISO SQL/MM or the legacy OGC 1.x form that
/// GDAL produces by default.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WkVariant {
    #[default]
    Legacy,
    Iso,
}

/// A geometry owned by an engine.
pub trait EngineGeometry: Clone + PartialEq + std::fmt::Debug + Sized {
    fn from_wkb(wkb: &[u8]) -> Result<Self>;
    fn from_wkt(wkt: &str) -> Result<Self>;
    fn wkb(&self, byte_order: ByteOrder, variant: WkVariant) -> Result<Vec<u8>>;
    fn wkt(&self, variant: WkVariant) -> Result<String>;
    /// Size in bytes of the WKB serialization.
    fn wkb_size(&self) -> usize;
    /// Upper-case type name, e.g. `POLYGON`.
    fn geometry_name(&self) -> String;
    /// Short human readable description, e.g. `POLYGON : 5 points`.
    fn summary(&self) -> String;
    fn envelope(&self) -> Envelope;
    fn is_empty(&self) -> bool;
    /// Promotes single-part geometries to their multi-part equivalent.
    fn force_to_multi(self) -> Self;
}

/// Layer set operations delegated to the engine (`OGR_L_Intersection` and friends).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlgebraOp {
    Intersection,
    Union,
    SymDifference,
    Identity,
    Update,
    Clip,
    Erase,
}

impl AlgebraOp {
    pub fn method_name(&self) -> &'static str {
        match self {
            AlgebraOp::Intersection => "OGR_L_Intersection",
            AlgebraOp::Union => "OGR_L_Union",
            AlgebraOp::SymDifference => "OGR_L_SymDifference",
            AlgebraOp::Identity => "OGR_L_Identity",
            AlgebraOp::Update => "OGR_L_Update",
            AlgebraOp::Clip => "OGR_L_Clip",
            AlgebraOp::Erase => "OGR_L_Erase",
        }
    }
}

/// Progress callback: receives the completed fraction and a message, returns `false`
/// to request cancellation.
pub type ProgressFn<'a> = dyn FnMut(f64, &str) -> bool + 'a;

bitflags! {
    /// Layer capabilities, named after the `OLC*` strings tested with
    /// [`EngineLayer::test_capability`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct LayerCaps: u32 {
        const RANDOM_READ = 1 << 0;
        const SEQUENTIAL_WRITE = 1 << 1;
        const RANDOM_WRITE = 1 << 2;
        const UPSERT_FEATURE = 1 << 3;
        const FAST_SPATIAL_FILTER = 1 << 4;
        const FAST_FEATURE_COUNT = 1 << 5;
        const FAST_GET_EXTENT = 1 << 6;
        const FAST_SET_NEXT_BY_INDEX = 1 << 7;
        const CREATE_FIELD = 1 << 8;
        const DELETE_FIELD = 1 << 9;
        const REORDER_FIELDS = 1 << 10;
        const ALTER_FIELD_DEFN = 1 << 11;
        const IGNORE_FIELDS = 1 << 12;
        const DELETE_FEATURE = 1 << 13;
        const RENAME = 1 << 14;
        const STRINGS_AS_UTF8 = 1 << 15;
        const CURVE_GEOMETRIES = 1 << 16;
        const TRANSACTIONS = 1 << 17;
    }
}

const LAYER_CAPABILITY_NAMES: &[(LayerCaps, &str)] = &[
    (LayerCaps::RANDOM_READ, "RandomRead"),
    (LayerCaps::SEQUENTIAL_WRITE, "SequentialWrite"),
    (LayerCaps::RANDOM_WRITE, "RandomWrite"),
    (LayerCaps::UPSERT_FEATURE, "UpsertFeature"),
    (LayerCaps::FAST_SPATIAL_FILTER, "FastSpatialFilter"),
    (LayerCaps::FAST_FEATURE_COUNT, "FastFeatureCount"),
    (LayerCaps::FAST_GET_EXTENT, "FastGetExtent"),
    (LayerCaps::FAST_SET_NEXT_BY_INDEX, "FastSetNextByIndex"),
    (LayerCaps::CREATE_FIELD, "CreateField"),
    (LayerCaps::DELETE_FIELD, "DeleteField"),
    (LayerCaps::REORDER_FIELDS, "ReorderFields"),
    (LayerCaps::ALTER_FIELD_DEFN, "AlterFieldDefn"),
    (LayerCaps::IGNORE_FIELDS, "IgnoreFields"),
    (LayerCaps::DELETE_FEATURE, "DeleteFeature"),
    (LayerCaps::RENAME, "Rename"),
    (LayerCaps::STRINGS_AS_UTF8, "StringsAsUTF8"),
    (LayerCaps::CURVE_GEOMETRIES, "CurveGeometries"),
    (LayerCaps::TRANSACTIONS, "Transactions"),
];

impl LayerCaps {
    /// The OGR capability string of a single flag.
    pub fn ogr_name(self) -> Option<&'static str> {
        LAYER_CAPABILITY_NAMES
            .iter()
            .find(|(flag, _)| *flag == self)
            .map(|(_, name)| *name)
    }

    /// The flag for an OGR capability string (case-insensitive).
    pub fn from_ogr_name(name: &str) -> Option<LayerCaps> {
        LAYER_CAPABILITY_NAMES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(flag, _)| *flag)
    }

    /// Every known capability paired with its OGR name.
    pub fn named() -> impl Iterator<Item = (LayerCaps, &'static str)> {
        LAYER_CAPABILITY_NAMES.iter().copied()
    }
}

bitflags! {
    /// Data source capabilities (`ODsC*`).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DatasetCaps: u32 {
        const CREATE_LAYER = 1 << 0;
        const DELETE_LAYER = 1 << 1;
        const TRANSACTIONS = 1 << 2;
        const EMULATED_TRANSACTIONS = 1 << 3;
    }
}

const DATASET_CAPABILITY_NAMES: &[(DatasetCaps, &str)] = &[
    (DatasetCaps::CREATE_LAYER, "CreateLayer"),
    (DatasetCaps::DELETE_LAYER, "DeleteLayer"),
    (DatasetCaps::TRANSACTIONS, "Transactions"),
    (DatasetCaps::EMULATED_TRANSACTIONS, "EmulatedTransactions"),
];

impl DatasetCaps {
    pub fn ogr_name(self) -> Option<&'static str> {
        DATASET_CAPABILITY_NAMES
            .iter()
            .find(|(flag, _)| *flag == self)
            .map(|(_, name)| *name)
    }

    pub fn named() -> impl Iterator<Item = (DatasetCaps, &'static str)> {
        DATASET_CAPABILITY_NAMES.iter().copied()
    }
}

/// An open data source.
pub trait Engine: Sized {
    type Geometry: EngineGeometry;
    type Layer: EngineLayer<Geometry = Self::Geometry>;

    /// Opens the data source named by `dsn`. Failures are reported as
    /// [`GdalError::OpenFailure`](crate::errors::GdalError::OpenFailure).
    fn open(dsn: &str, access: Access, open_options: &CslStringList) -> Result<Self>;

    fn layer_count(&self) -> usize;

    fn layer_by_name(&mut self, name: &str) -> Result<Self::Layer>;

    /// Executes a query producing a transient layer. Statements without a result set
    /// return `Ok(None)`.
    fn execute_sql(
        &mut self,
        query: &str,
        spatial_filter: Option<&Self::Geometry>,
        dialect: Option<&str>,
    ) -> Result<Option<Self::Layer>>;

    /// Releases a layer obtained from [`Engine::execute_sql`].
    fn release_result_set(&mut self, layer: Self::Layer);

    fn test_capability(&self, capability: &str) -> bool;

    fn field_domain(&self, name: &str) -> Option<FieldDomain>;

    fn start_transaction(&mut self, force: bool) -> Result<()>;
    fn commit_transaction(&mut self) -> Result<()>;
    fn rollback_transaction(&mut self) -> Result<()>;

    /// Text of the most recent engine error, if any.
    fn last_error_msg(&self) -> String;
}

/// An open layer belonging to an [`Engine`].
pub trait EngineLayer {
    type Geometry: EngineGeometry;

    fn name(&self) -> String;
    /// Geometry type name of the first geometry field, e.g. `Multi Polygon`.
    fn geometry_type(&self) -> String;
    fn geometry_column(&self) -> String;
    fn fid_column(&self) -> String;
    /// Spatial reference of the first geometry field as WKT.
    fn spatial_ref(&self) -> Result<String>;
    fn extent(&mut self, force: bool) -> Result<Envelope>;
    /// Feature count under the current filters, or -1 when unknown.
    fn feature_count(&mut self, force: bool) -> i64;
    fn test_capability(&self, capability: &str) -> bool;

    fn fields(&self) -> Vec<FieldDefn>;
    /// Geometry field definitions. The spatial reference is not filled in, see
    /// [`EngineLayer::geom_field_spatial_ref`].
    fn geom_fields(&self) -> Vec<GeomFieldDefn>;
    fn geom_field_spatial_ref(&self, index: usize) -> Result<String>;

    /// Sets (or with `None`, clears) the attribute filter. The predicate is validated
    /// by the engine.
    fn set_attribute_filter(&mut self, predicate: Option<&str>) -> Result<()>;
    fn set_spatial_filter(&mut self, geometry: Option<&Self::Geometry>);
    fn set_spatial_filter_rect(&mut self, envelope: &Envelope);
    fn set_ignored_fields(&mut self, names: &[&str]) -> Result<()>;

    fn reset_reading(&mut self);
    fn next_feature(&mut self) -> Option<NativeFeature<Self::Geometry>>;
    fn set_next_by_index(&mut self, index: i64) -> Result<()>;
    fn feature(&mut self, fid: i64) -> Option<NativeFeature<Self::Geometry>>;

    /// Inserts `feature`, assigning its identifier.
    fn create_feature(&mut self, feature: &mut NativeFeature<Self::Geometry>) -> Result<()>;
    fn set_feature(&mut self, feature: &NativeFeature<Self::Geometry>) -> Result<()>;
    fn upsert_feature(&mut self, feature: &mut NativeFeature<Self::Geometry>) -> Result<()>;
    fn delete_feature(&mut self, fid: i64) -> Result<()>;
    fn sync_to_disk(&mut self) -> Result<()>;

    fn metadata(&self, domain: &str) -> CslStringList;
    fn set_metadata(&mut self, metadata: &CslStringList, domain: &str) -> Result<()>;
    fn metadata_item(&self, key: &str, domain: &str) -> Option<String>;

    /// Runs `op` with `self` as the input layer.
    fn algebra(
        &mut self,
        op: AlgebraOp,
        method: &mut Self,
        result: &mut Self,
        options: &CslStringList,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<()>;

    /// Text of the most recent engine error on this layer, if any.
    fn last_error_msg(&self) -> String;
}
