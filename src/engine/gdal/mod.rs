//! The GDAL/OGR engine
//!
//! Binds the engine contract to the OGR C API through `gdal-sys`. Any vector format
//! with a GDAL driver can be read; writes, transactions and layer algebra depend on
//! what the driver supports.
//!
//! ```no_run
//! use gdal_vector::engine::gdal::GdalEngine;
//! use gdal_vector::vector::{FetchSize, VectorLayer};
//!
//! # fn main() -> gdal_vector::errors::Result<()> {
//! let mut layer = VectorLayer::<GdalEngine>::open("roads.gpkg", "roads")?;
//! layer.set_attribute_filter("highway = 'primary'")?;
//! let table = layer.fetch(FetchSize::All)?;
//! println!("{} primary roads", table.num_rows());
//! # Ok(())
//! # }
//! ```

use std::ffi::CString;
use std::path::Path;
use std::ptr::{null, null_mut};

use gdal_sys::{
    self, GDALDatasetH, OGRFieldDomainMergePolicy, OGRFieldDomainSplitPolicy, OGRFieldDomainType,
};
use log::debug;

use crate::cpl::CslStringList;
use crate::engine::{Engine, NativeField, OgrDateTime};
use crate::errors::{GdalError, OgrErr, Result};
use crate::options::{Access, GdalOpenFlags};
use crate::vector::{DomainKind, FieldDefn, FieldDomain, GeomFieldDefn, MergePolicy, SplitPolicy};

mod feature;
mod geometry;
mod layer;
mod utils;

pub use geometry::GdalGeometry;
pub use layer::GdalLayer;

use utils::{
    _last_error_msg, _last_null_pointer_err, _ogr_result, _register_drivers, _string,
    field_subtype_from_ogr, field_subtype_to_ogr, field_type_from_ogr, field_type_to_ogr,
    geometry_type_from_name, CslPtr,
};

/// A GDAL data source opened in vector mode. Closed when dropped.
#[derive(Debug)]
pub struct GdalEngine {
    c_dataset: GDALDatasetH,
    last_error: String,
}

impl GdalEngine {
    /// Creates a new data source at `path` with the named driver, e.g. `GPKG`.
    pub fn create<P: AsRef<Path>>(driver: &str, path: P) -> Result<Self> {
        _register_drivers();
        let dsn = path.as_ref().to_string_lossy().into_owned();
        let c_driver_name = CString::new(driver)?;
        let c_driver = unsafe { gdal_sys::GDALGetDriverByName(c_driver_name.as_ptr()) };
        if c_driver.is_null() {
            return Err(GdalError::OpenFailure {
                dsn,
                msg: format!("no driver named '{driver}'"),
            });
        }
        let c_dsn = CString::new(dsn.as_str())?;
        let options = CslPtr::empty();
        let c_dataset = unsafe {
            gdal_sys::GDALCreate(
                c_driver,
                c_dsn.as_ptr(),
                0,
                0,
                0,
                gdal_sys::GDALDataType::GDT_Unknown,
                options.as_ptr() as _,
            )
        };
        if c_dataset.is_null() {
            return Err(GdalError::OpenFailure {
                dsn,
                msg: _last_error_msg(),
            });
        }
        debug!("Created '{dsn}' with driver {driver}");
        Ok(GdalEngine {
            c_dataset,
            last_error: String::new(),
        })
    }

    pub fn c_dataset(&self) -> GDALDatasetH {
        self.c_dataset
    }

    /// Creates a layer with the given attribute and geometry fields.
    pub fn create_layer(
        &mut self,
        name: &str,
        fields: Vec<FieldDefn>,
        geom_fields: Vec<GeomFieldDefn>,
    ) -> Result<GdalLayer> {
        let c_name = CString::new(name)?;
        let options = CslPtr::empty();
        let c_layer = unsafe {
            gdal_sys::GDALDatasetCreateLayer(
                self.c_dataset,
                c_name.as_ptr(),
                null_mut(),
                gdal_sys::OGRwkbGeometryType::wkbNone,
                options.as_ptr() as _,
            )
        };
        if c_layer.is_null() {
            return Err(_last_null_pointer_err("GDALDatasetCreateLayer"));
        }
        for field in &fields {
            let c_field_name = CString::new(field.name.as_str())?;
            let c_default = field.default.as_deref().map(CString::new).transpose()?;
            let c_domain = field.domain.as_deref().map(CString::new).transpose()?;
            let rv = unsafe {
                let c_field =
                    gdal_sys::OGR_Fld_Create(c_field_name.as_ptr(), field_type_to_ogr(field.field_type));
                gdal_sys::OGR_Fld_SetSubType(c_field, field_subtype_to_ogr(field.subtype));
                gdal_sys::OGR_Fld_SetWidth(c_field, field.width);
                gdal_sys::OGR_Fld_SetPrecision(c_field, field.precision);
                gdal_sys::OGR_Fld_SetNullable(c_field, field.nullable as libc::c_int);
                gdal_sys::OGR_Fld_SetUnique(c_field, field.unique as libc::c_int);
                if let Some(c_default) = &c_default {
                    gdal_sys::OGR_Fld_SetDefault(c_field, c_default.as_ptr());
                }
                if let Some(c_domain) = &c_domain {
                    gdal_sys::OGR_Fld_SetDomainName(c_field, c_domain.as_ptr());
                }
                let rv = gdal_sys::OGR_L_CreateField(c_layer, c_field, 1);
                gdal_sys::OGR_Fld_Destroy(c_field);
                rv
            };
            _ogr_result(rv, "OGR_L_CreateField")?;
        }
        for geom_field in &geom_fields {
            let c_field_name = CString::new(geom_field.name.as_str())?;
            let rv = unsafe {
                let c_field = gdal_sys::OGR_GFld_Create(
                    c_field_name.as_ptr(),
                    geometry_type_from_name(&geom_field.geom_type),
                );
                gdal_sys::OGR_GFld_SetNullable(c_field, geom_field.nullable as libc::c_int);
                let rv = gdal_sys::OGR_L_CreateGeomField(c_layer, c_field, 1);
                gdal_sys::OGR_GFld_Destroy(c_field);
                rv
            };
            _ogr_result(rv, "OGR_L_CreateGeomField")?;
        }
        Ok(unsafe { GdalLayer::from_c_layer(c_layer) })
    }

    fn check(&mut self, rv: gdal_sys::OGRErr::Type, method_name: &'static str) -> Result<()> {
        _ogr_result(rv, method_name).inspect_err(|e| {
            if let GdalError::OgrError { msg, .. } = e {
                self.last_error = msg.clone();
            }
        })
    }
}

impl Drop for GdalEngine {
    fn drop(&mut self) {
        unsafe { gdal_sys::GDALClose(self.c_dataset) };
    }
}

/// Reads a range bound of a domain.
///
/// # Safety
/// `c_field` must be null or point to an `OGRField` of type `field_type`.
unsafe fn raw_field(
    c_field: *const gdal_sys::OGRField,
    field_type: gdal_sys::OGRFieldType::Type,
) -> NativeField {
    use gdal_sys::OGRFieldType;

    if c_field.is_null() || gdal_sys::OGR_RawField_IsUnset(c_field) != 0 {
        return NativeField::Unset;
    }
    match field_type {
        OGRFieldType::OFTInteger => NativeField::Integer((*c_field).Integer),
        OGRFieldType::OFTInteger64 => NativeField::Integer64((*c_field).Integer64),
        OGRFieldType::OFTReal => NativeField::Real((*c_field).Real),
        OGRFieldType::OFTDate | OGRFieldType::OFTDateTime => {
            let date = (*c_field).Date;
            let dt = OgrDateTime {
                year: i32::from(date.Year),
                month: u32::from(date.Month),
                day: u32::from(date.Day),
                hour: u32::from(date.Hour),
                minute: u32::from(date.Minute),
                second: date.Second,
                tz_flag: i32::from(date.TZFlag),
            };
            if field_type == OGRFieldType::OFTDate {
                NativeField::Date(dt)
            } else {
                NativeField::DateTime(dt)
            }
        }
        _ => NativeField::Unset,
    }
}

impl Engine for GdalEngine {
    type Geometry = GdalGeometry;
    type Layer = GdalLayer;

    fn open(dsn: &str, access: Access, open_options: &CslStringList) -> Result<Self> {
        _register_drivers();
        let c_dsn = CString::new(dsn)?;
        let c_open_options = CslPtr::from_name_values(open_options)?;
        let flags = GdalOpenFlags::from(access);
        let c_dataset = unsafe {
            gdal_sys::GDALOpenEx(
                c_dsn.as_ptr(),
                flags.bits(),
                null(),
                c_open_options.as_ptr() as _,
                null(),
            )
        };
        if c_dataset.is_null() {
            return Err(GdalError::OpenFailure {
                dsn: dsn.to_string(),
                msg: _last_error_msg(),
            });
        }
        debug!("Opened '{dsn}' ({access:?})");
        Ok(GdalEngine {
            c_dataset,
            last_error: String::new(),
        })
    }

    fn layer_count(&self) -> usize {
        unsafe { gdal_sys::GDALDatasetGetLayerCount(self.c_dataset) }.max(0) as usize
    }

    fn layer_by_name(&mut self, name: &str) -> Result<GdalLayer> {
        let c_name = CString::new(name)?;
        let c_layer = unsafe { gdal_sys::GDALDatasetGetLayerByName(self.c_dataset, c_name.as_ptr()) };
        if c_layer.is_null() {
            return Err(_last_null_pointer_err("GDALDatasetGetLayerByName"));
        }
        Ok(unsafe { GdalLayer::from_c_layer(c_layer) })
    }

    fn execute_sql(
        &mut self,
        query: &str,
        spatial_filter: Option<&GdalGeometry>,
        dialect: Option<&str>,
    ) -> Result<Option<GdalLayer>> {
        let c_query = CString::new(query)?;
        let c_dialect = dialect.map(CString::new).transpose()?;
        unsafe { gdal_sys::CPLErrorReset() };
        let c_layer = unsafe {
            gdal_sys::GDALDatasetExecuteSQL(
                self.c_dataset,
                c_query.as_ptr(),
                spatial_filter.map_or(null_mut(), GdalGeometry::c_geometry),
                c_dialect.as_ref().map_or(null(), |d| d.as_ptr()),
            )
        };
        if c_layer.is_null() {
            let err_type = unsafe { gdal_sys::CPLGetLastErrorType() };
            if err_type == gdal_sys::CPLErr::CE_Failure || err_type == gdal_sys::CPLErr::CE_Fatal {
                let msg = _last_error_msg();
                self.last_error = msg.clone();
                return Err(GdalError::OgrError {
                    err: OgrErr::Failure,
                    method_name: "GDALDatasetExecuteSQL",
                    msg,
                });
            }
            return Ok(None);
        }
        Ok(Some(unsafe { GdalLayer::from_c_layer(c_layer) }))
    }

    fn release_result_set(&mut self, layer: GdalLayer) {
        unsafe { gdal_sys::GDALDatasetReleaseResultSet(self.c_dataset, layer.c_layer()) };
    }

    fn test_capability(&self, capability: &str) -> bool {
        match CString::new(capability) {
            Ok(c_capability) => unsafe {
                gdal_sys::GDALDatasetTestCapability(self.c_dataset, c_capability.as_ptr()) != 0
            },
            Err(_) => false,
        }
    }

    fn field_domain(&self, name: &str) -> Option<FieldDomain> {
        let c_name = CString::new(name).ok()?;
        let c_domain = unsafe { gdal_sys::GDALDatasetGetFieldDomain(self.c_dataset, c_name.as_ptr()) };
        if c_domain.is_null() {
            return None;
        }
        unsafe {
            let c_field_type = gdal_sys::OGR_FldDomain_GetFieldType(c_domain);
            let kind = match gdal_sys::OGR_FldDomain_GetDomainType(c_domain) {
                OGRFieldDomainType::OFDT_CODED => {
                    let mut codes = Vec::new();
                    let mut c_value = gdal_sys::OGR_CodedFldDomain_GetEnumeration(c_domain);
                    while !c_value.is_null() && !(*c_value).pszCode.is_null() {
                        let value = (*c_value).pszValue;
                        codes.push((
                            _string((*c_value).pszCode),
                            (!value.is_null()).then(|| _string(value)),
                        ));
                        c_value = c_value.add(1);
                    }
                    DomainKind::Coded(codes)
                }
                OGRFieldDomainType::OFDT_RANGE => {
                    let mut min_inclusive = false;
                    let mut max_inclusive = false;
                    let min = gdal_sys::OGR_RangeFldDomain_GetMin(c_domain, &mut min_inclusive);
                    let max = gdal_sys::OGR_RangeFldDomain_GetMax(c_domain, &mut max_inclusive);
                    DomainKind::Range {
                        min: raw_field(min, c_field_type),
                        min_inclusive,
                        max: raw_field(max, c_field_type),
                        max_inclusive,
                    }
                }
                _ => DomainKind::Glob(_string(gdal_sys::OGR_GlobFldDomain_GetGlob(c_domain))),
            };
            Some(FieldDomain {
                name: _string(gdal_sys::OGR_FldDomain_GetName(c_domain)),
                description: _string(gdal_sys::OGR_FldDomain_GetDescription(c_domain)),
                field_type: field_type_from_ogr(c_field_type),
                field_subtype: field_subtype_from_ogr(gdal_sys::OGR_FldDomain_GetFieldSubType(
                    c_domain,
                )),
                split_policy: match gdal_sys::OGR_FldDomain_GetSplitPolicy(c_domain) {
                    OGRFieldDomainSplitPolicy::OFDSP_DUPLICATE => SplitPolicy::Duplicate,
                    OGRFieldDomainSplitPolicy::OFDSP_GEOMETRY_RATIO => SplitPolicy::GeometryRatio,
                    _ => SplitPolicy::DefaultValue,
                },
                merge_policy: match gdal_sys::OGR_FldDomain_GetMergePolicy(c_domain) {
                    OGRFieldDomainMergePolicy::OFDMP_SUM => MergePolicy::Sum,
                    OGRFieldDomainMergePolicy::OFDMP_GEOMETRY_WEIGHTED => {
                        MergePolicy::GeometryWeighted
                    }
                    _ => MergePolicy::DefaultValue,
                },
                kind,
            })
        }
    }

    fn start_transaction(&mut self, force: bool) -> Result<()> {
        let rv = unsafe { gdal_sys::GDALDatasetStartTransaction(self.c_dataset, force as libc::c_int) };
        self.check(rv, "GDALDatasetStartTransaction")
    }

    fn commit_transaction(&mut self) -> Result<()> {
        let rv = unsafe { gdal_sys::GDALDatasetCommitTransaction(self.c_dataset) };
        self.check(rv, "GDALDatasetCommitTransaction")
    }

    fn rollback_transaction(&mut self) -> Result<()> {
        let rv = unsafe { gdal_sys::GDALDatasetRollbackTransaction(self.c_dataset) };
        self.check(rv, "GDALDatasetRollbackTransaction")
    }

    fn last_error_msg(&self) -> String {
        if self.last_error.is_empty() {
            _last_error_msg()
        } else {
            self.last_error.clone()
        }
    }
}
