use std::ffi::CString;
use std::ptr::null_mut;

use gdal_sys::{self, GDALMajorObjectH, OGREnvelope, OGRLayerH};
use libc::{c_char, c_int, c_void};
use log::debug;

use crate::cpl::CslStringList;
use crate::engine::gdal::feature::{build_feature, read_feature, OwnedFeature};
use crate::engine::gdal::geometry::GdalGeometry;
use crate::engine::gdal::utils::{
    _last_error_msg, _name_value_list, _ogr_result, _owned_string, _string, field_subtype_from_ogr,
    field_type_from_ogr, geometry_type_name, CslPtr,
};
use crate::engine::{AlgebraOp, EngineLayer, Envelope, NativeFeature, ProgressFn};
use crate::errors::{GdalError, OgrErr, Result};
use crate::vector::{FieldDefn, GeomFieldDefn};

/// A layer of a [`GdalEngine`](super::GdalEngine) data source.
///
/// The handle is owned by the data source and stays valid while it is open.
#[derive(Debug)]
pub struct GdalLayer {
    c_layer: OGRLayerH,
    last_error: String,
}

unsafe extern "C" fn progress_trampoline(
    complete: f64,
    message: *const c_char,
    arg: *mut c_void,
) -> c_int {
    let progress = &mut *(arg as *mut &mut ProgressFn<'_>);
    progress(complete, &_string(message)) as c_int
}

/// Exports a spatial reference handle as WKT.
fn srs_wkt(c_srs: gdal_sys::OGRSpatialReferenceH, method_name: &'static str) -> Result<String> {
    if c_srs.is_null() {
        return Err(GdalError::OgrError {
            err: OgrErr::UnsupportedSrs,
            method_name,
            msg: "no spatial reference".to_string(),
        });
    }
    let mut c_wkt = null_mut();
    let rv = unsafe { gdal_sys::OSRExportToWkt(c_srs, &mut c_wkt) };
    let wkt = _owned_string(c_wkt);
    _ogr_result(rv, "OSRExportToWkt")?;
    Ok(wkt)
}

impl GdalLayer {
    /// # Safety
    /// `c_layer` must be a valid layer handle of an open data source.
    pub(crate) unsafe fn from_c_layer(c_layer: OGRLayerH) -> Self {
        GdalLayer {
            c_layer,
            last_error: String::new(),
        }
    }

    pub fn c_layer(&self) -> OGRLayerH {
        self.c_layer
    }

    fn c_defn(&self) -> gdal_sys::OGRFeatureDefnH {
        unsafe { gdal_sys::OGR_L_GetLayerDefn(self.c_layer) }
    }

    /// Records the engine message of a failed call.
    fn check(&mut self, rv: gdal_sys::OGRErr::Type, method_name: &'static str) -> Result<()> {
        _ogr_result(rv, method_name).inspect_err(|e| {
            if let GdalError::OgrError { msg, .. } = e {
                self.last_error = msg.clone();
            }
        })
    }

    fn take_feature(c_feature: gdal_sys::OGRFeatureH) -> Option<NativeFeature<GdalGeometry>> {
        if c_feature.is_null() {
            return None;
        }
        let owned = OwnedFeature(c_feature);
        Some(unsafe { read_feature(owned.0) })
    }
}

impl EngineLayer for GdalLayer {
    type Geometry = GdalGeometry;

    fn name(&self) -> String {
        _string(unsafe { gdal_sys::OGR_L_GetName(self.c_layer) })
    }

    fn geometry_type(&self) -> String {
        geometry_type_name(unsafe { gdal_sys::OGR_L_GetGeomType(self.c_layer) })
    }

    fn geometry_column(&self) -> String {
        _string(unsafe { gdal_sys::OGR_L_GetGeometryColumn(self.c_layer) })
    }

    fn fid_column(&self) -> String {
        _string(unsafe { gdal_sys::OGR_L_GetFIDColumn(self.c_layer) })
    }

    fn spatial_ref(&self) -> Result<String> {
        srs_wkt(
            unsafe { gdal_sys::OGR_L_GetSpatialRef(self.c_layer) },
            "OGR_L_GetSpatialRef",
        )
    }

    fn extent(&mut self, force: bool) -> Result<Envelope> {
        let mut envelope = OGREnvelope {
            MinX: 0.0,
            MaxX: 0.0,
            MinY: 0.0,
            MaxY: 0.0,
        };
        let rv = unsafe { gdal_sys::OGR_L_GetExtent(self.c_layer, &mut envelope, force as c_int) };
        self.check(rv, "OGR_L_GetExtent")?;
        Ok(Envelope::new(
            envelope.MinX,
            envelope.MinY,
            envelope.MaxX,
            envelope.MaxY,
        ))
    }

    fn feature_count(&mut self, force: bool) -> i64 {
        unsafe { gdal_sys::OGR_L_GetFeatureCount(self.c_layer, force as c_int) }
    }

    fn test_capability(&self, capability: &str) -> bool {
        match CString::new(capability) {
            Ok(c_capability) => unsafe {
                gdal_sys::OGR_L_TestCapability(self.c_layer, c_capability.as_ptr()) != 0
            },
            Err(_) => false,
        }
    }

    fn fields(&self) -> Vec<FieldDefn> {
        let c_defn = self.c_defn();
        let count = unsafe { gdal_sys::OGR_FD_GetFieldCount(c_defn) };
        (0..count)
            .map(|idx| unsafe {
                let c_field = gdal_sys::OGR_FD_GetFieldDefn(c_defn, idx);
                let c_default = gdal_sys::OGR_Fld_GetDefault(c_field);
                let domain = _string(gdal_sys::OGR_Fld_GetDomainName(c_field));
                FieldDefn {
                    name: _string(gdal_sys::OGR_Fld_GetNameRef(c_field)),
                    field_type: field_type_from_ogr(gdal_sys::OGR_Fld_GetType(c_field)),
                    subtype: field_subtype_from_ogr(gdal_sys::OGR_Fld_GetSubType(c_field)),
                    width: gdal_sys::OGR_Fld_GetWidth(c_field),
                    precision: gdal_sys::OGR_Fld_GetPrecision(c_field),
                    nullable: gdal_sys::OGR_Fld_IsNullable(c_field) != 0,
                    unique: gdal_sys::OGR_Fld_IsUnique(c_field) != 0,
                    default: (!c_default.is_null()).then(|| _string(c_default)),
                    ignored: gdal_sys::OGR_Fld_IsIgnored(c_field) != 0,
                    domain: (!domain.is_empty()).then_some(domain),
                }
            })
            .collect()
    }

    fn geom_fields(&self) -> Vec<GeomFieldDefn> {
        let c_defn = self.c_defn();
        let count = unsafe { gdal_sys::OGR_FD_GetGeomFieldCount(c_defn) };
        (0..count)
            .map(|idx| unsafe {
                let c_field = gdal_sys::OGR_FD_GetGeomFieldDefn(c_defn, idx);
                GeomFieldDefn {
                    name: _string(gdal_sys::OGR_GFld_GetNameRef(c_field)),
                    geom_type: geometry_type_name(gdal_sys::OGR_GFld_GetType(c_field)),
                    nullable: gdal_sys::OGR_GFld_IsNullable(c_field) != 0,
                    ignored: gdal_sys::OGR_GFld_IsIgnored(c_field) != 0,
                    srs: None,
                }
            })
            .collect()
    }

    fn geom_field_spatial_ref(&self, index: usize) -> Result<String> {
        let c_defn = self.c_defn();
        let c_field = unsafe { gdal_sys::OGR_FD_GetGeomFieldDefn(c_defn, index as c_int) };
        if c_field.is_null() {
            return Err(GdalError::BadArgument(format!(
                "no geometry field {index} in layer '{}'",
                self.name()
            )));
        }
        srs_wkt(
            unsafe { gdal_sys::OGR_GFld_GetSpatialRef(c_field) },
            "OGR_GFld_GetSpatialRef",
        )
    }

    fn set_attribute_filter(&mut self, predicate: Option<&str>) -> Result<()> {
        let c_predicate = predicate.map(CString::new).transpose()?;
        let rv = unsafe {
            gdal_sys::OGR_L_SetAttributeFilter(
                self.c_layer,
                c_predicate.as_ref().map_or(std::ptr::null(), |p| p.as_ptr()),
            )
        };
        if rv != gdal_sys::OGRErr::OGRERR_NONE {
            let msg = _last_error_msg();
            self.last_error = msg.clone();
            return Err(GdalError::FilterSyntax {
                predicate: predicate.unwrap_or_default().to_string(),
                msg,
            });
        }
        Ok(())
    }

    fn set_spatial_filter(&mut self, geometry: Option<&GdalGeometry>) {
        let c_geometry = geometry.map_or(null_mut(), GdalGeometry::c_geometry);
        unsafe { gdal_sys::OGR_L_SetSpatialFilter(self.c_layer, c_geometry) };
    }

    fn set_spatial_filter_rect(&mut self, envelope: &Envelope) {
        unsafe {
            gdal_sys::OGR_L_SetSpatialFilterRect(
                self.c_layer,
                envelope.min_x,
                envelope.min_y,
                envelope.max_x,
                envelope.max_y,
            )
        };
    }

    fn set_ignored_fields(&mut self, names: &[&str]) -> Result<()> {
        let csl = CslPtr::from_strings(names)?;
        let rv = unsafe { gdal_sys::OGR_L_SetIgnoredFields(self.c_layer, csl.as_ptr() as _) };
        self.check(rv, "OGR_L_SetIgnoredFields")
    }

    fn reset_reading(&mut self) {
        unsafe { gdal_sys::OGR_L_ResetReading(self.c_layer) };
    }

    fn next_feature(&mut self) -> Option<NativeFeature<GdalGeometry>> {
        Self::take_feature(unsafe { gdal_sys::OGR_L_GetNextFeature(self.c_layer) })
    }

    fn set_next_by_index(&mut self, index: i64) -> Result<()> {
        let rv = unsafe { gdal_sys::OGR_L_SetNextByIndex(self.c_layer, index) };
        self.check(rv, "OGR_L_SetNextByIndex")
    }

    fn feature(&mut self, fid: i64) -> Option<NativeFeature<GdalGeometry>> {
        Self::take_feature(unsafe { gdal_sys::OGR_L_GetFeature(self.c_layer, fid) })
    }

    fn create_feature(&mut self, feature: &mut NativeFeature<GdalGeometry>) -> Result<()> {
        let c_feature = unsafe { build_feature(self.c_defn(), feature)? };
        let rv = unsafe { gdal_sys::OGR_L_CreateFeature(self.c_layer, c_feature.0) };
        self.check(rv, "OGR_L_CreateFeature")?;
        feature.fid = unsafe { gdal_sys::OGR_F_GetFID(c_feature.0) };
        Ok(())
    }

    fn set_feature(&mut self, feature: &NativeFeature<GdalGeometry>) -> Result<()> {
        let c_feature = unsafe { build_feature(self.c_defn(), feature)? };
        let rv = unsafe { gdal_sys::OGR_L_SetFeature(self.c_layer, c_feature.0) };
        self.check(rv, "OGR_L_SetFeature")
    }

    fn upsert_feature(&mut self, feature: &mut NativeFeature<GdalGeometry>) -> Result<()> {
        let c_feature = unsafe { build_feature(self.c_defn(), feature)? };
        let rv = unsafe { gdal_sys::OGR_L_UpsertFeature(self.c_layer, c_feature.0) };
        self.check(rv, "OGR_L_UpsertFeature")?;
        feature.fid = unsafe { gdal_sys::OGR_F_GetFID(c_feature.0) };
        Ok(())
    }

    fn delete_feature(&mut self, fid: i64) -> Result<()> {
        let rv = unsafe { gdal_sys::OGR_L_DeleteFeature(self.c_layer, fid) };
        self.check(rv, "OGR_L_DeleteFeature")
    }

    fn sync_to_disk(&mut self) -> Result<()> {
        let rv = unsafe { gdal_sys::OGR_L_SyncToDisk(self.c_layer) };
        self.check(rv, "OGR_L_SyncToDisk")
    }

    fn metadata(&self, domain: &str) -> CslStringList {
        let Ok(c_domain) = CString::new(domain) else {
            return CslStringList::new();
        };
        let c_list =
            unsafe { gdal_sys::GDALGetMetadata(self.c_layer as GDALMajorObjectH, c_domain.as_ptr()) };
        _name_value_list(c_list)
    }

    fn set_metadata(&mut self, metadata: &CslStringList, domain: &str) -> Result<()> {
        let c_domain = CString::new(domain)?;
        let csl = CslPtr::from_name_values(metadata)?;
        let rv = unsafe {
            gdal_sys::GDALSetMetadata(
                self.c_layer as GDALMajorObjectH,
                csl.as_ptr() as _,
                c_domain.as_ptr(),
            )
        };
        if rv != gdal_sys::CPLErr::CE_None {
            self.last_error = _last_error_msg();
            return Err(GdalError::OgrError {
                err: OgrErr::Failure,
                method_name: "GDALSetMetadata",
                msg: self.last_error.clone(),
            });
        }
        Ok(())
    }

    fn metadata_item(&self, key: &str, domain: &str) -> Option<String> {
        let c_key = CString::new(key).ok()?;
        let c_domain = CString::new(domain).ok()?;
        let c_value = unsafe {
            gdal_sys::GDALGetMetadataItem(
                self.c_layer as GDALMajorObjectH,
                c_key.as_ptr(),
                c_domain.as_ptr(),
            )
        };
        (!c_value.is_null()).then(|| _string(c_value))
    }

    fn algebra(
        &mut self,
        op: AlgebraOp,
        method: &mut Self,
        result: &mut Self,
        options: &CslStringList,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<()> {
        let csl = CslPtr::from_name_values(options)?;
        let func = match op {
            AlgebraOp::Intersection => gdal_sys::OGR_L_Intersection,
            AlgebraOp::Union => gdal_sys::OGR_L_Union,
            AlgebraOp::SymDifference => gdal_sys::OGR_L_SymDifference,
            AlgebraOp::Identity => gdal_sys::OGR_L_Identity,
            AlgebraOp::Update => gdal_sys::OGR_L_Update,
            AlgebraOp::Clip => gdal_sys::OGR_L_Clip,
            AlgebraOp::Erase => gdal_sys::OGR_L_Erase,
        };
        debug!("Running {} on layer '{}'", op.method_name(), self.name());
        let rv = match progress {
            Some(mut progress) => {
                let arg = &mut progress as *mut &mut ProgressFn<'_> as *mut c_void;
                unsafe {
                    func(
                        self.c_layer,
                        method.c_layer,
                        result.c_layer,
                        csl.as_ptr(),
                        Some(progress_trampoline),
                        arg,
                    )
                }
            }
            None => unsafe {
                func(
                    self.c_layer,
                    method.c_layer,
                    result.c_layer,
                    csl.as_ptr(),
                    None,
                    null_mut(),
                )
            },
        };
        self.check(rv, op.method_name())
    }

    fn last_error_msg(&self) -> String {
        self.last_error.clone()
    }
}
