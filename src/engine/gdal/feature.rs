use std::ffi::CString;
use std::slice;

use gdal_sys::{self, OGRFeatureDefnH, OGRFeatureH, OGRFieldType};
use libc::c_int;

use crate::engine::gdal::geometry::GdalGeometry;
use crate::engine::gdal::utils::{_ogr_result, _string, _string_array, CslPtr};
use crate::engine::{NativeFeature, NativeField, OgrDateTime};
use crate::errors::{GdalError, Result};

/// An `OGRFeatureH` owned by Rust, destroyed on drop.
pub(crate) struct OwnedFeature(pub(crate) OGRFeatureH);

impl Drop for OwnedFeature {
    fn drop(&mut self) {
        unsafe { gdal_sys::OGR_F_Destroy(self.0) };
    }
}

/// Copies `c_feature` into engine-neutral values.
///
/// # Safety
/// `c_feature` must be a valid feature handle.
pub(crate) unsafe fn read_feature(c_feature: OGRFeatureH) -> NativeFeature<GdalGeometry> {
    let c_defn = gdal_sys::OGR_F_GetDefnRef(c_feature);
    let field_count = gdal_sys::OGR_FD_GetFieldCount(c_defn);
    let geom_field_count = gdal_sys::OGR_FD_GetGeomFieldCount(c_defn);
    let mut feature = NativeFeature::new(field_count as usize, geom_field_count as usize);
    feature.fid = gdal_sys::OGR_F_GetFID(c_feature);
    for idx in 0..field_count {
        let field_type = gdal_sys::OGR_Fld_GetType(gdal_sys::OGR_FD_GetFieldDefn(c_defn, idx));
        feature.fields[idx as usize] = read_field(c_feature, idx, field_type);
    }
    for idx in 0..geom_field_count {
        feature.geometries[idx as usize] =
            GdalGeometry::from_borrowed(gdal_sys::OGR_F_GetGeomFieldRef(c_feature, idx));
    }
    feature
}

unsafe fn read_datetime(c_feature: OGRFeatureH, idx: c_int) -> Option<OgrDateTime> {
    let (mut year, mut month, mut day, mut hour, mut minute, mut tz_flag) = (0, 0, 0, 0, 0, 0);
    let mut second = 0.0f32;
    let rv = gdal_sys::OGR_F_GetFieldAsDateTimeEx(
        c_feature,
        idx,
        &mut year,
        &mut month,
        &mut day,
        &mut hour,
        &mut minute,
        &mut second,
        &mut tz_flag,
    );
    (rv != 0).then_some(OgrDateTime {
        year,
        month: month as u32,
        day: day as u32,
        hour: hour as u32,
        minute: minute as u32,
        second,
        tz_flag,
    })
}

unsafe fn copy_list<T: Copy>(ptr: *const T, len: c_int) -> Vec<T> {
    if ptr.is_null() || len <= 0 {
        return Vec::new();
    }
    slice::from_raw_parts(ptr, len as usize).to_vec()
}

unsafe fn read_field(
    c_feature: OGRFeatureH,
    idx: c_int,
    field_type: OGRFieldType::Type,
) -> NativeField {
    if gdal_sys::OGR_F_IsFieldSet(c_feature, idx) == 0 {
        return NativeField::Unset;
    }
    if gdal_sys::OGR_F_IsFieldNull(c_feature, idx) != 0 {
        return NativeField::Null;
    }
    let mut len: c_int = 0;
    match field_type {
        OGRFieldType::OFTInteger => {
            NativeField::Integer(gdal_sys::OGR_F_GetFieldAsInteger(c_feature, idx))
        }
        OGRFieldType::OFTInteger64 => {
            NativeField::Integer64(gdal_sys::OGR_F_GetFieldAsInteger64(c_feature, idx))
        }
        OGRFieldType::OFTReal => NativeField::Real(gdal_sys::OGR_F_GetFieldAsDouble(c_feature, idx)),
        OGRFieldType::OFTBinary => {
            let ptr = gdal_sys::OGR_F_GetFieldAsBinary(c_feature, idx, &mut len);
            NativeField::Binary(copy_list(ptr as *const u8, len))
        }
        OGRFieldType::OFTDate | OGRFieldType::OFTDateTime | OGRFieldType::OFTTime => {
            match read_datetime(c_feature, idx) {
                Some(dt) if field_type == OGRFieldType::OFTDate => NativeField::Date(dt),
                Some(dt) if field_type == OGRFieldType::OFTTime => NativeField::Time(dt),
                Some(dt) => NativeField::DateTime(dt),
                None => NativeField::Null,
            }
        }
        OGRFieldType::OFTIntegerList => {
            let ptr = gdal_sys::OGR_F_GetFieldAsIntegerList(c_feature, idx, &mut len);
            NativeField::IntegerList(copy_list(ptr, len))
        }
        OGRFieldType::OFTInteger64List => {
            let ptr = gdal_sys::OGR_F_GetFieldAsInteger64List(c_feature, idx, &mut len);
            NativeField::Integer64List(copy_list(ptr, len))
        }
        OGRFieldType::OFTRealList => {
            let ptr = gdal_sys::OGR_F_GetFieldAsDoubleList(c_feature, idx, &mut len);
            NativeField::RealList(copy_list(ptr, len))
        }
        OGRFieldType::OFTStringList => NativeField::StringList(_string_array(
            gdal_sys::OGR_F_GetFieldAsStringList(c_feature, idx),
        )),
        _ => NativeField::String(_string(gdal_sys::OGR_F_GetFieldAsString(c_feature, idx))),
    }
}

unsafe fn write_field(c_feature: OGRFeatureH, idx: c_int, field: &NativeField) -> Result<()> {
    match field {
        NativeField::Unset => gdal_sys::OGR_F_UnsetField(c_feature, idx),
        NativeField::Null => gdal_sys::OGR_F_SetFieldNull(c_feature, idx),
        NativeField::Integer(v) => gdal_sys::OGR_F_SetFieldInteger(c_feature, idx, *v),
        NativeField::Integer64(v) => gdal_sys::OGR_F_SetFieldInteger64(c_feature, idx, *v),
        NativeField::Real(v) => gdal_sys::OGR_F_SetFieldDouble(c_feature, idx, *v),
        NativeField::String(v) => {
            let c_value = CString::new(v.as_str())?;
            gdal_sys::OGR_F_SetFieldString(c_feature, idx, c_value.as_ptr());
        }
        NativeField::Binary(v) => gdal_sys::OGR_F_SetFieldBinary(
            c_feature,
            idx,
            v.len() as c_int,
            v.as_ptr() as _,
        ),
        NativeField::Date(dt) | NativeField::DateTime(dt) | NativeField::Time(dt) => {
            gdal_sys::OGR_F_SetFieldDateTimeEx(
                c_feature,
                idx,
                dt.year,
                dt.month as c_int,
                dt.day as c_int,
                dt.hour as c_int,
                dt.minute as c_int,
                dt.second,
                dt.tz_flag,
            )
        }
        NativeField::IntegerList(v) => {
            gdal_sys::OGR_F_SetFieldIntegerList(c_feature, idx, v.len() as c_int, v.as_ptr())
        }
        NativeField::Integer64List(v) => gdal_sys::OGR_F_SetFieldInteger64List(
            c_feature,
            idx,
            v.len() as c_int,
            v.as_ptr() as _,
        ),
        NativeField::RealList(v) => {
            gdal_sys::OGR_F_SetFieldDoubleList(c_feature, idx, v.len() as c_int, v.as_ptr())
        }
        NativeField::StringList(v) => {
            let csl = CslPtr::from_strings(v)?;
            gdal_sys::OGR_F_SetFieldStringList(c_feature, idx, csl.as_ptr() as _);
        }
    }
    Ok(())
}

/// Builds a feature of `c_defn` holding the values of `feature`.
///
/// # Safety
/// `c_defn` must be the valid definition of the layer the feature is written to.
pub(crate) unsafe fn build_feature(
    c_defn: OGRFeatureDefnH,
    feature: &NativeFeature<GdalGeometry>,
) -> Result<OwnedFeature> {
    let c_feature = gdal_sys::OGR_F_Create(c_defn);
    if c_feature.is_null() {
        return Err(GdalError::Write {
            method_name: "OGR_F_Create",
            msg: "unable to allocate feature".to_string(),
        });
    }
    let owned = OwnedFeature(c_feature);
    gdal_sys::OGR_F_SetFID(c_feature, feature.fid);
    for (idx, field) in feature.fields.iter().enumerate() {
        write_field(c_feature, idx as c_int, field)?;
    }
    for (idx, geometry) in feature.geometries.iter().enumerate() {
        if let Some(geometry) = geometry {
            // copies the geometry
            let rv = gdal_sys::OGR_F_SetGeomField(c_feature, idx as c_int, geometry.c_geometry());
            _ogr_result(rv, "OGR_F_SetGeomField")?;
        }
    }
    Ok(owned)
}
