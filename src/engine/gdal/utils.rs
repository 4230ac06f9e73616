use std::ffi::{CStr, CString};
use std::ptr::null_mut;
use std::sync::Once;

use gdal_sys::{self, OGRFieldSubType, OGRFieldType, OGRwkbGeometryType};
use libc::c_char;

use crate::cpl::CslStringList;
use crate::errors::{GdalError, OgrErr, Result};
use crate::vector::{FieldSubType, FieldType};

static START: Once = Once::new();

pub fn _register_drivers() {
    START.call_once(|| unsafe {
        gdal_sys::GDALAllRegister();
    });
}

pub fn _string(raw_ptr: *const c_char) -> String {
    if raw_ptr.is_null() {
        return String::new();
    }
    let c_str = unsafe { CStr::from_ptr(raw_ptr) };
    c_str.to_string_lossy().into_owned()
}

pub fn _string_array(raw_ptr: *mut *mut c_char) -> Vec<String> {
    let mut ret_val: Vec<String> = vec![];
    if raw_ptr.is_null() {
        return ret_val;
    }
    let mut i = 0;
    unsafe {
        loop {
            let next = raw_ptr.add(i).read();
            if next.is_null() {
                break;
            }
            ret_val.push(_string(next));
            i += 1;
        }
    }
    ret_val
}

/// Takes ownership of a string allocated by GDAL.
pub fn _owned_string(raw_ptr: *mut c_char) -> String {
    let value = _string(raw_ptr);
    unsafe { gdal_sys::VSIFree(raw_ptr.cast()) };
    value
}

pub fn _last_error_msg() -> String {
    _string(unsafe { gdal_sys::CPLGetLastErrorMsg() })
}

/// Maps the `OGRErr` returned by `method_name`.
pub fn _ogr_result(rv: gdal_sys::OGRErr::Type, method_name: &'static str) -> Result<()> {
    match OgrErr::from_code(rv as u32) {
        None => Ok(()),
        Some(err) => Err(GdalError::OgrError {
            err,
            method_name,
            msg: _last_error_msg(),
        }),
    }
}

pub fn _last_null_pointer_err(method_name: &'static str) -> GdalError {
    let msg = _last_error_msg();
    unsafe { gdal_sys::CPLErrorReset() };
    GdalError::OgrError {
        err: OgrErr::Failure,
        method_name,
        msg,
    }
}

/// A `char**` string list owned by GDAL's allocator.
pub struct CslPtr(*mut *mut c_char);

impl CslPtr {
    pub fn empty() -> Self {
        CslPtr(null_mut())
    }

    /// `KEY=VALUE` entries.
    pub fn from_name_values(list: &CslStringList) -> Result<Self> {
        let mut csl = Self::empty();
        for (key, value) in list.iter() {
            let c_key = CString::new(key)?;
            let c_value = CString::new(value)?;
            csl.0 = unsafe { gdal_sys::CSLSetNameValue(csl.0, c_key.as_ptr(), c_value.as_ptr()) };
        }
        Ok(csl)
    }

    /// Plain entries.
    pub fn from_strings<S: AsRef<str>>(strings: &[S]) -> Result<Self> {
        let mut csl = Self::empty();
        for entry in strings {
            let c_entry = CString::new(entry.as_ref())?;
            csl.0 = unsafe { gdal_sys::CSLAddString(csl.0, c_entry.as_ptr()) };
        }
        Ok(csl)
    }

    pub fn as_ptr(&self) -> *mut *mut c_char {
        self.0
    }
}

impl Drop for CslPtr {
    fn drop(&mut self) {
        unsafe { gdal_sys::CSLDestroy(self.0) };
    }
}

/// Copies a GDAL `KEY=VALUE` list. Entries without `=` are skipped.
pub fn _name_value_list(raw_ptr: *mut *mut c_char) -> CslStringList {
    let mut list = CslStringList::new();
    for entry in _string_array(raw_ptr) {
        if list.add_string(&entry).is_err() {
            log::debug!("Skipping metadata entry '{entry}'");
        }
    }
    list
}

pub fn field_type_from_ogr(field_type: OGRFieldType::Type) -> FieldType {
    match field_type {
        OGRFieldType::OFTInteger => FieldType::Integer,
        OGRFieldType::OFTIntegerList => FieldType::IntegerList,
        OGRFieldType::OFTReal => FieldType::Real,
        OGRFieldType::OFTRealList => FieldType::RealList,
        OGRFieldType::OFTStringList | OGRFieldType::OFTWideStringList => FieldType::StringList,
        OGRFieldType::OFTBinary => FieldType::Binary,
        OGRFieldType::OFTDate => FieldType::Date,
        OGRFieldType::OFTTime => FieldType::Time,
        OGRFieldType::OFTDateTime => FieldType::DateTime,
        OGRFieldType::OFTInteger64 => FieldType::Integer64,
        OGRFieldType::OFTInteger64List => FieldType::Integer64List,
        _ => FieldType::String,
    }
}

pub fn field_type_to_ogr(field_type: FieldType) -> OGRFieldType::Type {
    match field_type {
        FieldType::Integer => OGRFieldType::OFTInteger,
        FieldType::IntegerList => OGRFieldType::OFTIntegerList,
        FieldType::Real => OGRFieldType::OFTReal,
        FieldType::RealList => OGRFieldType::OFTRealList,
        FieldType::String => OGRFieldType::OFTString,
        FieldType::StringList => OGRFieldType::OFTStringList,
        FieldType::Binary => OGRFieldType::OFTBinary,
        FieldType::Date => OGRFieldType::OFTDate,
        FieldType::Time => OGRFieldType::OFTTime,
        FieldType::DateTime => OGRFieldType::OFTDateTime,
        FieldType::Integer64 => OGRFieldType::OFTInteger64,
        FieldType::Integer64List => OGRFieldType::OFTInteger64List,
    }
}

pub fn field_subtype_from_ogr(subtype: OGRFieldSubType::Type) -> FieldSubType {
    match subtype {
        OGRFieldSubType::OFSTBoolean => FieldSubType::Boolean,
        OGRFieldSubType::OFSTInt16 => FieldSubType::Int16,
        OGRFieldSubType::OFSTFloat32 => FieldSubType::Float32,
        OGRFieldSubType::OFSTJSON => FieldSubType::Json,
        OGRFieldSubType::OFSTUUID => FieldSubType::Uuid,
        _ => FieldSubType::None,
    }
}

pub fn field_subtype_to_ogr(subtype: FieldSubType) -> OGRFieldSubType::Type {
    match subtype {
        FieldSubType::None => OGRFieldSubType::OFSTNone,
        FieldSubType::Boolean => OGRFieldSubType::OFSTBoolean,
        FieldSubType::Int16 => OGRFieldSubType::OFSTInt16,
        FieldSubType::Float32 => OGRFieldSubType::OFSTFloat32,
        FieldSubType::Json => OGRFieldSubType::OFSTJSON,
        FieldSubType::Uuid => OGRFieldSubType::OFSTUUID,
    }
}

pub fn geometry_type_name(geom_type: OGRwkbGeometryType::Type) -> String {
    _string(unsafe { gdal_sys::OGRGeometryTypeToName(geom_type) })
}

/// Parses names such as `Polygon`, `Multi Polygon` or `MULTIPOLYGON`.
pub fn geometry_type_from_name(name: &str) -> OGRwkbGeometryType::Type {
    let normalized: String = name
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .collect::<String>()
        .to_ascii_lowercase();
    match normalized.as_str() {
        "point" => OGRwkbGeometryType::wkbPoint,
        "linestring" => OGRwkbGeometryType::wkbLineString,
        "polygon" => OGRwkbGeometryType::wkbPolygon,
        "multipoint" => OGRwkbGeometryType::wkbMultiPoint,
        "multilinestring" => OGRwkbGeometryType::wkbMultiLineString,
        "multipolygon" => OGRwkbGeometryType::wkbMultiPolygon,
        "geometrycollection" => OGRwkbGeometryType::wkbGeometryCollection,
        "none" => OGRwkbGeometryType::wkbNone,
        _ => OGRwkbGeometryType::wkbUnknown,
    }
}
