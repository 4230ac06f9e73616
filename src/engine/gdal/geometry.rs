use std::ffi::CString;
use std::fmt::{self, Debug, Formatter};
use std::ptr::null_mut;

use gdal_sys::{self, OGREnvelope, OGRGeometryH, OGRwkbByteOrder, OGRwkbGeometryType};
use libc::{c_char, c_int};

use crate::engine::gdal::utils::{_last_error_msg, _owned_string, _string};
use crate::engine::{ByteOrder, EngineGeometry, Envelope, WkVariant};
use crate::errors::{GdalError, Result};

/// An owned OGR geometry.
pub struct GdalGeometry {
    c_geometry: OGRGeometryH,
}

impl GdalGeometry {
    /// Takes ownership of `c_geometry`, which must not be null.
    ///
    /// # Safety
    /// The handle must not be owned by anything else.
    pub unsafe fn with_c_geometry(c_geometry: OGRGeometryH) -> Self {
        GdalGeometry { c_geometry }
    }

    /// Copies a geometry owned by someone else; `None` for a null handle.
    ///
    /// # Safety
    /// `c_geometry` must be null or a valid geometry handle.
    pub unsafe fn from_borrowed(c_geometry: OGRGeometryH) -> Option<Self> {
        if c_geometry.is_null() {
            return None;
        }
        let c_clone = gdal_sys::OGR_G_Clone(c_geometry);
        (!c_clone.is_null()).then(|| GdalGeometry::with_c_geometry(c_clone))
    }

    pub fn c_geometry(&self) -> OGRGeometryH {
        self.c_geometry
    }

    fn parse_error(method_name: &'static str) -> GdalError {
        GdalError::GeometryParse {
            method_name,
            msg: _last_error_msg(),
        }
    }

    fn point_count(c_geometry: OGRGeometryH) -> i32 {
        let parts = unsafe { gdal_sys::OGR_G_GetGeometryCount(c_geometry) };
        if parts == 0 {
            return unsafe { gdal_sys::OGR_G_GetPointCount(c_geometry) };
        }
        (0..parts)
            .map(|i| Self::point_count(unsafe { gdal_sys::OGR_G_GetGeometryRef(c_geometry, i) }))
            .sum()
    }
}

impl Clone for GdalGeometry {
    fn clone(&self) -> Self {
        let c_clone = unsafe { gdal_sys::OGR_G_Clone(self.c_geometry) };
        unsafe { GdalGeometry::with_c_geometry(c_clone) }
    }
}

impl PartialEq for GdalGeometry {
    fn eq(&self, other: &Self) -> bool {
        unsafe { gdal_sys::OGR_G_Equals(self.c_geometry, other.c_geometry) != 0 }
    }
}

impl Debug for GdalGeometry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.wkt(WkVariant::Iso) {
            Ok(wkt) => f.write_str(&wkt),
            Err(_) => f.write_str("<geometry>"),
        }
    }
}

impl Drop for GdalGeometry {
    fn drop(&mut self) {
        unsafe { gdal_sys::OGR_G_DestroyGeometry(self.c_geometry) };
    }
}

impl EngineGeometry for GdalGeometry {
    fn from_wkb(wkb: &[u8]) -> Result<Self> {
        let mut c_geom = null_mut();
        let rv = unsafe {
            gdal_sys::OGR_G_CreateFromWkb(
                wkb.as_ptr() as _,
                null_mut(),
                &mut c_geom,
                wkb.len() as c_int,
            )
        };
        if rv != gdal_sys::OGRErr::OGRERR_NONE || c_geom.is_null() {
            return Err(Self::parse_error("OGR_G_CreateFromWkb"));
        }
        Ok(unsafe { GdalGeometry::with_c_geometry(c_geom) })
    }

    fn from_wkt(wkt: &str) -> Result<Self> {
        let c_wkt = CString::new(wkt)?;
        // OGR_G_CreateFromWkt only advances the pointer, it does not write through it
        let mut c_wkt_ptr = c_wkt.as_ptr() as *mut c_char;
        let mut c_geom = null_mut();
        let rv =
            unsafe { gdal_sys::OGR_G_CreateFromWkt(&mut c_wkt_ptr, null_mut(), &mut c_geom) };
        if rv != gdal_sys::OGRErr::OGRERR_NONE || c_geom.is_null() {
            return Err(Self::parse_error("OGR_G_CreateFromWkt"));
        }
        Ok(unsafe { GdalGeometry::with_c_geometry(c_geom) })
    }

    fn wkb(&self, byte_order: ByteOrder, variant: WkVariant) -> Result<Vec<u8>> {
        let size = self.wkb_size();
        let mut wkb = vec![0; size];
        let c_order = match byte_order {
            ByteOrder::Lsb => OGRwkbByteOrder::wkbNDR,
            ByteOrder::Msb => OGRwkbByteOrder::wkbXDR,
        };
        let rv = unsafe {
            match variant {
                WkVariant::Legacy => {
                    gdal_sys::OGR_G_ExportToWkb(self.c_geometry, c_order, wkb.as_mut_ptr())
                }
                WkVariant::Iso => {
                    gdal_sys::OGR_G_ExportToIsoWkb(self.c_geometry, c_order, wkb.as_mut_ptr())
                }
            }
        };
        if rv != gdal_sys::OGRErr::OGRERR_NONE {
            return Err(Self::parse_error("OGR_G_ExportToWkb"));
        }
        Ok(wkb)
    }

    fn wkt(&self, variant: WkVariant) -> Result<String> {
        let mut c_wkt = null_mut();
        let rv = unsafe {
            match variant {
                WkVariant::Legacy => gdal_sys::OGR_G_ExportToWkt(self.c_geometry, &mut c_wkt),
                WkVariant::Iso => gdal_sys::OGR_G_ExportToIsoWkt(self.c_geometry, &mut c_wkt),
            }
        };
        if rv != gdal_sys::OGRErr::OGRERR_NONE {
            return Err(Self::parse_error("OGR_G_ExportToWkt"));
        }
        Ok(_owned_string(c_wkt))
    }

    fn wkb_size(&self) -> usize {
        unsafe { gdal_sys::OGR_G_WkbSize(self.c_geometry) }.max(0) as usize
    }

    fn geometry_name(&self) -> String {
        _string(unsafe { gdal_sys::OGR_G_GetGeometryName(self.c_geometry) })
    }

    fn summary(&self) -> String {
        let name = self.geometry_name();
        let parts = unsafe { gdal_sys::OGR_G_GetGeometryCount(self.c_geometry) };
        let points = Self::point_count(self.c_geometry);
        let flat = unsafe { gdal_sys::OGR_GT_Flatten(gdal_sys::OGR_G_GetGeometryType(self.c_geometry)) };
        match flat {
            OGRwkbGeometryType::wkbPoint => name,
            OGRwkbGeometryType::wkbPolygon => format!("{name} : {parts} rings, {points} points"),
            _ if parts > 0 => format!("{name} : {parts} geometries, {points} points"),
            _ => format!("{name} : {points} points"),
        }
    }

    fn envelope(&self) -> Envelope {
        let mut envelope = OGREnvelope {
            MinX: 0.0,
            MaxX: 0.0,
            MinY: 0.0,
            MaxY: 0.0,
        };
        unsafe { gdal_sys::OGR_G_GetEnvelope(self.c_geometry, &mut envelope) };
        Envelope::new(envelope.MinX, envelope.MinY, envelope.MaxX, envelope.MaxY)
    }

    fn is_empty(&self) -> bool {
        unsafe { gdal_sys::OGR_G_IsEmpty(self.c_geometry) != 0 }
    }

    fn force_to_multi(self) -> Self {
        let geom_type = unsafe { gdal_sys::OGR_G_GetGeometryType(self.c_geometry) };
        let target = unsafe { gdal_sys::OGR_GT_GetCollection(geom_type) };
        if target == OGRwkbGeometryType::wkbUnknown || target == geom_type {
            return self;
        }
        let c_geometry = self.c_geometry;
        std::mem::forget(self);
        let no_options: *mut *mut c_char = null_mut();
        let c_forced = unsafe { gdal_sys::OGR_G_ForceTo(c_geometry, target, no_options as _) };
        unsafe { GdalGeometry::with_c_geometry(c_forced) }
    }
}
