//! Geometry marshaling.
//!
//! Read path: an engine geometry becomes a [`GeometryValue`] in the configured
//! [`GeomFormat`]. Write path: a WKB buffer or WKT string becomes an engine geometry.
//! [`GeometryValue::to_geo`] and [`GeometryValue::from_geo`] bridge to `geo-types`.

use crate::config::{GeomFormat, ReadConfig};
use crate::engine::mem::MemGeometry;
use crate::engine::{ByteOrder, EngineGeometry, WkVariant};
use crate::errors::{GdalError, Result};
use crate::vector::value::{FieldValue, GeometryValue};

/// Encodes `geometry` according to `config`. A missing geometry is a null value.
pub(crate) fn encode_geometry<G: EngineGeometry>(
    geometry: Option<G>,
    config: &ReadConfig,
) -> Result<FieldValue> {
    let Some(mut geometry) = geometry else {
        return Ok(FieldValue::NullValue);
    };
    if config.promote_to_multi {
        geometry = geometry.force_to_multi();
    }
    let value = match config.geom_format {
        GeomFormat::Wkb => GeometryValue::Wkb(geometry.wkb(config.byte_order, WkVariant::Legacy)?),
        GeomFormat::WkbIso => GeometryValue::Wkb(geometry.wkb(config.byte_order, WkVariant::Iso)?),
        GeomFormat::Wkt => GeometryValue::Wkt(geometry.wkt(WkVariant::Legacy)?),
        GeomFormat::WktIso => GeometryValue::Wkt(geometry.wkt(WkVariant::Iso)?),
        GeomFormat::TypeName => GeometryValue::TypeName(geometry.geometry_name()),
        GeomFormat::Summary => GeometryValue::Summary(geometry.summary()),
        GeomFormat::BBox => GeometryValue::BBox(geometry.envelope().to_array()),
        GeomFormat::None => return Ok(FieldValue::NullValue),
    };
    Ok(FieldValue::GeometryValue(value))
}

/// Parses the value written to the geometry field `field_name`.
///
/// A zero-length buffer, an empty string and a null value all mean "no geometry".
pub(crate) fn decode_geometry<G: EngineGeometry>(
    field_name: &str,
    value: &FieldValue,
) -> Result<Option<G>> {
    let geometry = match value {
        FieldValue::NullValue => None,
        FieldValue::BinaryValue(wkb) | FieldValue::GeometryValue(GeometryValue::Wkb(wkb)) => {
            if wkb.is_empty() {
                None
            } else {
                Some(G::from_wkb(wkb)?)
            }
        }
        FieldValue::StringValue(wkt) | FieldValue::GeometryValue(GeometryValue::Wkt(wkt)) => {
            if wkt.trim().is_empty() {
                None
            } else {
                Some(G::from_wkt(wkt)?)
            }
        }
        other => {
            return Err(GdalError::TypeMismatch {
                field_name: field_name.to_string(),
                expected: "WKB or WKT geometry",
                actual: other.kind(),
            })
        }
    };
    Ok(geometry)
}

impl GeometryValue {
    /// Converts a WKB or WKT value into a `geo-types` geometry.
    pub fn to_geo(&self) -> Result<geo_types::Geometry<f64>> {
        let geometry = match self {
            GeometryValue::Wkb(wkb) => MemGeometry::from_wkb(wkb)?,
            GeometryValue::Wkt(wkt) => MemGeometry::from_wkt(wkt)?,
            other => {
                return Err(GdalError::BadArgument(format!(
                    "{other:?} cannot be converted to a geometry"
                )))
            }
        };
        Ok(geometry.into_geo())
    }

    /// Encodes a `geo-types` geometry as WKB.
    pub fn from_geo(geometry: &geo_types::Geometry<f64>, byte_order: ByteOrder) -> Result<Self> {
        let wkb = MemGeometry::new(geometry.clone()).wkb(byte_order, WkVariant::Legacy)?;
        Ok(GeometryValue::Wkb(wkb))
    }
}

impl From<GeometryValue> for FieldValue {
    fn from(value: GeometryValue) -> Self {
        FieldValue::GeometryValue(value)
    }
}
