//! Read configuration
//!
//! Every [`VectorLayer`](crate::vector::VectorLayer) carries a [`ReadConfig`] that controls
//! how records are marshaled into host values. The settings can be changed at any time
//! and take effect with the next read.
//!
//! ```
//! use gdal_vector::config::{GeomFormat, ReadConfig};
//! use gdal_vector::engine::ByteOrder;
//!
//! let config = ReadConfig {
//!     geom_format: GeomFormat::Wkt,
//!     byte_order: ByteOrder::Msb,
//!     ..Default::default()
//! };
//! assert_eq!(config.default_geom_col_name, "geometry");
//! ```

use std::str::FromStr;

use crate::engine::ByteOrder;
use crate::errors::GdalError;

/// Encoding used for geometries in rows and result tables.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GeomFormat {
    /// Well-known binary, legacy OGC flavor.
    #[default]
    Wkb,
    /// Well-known binary, ISO SQL/MM flavor.
    WkbIso,
    Wkt,
    WktIso,
    /// Geometry type name only, e.g. `POLYGON`.
    TypeName,
    /// Type name and a short description.
    Summary,
    /// Bounding box as `[xmin, ymin, xmax, ymax]`.
    BBox,
    /// Geometries are not read at all.
    None,
}

impl FromStr for GeomFormat {
    type Err = GdalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "WKB" => Ok(GeomFormat::Wkb),
            "WKB_ISO" => Ok(GeomFormat::WkbIso),
            "WKT" => Ok(GeomFormat::Wkt),
            "WKT_ISO" => Ok(GeomFormat::WktIso),
            "TYPE_NAME" => Ok(GeomFormat::TypeName),
            "SUMMARY" => Ok(GeomFormat::Summary),
            "BBOX" => Ok(GeomFormat::BBox),
            "NONE" => Ok(GeomFormat::None),
            _ => Err(GdalError::BadArgument(format!(
                "Unknown geometry format: '{s}'"
            ))),
        }
    }
}

/// Settings applied when records are read.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadConfig {
    pub geom_format: GeomFormat,
    /// Byte order of WKB output.
    pub byte_order: ByteOrder,
    /// Promote single-part geometries to their multi-part type before encoding.
    pub promote_to_multi: bool,
    /// Name given to geometry fields the engine reports unnamed.
    pub default_geom_col_name: String,
    /// Suppress warnings.
    pub quiet: bool,
    /// Number of rows between two polls of the interrupt handler during fetches.
    pub interrupt_check_interval: usize,
}

impl Default for ReadConfig {
    fn default() -> Self {
        ReadConfig {
            geom_format: GeomFormat::Wkb,
            byte_order: ByteOrder::Lsb,
            promote_to_multi: false,
            default_geom_col_name: "geometry".to_string(),
            quiet: false,
            interrupt_check_interval: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_geom_format() {
        assert_eq!("wkt_iso".parse::<GeomFormat>().unwrap(), GeomFormat::WktIso);
        assert_eq!("BBOX".parse::<GeomFormat>().unwrap(), GeomFormat::BBox);
        assert!("GeoJSON".parse::<GeomFormat>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = ReadConfig::default();
        assert_eq!(config.geom_format, GeomFormat::Wkb);
        assert_eq!(config.byte_order, ByteOrder::Lsb);
        assert!(!config.promote_to_multi);
        assert!(!config.quiet);
        assert_eq!(config.interrupt_check_interval, 1000);
    }
}
