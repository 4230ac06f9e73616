//! Feature cursors and record marshaling for [GDAL/OGR](http://gdal.org/) vector layers.
//!
//! A [`VectorLayer`](vector::VectorLayer) is opened on a data source by layer name or
//! SQL query. It reads features one at a time or in column-oriented batches
//! ([`ResultTable`](vector::ResultTable)), converting the engine's typed values into
//! [`FieldValue`](vector::FieldValue)s as set up by its [`ReadConfig`](config::ReadConfig),
//! and validates [`Row`](vector::Row)s against the layer schema before writing them.
//!
//! The work below that level (drivers, filter evaluation, geometry parsing, layer algebra)
//! is done by an [`Engine`](engine::Engine). The crate ships an in-process engine,
//! [`MemEngine`](engine::mem::MemEngine), and with the `gdal` feature the GDAL/OGR
//! engine.
//!
//! ## Use
//!
//! ```
//! use gdal_vector::engine::mem::MemEngine;
//! use gdal_vector::options::LayerOptions;
//! use gdal_vector::vector::{FetchSize, FieldDefn, FieldType, GeomFieldDefn, GeometryValue, Row, VectorLayer};
//!
//! # fn main() -> gdal_vector::errors::Result<()> {
//! let mut ds = MemEngine::create("crate-doc")?;
//! ds.create_layer(
//!     "roads",
//!     vec![FieldDefn::new("highway", FieldType::String)],
//!     vec![GeomFieldDefn::new("", "LineString")],
//! )?;
//!
//! let mut layer =
//!     VectorLayer::<MemEngine>::open_with_options("crate-doc", "roads", LayerOptions::read_write())?;
//! layer.create_feature(
//!     &Row::new()
//!         .with("highway", "primary")
//!         .with("geometry", GeometryValue::Wkt("LINESTRING (0 0, 1 1)".to_string())),
//! )?;
//!
//! let table = layer.fetch(FetchSize::All)?;
//! for row in table.rows() {
//!     println!("{:?} {:?}", row.get("highway"), row.get("geometry"));
//! }
//! # MemEngine::remove("crate-doc");
//! # Ok(())
//! # }
//! ```

#![crate_type = "lib"]

pub mod config;
pub mod cpl;
pub mod engine;
pub mod errors;
pub mod metadata;
pub mod options;
pub mod vector;

pub use metadata::Metadata;

#[cfg(test)]
mod test_utils;
