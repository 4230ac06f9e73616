//! Vector layers
//!
//! ## Reading
//!
//! ```
//! use gdal_vector::engine::mem::MemEngine;
//! use gdal_vector::vector::{FetchSize, FieldDefn, FieldType, FieldValue, Row, VectorLayer};
//! use gdal_vector::options::LayerOptions;
//!
//! # fn main() -> gdal_vector::errors::Result<()> {
//! let mut ds = MemEngine::create("vector-doc")?;
//! ds.create_layer("roads", vec![FieldDefn::new("highway", FieldType::String)], vec![])?;
//! let mut layer =
//!     VectorLayer::<MemEngine>::open_with_options("vector-doc", "roads", LayerOptions::read_write())?;
//! layer.create_feature(&Row::new().with("highway", "primary"))?;
//!
//! layer.set_attribute_filter("highway = 'primary'")?;
//! while let Some(row) = layer.next_feature()? {
//!     let highway = row.get("highway").cloned().and_then(FieldValue::into_string);
//!     println!("{} {:?}", row.fid().unwrap_or_default(), highway);
//! }
//! let table = layer.fetch(FetchSize::All)?;
//! assert_eq!(table.column_names(), &["FID", "highway"]);
//! # MemEngine::remove("vector-doc");
//! # Ok(())
//! # }
//! ```

pub use crate::vector::cursor::{CursorState, FetchSize};
pub use crate::vector::defn::{FieldDefn, FieldSubType, FieldType, GeomFieldDefn, LayerSchema};
pub use crate::vector::domain::{
    DomainInfo, DomainKind, DomainPayload, FieldDomain, MergePolicy, SplitPolicy,
};
pub use crate::vector::filter::SpatialFilter;
pub use crate::vector::layer::VectorLayer;
pub use crate::vector::table::{Column, ResultTable};
pub use crate::vector::transaction::Transaction;
pub use crate::vector::value::{FieldValue, GeometryValue, Row, FID_KEY};

pub(crate) mod codec;
mod cursor;
mod defn;
mod domain;
mod filter;
mod geometry;
mod layer;
mod ops;
mod table;
mod transaction;
mod value;
mod write;

#[cfg(test)]
mod vector_tests;
