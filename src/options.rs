use std::ffi::c_uint;

use bitflags::bitflags;

use crate::cpl::CslStringList;

/// Access mode a data source is opened with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Access {
    #[default]
    ReadOnly,
    ReadWrite,
}

impl Access {
    pub fn is_update(&self) -> bool {
        *self == Access::ReadWrite
    }
}

/// Where a [`VectorLayer`](crate::vector::VectorLayer) gets its features from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayerSource {
    /// A named layer of the data source.
    Name(String),
    /// The result set of a query, released when the layer is closed.
    Sql(String),
}

impl LayerSource {
    /// Treats `text` as a query when it starts with `SELECT` (ignoring case and leading
    /// whitespace), as a layer name otherwise.
    pub fn detect(text: &str) -> Self {
        let trimmed = text.trim_start();
        let is_query = trimmed
            .get(..6)
            .is_some_and(|head| head.eq_ignore_ascii_case("SELECT"))
            && trimmed[6..].starts_with(char::is_whitespace);
        if is_query {
            LayerSource::Sql(text.to_string())
        } else {
            LayerSource::Name(text.to_string())
        }
    }

    pub fn is_sql(&self) -> bool {
        matches!(self, LayerSource::Sql(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            LayerSource::Name(s) | LayerSource::Sql(s) => s,
        }
    }
}

impl From<&str> for LayerSource {
    fn from(text: &str) -> Self {
        LayerSource::detect(text)
    }
}

impl From<String> for LayerSource {
    fn from(text: String) -> Self {
        LayerSource::detect(&text)
    }
}

/// Open options for [`crate::vector::VectorLayer`]
#[derive(Clone, Debug, Default)]
pub struct LayerOptions {
    pub access: Access,
    /// Driver-specific `KEY=VALUE` open options.
    pub open_options: CslStringList,
    /// Spatial filter applied when the layer is opened, as WKT.
    ///
    /// For query-backed layers it is handed to the engine with the query, otherwise it
    /// becomes the initial spatial filter of the layer.
    pub spatial_filter: Option<String>,
    /// SQL dialect for query-backed layers, e.g. `SQLITE` or `OGRSQL`.
    pub dialect: Option<String>,
}

impl LayerOptions {
    pub fn read_write() -> Self {
        LayerOptions {
            access: Access::ReadWrite,
            ..Default::default()
        }
    }
}

// These are skipped by bindgen and manually updated.
bitflags! {
    /// GDal extended open flags.
    ///
    /// Used in the `nOpenFlags` argument to [`GDALOpenEx`].
    ///
    /// [`GDALOpenEx`]: https://gdal.org/doxygen/gdal_8h.html#a9cb8585d0b3c16726b08e25bcc94274a
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct GdalOpenFlags: c_uint {
        /// Open in read-only mode (default).
        const GDAL_OF_READONLY = 0x00;
        /// Open in update mode.
        const GDAL_OF_UPDATE = 0x01;
        /// Allow vector drivers to be used.
        const GDAL_OF_VECTOR = 0x04;
        /// Emit error message in case of failed open.
        const GDAL_OF_VERBOSE_ERROR = 0x40;
    }
}

impl Default for GdalOpenFlags {
    fn default() -> GdalOpenFlags {
        GdalOpenFlags::GDAL_OF_READONLY
    }
}

impl From<Access> for GdalOpenFlags {
    fn from(val: Access) -> GdalOpenFlags {
        let base = GdalOpenFlags::GDAL_OF_VECTOR | GdalOpenFlags::GDAL_OF_VERBOSE_ERROR;
        if val.is_update() {
            base | GdalOpenFlags::GDAL_OF_UPDATE
        } else {
            base
        }
    }
}
