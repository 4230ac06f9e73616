use thiserror::Error;

pub type Result<T> = std::result::Result<T, GdalError>;

/// Error codes reported by the vector engine, following `OGRErr`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OgrErr {
    NotEnoughData,
    NotEnoughMemory,
    UnsupportedGeometryType,
    UnsupportedOperation,
    CorruptData,
    Failure,
    UnsupportedSrs,
    InvalidHandle,
    NonExistingFeature,
}

impl OgrErr {
    /// Maps a raw `OGRErr` code. `OGRERR_NONE` (0) has no counterpart and maps to `None`.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => None,
            1 => Some(OgrErr::NotEnoughData),
            2 => Some(OgrErr::NotEnoughMemory),
            3 => Some(OgrErr::UnsupportedGeometryType),
            4 => Some(OgrErr::UnsupportedOperation),
            5 => Some(OgrErr::CorruptData),
            7 => Some(OgrErr::UnsupportedSrs),
            8 => Some(OgrErr::InvalidHandle),
            9 => Some(OgrErr::NonExistingFeature),
            _ => Some(OgrErr::Failure),
        }
    }
}

#[derive(Clone, Debug, Error)]
pub enum GdalError {
    #[error("FfiNulError")]
    FfiNulError(#[from] std::ffi::NulError),
    #[error("StrUtf8Error")]
    StrUtf8Error(#[from] std::str::Utf8Error),
    #[error("Unable to open '{dsn}': {msg}")]
    OpenFailure { dsn: String, msg: String },
    #[error("Invalid attribute filter '{predicate}': {msg}")]
    FilterSyntax { predicate: String, msg: String },
    #[error("Unable to parse geometry on method {method_name}: {msg}")]
    GeometryParse {
        method_name: &'static str,
        msg: String,
    },
    #[error("Field '{field_name}' expects {expected} but got {actual}")]
    TypeMismatch {
        field_name: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("'{field_name}' does not match any field of layer '{layer_name}'")]
    UnmappedField {
        field_name: String,
        layer_name: String,
    },
    #[error("Field '{field_name}' is not nullable")]
    NotNullable { field_name: String },
    #[error("Layer '{layer_name}' does not support {capability}")]
    CapabilityUnsupported {
        capability: &'static str,
        layer_name: String,
    },
    #[error("OGR method '{method_name}' rejected the feature: {msg}")]
    Write {
        method_name: &'static str,
        msg: String,
    },
    #[error("Value out of range on method {method_name}: {msg}")]
    Range {
        method_name: &'static str,
        msg: String,
    },
    #[error("Unable to allocate a result table of {rows} rows")]
    Allocation { rows: usize },
    #[error("Layer is not open")]
    LayerClosed,
    #[error("Interrupted after {rows} rows")]
    Interrupted { rows: usize },
    #[error("OGR method '{method_name}' returned error: '{err:?}': {msg}")]
    OgrError {
        err: OgrErr,
        method_name: &'static str,
        msg: String,
    },
    #[error("BadArgument error: {0}")]
    BadArgument(String),
}

/// Non-fatal conditions attached to results and logged unless the layer is quiet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Warning {
    /// More features were read than the engine's feature count predicted.
    CountMismatch { expected: i64, actual: usize },
    /// A geometry field has no usable spatial reference.
    MissingSpatialRef { field_name: String, msg: String },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::CountMismatch { expected, actual } => write!(
                f,
                "feature count reported {expected} but {actual} features were read"
            ),
            Warning::MissingSpatialRef { field_name, msg } => {
                write!(f, "no spatial reference for '{field_name}': {msg}")
            }
        }
    }
}
