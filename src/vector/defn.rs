use crate::engine::EngineLayer;
use crate::errors::Warning;

/// Attribute field type (`OGRFieldType`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    Integer,
    IntegerList,
    Real,
    RealList,
    String,
    StringList,
    Binary,
    Date,
    Time,
    DateTime,
    Integer64,
    Integer64List,
}

impl FieldType {
    /// The name GDAL uses for this type (`OGR_GetFieldTypeName`).
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Integer => "Integer",
            FieldType::IntegerList => "IntegerList",
            FieldType::Real => "Real",
            FieldType::RealList => "RealList",
            FieldType::String => "String",
            FieldType::StringList => "StringList",
            FieldType::Binary => "Binary",
            FieldType::Date => "Date",
            FieldType::Time => "Time",
            FieldType::DateTime => "DateTime",
            FieldType::Integer64 => "Integer64",
            FieldType::Integer64List => "Integer64List",
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(
            self,
            FieldType::IntegerList
                | FieldType::Integer64List
                | FieldType::RealList
                | FieldType::StringList
        )
    }
}

/// Attribute field subtype (`OGRFieldSubType`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FieldSubType {
    #[default]
    None,
    Boolean,
    Int16,
    Float32,
    Json,
    Uuid,
}

impl FieldSubType {
    pub fn name(&self) -> &'static str {
        match self {
            FieldSubType::None => "None",
            FieldSubType::Boolean => "Boolean",
            FieldSubType::Int16 => "Int16",
            FieldSubType::Float32 => "Float32",
            FieldSubType::Json => "JSON",
            FieldSubType::Uuid => "UUID",
        }
    }
}

/// Attribute field definition.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldDefn {
    pub name: String,
    pub field_type: FieldType,
    pub subtype: FieldSubType,
    /// Formatting width, zero when unspecified.
    pub width: i32,
    /// Formatting precision, normally zero for non-Real fields.
    pub precision: i32,
    pub nullable: bool,
    pub unique: bool,
    /// Default value as an SQL-style literal.
    pub default: Option<String>,
    pub ignored: bool,
    pub domain: Option<String>,
}

impl FieldDefn {
    /// A nullable field without constraints.
    pub fn new(name: &str, field_type: FieldType) -> Self {
        FieldDefn {
            name: name.to_string(),
            field_type,
            subtype: FieldSubType::None,
            width: 0,
            precision: 0,
            nullable: true,
            unique: false,
            default: None,
            ignored: false,
            domain: None,
        }
    }

    pub fn with_subtype(mut self, subtype: FieldSubType) -> Self {
        self.subtype = subtype;
        self
    }

    pub fn with_width(mut self, width: i32, precision: i32) -> Self {
        self.width = width;
        self.precision = precision;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_default(mut self, default: &str) -> Self {
        self.default = Some(default.to_string());
        self
    }

    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }

    pub fn is_boolean(&self) -> bool {
        self.field_type == FieldType::Integer && self.subtype == FieldSubType::Boolean
    }
}

/// Geometry field definition.
#[derive(Clone, Debug, PartialEq)]
pub struct GeomFieldDefn {
    /// Field name as reported by the engine, possibly empty.
    pub name: String,
    /// Geometry type name, e.g. `Polygon`.
    pub geom_type: String,
    pub nullable: bool,
    pub ignored: bool,
    /// Spatial reference as WKT.
    pub srs: Option<String>,
}

impl GeomFieldDefn {
    pub fn new(name: &str, geom_type: &str) -> Self {
        GeomFieldDefn {
            name: name.to_string(),
            geom_type: geom_type.to_string(),
            nullable: true,
            ignored: false,
            srs: None,
        }
    }

    pub fn with_srs(mut self, srs: &str) -> Self {
        self.srs = Some(srs.to_string());
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// The name this field is addressed by: its own, or `default_name` when the engine
    /// reports it unnamed.
    pub fn display_name<'a>(&'a self, default_name: &'a str) -> &'a str {
        if self.name.is_empty() {
            default_name
        } else {
            &self.name
        }
    }
}

/// The schema of a layer: attribute fields followed by geometry fields, in engine order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LayerSchema {
    pub fields: Vec<FieldDefn>,
    pub geom_fields: Vec<GeomFieldDefn>,
}

impl LayerSchema {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn geom_field_index(&self, name: &str, default_name: &str) -> Option<usize> {
        self.geom_fields
            .iter()
            .position(|g| g.display_name(default_name) == name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefn> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Attribute names followed by geometry names.
    pub fn field_names(&self, default_geom_name: &str) -> Vec<String> {
        self.fields
            .iter()
            .map(|f| f.name.clone())
            .chain(
                self.geom_fields
                    .iter()
                    .map(|g| g.display_name(default_geom_name).to_string()),
            )
            .collect()
    }
}

/// Reads the schema of `layer`.
///
/// A geometry field whose spatial reference cannot be obtained gets `srs: None` and a
/// [`Warning::MissingSpatialRef`]; many valid layers carry no SRS at all.
pub(crate) fn inspect<L: EngineLayer>(layer: &L, default_geom_name: &str) -> (LayerSchema, Vec<Warning>) {
    let mut warnings = Vec::new();
    let mut geom_fields = layer.geom_fields();
    for (idx, geom_field) in geom_fields.iter_mut().enumerate() {
        match layer.geom_field_spatial_ref(idx) {
            Ok(wkt) if !wkt.is_empty() => geom_field.srs = Some(wkt),
            Ok(_) => {
                geom_field.srs = None;
                warnings.push(Warning::MissingSpatialRef {
                    field_name: geom_field.display_name(default_geom_name).to_string(),
                    msg: "empty spatial reference".to_string(),
                });
            }
            Err(e) => {
                geom_field.srs = None;
                warnings.push(Warning::MissingSpatialRef {
                    field_name: geom_field.display_name(default_geom_name).to_string(),
                    msg: e.to_string(),
                });
            }
        }
    }
    let schema = LayerSchema {
        fields: layer.fields(),
        geom_fields,
    };
    (schema, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> LayerSchema {
        LayerSchema {
            fields: vec![
                FieldDefn::new("name", FieldType::String),
                FieldDefn::new("flag", FieldType::Integer).with_subtype(FieldSubType::Boolean),
            ],
            geom_fields: vec![
                GeomFieldDefn::new("", "Polygon"),
                GeomFieldDefn::new("centroid", "Point"),
            ],
        }
    }

    #[test]
    fn test_field_names_use_default_geometry_name() {
        assert_eq!(
            schema().field_names("geometry"),
            vec!["name", "flag", "geometry", "centroid"]
        );
    }

    #[test]
    fn test_lookup() {
        let schema = schema();
        assert_eq!(schema.field_index("flag"), Some(1));
        assert_eq!(schema.field_index("missing"), None);
        assert_eq!(schema.geom_field_index("geom", "geom"), Some(0));
        assert_eq!(schema.geom_field_index("centroid", "geom"), Some(1));
        assert!(schema.field("flag").unwrap().is_boolean());
        assert!(!schema.field("name").unwrap().is_boolean());
    }

    #[test]
    fn test_type_names() {
        assert_eq!(FieldType::Integer64List.name(), "Integer64List");
        assert!(FieldType::StringList.is_list());
        assert!(!FieldType::DateTime.is_list());
        assert_eq!(FieldSubType::Json.name(), "JSON");
    }
}
