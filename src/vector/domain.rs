//! Field domains
//!
//! A field domain is a named constraint on the values of a field: an enumeration of
//! codes, a numeric or temporal range, or a glob pattern. Domains belong to the data
//! source and are referenced by name from [`FieldDefn::domain`](super::FieldDefn).
//!
//! See: [`OGRFieldDomain`](https://gdal.org/api/ogrfeature_cpp.html#ogrfielddomain-class)

use crate::engine::NativeField;
use crate::vector::codec::decode_native;
use crate::vector::{FieldSubType, FieldType, FieldValue};

/// How a field value is split when the geometry of its feature is split.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SplitPolicy {
    #[default]
    DefaultValue,
    Duplicate,
    GeometryRatio,
}

impl SplitPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            SplitPolicy::DefaultValue => "DEFAULT_VALUE",
            SplitPolicy::Duplicate => "DUPLICATE",
            SplitPolicy::GeometryRatio => "GEOMETRY_RATIO",
        }
    }
}

/// How field values are merged when the geometries of their features are merged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MergePolicy {
    #[default]
    DefaultValue,
    Sum,
    GeometryWeighted,
}

impl MergePolicy {
    pub fn name(&self) -> &'static str {
        match self {
            MergePolicy::DefaultValue => "DEFAULT_VALUE",
            MergePolicy::Sum => "SUM",
            MergePolicy::GeometryWeighted => "GEOMETRY_WEIGHTED",
        }
    }
}

/// Domain payload as the engine stores it.
#[derive(Clone, Debug, PartialEq)]
pub enum DomainKind {
    /// Code to (optional) value enumeration.
    Coded(Vec<(String, Option<String>)>),
    /// Bounds are `NativeField::Unset` when open.
    Range {
        min: NativeField,
        min_inclusive: bool,
        max: NativeField,
        max_inclusive: bool,
    },
    Glob(String),
}

/// A field domain as described by the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldDomain {
    pub name: String,
    pub description: String,
    pub field_type: FieldType,
    pub field_subtype: FieldSubType,
    pub split_policy: SplitPolicy,
    pub merge_policy: MergePolicy,
    pub kind: DomainKind,
}

impl FieldDomain {
    pub fn coded(name: &str, field_type: FieldType, codes: &[(&str, Option<&str>)]) -> Self {
        Self::with_kind(
            name,
            field_type,
            DomainKind::Coded(
                codes
                    .iter()
                    .map(|(code, value)| (code.to_string(), value.map(str::to_string)))
                    .collect(),
            ),
        )
    }

    pub fn range(
        name: &str,
        field_type: FieldType,
        min: (NativeField, bool),
        max: (NativeField, bool),
    ) -> Self {
        Self::with_kind(
            name,
            field_type,
            DomainKind::Range {
                min: min.0,
                min_inclusive: min.1,
                max: max.0,
                max_inclusive: max.1,
            },
        )
    }

    pub fn glob(name: &str, pattern: &str) -> Self {
        Self::with_kind(name, FieldType::String, DomainKind::Glob(pattern.to_string()))
    }

    fn with_kind(name: &str, field_type: FieldType, kind: DomainKind) -> Self {
        FieldDomain {
            name: name.to_string(),
            description: String::new(),
            field_type,
            field_subtype: FieldSubType::None,
            split_policy: SplitPolicy::default(),
            merge_policy: MergePolicy::default(),
            kind,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

/// Domain payload converted to host values.
#[derive(Clone, Debug, PartialEq)]
pub enum DomainPayload {
    Coded(Vec<(String, Option<String>)>),
    Range {
        min: FieldValue,
        min_inclusive: bool,
        max: FieldValue,
        max_inclusive: bool,
    },
    Glob(String),
}

/// Host-side description of a field domain.
#[derive(Clone, Debug, PartialEq)]
pub struct DomainInfo {
    pub name: String,
    pub description: String,
    /// `"coded"`, `"range"` or `"glob"`.
    pub domain_type: &'static str,
    pub field_type: FieldType,
    pub field_subtype: FieldSubType,
    pub split_policy: SplitPolicy,
    pub merge_policy: MergePolicy,
    pub payload: DomainPayload,
}

impl DomainInfo {
    /// The value of `code` for coded domains.
    pub fn coded_value(&self, code: &str) -> Option<&str> {
        match &self.payload {
            DomainPayload::Coded(codes) => codes
                .iter()
                .find(|(c, _)| c == code)
                .and_then(|(_, v)| v.as_deref()),
            _ => None,
        }
    }
}

impl From<&FieldDomain> for DomainInfo {
    fn from(domain: &FieldDomain) -> Self {
        let (domain_type, payload) = match &domain.kind {
            DomainKind::Coded(codes) => ("coded", DomainPayload::Coded(codes.clone())),
            DomainKind::Range {
                min,
                min_inclusive,
                max,
                max_inclusive,
            } => (
                "range",
                DomainPayload::Range {
                    min: decode_native(domain.field_type, domain.field_subtype, min),
                    min_inclusive: *min_inclusive,
                    max: decode_native(domain.field_type, domain.field_subtype, max),
                    max_inclusive: *max_inclusive,
                },
            ),
            DomainKind::Glob(pattern) => ("glob", DomainPayload::Glob(pattern.clone())),
        };
        DomainInfo {
            name: domain.name.clone(),
            description: domain.description.clone(),
            domain_type,
            field_type: domain.field_type,
            field_subtype: domain.field_subtype,
            split_policy: domain.split_policy,
            merge_policy: domain.merge_policy,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::OgrDateTime;

    #[test]
    fn test_coded_domain() {
        let domain = FieldDomain::coded(
            "landuse",
            FieldType::String,
            &[("F", Some("Forest")), ("W", None)],
        );
        let info = DomainInfo::from(&domain);
        assert_eq!(info.domain_type, "coded");
        assert_eq!(info.coded_value("F"), Some("Forest"));
        assert_eq!(info.coded_value("W"), None);
        assert_eq!(info.split_policy.name(), "DEFAULT_VALUE");
    }

    #[test]
    fn test_range_domain_bounds_are_typed() {
        let domain = FieldDomain::range(
            "year",
            FieldType::Integer,
            (NativeField::Integer(1990), true),
            (NativeField::Unset, false),
        );
        let info = DomainInfo::from(&domain);
        assert_eq!(
            info.payload,
            DomainPayload::Range {
                min: FieldValue::IntegerValue(1990),
                min_inclusive: true,
                max: FieldValue::NullValue,
                max_inclusive: false,
            }
        );

        let date = OgrDateTime {
            year: 1970,
            month: 1,
            day: 11,
            ..Default::default()
        };
        let domain = FieldDomain::range(
            "after",
            FieldType::Date,
            (NativeField::Date(date), false),
            (NativeField::Unset, false),
        );
        match DomainInfo::from(&domain).payload {
            DomainPayload::Range { min, .. } => assert_eq!(min, FieldValue::DateValue(10)),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_glob_domain() {
        let info = DomainInfo::from(&FieldDomain::glob("codes", "[A-Z]*").with_description("x"));
        assert_eq!(info.domain_type, "glob");
        assert_eq!(info.payload, DomainPayload::Glob("[A-Z]*".into()));
        assert_eq!(info.description, "x");
    }
}
