//! Conversion between engine records and host rows.
//!
//! Reading goes through [`decode_native`], one value at a time, driven by the
//! declared field type. Writing goes through [`RowEncoder`], which validates every
//! key of a [`Row`] against the layer schema before anything reaches the engine.

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};

use crate::engine::{
    EngineGeometry, NativeFeature, NativeField, OgrDateTime, NULL_FID, OGR_GEOMETRY, TZFLAG_UTC,
};
use crate::errors::{GdalError, Result};
use crate::vector::defn::{FieldDefn, FieldSubType, FieldType, LayerSchema};
use crate::vector::geometry::decode_geometry;
use crate::vector::value::{
    datetime_from_epoch, FieldValue, Row, FID_KEY, UNIX_EPOCH_DAYS_FROM_CE,
};

/// Keys that always address the first geometry field.
const GEOMETRY_ALIASES: [&str; 4] = ["geom", "geometry", "_ogr_geometry_", OGR_GEOMETRY];

/// Converts one engine value into its host representation.
///
/// Absent values become [`FieldValue::NullValue`], except for list types where the
/// absence of a list is a list holding a single missing element.
pub(crate) fn decode_native(
    field_type: FieldType,
    subtype: FieldSubType,
    native: &NativeField,
) -> FieldValue {
    if native.is_absent() {
        return match field_type {
            FieldType::IntegerList => FieldValue::IntegerListValue(vec![None]),
            FieldType::Integer64List => FieldValue::Integer64ListValue(vec![None]),
            FieldType::RealList => FieldValue::RealListValue(vec![None]),
            FieldType::StringList => FieldValue::StringListValue(vec![None]),
            _ => FieldValue::NullValue,
        };
    }
    match (field_type, native) {
        (FieldType::Integer, NativeField::Integer(v)) if subtype == FieldSubType::Boolean => {
            FieldValue::BooleanValue(*v != 0)
        }
        (FieldType::Integer, NativeField::Integer(v)) => FieldValue::IntegerValue(*v),
        (FieldType::Integer64, NativeField::Integer64(v)) => FieldValue::Integer64Value(*v),
        (FieldType::Integer64, NativeField::Integer(v)) => FieldValue::Integer64Value(i64::from(*v)),
        (FieldType::Real, NativeField::Real(v)) => FieldValue::RealValue(*v),
        (FieldType::String, NativeField::String(v)) => FieldValue::StringValue(v.clone()),
        (FieldType::Binary, NativeField::Binary(v)) => FieldValue::BinaryValue(v.clone()),
        (FieldType::Date, NativeField::Date(dt) | NativeField::DateTime(dt)) => {
            epoch_days(dt).map_or(FieldValue::NullValue, FieldValue::DateValue)
        }
        (FieldType::DateTime, NativeField::DateTime(dt) | NativeField::Date(dt)) => {
            epoch_seconds(dt).map_or(FieldValue::NullValue, FieldValue::DateTimeValue)
        }
        (FieldType::IntegerList, NativeField::IntegerList(v)) => {
            if subtype == FieldSubType::Boolean {
                // boolean lists keep the integer representation
                FieldValue::IntegerListValue(v.iter().map(|b| Some(i32::from(*b != 0))).collect())
            } else {
                FieldValue::IntegerListValue(v.iter().copied().map(Some).collect())
            }
        }
        (FieldType::Integer64List, NativeField::Integer64List(v)) => {
            FieldValue::Integer64ListValue(v.iter().copied().map(Some).collect())
        }
        (FieldType::RealList, NativeField::RealList(v)) => {
            FieldValue::RealListValue(v.iter().copied().map(Some).collect())
        }
        (FieldType::StringList, NativeField::StringList(v)) => {
            FieldValue::StringListValue(v.iter().cloned().map(Some).collect())
        }
        (_, other) => FieldValue::StringValue(render_native(other)),
    }
}

/// Days between 1970-01-01 and the date part of `dt`.
pub(crate) fn epoch_days(dt: &OgrDateTime) -> Option<i32> {
    let date = NaiveDate::from_ymd_opt(dt.year, dt.month, dt.day)?;
    Some(date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE)
}

/// Seconds since the Unix epoch, normalized to UTC.
///
/// Unknown (0) and local time (1) flags are taken as UTC; `100 + n` is an offset of
/// `n` quarter hours east of UTC.
pub(crate) fn epoch_seconds(dt: &OgrDateTime) -> Option<f64> {
    let date = NaiveDate::from_ymd_opt(dt.year, dt.month, dt.day)?;
    let whole_seconds = dt.second.trunc();
    let time = NaiveTime::from_hms_opt(dt.hour, dt.minute, whole_seconds as u32)?;
    let mut secs = date.and_time(time).and_utc().timestamp() as f64;
    // f32 seconds carry float noise beyond the millisecond
    let fraction = f64::from(dt.second - whole_seconds);
    secs += (fraction * 1000.0).round() / 1000.0;
    if dt.tz_flag > 1 && dt.tz_flag != TZFLAG_UTC {
        let offset_minutes = (dt.tz_flag - TZFLAG_UTC) * 15;
        secs -= f64::from(offset_minutes * 60);
    }
    Some(secs)
}

fn render_time(dt: &OgrDateTime) -> String {
    if dt.second.fract() == 0.0 {
        format!("{:02}:{:02}:{:02}", dt.hour, dt.minute, dt.second as u32)
    } else {
        format!("{:02}:{:02}:{:06.3}", dt.hour, dt.minute, dt.second)
    }
}

/// String rendering of a value whose declared type has no host counterpart.
fn render_native(native: &NativeField) -> String {
    match native {
        NativeField::Unset | NativeField::Null => String::new(),
        NativeField::Integer(v) => v.to_string(),
        NativeField::Integer64(v) => v.to_string(),
        NativeField::Real(v) => v.to_string(),
        NativeField::String(v) => v.clone(),
        NativeField::Binary(v) => v.iter().map(|b| format!("{b:02X}")).collect(),
        NativeField::Date(dt) => format!("{:04}/{:02}/{:02}", dt.year, dt.month, dt.day),
        NativeField::DateTime(dt) => format!(
            "{:04}/{:02}/{:02} {}",
            dt.year,
            dt.month,
            dt.day,
            render_time(dt)
        ),
        NativeField::Time(dt) => render_time(dt),
        NativeField::IntegerList(v) => render_list(v),
        NativeField::Integer64List(v) => render_list(v),
        NativeField::RealList(v) => render_list(v),
        NativeField::StringList(v) => render_list(v),
    }
}

fn render_list<T: ToString>(values: &[T]) -> String {
    let items: Vec<String> = values.iter().map(ToString::to_string).collect();
    format!("({}:{})", items.len(), items.join(","))
}

/// Converts `value` for storage in `defn`.
///
/// Explicit nulls are checked against the nullability of the field by the caller.
pub(crate) fn encode_value(defn: &FieldDefn, value: &FieldValue) -> Result<NativeField> {
    let mismatch = |expected: &'static str| GdalError::TypeMismatch {
        field_name: defn.name.clone(),
        expected,
        actual: value.kind(),
    };
    let out_of_range = |msg: String| GdalError::Range {
        method_name: "OGR_F_SetField",
        msg: format!("{}: {msg}", defn.name),
    };
    if value.is_null() {
        return Ok(NativeField::Null);
    }
    let native = match defn.field_type {
        FieldType::Integer => {
            let expected = if defn.is_boolean() { "boolean" } else { "integer" };
            match value {
                FieldValue::IntegerValue(v) => NativeField::Integer(*v),
                FieldValue::BooleanValue(v) => NativeField::Integer(i32::from(*v)),
                FieldValue::Integer64Value(v) => NativeField::Integer(
                    i32::try_from(*v).map_err(|_| out_of_range(format!("{v} exceeds 32 bits")))?,
                ),
                FieldValue::RealValue(v) if v.fract() == 0.0 => {
                    if *v < f64::from(i32::MIN) || *v > f64::from(i32::MAX) {
                        return Err(out_of_range(format!("{v} exceeds 32 bits")));
                    }
                    NativeField::Integer(*v as i32)
                }
                _ => return Err(mismatch(expected)),
            }
        }
        FieldType::Integer64 => match value {
            FieldValue::Integer64Value(v) => NativeField::Integer64(*v),
            FieldValue::IntegerValue(v) => NativeField::Integer64(i64::from(*v)),
            FieldValue::BooleanValue(v) => NativeField::Integer64(i64::from(*v)),
            FieldValue::RealValue(v) if v.fract() == 0.0 => {
                // i64::MAX as f64 rounds up to 2^63, which does not fit
                if *v < i64::MIN as f64 || *v >= 9_223_372_036_854_775_808.0 {
                    return Err(out_of_range(format!("{v} exceeds 64 bits")));
                }
                NativeField::Integer64(*v as i64)
            }
            _ => return Err(mismatch("integer64")),
        },
        FieldType::Real => match value {
            FieldValue::RealValue(v) => NativeField::Real(*v),
            FieldValue::IntegerValue(v) => NativeField::Real(f64::from(*v)),
            FieldValue::Integer64Value(v) => NativeField::Real(*v as f64),
            _ => return Err(mismatch("real")),
        },
        FieldType::String => match value {
            FieldValue::StringValue(v) => NativeField::String(v.clone()),
            _ => return Err(mismatch("string")),
        },
        FieldType::Binary => match value {
            FieldValue::BinaryValue(v) => NativeField::Binary(v.clone()),
            _ => return Err(mismatch("binary")),
        },
        FieldType::Date => match value {
            FieldValue::DateValue(_) | FieldValue::DateTimeValue(_) => {
                let date = value
                    .clone()
                    .into_date()
                    .ok_or_else(|| out_of_range("date out of range".to_string()))?;
                NativeField::Date(OgrDateTime {
                    year: date.year(),
                    month: date.month(),
                    day: date.day(),
                    ..Default::default()
                })
            }
            _ => return Err(mismatch("date")),
        },
        FieldType::DateTime => match value {
            FieldValue::DateValue(_) | FieldValue::DateTimeValue(_) => {
                let datetime = match value {
                    FieldValue::DateTimeValue(secs) => datetime_from_epoch(*secs),
                    _ => value.clone().into_datetime(),
                }
                .ok_or_else(|| out_of_range("datetime out of range".to_string()))?;
                NativeField::DateTime(OgrDateTime {
                    year: datetime.year(),
                    month: datetime.month(),
                    day: datetime.day(),
                    hour: datetime.hour(),
                    minute: datetime.minute(),
                    second: datetime.second() as f32
                        + datetime.timestamp_subsec_millis() as f32 / 1000.0,
                    tz_flag: TZFLAG_UTC,
                })
            }
            _ => return Err(mismatch("datetime")),
        },
        FieldType::Time => match value {
            FieldValue::StringValue(text) => {
                let time = ["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"]
                    .iter()
                    .find_map(|fmt| NaiveTime::parse_from_str(text, fmt).ok())
                    .ok_or_else(|| mismatch("time string"))?;
                NativeField::Time(OgrDateTime {
                    hour: time.hour(),
                    minute: time.minute(),
                    second: time.second() as f32 + time.nanosecond() as f32 / 1e9,
                    ..Default::default()
                })
            }
            _ => return Err(mismatch("time string")),
        },
        FieldType::IntegerList => match value {
            FieldValue::IntegerListValue(v) => match complete_list(v, || mismatch("integer list"))? {
                Some(items) => NativeField::IntegerList(items),
                None => NativeField::Null,
            },
            _ => return Err(mismatch("integer list")),
        },
        FieldType::Integer64List => {
            let widened: Vec<Option<i64>> = match value {
                FieldValue::Integer64ListValue(v) => v.clone(),
                FieldValue::IntegerListValue(v) => v.iter().map(|i| i.map(i64::from)).collect(),
                _ => return Err(mismatch("integer64 list")),
            };
            match complete_list(&widened, || mismatch("integer64 list"))? {
                Some(items) => NativeField::Integer64List(items),
                None => NativeField::Null,
            }
        }
        FieldType::RealList => {
            let widened: Vec<Option<f64>> = match value {
                FieldValue::RealListValue(v) => v.clone(),
                FieldValue::IntegerListValue(v) => v.iter().map(|i| i.map(f64::from)).collect(),
                FieldValue::Integer64ListValue(v) => {
                    v.iter().map(|i| i.map(|i| i as f64)).collect()
                }
                _ => return Err(mismatch("real list")),
            };
            match complete_list(&widened, || mismatch("real list"))? {
                Some(items) => NativeField::RealList(items),
                None => NativeField::Null,
            }
        }
        FieldType::StringList => match value {
            FieldValue::StringListValue(v) => match complete_list(v, || mismatch("string list"))? {
                Some(items) => NativeField::StringList(items),
                None => NativeField::Null,
            },
            _ => return Err(mismatch("string list")),
        },
    };
    Ok(native)
}

/// A list where every element is missing is a null list. Lists with only some
/// elements missing cannot be stored.
fn complete_list<T: Clone>(
    items: &[Option<T>],
    mismatch: impl FnOnce() -> GdalError,
) -> Result<Option<Vec<T>>> {
    if !items.is_empty() && items.iter().all(Option::is_none) {
        return Ok(None);
    }
    items
        .iter()
        .cloned()
        .collect::<Option<Vec<T>>>()
        .map(Some)
        .ok_or_else(mismatch)
}

/// What a row key refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Target {
    Fid,
    Field(usize),
    Geometry(usize),
}

/// Builds engine records from rows, validating them against a layer schema.
pub(crate) struct RowEncoder<'a> {
    pub(crate) schema: &'a LayerSchema,
    pub(crate) layer_name: &'a str,
    pub(crate) fid_column: &'a str,
    pub(crate) default_geom_name: &'a str,
}

impl RowEncoder<'_> {
    fn resolve(&self, key: &str) -> Option<Target> {
        if key == FID_KEY || (!self.fid_column.is_empty() && key == self.fid_column) {
            return Some(Target::Fid);
        }
        if let Some(idx) = self.schema.field_index(key) {
            return Some(Target::Field(idx));
        }
        if let Some(idx) = self.schema.geom_field_index(key, self.default_geom_name) {
            return Some(Target::Geometry(idx));
        }
        let is_alias = key == self.default_geom_name
            || GEOMETRY_ALIASES.iter().any(|a| a.eq_ignore_ascii_case(key));
        if is_alias && !self.schema.geom_fields.is_empty() {
            return Some(Target::Geometry(0));
        }
        None
    }

    /// Converts `row` into an engine record. Fields missing from the row are left
    /// unset so the engine applies their defaults.
    pub(crate) fn encode<G: EngineGeometry>(&self, row: &Row) -> Result<NativeFeature<G>> {
        let mut feature =
            NativeFeature::new(self.schema.fields.len(), self.schema.geom_fields.len());
        for (key, value) in row.iter() {
            let target = self.resolve(key).ok_or_else(|| GdalError::UnmappedField {
                field_name: key.to_string(),
                layer_name: self.layer_name.to_string(),
            })?;
            match target {
                Target::Fid => {
                    feature.fid = match value {
                        FieldValue::NullValue => NULL_FID,
                        other => other.clone().into_int64().ok_or_else(|| {
                            GdalError::TypeMismatch {
                                field_name: key.to_string(),
                                expected: "integer64",
                                actual: value.kind(),
                            }
                        })?,
                    }
                }
                Target::Field(idx) => {
                    let defn = &self.schema.fields[idx];
                    if value.is_null() && !defn.nullable {
                        return Err(GdalError::NotNullable {
                            field_name: defn.name.clone(),
                        });
                    }
                    feature.fields[idx] = encode_value(defn, value)?;
                }
                Target::Geometry(idx) => {
                    let geometry = decode_geometry::<G>(key, value)?;
                    if geometry.is_none() && !self.schema.geom_fields[idx].nullable {
                        return Err(GdalError::NotNullable {
                            field_name: key.to_string(),
                        });
                    }
                    feature.geometries[idx] = geometry;
                }
            }
        }
        Ok(feature)
    }
}
