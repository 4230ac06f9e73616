//! Host-side values.
//!
//! [`FieldValue`] is the tagged variant every engine value is converted into, and every
//! written value is converted from. [`Row`] is an ordered set of named values; rows
//! read from a layer start with the identifier under [`FID_KEY`].

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};

/// Key under which rows carry the feature identifier.
pub const FID_KEY: &str = "FID";

pub(crate) const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// An encoded geometry, in the format selected by
/// [`GeomFormat`](crate::config::GeomFormat).
#[derive(Clone, Debug, PartialEq)]
pub enum GeometryValue {
    Wkb(Vec<u8>),
    Wkt(String),
    TypeName(String),
    Summary(String),
    /// `[xmin, ymin, xmax, ymax]`
    BBox([f64; 4]),
}

#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    NullValue,
    IntegerValue(i32),
    BooleanValue(bool),
    Integer64Value(i64),
    RealValue(f64),
    StringValue(String),
    /// Days since 1970-01-01.
    DateValue(i32),
    /// Seconds since 1970-01-01T00:00:00Z, with fractional seconds.
    DateTimeValue(f64),
    BinaryValue(Vec<u8>),
    IntegerListValue(Vec<Option<i32>>),
    Integer64ListValue(Vec<Option<i64>>),
    RealListValue(Vec<Option<f64>>),
    StringListValue(Vec<Option<String>>),
    GeometryValue(GeometryValue),
}

impl FieldValue {
    /// A short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::NullValue => "null",
            FieldValue::IntegerValue(_) => "integer",
            FieldValue::BooleanValue(_) => "boolean",
            FieldValue::Integer64Value(_) => "integer64",
            FieldValue::RealValue(_) => "real",
            FieldValue::StringValue(_) => "string",
            FieldValue::DateValue(_) => "date",
            FieldValue::DateTimeValue(_) => "datetime",
            FieldValue::BinaryValue(_) => "binary",
            FieldValue::IntegerListValue(_) => "integer list",
            FieldValue::Integer64ListValue(_) => "integer64 list",
            FieldValue::RealListValue(_) => "real list",
            FieldValue::StringListValue(_) => "string list",
            FieldValue::GeometryValue(_) => "geometry",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::NullValue)
    }

    /// A date value for `date`.
    pub fn from_date(date: NaiveDate) -> Self {
        FieldValue::DateValue(date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE)
    }

    /// A UTC datetime value for `datetime`, whatever its timezone.
    pub fn from_datetime<Tz: TimeZone>(datetime: &DateTime<Tz>) -> Self {
        let utc = datetime.with_timezone(&Utc);
        FieldValue::DateTimeValue(
            utc.timestamp() as f64 + f64::from(utc.timestamp_subsec_millis()) / 1000.0,
        )
    }

    /// Interpret the value as `String`.
    pub fn into_string(self) -> Option<String> {
        match self {
            FieldValue::StringValue(rv) => Some(rv),
            _ => None,
        }
    }

    /// Interpret the value as `f64`, widening integers.
    pub fn into_real(self) -> Option<f64> {
        match self {
            FieldValue::RealValue(rv) => Some(rv),
            FieldValue::IntegerValue(rv) => Some(f64::from(rv)),
            FieldValue::Integer64Value(rv) => Some(rv as f64),
            _ => None,
        }
    }

    /// Interpret the value as `i32`.
    pub fn into_int(self) -> Option<i32> {
        match self {
            FieldValue::IntegerValue(rv) => Some(rv),
            _ => None,
        }
    }

    /// Interpret the value as `i64`, widening 32-bit integers.
    pub fn into_int64(self) -> Option<i64> {
        match self {
            FieldValue::Integer64Value(rv) => Some(rv),
            FieldValue::IntegerValue(rv) => Some(i64::from(rv)),
            _ => None,
        }
    }

    pub fn into_bool(self) -> Option<bool> {
        match self {
            FieldValue::BooleanValue(rv) => Some(rv),
            _ => None,
        }
    }

    /// Interpret the value as a calendar date.
    pub fn into_date(self) -> Option<NaiveDate> {
        match self {
            FieldValue::DateValue(days) => {
                NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)?)
            }
            FieldValue::DateTimeValue(_) => self.into_datetime().map(|dt| dt.date_naive()),
            _ => None,
        }
    }

    /// Interpret the value as a UTC datetime, with millisecond precision.
    pub fn into_datetime(self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::DateTimeValue(secs) => datetime_from_epoch(secs),
            FieldValue::DateValue(_) => self
                .into_date()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc()),
            _ => None,
        }
    }

    pub fn into_geometry(self) -> Option<GeometryValue> {
        match self {
            FieldValue::GeometryValue(rv) => Some(rv),
            _ => None,
        }
    }
}

pub(crate) fn datetime_from_epoch(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let millis = (secs * 1000.0).round();
    if millis < i64::MIN as f64 || millis > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_millis(millis as i64)
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::IntegerValue(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer64Value(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::RealValue(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::BooleanValue(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::StringValue(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::StringValue(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::NullValue, Into::into)
    }
}

/// An ordered mapping of names to values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    entries: Vec<(String, FieldValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Row::set`].
    pub fn with<V: Into<FieldValue>>(mut self, name: &str, value: V) -> Self {
        self.set(name, value.into());
        self
    }

    /// Sets `name` to `value`, replacing an existing entry of the same name.
    pub fn set(&mut self, name: &str, value: FieldValue) {
        match self.entries.iter_mut().find(|(k, _)| k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        let idx = self.entries.iter().position(|(k, _)| k == name)?;
        Some(self.entries.remove(idx).1)
    }

    /// The identifier carried under [`FID_KEY`], if any.
    pub fn fid(&self) -> Option<i64> {
        self.get(FID_KEY).cloned().and_then(FieldValue::into_int64)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, FieldValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (S, FieldValue)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (name, value) in iter {
            row.set(&name.into(), value);
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn test_date_conversions() {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        assert_eq!(FieldValue::from_date(epoch), FieldValue::DateValue(0));

        let d = NaiveDate::from_ymd_opt(2020, 3, 1).unwrap();
        let value = FieldValue::from_date(d);
        assert_eq!(value, FieldValue::DateValue(18322));
        assert_eq!(value.into_date(), Some(d));

        let before = NaiveDate::from_ymd_opt(1969, 12, 31).unwrap();
        assert_eq!(FieldValue::from_date(before), FieldValue::DateValue(-1));
    }

    #[test]
    fn test_datetime_conversions() {
        let dt = FixedOffset::east_opt(-5 * 3600)
            .unwrap()
            .with_ymd_and_hms(2011, 7, 14, 19, 43, 37)
            .unwrap();
        let value = FieldValue::from_datetime(&dt);
        assert_eq!(value, FieldValue::DateTimeValue(1310690617.0));
        assert_eq!(value.into_datetime(), Some(dt.with_timezone(&Utc)));
        assert_eq!(FieldValue::RealValue(1.0).into_datetime(), None);
    }

    #[test]
    fn test_row() {
        let mut row = Row::new()
            .with(FID_KEY, 7_i64)
            .with("name", "a")
            .with("missing", None::<i32>);
        assert_eq!(row.fid(), Some(7));
        assert_eq!(row.get("missing"), Some(&FieldValue::NullValue));
        row.set("name", "b".into());
        assert_eq!(row.len(), 3);
        assert_eq!(row.names().collect::<Vec<_>>(), vec!["FID", "name", "missing"]);
        assert_eq!(row.remove("name"), Some(FieldValue::StringValue("b".into())));
        assert_eq!(row.len(), 2);
    }
}
