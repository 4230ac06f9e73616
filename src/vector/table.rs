//! Columnar results of bulk reads.
//!
//! A [`ResultTable`] holds one [`Column`] per output column: the identifier, every
//! attribute field that is not ignored, then every geometry field that is not ignored
//! (none when the geometry format is [`GeomFormat::None`]). The column set is fixed by
//! a [`ColumnPlan`] computed once per fetch from the schema, the ignored fields and
//! the read configuration.

use log::debug;

use crate::config::{GeomFormat, ReadConfig};
use crate::engine::{EngineGeometry, NativeFeature, NativeField, NULL_FID};
use crate::errors::{GdalError, Result, Warning};
use crate::vector::codec::decode_native;
use crate::vector::defn::{FieldSubType, FieldType, LayerSchema};
use crate::vector::filter::IgnoredFields;
use crate::vector::geometry::encode_geometry;
use crate::vector::value::{FieldValue, GeometryValue, Row, FID_KEY};

/// Values of one output column, `None` standing for null.
#[derive(Clone, Debug, PartialEq)]
pub enum Column {
    Integer(Vec<Option<i32>>),
    Boolean(Vec<Option<bool>>),
    Integer64(Vec<Option<i64>>),
    Real(Vec<Option<f64>>),
    /// Strings, and the string rendering of types without a host counterpart.
    String(Vec<Option<String>>),
    /// Days since 1970-01-01.
    Date(Vec<Option<i32>>),
    /// Seconds since 1970-01-01T00:00:00Z.
    DateTime(Vec<Option<f64>>),
    Binary(Vec<Option<Vec<u8>>>),
    IntegerList(Vec<Vec<Option<i32>>>),
    Integer64List(Vec<Vec<Option<i64>>>),
    RealList(Vec<Vec<Option<f64>>>),
    StringList(Vec<Vec<Option<String>>>),
    Geometry(Vec<Option<GeometryValue>>),
}

macro_rules! with_values {
    ($column:expr, $values:ident => $body:expr) => {
        match $column {
            Column::Integer($values) => $body,
            Column::Boolean($values) => $body,
            Column::Integer64($values) => $body,
            Column::Real($values) => $body,
            Column::String($values) => $body,
            Column::Date($values) => $body,
            Column::DateTime($values) => $body,
            Column::Binary($values) => $body,
            Column::IntegerList($values) => $body,
            Column::Integer64List($values) => $body,
            Column::RealList($values) => $body,
            Column::StringList($values) => $body,
            Column::Geometry($values) => $body,
        }
    };
}

impl Column {
    fn for_field(field_type: FieldType, subtype: FieldSubType) -> Self {
        match field_type {
            FieldType::Integer if subtype == FieldSubType::Boolean => Column::Boolean(Vec::new()),
            FieldType::Integer => Column::Integer(Vec::new()),
            FieldType::Integer64 => Column::Integer64(Vec::new()),
            FieldType::Real => Column::Real(Vec::new()),
            FieldType::String | FieldType::Time => Column::String(Vec::new()),
            FieldType::Date => Column::Date(Vec::new()),
            FieldType::DateTime => Column::DateTime(Vec::new()),
            FieldType::Binary => Column::Binary(Vec::new()),
            FieldType::IntegerList => Column::IntegerList(Vec::new()),
            FieldType::Integer64List => Column::Integer64List(Vec::new()),
            FieldType::RealList => Column::RealList(Vec::new()),
            FieldType::StringList => Column::StringList(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        with_values!(self, values => values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The value at `row`, or `None` past the end of the column.
    pub fn get(&self, row: usize) -> Option<FieldValue> {
        let value = match self {
            Column::Integer(v) => v.get(row)?.map(FieldValue::IntegerValue),
            Column::Boolean(v) => v.get(row)?.map(FieldValue::BooleanValue),
            Column::Integer64(v) => v.get(row)?.map(FieldValue::Integer64Value),
            Column::Real(v) => v.get(row)?.map(FieldValue::RealValue),
            Column::String(v) => v.get(row)?.clone().map(FieldValue::StringValue),
            Column::Date(v) => v.get(row)?.map(FieldValue::DateValue),
            Column::DateTime(v) => v.get(row)?.map(FieldValue::DateTimeValue),
            Column::Binary(v) => v.get(row)?.clone().map(FieldValue::BinaryValue),
            Column::IntegerList(v) => Some(FieldValue::IntegerListValue(v.get(row)?.clone())),
            Column::Integer64List(v) => Some(FieldValue::Integer64ListValue(v.get(row)?.clone())),
            Column::RealList(v) => Some(FieldValue::RealListValue(v.get(row)?.clone())),
            Column::StringList(v) => Some(FieldValue::StringListValue(v.get(row)?.clone())),
            Column::Geometry(v) => v.get(row)?.clone().map(FieldValue::GeometryValue),
        };
        Some(value.unwrap_or(FieldValue::NullValue))
    }

    fn try_reserve_exact(&mut self, additional: usize) -> bool {
        with_values!(self, values => values.try_reserve_exact(additional).is_ok())
    }

    fn try_reserve(&mut self, additional: usize) -> bool {
        with_values!(self, values => values.try_reserve(additional).is_ok())
    }

    fn shrink_to(&mut self, rows: usize) {
        with_values!(self, values => {
            values.truncate(rows);
            values.shrink_to_fit();
        })
    }

    fn capacity(&self) -> usize {
        with_values!(self, values => values.capacity())
    }

    /// Appends `value`. A value of another kind than the column is stored as null.
    fn push(&mut self, value: FieldValue) {
        match (self, value) {
            (Column::Integer(v), FieldValue::IntegerValue(x)) => v.push(Some(x)),
            (Column::Boolean(v), FieldValue::BooleanValue(x)) => v.push(Some(x)),
            (Column::Integer64(v), FieldValue::Integer64Value(x)) => v.push(Some(x)),
            (Column::Real(v), FieldValue::RealValue(x)) => v.push(Some(x)),
            (Column::String(v), FieldValue::StringValue(x)) => v.push(Some(x)),
            (Column::Date(v), FieldValue::DateValue(x)) => v.push(Some(x)),
            (Column::DateTime(v), FieldValue::DateTimeValue(x)) => v.push(Some(x)),
            (Column::Binary(v), FieldValue::BinaryValue(x)) => v.push(Some(x)),
            (Column::IntegerList(v), FieldValue::IntegerListValue(x)) => v.push(x),
            (Column::Integer64List(v), FieldValue::Integer64ListValue(x)) => v.push(x),
            (Column::RealList(v), FieldValue::RealListValue(x)) => v.push(x),
            (Column::StringList(v), FieldValue::StringListValue(x)) => v.push(x),
            (Column::Geometry(v), FieldValue::GeometryValue(x)) => v.push(Some(x)),
            (column, value) => {
                if !value.is_null() {
                    debug!("Storing {} value as null", value.kind());
                }
                column.push_null();
            }
        }
    }

    fn push_null(&mut self) {
        match self {
            Column::Integer(v) | Column::Date(v) => v.push(None),
            Column::Boolean(v) => v.push(None),
            Column::Integer64(v) => v.push(None),
            Column::Real(v) | Column::DateTime(v) => v.push(None),
            Column::String(v) => v.push(None),
            Column::Binary(v) => v.push(None),
            Column::Geometry(v) => v.push(None),
            Column::IntegerList(v) => v.push(vec![None]),
            Column::Integer64List(v) => v.push(vec![None]),
            Column::RealList(v) => v.push(vec![None]),
            Column::StringList(v) => v.push(vec![None]),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Source {
    Fid,
    Field(usize, FieldType, FieldSubType),
    Geometry(usize),
}

/// The output columns of a read, in order.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ColumnPlan {
    names: Vec<String>,
    sources: Vec<Source>,
}

impl ColumnPlan {
    /// Plans the columns for `schema`, leaving out the fields in `ignored`.
    pub(crate) fn new(schema: &LayerSchema, ignored: &IgnoredFields, config: &ReadConfig) -> Self {
        let mut names = vec![FID_KEY.to_string()];
        let mut sources = vec![Source::Fid];
        for (idx, field) in schema.fields.iter().enumerate() {
            if field.ignored || ignored.is_field_ignored(idx) {
                continue;
            }
            names.push(field.name.clone());
            sources.push(Source::Field(idx, field.field_type, field.subtype));
        }
        if config.geom_format != GeomFormat::None {
            for (idx, geom_field) in schema.geom_fields.iter().enumerate() {
                if geom_field.ignored || ignored.is_geom_field_ignored(idx) {
                    continue;
                }
                names.push(geom_field.display_name(&config.default_geom_col_name).to_string());
                sources.push(Source::Geometry(idx));
            }
        }
        ColumnPlan { names, sources }
    }

    pub(crate) fn names(&self) -> &[String] {
        &self.names
    }

    fn empty_columns(&self) -> Vec<Column> {
        self.sources
            .iter()
            .map(|source| match source {
                Source::Fid => Column::Integer64(Vec::new()),
                Source::Field(_, field_type, subtype) => Column::for_field(*field_type, *subtype),
                Source::Geometry(_) => Column::Geometry(Vec::new()),
            })
            .collect()
    }

    /// Converts one record into one value per planned column.
    pub(crate) fn decode<G: EngineGeometry>(
        &self,
        mut feature: NativeFeature<G>,
        config: &ReadConfig,
    ) -> Result<Vec<FieldValue>> {
        let mut values = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let value = match source {
                Source::Fid if feature.fid == NULL_FID => FieldValue::NullValue,
                Source::Fid => FieldValue::Integer64Value(feature.fid),
                Source::Field(idx, field_type, subtype) => decode_native(
                    *field_type,
                    *subtype,
                    feature.fields.get(*idx).unwrap_or(&NativeField::Unset),
                ),
                Source::Geometry(idx) => encode_geometry(
                    feature.geometries.get_mut(*idx).and_then(Option::take),
                    config,
                )?,
            };
            values.push(value);
        }
        Ok(values)
    }

    /// Converts one record into a [`Row`].
    pub(crate) fn decode_row<G: EngineGeometry>(
        &self,
        feature: NativeFeature<G>,
        config: &ReadConfig,
    ) -> Result<Row> {
        let values = self.decode(feature, config)?;
        Ok(self.names.iter().cloned().zip(values).collect())
    }
}

/// Accumulates decoded records column by column.
pub(crate) struct TableBuilder {
    names: Vec<String>,
    columns: Vec<Column>,
    rows: usize,
}

impl TableBuilder {
    /// Reserves room for `capacity` rows up front.
    pub(crate) fn allocate(plan: &ColumnPlan, capacity: usize) -> Result<Self> {
        let mut columns = plan.empty_columns();
        for column in columns.iter_mut() {
            if !column.try_reserve_exact(capacity) {
                return Err(GdalError::Allocation { rows: capacity });
            }
        }
        Ok(TableBuilder {
            names: plan.names().to_vec(),
            columns,
            rows: 0,
        })
    }

    pub(crate) fn rows(&self) -> usize {
        self.rows
    }

    pub(crate) fn is_full(&self) -> bool {
        self.columns
            .iter()
            .any(|column| column.len() == column.capacity())
    }

    /// Makes room for at least `additional` more rows.
    pub(crate) fn grow(&mut self, additional: usize) -> Result<()> {
        for column in self.columns.iter_mut() {
            if !column.try_reserve(additional) {
                return Err(GdalError::Allocation {
                    rows: self.rows.saturating_add(additional),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn push(&mut self, values: Vec<FieldValue>) {
        for (column, value) in self.columns.iter_mut().zip(values) {
            column.push(value);
        }
        self.rows += 1;
    }

    /// Completes the table, releasing the room reserved for rows that never came.
    pub(crate) fn finish(mut self, warnings: Vec<Warning>) -> ResultTable {
        let reserved = self.columns.first().map_or(0, Column::capacity);
        if reserved > self.rows {
            debug!("Shrinking result table from {reserved} to {} rows", self.rows);
            for column in self.columns.iter_mut() {
                column.shrink_to(self.rows);
            }
        }
        ResultTable {
            names: self.names,
            columns: self.columns,
            num_rows: self.rows,
            warnings,
        }
    }
}

/// Records read in bulk, stored by column.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultTable {
    names: Vec<String>,
    columns: Vec<Column>,
    num_rows: usize,
    warnings: Vec<Warning>,
}

impl ResultTable {
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// Column names: `FID`, then attribute fields, then geometry fields.
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        let idx = self.names.iter().position(|n| n == name)?;
        self.columns.get(idx)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.names.iter().map(String::as_str).zip(self.columns.iter())
    }

    /// The record at `idx` as a [`Row`].
    pub fn row(&self, idx: usize) -> Option<Row> {
        if idx >= self.num_rows {
            return None;
        }
        self.columns()
            .map(|(name, column)| column.get(idx).map(|value| (name, value)))
            .collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = Row> + '_ {
        (0..self.num_rows).filter_map(|idx| self.row(idx))
    }

    /// Non-fatal conditions met while reading.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }
}
