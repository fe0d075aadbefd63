//! Values, columns, and the schema-tagged `EventBatch`.
//!
//! The batch representation is deliberately simple (`Vec<Scalar>` per column);
//! nothing outside this module depends on its layout.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::{DataType, Schema};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
    Bin(Vec<u8>),
    Time(i64),
}

impl Scalar {
    pub fn data_type(&self) -> DataType {
        match self {
            Scalar::Null => DataType::Null,
            Scalar::Bool(_) => DataType::Boolean,
            Scalar::I64(_) => DataType::Int64,
            Scalar::F64(_) => DataType::Float64,
            Scalar::Str(_) => DataType::Utf8,
            Scalar::Bin(_) => DataType::Binary,
            Scalar::Time(_) => DataType::Timestamp,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Compare two values of compatible types.
    ///
    /// Integers and floats compare numerically with each other; any other
    /// mixed-type pair (and anything involving null) is incomparable.
    pub fn compare(&self, other: &Scalar) -> Option<Ordering> {
        use Scalar::*;
        match (self, other) {
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (I64(a), I64(b)) => Some(a.cmp(b)),
            (F64(a), F64(b)) => a.partial_cmp(b),
            (I64(a), F64(b)) => (*a as f64).partial_cmp(b),
            (F64(a), I64(b)) => a.partial_cmp(&(*b as f64)),
            (Str(a), Str(b)) => Some(a.cmp(b)),
            (Bin(a), Bin(b)) => Some(a.cmp(b)),
            (Time(a), Time(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Rough in-memory footprint, used for byte-level metrics only.
    pub fn approx_bytes(&self) -> u64 {
        match self {
            Scalar::Null => 1,
            Scalar::Bool(_) => 1,
            Scalar::I64(_) | Scalar::F64(_) | Scalar::Time(_) => 8,
            Scalar::Str(s) => s.len() as u64,
            Scalar::Bin(b) => b.len() as u64,
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::I64(i) => write!(f, "{i}"),
            Scalar::F64(x) => write!(f, "{x:?}"),
            Scalar::Str(s) => write!(f, "{s:?}"),
            Scalar::Bin(b) => write!(f, "<{} bytes>", b.len()),
            Scalar::Time(t) => write!(f, "@{t}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Scalar>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Scalar>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A homogeneous, schema-tagged batch of events.
///
/// Invariants:
/// - `columns[i].name == schema.fields[i].name` for every column.
/// - All columns have the same length.
///
/// A batch with zero rows is the "nothing right now" marker operators yield
/// at suspension points.
///
/// Deserialization goes through `EventBatch::new`, so a batch read off the
/// wire upholds the same invariants as one built in process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEventBatch")]
pub struct EventBatch {
    schema: Arc<Schema>,
    columns: Vec<Column>,
}

#[derive(Deserialize)]
struct RawEventBatch {
    schema: Arc<Schema>,
    columns: Vec<Column>,
}

impl TryFrom<RawEventBatch> for EventBatch {
    type Error = Error;

    fn try_from(raw: RawEventBatch) -> Result<Self> {
        EventBatch::new(raw.schema, raw.columns)
    }
}

impl Default for EventBatch {
    fn default() -> Self {
        Self {
            schema: Arc::new(Schema::empty()),
            columns: Vec::new(),
        }
    }
}

impl EventBatch {
    pub fn new(schema: Arc<Schema>, columns: Vec<Column>) -> Result<Self> {
        if columns.len() != schema.fields.len() {
            return Err(Error::Schema(format!(
                "schema `{}` has {} fields but {} columns were given",
                schema.name,
                schema.fields.len(),
                columns.len()
            )));
        }
        for (field, column) in schema.fields.iter().zip(&columns) {
            if field.name != column.name {
                return Err(Error::Schema(format!(
                    "column `{}` does not match field `{}`",
                    column.name, field.name
                )));
            }
        }
        if let Some(first) = columns.first() {
            if let Some(bad) = columns.iter().find(|c| c.len() != first.len()) {
                return Err(Error::Schema(format!(
                    "column `{}` has {} rows, expected {}",
                    bad.name,
                    bad.len(),
                    first.len()
                )));
            }
        }
        Ok(Self { schema, columns })
    }

    /// Build a batch from row-major values.
    pub fn from_rows(schema: Arc<Schema>, rows: Vec<Vec<Scalar>>) -> Result<Self> {
        let mut columns: Vec<Column> = schema
            .fields
            .iter()
            .map(|f| Column::new(f.name.clone(), Vec::with_capacity(rows.len())))
            .collect();
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != columns.len() {
                return Err(Error::Schema(format!(
                    "row {i} has {} values, schema `{}` expects {}",
                    row.len(),
                    schema.name,
                    columns.len()
                )));
            }
            for (column, value) in columns.iter_mut().zip(row) {
                column.values.push(value);
            }
        }
        Self::new(schema, columns)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn rows(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.rows() == 0
    }

    /// Row `idx` in schema field order.
    pub fn row(&self, idx: usize) -> Option<Vec<Scalar>> {
        if idx >= self.rows() {
            return None;
        }
        Some(self.columns.iter().map(|c| c.values[idx].clone()).collect())
    }

    /// Rows `[begin, end)`, clamped to the batch.
    pub fn slice(&self, begin: usize, end: usize) -> Self {
        let end = end.min(self.rows());
        let begin = begin.min(end);
        Self {
            schema: Arc::clone(&self.schema),
            columns: self
                .columns
                .iter()
                .map(|c| Column::new(c.name.clone(), c.values[begin..end].to_vec()))
                .collect(),
        }
    }

    pub fn split_at(self, n: usize) -> (Self, Self) {
        if n >= self.rows() {
            let rest = self.slice(0, 0);
            return (self, rest);
        }
        (self.slice(0, n), self.slice(n, self.rows()))
    }

    /// Keep the rows whose mask entry is `true`.
    pub fn filter(&self, mask: &[bool]) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            columns: self
                .columns
                .iter()
                .map(|c| {
                    let values = c
                        .values
                        .iter()
                        .zip(mask)
                        .filter(|(_, keep)| **keep)
                        .map(|(v, _)| v.clone())
                        .collect();
                    Column::new(c.name.clone(), values)
                })
                .collect(),
        }
    }

    /// Concatenate batches of one schema.
    pub fn concat(batches: &[EventBatch]) -> Result<Self> {
        let Some(first) = batches.first() else {
            return Ok(Self::default());
        };
        let mut columns = first.columns.clone();
        for batch in &batches[1..] {
            if batch.schema != first.schema {
                return Err(Error::Schema(format!(
                    "cannot concat `{}` with `{}`",
                    first.schema.name, batch.schema.name
                )));
            }
            for (dst, src) in columns.iter_mut().zip(&batch.columns) {
                dst.values.extend(src.values.iter().cloned());
            }
        }
        Ok(Self {
            schema: Arc::clone(&first.schema),
            columns,
        })
    }

    pub fn approx_bytes(&self) -> u64 {
        self.columns
            .iter()
            .flat_map(|c| c.values.iter())
            .map(Scalar::approx_bytes)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(
            "test.event",
            vec![
                Field::new("id", DataType::Int64, false),
                Field::new("msg", DataType::Utf8, true),
            ],
        ))
    }

    fn batch(n: i64) -> EventBatch {
        let rows = (0..n)
            .map(|i| vec![Scalar::I64(i), Scalar::Str(format!("m{i}"))])
            .collect();
        EventBatch::from_rows(schema(), rows).expect("valid rows")
    }

    #[test]
    fn test_deserialize_rejects_ragged_columns() {
        let mut json = serde_json::to_value(batch(3)).expect("serialize");
        json["columns"][1]["values"] = serde_json::json!([{"Str": "m0"}]);
        let err = serde_json::from_value::<EventBatch>(json).expect_err("ragged batch");
        assert!(err.to_string().contains("column `msg` has 1 rows, expected 3"), "{err}");

        let back: EventBatch =
            serde_json::from_value(serde_json::to_value(batch(3)).expect("serialize")).expect("valid");
        assert_eq!(back, batch(3));
    }

    #[test]
    fn test_from_rows_rejects_ragged_rows() {
        let err = EventBatch::from_rows(schema(), vec![vec![Scalar::I64(1)]]);
        assert!(err.is_err(), "row with missing value must be rejected");
    }

    #[test]
    fn test_split_at_keeps_order() {
        let (head, tail) = batch(5).split_at(2);
        assert_eq!(head.rows(), 2);
        assert_eq!(tail.rows(), 3);
        assert_eq!(tail.row(0), Some(vec![Scalar::I64(2), Scalar::Str("m2".into())]));
    }

    #[test]
    fn test_split_beyond_length_returns_empty_rest() {
        let (all, rest) = batch(3).split_at(10);
        assert_eq!(all.rows(), 3);
        assert!(rest.is_empty());
        assert_eq!(rest.schema().name, "test.event");
    }

    #[test]
    fn test_filter_and_concat() {
        let b = batch(4);
        let kept = b.filter(&[true, false, true, false]);
        assert_eq!(kept.rows(), 2);
        let both = EventBatch::concat(&[kept.clone(), kept]).expect("same schema");
        assert_eq!(both.rows(), 4);
        assert_eq!(both.column("id").map(|c| c.values[2].clone()), Some(Scalar::I64(0)));
    }

    #[test]
    fn test_numeric_compare_across_types() {
        assert_eq!(Scalar::I64(2).compare(&Scalar::F64(2.5)), Some(Ordering::Less));
        assert_eq!(Scalar::Str("a".into()).compare(&Scalar::I64(1)), None);
        assert_eq!(Scalar::Null.compare(&Scalar::Null), None);
    }
}
