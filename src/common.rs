//! Common types and constants used throughout the pipeline.
//!
//! Raw event logs follow a fixed positional convention:
//!
//! | Position | Content                                        |
//! |----------|------------------------------------------------|
//! | 0        | case identifier                                |
//! | 1        | activity label                                 |
//! | 2        | timestamp (start timestamp in double mode)     |
//! | 3        | end timestamp (double-timestamp files only)    |
//! | 3/4..    | covariates                                     |

use std::fmt;
use std::ops::{BitOr, Range};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Serialize, Serializer};

// ============================================================================
// Column Convention
// ============================================================================

/// Position of the case identifier column.
pub const CASE_ID_COLUMN: usize = 0;
/// Position of the activity column. The one-hot codec bound here defines the suffix width.
pub const ACTIVITY_COLUMN: usize = 1;
/// Position of the (start) timestamp column.
pub const TIMESTAMP_COLUMN: usize = 2;
/// Position of the end timestamp column in double-timestamp files.
pub const END_TIMESTAMP_COLUMN: usize = 3;

/// Canonical rendering for dates in keys, leftovers and decoded output.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ============================================================================
// Column Type Lattice
// ============================================================================

/// Semantic kind of a raw column, as inferred from its values.
///
/// Types inferred on separate chunks are reconciled with [`ColumnType::join`],
/// which is commutative and associative so chunks can be folded in any order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
pub enum ColumnType {
    Date,
    CaseId,
    Boolean,
    Qualitative,
    Quantitative,
    Any,
    Junk,
}

impl ColumnType {
    /// Reconcile two observations of the same column.
    ///
    /// - identical types are idempotent
    /// - `Any` absorbs everything (including `Junk`)
    /// - `Junk` absorbs everything else
    /// - `Qualitative ⊕ Quantitative = Qualitative`
    /// - any other mismatch is `Junk`
    pub fn join(self, other: ColumnType) -> ColumnType {
        use ColumnType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Any, _) | (_, Any) => Any,
            (Junk, _) | (_, Junk) => Junk,
            (Qualitative, Quantitative) | (Quantitative, Qualitative) => Qualitative,
            _ => Junk,
        }
    }
}

impl BitOr for ColumnType {
    type Output = ColumnType;

    fn bitor(self, rhs: ColumnType) -> ColumnType {
        self.join(rhs)
    }
}

// ============================================================================
// Raw Values
// ============================================================================

/// A single raw cell.
///
/// Date columns (given by position) are parsed while reading; every other
/// cell keeps its literal text and is interpreted by the codec that consumes it.
/// Missing cells are `Empty`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Empty,
    Text(String),
    Date(NaiveDateTime),
}

impl Value {
    /// Build a value from a raw CSV field, mapping the empty string to [`Value::Empty`].
    pub fn text(raw: &str) -> Self {
        if raw.is_empty() {
            Value::Empty
        } else {
            Value::Text(raw.to_string())
        }
    }

    /// String form used for case grouping, vocabularies and tabular output.
    pub fn key(&self) -> String {
        match self {
            Value::Empty => String::new(),
            Value::Text(s) => s.clone(),
            Value::Date(d) => d.format(DATE_FORMAT).to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// Numeric interpretation. Missing cells read as `0.0`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Empty => Some(0.0),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
            Value::Date(_) => None,
        }
    }

    /// Boolean interpretation. Missing cells read as `false`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Empty => Some(false),
            Value::Text(s) => match s.trim() {
                "True" | "true" | "TRUE" | "1" | "1.0" => Some(true),
                "False" | "false" | "FALSE" | "0" | "0.0" => Some(false),
                _ => None,
            },
            Value::Date(_) => None,
        }
    }

    /// Date interpretation; text cells are parsed with [`parse_date`].
    pub fn as_date(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Date(d) => Some(*d),
            Value::Text(s) => parse_date(s),
            Value::Empty => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.key())
    }
}

/// Parse a timestamp in one of the layouts commonly found in event logs.
///
/// Accepts RFC 3339 (converted to naive UTC), `YYYY-MM-DD HH:MM:SS[.fff]`,
/// the same with a `T` separator or `/` date separators, and bare dates.
pub fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    const LAYOUTS: [&str; 6] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y/%m/%d %H:%M:%S",
        "%Y/%m/%d %H:%M:%S%.f",
    ];
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for layout in LAYOUTS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, layout) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// One event: a fixed-width tuple of raw values.
pub type Row = Vec<Value>;

// ============================================================================
// Cases
// ============================================================================

/// The ordered events sharing one case identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    pub id: String,
    pub rows: Vec<Row>,
}

impl Case {
    pub fn new(id: String, first: Row) -> Self {
        Self {
            id,
            rows: vec![first],
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ============================================================================
// Dense Matrix
// ============================================================================

/// Row-major `f64` matrix.
///
/// Element `(r, c)` lives at `data[r * cols + c]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Wrap a flat buffer.
    ///
    /// # Panics
    /// Panics if `data.len() != rows * cols`.
    pub fn from_flat(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        assert_eq!(
            data.len(),
            rows * cols,
            "flat buffer of {} values cannot hold a {rows}x{cols} matrix",
            data.len()
        );
        Self { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.cols + col] = value;
    }

    pub fn row(&self, row: usize) -> &[f64] {
        let start = row * self.cols;
        &self.data[start..start + self.cols]
    }

    /// Copy of the first `n` rows.
    pub fn head(&self, n: usize) -> Matrix {
        let n = n.min(self.rows);
        Matrix::from_flat(n, self.cols, self.data[..n * self.cols].to_vec())
    }

    /// Copy of the column span `cols` for every row.
    pub fn columns(&self, cols: Range<usize>) -> Matrix {
        let width = cols.len();
        let mut data = Vec::with_capacity(self.rows * width);
        for r in 0..self.rows {
            data.extend_from_slice(&self.row(r)[cols.clone()]);
        }
        Matrix::from_flat(self.rows, width, data)
    }

    /// Concatenate blocks column-wise. Every block must have `rows` rows;
    /// zero-width blocks contribute nothing.
    pub fn hstack(rows: usize, blocks: &[Matrix]) -> Matrix {
        let cols: usize = blocks.iter().map(|b| b.cols).sum();
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for block in blocks {
                debug_assert_eq!(block.rows, rows, "hstack row count mismatch");
                if block.cols > 0 {
                    data.extend_from_slice(block.row(r));
                }
            }
        }
        Matrix::from_flat(rows, cols, data)
    }

    /// Rows that are not entirely zero, in order.
    pub fn without_zero_rows(&self) -> Matrix {
        let mut data = Vec::with_capacity(self.data.len());
        let mut kept = 0;
        for r in 0..self.rows {
            let row = self.row(r);
            if row.iter().any(|&v| v != 0.0) {
                data.extend_from_slice(row);
                kept += 1;
            }
        }
        Matrix::from_flat(kept, self.cols, data)
    }
}

/// Index of the largest value; ties resolve to the lowest index.
/// Returns 0 for an empty slice.
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ColumnType; 7] = [
        ColumnType::Date,
        ColumnType::CaseId,
        ColumnType::Boolean,
        ColumnType::Qualitative,
        ColumnType::Quantitative,
        ColumnType::Any,
        ColumnType::Junk,
    ];

    #[test]
    fn test_join_rules() {
        use ColumnType::*;
        assert_eq!(Date | Date, Date);
        assert_eq!(Junk | Any, Any);
        assert_eq!(Boolean | Junk, Junk);
        assert_eq!(Qualitative | Quantitative, Qualitative);
        assert_eq!(Quantitative | Qualitative, Qualitative);
        assert_eq!(Date | Quantitative, Junk);
        assert_eq!(CaseId | Boolean, Junk);
    }

    #[test]
    fn test_join_is_commutative_and_associative() {
        for a in ALL {
            for b in ALL {
                assert_eq!(a | b, b | a, "{a:?} | {b:?}");
                for c in ALL {
                    assert_eq!((a | b) | c, a | (b | c), "{a:?} {b:?} {c:?}");
                }
            }
        }
    }

    #[test]
    fn test_parse_date_layouts() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();
        assert_eq!(parse_date("2024-03-01 10:30:00"), Some(expected));
        assert_eq!(parse_date("2024-03-01T10:30:00"), Some(expected));
        assert_eq!(parse_date("2024/03/01 10:30:00"), Some(expected));
        assert_eq!(parse_date("2024-03-01T10:30:00+00:00"), Some(expected));
        assert_eq!(parse_date("2024-03-01 10:30:00.000"), Some(expected));
        assert!(parse_date("yesterday").is_none());
        assert!(parse_date("").is_none());
    }

    #[test]
    fn test_value_interpretations() {
        assert_eq!(Value::text(""), Value::Empty);
        assert_eq!(Value::Empty.as_f64(), Some(0.0));
        assert_eq!(Value::text("2.5").as_f64(), Some(2.5));
        assert_eq!(Value::text("x").as_f64(), None);
        assert_eq!(Value::text("True").as_bool(), Some(true));
        assert_eq!(Value::text("0").as_bool(), Some(false));
        assert_eq!(Value::text("maybe").as_bool(), None);
    }

    #[test]
    fn test_matrix_helpers() {
        let a = Matrix::from_flat(2, 1, vec![1.0, 2.0]);
        let b = Matrix::from_flat(2, 2, vec![3.0, 4.0, 5.0, 6.0]);
        let empty = Matrix::zeros(2, 0);
        let m = Matrix::hstack(2, &[a, empty, b]);
        assert_eq!(m.as_slice(), &[1.0, 3.0, 4.0, 2.0, 5.0, 6.0]);
        assert_eq!(m.columns(1..3).as_slice(), &[3.0, 4.0, 5.0, 6.0]);
        assert_eq!(m.head(1).as_slice(), &[1.0, 3.0, 4.0]);

        let padded = Matrix::from_flat(3, 2, vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
        assert_eq!(padded.without_zero_rows().as_slice(), &[1.0, 0.0]);
    }

    #[test]
    fn test_argmax_ties_pick_lowest_index() {
        assert_eq!(argmax(&[0.2, 0.7, 0.7]), 1);
        assert_eq!(argmax(&[0.0, 0.0]), 0);
        assert_eq!(argmax(&[]), 0);
    }
}
