use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Date format used when rendering dates back to text (ISO-8601 calendar date).
pub const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

// ── RawTable ──────────────────────────────────────────────────────────────────

/// A category table exactly as the loader read it: header names plus string
/// cells.  Rows may be ragged; missing trailing cells read as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    /// Header names in file order, not yet canonicalised.
    pub headers: Vec<String>,
    /// Row-major cell values.
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell at (`row`, `col`), or `""` when the row is shorter than the header.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Append the rows of `other`, aligning columns by exact header name.
    ///
    /// Headers only present in `other` are added at the end; cells for
    /// columns a side does not have are left empty.  When `other` repeats a
    /// header, only its first occurrence is kept.
    pub fn append(&mut self, other: RawTable) {
        let mut mapping: Vec<Option<usize>> = Vec::with_capacity(other.headers.len());
        for (pos, header) in other.headers.iter().enumerate() {
            if other.headers[..pos].contains(header) {
                mapping.push(None);
                continue;
            }
            let idx = match self.headers.iter().position(|h| h == header) {
                Some(idx) => idx,
                None => {
                    self.headers.push(header.clone());
                    self.headers.len() - 1
                }
            };
            mapping.push(Some(idx));
        }

        let width = self.headers.len();
        for row in &mut self.rows {
            row.resize(width, String::new());
        }

        for row in other.rows {
            let mut aligned = vec![String::new(); width];
            for (cell, idx) in row.into_iter().zip(mapping.iter()) {
                if let Some(idx) = *idx {
                    aligned[idx] = cell;
                }
            }
            self.rows.push(aligned);
        }
    }
}

// ── Columns ───────────────────────────────────────────────────────────────────

/// Typed values of one normalised column.  `None` marks a missing or
/// unparsable cell.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
    Date(Vec<Option<NaiveDate>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Numeric(v) => v.len(),
            ColumnData::Text(v) => v.len(),
            ColumnData::Date(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnData::Numeric(_))
    }

    pub fn as_numeric(&self) -> Option<&[Option<f64>]> {
        match self {
            ColumnData::Numeric(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&[Option<String>]> {
        match self {
            ColumnData::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_dates(&self) -> Option<&[Option<NaiveDate>]> {
        match self {
            ColumnData::Date(v) => Some(v),
            _ => None,
        }
    }

    /// Render the cell at `row` back to text; missing cells render as `""`.
    pub fn render(&self, row: usize) -> String {
        match self {
            ColumnData::Numeric(v) => v
                .get(row)
                .copied()
                .flatten()
                .map(|n| n.to_string())
                .unwrap_or_default(),
            ColumnData::Text(v) => v.get(row).cloned().flatten().unwrap_or_default(),
            ColumnData::Date(v) => v
                .get(row)
                .copied()
                .flatten()
                .map(|d| d.format(ISO_DATE_FORMAT).to_string())
                .unwrap_or_default(),
        }
    }

    /// Reorder the cells so that position `i` holds the old cell `order[i]`.
    pub fn permute(&self, order: &[usize]) -> ColumnData {
        match self {
            ColumnData::Numeric(v) => ColumnData::Numeric(order.iter().map(|&i| v[i]).collect()),
            ColumnData::Text(v) => {
                ColumnData::Text(order.iter().map(|&i| v[i].clone()).collect())
            }
            ColumnData::Date(v) => ColumnData::Date(order.iter().map(|&i| v[i]).collect()),
        }
    }
}

/// A named, typed column of a [`NormalizedTable`].
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

// ── SchemaDescriptor ──────────────────────────────────────────────────────────

/// The derived "total count" column and the partial columns it was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalMeasure {
    /// Name of the derived column (e.g. `enrolment_count`).
    pub column: String,
    /// Columns summed (or copied) into it, in table order.
    pub sources: Vec<String>,
}

/// Which analytic features a normalised table supports.
///
/// Computed once by the normaliser and consulted by every downstream
/// component instead of probing for columns again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    /// A typed `date` column exists (values may still be missing per row).
    pub has_date: bool,
    /// A `state` column exists.
    pub has_state: bool,
    /// Numeric columns that are summed into totals, in table order.
    ///
    /// Excludes identifier-like columns and the derived canonical measure.
    pub measure_columns: Vec<String>,
    /// The canonical measure, when one could be derived.
    pub canonical_measure: Option<CanonicalMeasure>,
}

impl SchemaDescriptor {
    pub fn has_measures(&self) -> bool {
        !self.measure_columns.is_empty()
    }
}

// ── NormalizedTable ───────────────────────────────────────────────────────────

/// A rectangular, typed table with canonical column names.
///
/// Rows are sorted by date ascending when a date exists.  Instances are
/// read-only once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedTable {
    columns: Vec<Column>,
    row_count: usize,
    schema: SchemaDescriptor,
}

impl NormalizedTable {
    /// Assemble a table from already-normalised parts.
    ///
    /// Every column must hold exactly `row_count` cells.
    pub fn from_parts(columns: Vec<Column>, row_count: usize, schema: SchemaDescriptor) -> Self {
        debug_assert!(columns.iter().all(|c| c.data.len() == row_count));
        Self {
            columns,
            row_count,
            schema,
        }
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn numeric(&self, name: &str) -> Option<&[Option<f64>]> {
        self.column(name).and_then(|c| c.data.as_numeric())
    }

    pub fn text(&self, name: &str) -> Option<&[Option<String>]> {
        self.column(name).and_then(|c| c.data.as_text())
    }

    /// The typed `date` column, when the table has one.
    pub fn dates(&self) -> Option<&[Option<NaiveDate>]> {
        self.column("date").and_then(|c| c.data.as_dates())
    }

    /// The `state` column, when the table has one.
    pub fn states(&self) -> Option<&[Option<String>]> {
        self.text("state")
    }

    /// Row-wise sum of the measure columns.  Missing cells contribute nothing.
    pub fn measure_sum(&self, row: usize) -> f64 {
        self.schema
            .measure_columns
            .iter()
            .filter_map(|name| self.numeric(name))
            .filter_map(|values| values.get(row).copied().flatten())
            .sum()
    }

    /// Render the table back to text cells with ISO dates.
    pub fn to_raw(&self) -> RawTable {
        let headers = self.columns.iter().map(|c| c.name.clone()).collect();
        let rows = (0..self.row_count)
            .map(|row| self.columns.iter().map(|c| c.data.render(row)).collect())
            .collect();
        RawTable::new(headers, rows)
    }
}

// ── Dataset ───────────────────────────────────────────────────────────────────

/// Immutable snapshot of every loaded category, keyed by lower-case name.
///
/// Built once by the loader and shared by reference with every query.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    tables: BTreeMap<String, NormalizedTable>,
}

impl Dataset {
    pub fn new(tables: impl IntoIterator<Item = (String, NormalizedTable)>) -> Self {
        tables.into_iter().collect()
    }

    /// Case-insensitive lookup of a category table.
    pub fn get(&self, category: &str) -> Option<&NormalizedTable> {
        self.tables.get(&category.trim().to_lowercase())
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NormalizedTable)> {
        self.tables.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl FromIterator<(String, NormalizedTable)> for Dataset {
    fn from_iter<I: IntoIterator<Item = (String, NormalizedTable)>>(iter: I) -> Self {
        Self {
            tables: iter
                .into_iter()
                .map(|(k, v)| (k.trim().to_lowercase(), v))
                .collect(),
        }
    }
}

// ── Aggregation results ───────────────────────────────────────────────────────

/// Which columns partition the rows when aggregating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupKeys {
    pub state: bool,
    pub date: bool,
}

impl GroupKeys {
    pub const STATE_DATE: GroupKeys = GroupKeys {
        state: true,
        date: true,
    };
    pub const STATE: GroupKeys = GroupKeys {
        state: true,
        date: false,
    };
    pub const DATE: GroupKeys = GroupKeys {
        state: false,
        date: true,
    };
    pub const NONE: GroupKeys = GroupKeys {
        state: false,
        date: false,
    };
}

/// How a [`TrendSeries`] total was computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TotalBasis {
    /// Sum of the listed measure columns.
    Measures(Vec<String>),
    /// Number of rows, used when the table has no measure columns.
    RowCount,
}

/// One group of a [`TrendSeries`].
///
/// Key fields not requested by the [`GroupKeys`] are always `None`; a
/// requested key that is `None` groups the rows whose value was missing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub state: Option<String>,
    pub date: Option<NaiveDate>,
    pub total: f64,
    /// Number of input rows in the group.
    pub rows: usize,
}

/// Aggregated totals, one point per distinct key, sorted by (state, date).
#[derive(Debug, Clone, PartialEq)]
pub struct TrendSeries {
    pub keys: GroupKeys,
    pub basis: TotalBasis,
    pub points: Vec<TrendPoint>,
}

impl TrendSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Sum of every group total.
    pub fn grand_total(&self) -> f64 {
        self.points.iter().map(|p| p.total).sum()
    }

    /// `(date, total)` pairs of the groups that carry a date, in order.
    pub fn dated(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.points
            .iter()
            .filter_map(|p| p.date.map(|d| (d, p.total)))
    }
}

// ── Anomalies ─────────────────────────────────────────────────────────────────

/// The statistic an [`AnomalyRecord`] was judged by.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnomalyStatistic {
    /// Per-state z-score.
    ZScore { mean: f64, std: f64, z_score: f64 },
    /// Isolation-forest anomaly score in `(0, 1]` and the contamination cut-off.
    Isolation { anomaly_score: f64, threshold: f64 },
}

/// One (state, date) or date flagged as unusual.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub date: NaiveDate,
    /// Observed total for the group.
    pub value: f64,
    #[serde(flatten)]
    pub statistic: AnomalyStatistic,
    pub is_anomaly: bool,
}

impl AnomalyRecord {
    /// Signed severity used for ordering: the z-score or the anomaly score.
    pub fn severity(&self) -> f64 {
        match self.statistic {
            AnomalyStatistic::ZScore { z_score, .. } => z_score,
            AnomalyStatistic::Isolation { anomaly_score, .. } => anomaly_score,
        }
    }
}

// ── Forecasts ─────────────────────────────────────────────────────────────────

/// A predicted total for a future date.  Values are not clamped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub predicted_value: f64,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
