//! Schema normalisation for raw category tables.
//!
//! Canonicalises column names, drops duplicate columns, types every column,
//! derives `date` / `month_year` and the canonical count measure, and sorts
//! rows chronologically.  Never fails: anything it cannot derive is simply
//! left out of the [`SchemaDescriptor`].

use std::collections::{HashMap, HashSet};

use chrono::{Datelike, Month, NaiveDate, NaiveDateTime};
use tracing::debug;
use trends_core::models::{
    CanonicalMeasure, Column, ColumnData, NormalizedTable, RawTable, SchemaDescriptor,
};
use trends_core::settings::EngineConfig;

/// Calendar-date layouts tried in order.  Day-first layouts come before the
/// ISO ones so that `01-03-2023` reads as 1 March.
const DATE_FORMATS: &[&str] = &[
    "%d-%m-%Y", "%d/%m/%Y", "%d.%m.%Y", "%Y-%m-%d", "%Y/%m/%d",
];

const DATETIME_FORMATS: &[&str] = &[
    "%d-%m-%Y %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// Columns that label rows and are never summed.
const LABEL_COLUMNS: &[&str] = &["state", "date", "month_year"];

// ── Public API ────────────────────────────────────────────────────────────────

/// Normalise `raw` into a typed table with a schema descriptor.
pub fn normalize(raw: &RawTable, config: &EngineConfig) -> NormalizedTable {
    let row_count = raw.row_count();

    // ── Step 1: canonical names, first occurrence wins ────────────────────────
    let mut seen: HashSet<String> = HashSet::new();
    let mut raw_index: HashMap<String, usize> = HashMap::new();
    let mut columns: Vec<Column> = Vec::new();
    for (idx, header) in raw.headers.iter().enumerate() {
        let mut name = canonical_column_name(header);
        if name.is_empty() {
            name = format!("unnamed_{idx}");
        }
        if !seen.insert(name.clone()) {
            debug!("Dropping duplicate column '{}' (canonical '{}')", header, name);
            continue;
        }
        let cells: Vec<&str> = (0..row_count).map(|row| raw.cell(row, idx)).collect();
        let data = build_column(&name, &cells, config);
        raw_index.insert(name.clone(), idx);
        columns.push(Column::new(name, data));
    }

    // ── Step 2: dates ─────────────────────────────────────────────────────────
    derive_dates(&mut columns, raw, &raw_index);

    // ── Step 3: canonical measure ─────────────────────────────────────────────
    let canonical_measure = derive_canonical_measure(&mut columns, row_count, config);

    // ── Step 4: schema descriptor ─────────────────────────────────────────────
    let canonical_name = canonical_measure.as_ref().map(|m| m.column.as_str());
    let measure_columns: Vec<String> = columns
        .iter()
        .filter(|c| c.data.is_numeric())
        .filter(|c| !LABEL_COLUMNS.contains(&c.name.as_str()))
        .filter(|c| !config.is_identifier(&c.name))
        .filter(|c| Some(c.name.as_str()) != canonical_name)
        .map(|c| c.name.clone())
        .collect();

    let schema = SchemaDescriptor {
        has_date: columns
            .iter()
            .any(|c| c.name == "date" && c.data.as_dates().is_some()),
        has_state: columns.iter().any(|c| c.name == "state"),
        measure_columns,
        canonical_measure,
    };

    // ── Step 5: chronological order ───────────────────────────────────────────
    if let Some(order) = chronological_order(&columns) {
        for column in &mut columns {
            column.data = column.data.permute(&order);
        }
    }

    debug!(
        "Normalised {} rows, {} columns (date: {}, state: {}, measures: {:?})",
        row_count,
        columns.len(),
        schema.has_date,
        schema.has_state,
        schema.measure_columns
    );

    NormalizedTable::from_parts(columns, row_count, schema)
}

/// Trim, lower-case and replace internal whitespace with underscores.
pub fn canonical_column_name(header: &str) -> String {
    header
        .trim_start_matches('\u{feff}')
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

/// Parse a calendar date, reading ambiguous numeric layouts day-first.
///
/// Returns `None` for blank or unrecognised values.
pub fn parse_day_first(cell: &str) -> Option<NaiveDate> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
                .map(|dt| dt.date())
        })
}

// ── Column typing ─────────────────────────────────────────────────────────────

/// Type one column.
///
/// `date` is always a date column and `state` / `month_year` are always
/// text.  Any other column is numeric when more than half of its non-missing
/// cells parse as finite numbers; the cells that do not parse become missing.
fn build_column(name: &str, cells: &[&str], config: &EngineConfig) -> ColumnData {
    match name {
        "date" => ColumnData::Date(cells.iter().map(|c| parse_day_first(c)).collect()),
        "state" | "month_year" => text_column(cells, config),
        _ => {
            let mut present = 0usize;
            let mut parsed = 0usize;
            let values: Vec<Option<f64>> = cells
                .iter()
                .map(|cell| {
                    if config.is_null_token(cell) {
                        return None;
                    }
                    present += 1;
                    let value = parse_number(cell);
                    if value.is_some() {
                        parsed += 1;
                    }
                    value
                })
                .collect();

            if parsed > 0 && parsed * 2 > present {
                if parsed < present {
                    debug!(
                        "Column '{}': {} non-numeric cells treated as missing",
                        name,
                        present - parsed
                    );
                }
                ColumnData::Numeric(values)
            } else {
                text_column(cells, config)
            }
        }
    }
}

fn text_column(cells: &[&str], config: &EngineConfig) -> ColumnData {
    ColumnData::Text(
        cells
            .iter()
            .map(|cell| {
                if config.is_null_token(cell) {
                    None
                } else {
                    Some(cell.trim().to_string())
                }
            })
            .collect(),
    )
}

fn parse_number(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Replace the column called `name`, or append it when absent.
fn set_column(columns: &mut Vec<Column>, name: &str, data: ColumnData) {
    match columns.iter_mut().find(|c| c.name == name) {
        Some(existing) => existing.data = data,
        None => columns.push(Column::new(name, data)),
    }
}

// ── Date derivation ───────────────────────────────────────────────────────────

/// Derive `month_year` from `date`, or `date` + `month_year` from
/// `year` + `month`.  Tables with neither keep no date.
///
/// Year and month are read from the raw cells so that month names survive
/// numeric typing of the `month` column.
fn derive_dates(columns: &mut Vec<Column>, raw: &RawTable, raw_index: &HashMap<String, usize>) {
    let existing_dates = columns
        .iter()
        .find(|c| c.name == "date")
        .and_then(|c| c.data.as_dates())
        .map(|d| d.to_vec());

    if let Some(dates) = existing_dates {
        let labels = dates.iter().map(|d| d.map(month_label)).collect();
        set_column(columns, "month_year", ColumnData::Text(labels));
        return;
    }

    let (Some(&year), Some(&month)) = (raw_index.get("year"), raw_index.get("month")) else {
        debug!("No date, or year and month, columns; date features disabled");
        return;
    };

    let dates: Vec<Option<NaiveDate>> = (0..raw.row_count())
        .map(|row| {
            let y = parse_year(raw.cell(row, year))?;
            let m = parse_month(raw.cell(row, month))?;
            NaiveDate::from_ymd_opt(y, m, 1)
        })
        .collect();
    let labels = dates.iter().map(|d| d.map(month_label)).collect();

    set_column(columns, "month_year", ColumnData::Text(labels));
    set_column(columns, "date", ColumnData::Date(dates));
}

fn month_label(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// Whole-number year, also accepting float renderings such as `2023.0`.
fn parse_year(cell: &str) -> Option<i32> {
    let value = cell.trim().parse::<f64>().ok()?;
    (value.fract() == 0.0 && (1.0..=9999.0).contains(&value)).then_some(value as i32)
}

/// Month as a number (`3`) or an English name (`March`, `mar`).
fn parse_month(cell: &str) -> Option<u32> {
    let trimmed = cell.trim();
    trimmed
        .parse::<u32>()
        .ok()
        .filter(|m| (1..=12).contains(m))
        .or_else(|| trimmed.parse::<Month>().ok().map(|m| m.number_from_month()))
}

// ── Canonical measure ─────────────────────────────────────────────────────────

/// Build the canonical measure column.
///
/// Precedence: sum of the present partial age-bracket columns, then a copy of
/// the generic count column, then nothing.
fn derive_canonical_measure(
    columns: &mut Vec<Column>,
    row_count: usize,
    config: &EngineConfig,
) -> Option<CanonicalMeasure> {
    let partials: Vec<&Column> = columns
        .iter()
        .filter(|c| c.data.is_numeric())
        .filter(|c| config.partial_count_columns.contains(&c.name))
        .collect();

    let (sources, values) = if !partials.is_empty() {
        let sums: Vec<Option<f64>> = (0..row_count)
            .map(|row| {
                Some(
                    partials
                        .iter()
                        .filter_map(|c| c.data.as_numeric())
                        .filter_map(|v| v[row])
                        .sum(),
                )
            })
            .collect();
        let names: Vec<String> = partials.iter().map(|c| c.name.clone()).collect();
        (names, sums)
    } else {
        let count = columns
            .iter()
            .find(|c| c.name == config.count_column)
            .and_then(|c| c.data.as_numeric())?;
        (vec![config.count_column.clone()], count.to_vec())
    };

    set_column(
        columns,
        &config.canonical_measure,
        ColumnData::Numeric(values),
    );
    Some(CanonicalMeasure {
        column: config.canonical_measure.clone(),
        sources,
    })
}

// ── Ordering ──────────────────────────────────────────────────────────────────

/// Stable ascending order by date with missing dates last, or `None` when the
/// table has no date or is already ordered.
fn chronological_order(columns: &[Column]) -> Option<Vec<usize>> {
    let dates = columns
        .iter()
        .find(|c| c.name == "date")
        .and_then(|c| c.data.as_dates())?;

    let mut order: Vec<usize> = (0..dates.len()).collect();
    order.sort_by_key(|&i| (dates[i].is_none(), dates[i]));

    if order.iter().enumerate().all(|(pos, &i)| pos == i) {
        None
    } else {
        Some(order)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
