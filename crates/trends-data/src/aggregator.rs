//! Group-by aggregation of normalised tables by state and/or date.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use trends_core::models::{GroupKeys, NormalizedTable, TotalBasis, TrendPoint, TrendSeries};

// ── GroupTotals ───────────────────────────────────────────────────────────────

/// Running total for one group.
#[derive(Debug, Clone, Default)]
struct GroupTotals {
    total: f64,
    rows: usize,
}

impl GroupTotals {
    fn add_row(&mut self, value: f64) {
        self.total += value;
        self.rows += 1;
    }
}

// ── TrendAggregator ───────────────────────────────────────────────────────────

/// Stateless helper that groups table rows into [`TrendSeries`].
pub struct TrendAggregator;

impl TrendAggregator {
    /// Partition the rows of `table` by `keys` and total each group.
    ///
    /// The total of a row is the sum of the table's measure columns (missing
    /// cells contribute nothing); a table without measure columns counts rows
    /// instead.  Rows whose requested key is missing, including every row of
    /// a table that lacks the key column, form their own `None` group.
    ///
    /// Returns points sorted by (state, date), `None` first.
    pub fn aggregate(table: &NormalizedTable, keys: GroupKeys) -> TrendSeries {
        let schema = table.schema();
        let basis = if schema.has_measures() {
            TotalBasis::Measures(schema.measure_columns.clone())
        } else {
            TotalBasis::RowCount
        };

        let count_rows = basis == TotalBasis::RowCount;
        let states = if keys.state { table.states() } else { None };
        let dates = if keys.date { table.dates() } else { None };

        // BTreeMap keeps the output sorted by key.
        let mut groups: BTreeMap<(Option<String>, Option<NaiveDate>), GroupTotals> =
            BTreeMap::new();

        for row in 0..table.row_count() {
            let state = states.and_then(|s| s[row].clone());
            let date = dates.and_then(|d| d[row]);
            let value = if count_rows {
                1.0
            } else {
                table.measure_sum(row)
            };
            groups.entry((state, date)).or_default().add_row(value);
        }

        let points = groups
            .into_iter()
            .map(|((state, date), totals)| TrendPoint {
                state,
                date,
                total: totals.total,
                rows: totals.rows,
            })
            .collect();

        TrendSeries {
            keys,
            basis,
            points,
        }
    }

    /// Per-date totals across every state.
    pub fn aggregate_daily(table: &NormalizedTable) -> TrendSeries {
        Self::aggregate(table, GroupKeys::DATE)
    }

    /// Per-state totals across every date.
    pub fn aggregate_by_state(table: &NormalizedTable) -> TrendSeries {
        Self::aggregate(table, GroupKeys::STATE)
    }

    /// Per-month totals keyed by `"%Y-%m"`, sorted by key.
    ///
    /// Rows without a date are skipped.
    pub fn aggregate_monthly(table: &NormalizedTable) -> Vec<(String, f64)> {
        let daily = Self::aggregate_daily(table);
        let mut months: BTreeMap<String, f64> = BTreeMap::new();
        for (date, total) in daily.dated() {
            *months.entry(date.format("%Y-%m").to_string()).or_default() += total;
        }
        months.into_iter().collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
