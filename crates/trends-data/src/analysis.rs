//! Analytics facade over a loaded [`Dataset`].
//!
//! Runs the aggregator, anomaly detectors and forecaster on the right
//! category tables and shapes their output into the response views the
//! serving layer renders.  Nothing is cached: every call re-derives its
//! result from the snapshot it is handed.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;
use trends_core::models::{
    AnomalyRecord, Dataset, ForecastPoint, NormalizedTable, ISO_DATE_FORMAT,
};
use trends_core::settings::EngineConfig;

use crate::aggregator::TrendAggregator;
use crate::anomaly::{detect_anomalies, AnomalyStrategy};
use crate::forecast::{ForecastStep, Forecaster};

/// Number of states reported at each end of [`StateRankings`].
const RANKING_SIZE: usize = 5;

// ── Response views ────────────────────────────────────────────────────────────

/// Parallel date labels and totals of one category, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrendView {
    pub dates: Vec<String>,
    pub values: Vec<f64>,
}

/// Forecast dates and values; serialises as `{}` when there is no forecast.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PredictionView {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dates: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub predicted_values: Vec<f64>,
}

impl PredictionView {
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

impl From<Vec<ForecastPoint>> for PredictionView {
    fn from(points: Vec<ForecastPoint>) -> Self {
        let (dates, predicted_values) = points
            .into_iter()
            .map(|p| (p.date.format(ISO_DATE_FORMAT).to_string(), p.predicted_value))
            .unzip();
        Self {
            dates,
            predicted_values,
        }
    }
}

/// One state's total for the map view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateValue {
    pub state: String,
    pub value: f64,
}

/// Total of one age-bracket column and its share of all brackets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgeGroupShare {
    pub column: String,
    pub total: f64,
    /// Fraction in `[0, 1]`; zero when every bracket is zero.
    pub share: f64,
}

/// States with the least and the most activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StateRankings {
    /// Ascending by value.
    pub lowest: Vec<StateValue>,
    /// Descending by value.
    pub highest: Vec<StateValue>,
}

/// Every view at once, as returned by [`AnalyticsEngine::build_views`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalyticsViews {
    pub trends: BTreeMap<String, TrendView>,
    pub anomalies: Vec<AnomalyRecord>,
    pub forecasts: PredictionView,
    pub map_data: Vec<StateValue>,
}

// ── AnalyticsEngine ───────────────────────────────────────────────────────────

/// Stateless query facade; holds only its configuration.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsEngine {
    config: EngineConfig,
}

impl AnalyticsEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Daily totals for every category that has dated rows.
    pub fn trends(&self, dataset: &Dataset) -> BTreeMap<String, TrendView> {
        dataset
            .iter()
            .filter_map(|(category, table)| {
                let view = daily_view(table)?;
                Some((category.to_string(), view))
            })
            .collect()
    }

    /// Per-month totals (`YYYY-MM` labels) for every category that has
    /// dated rows.
    pub fn monthly_trends(&self, dataset: &Dataset) -> BTreeMap<String, TrendView> {
        dataset
            .iter()
            .filter(|(_, table)| table.schema().has_date)
            .filter_map(|(category, table)| {
                let (dates, values): (Vec<String>, Vec<f64>) =
                    TrendAggregator::aggregate_monthly(table).into_iter().unzip();
                if dates.is_empty() {
                    return None;
                }
                Some((category.to_string(), TrendView { dates, values }))
            })
            .collect()
    }

    /// Anomalies of the primary category; empty when it is missing or lacks
    /// the required columns.
    pub fn anomalies(&self, dataset: &Dataset, strategy: AnomalyStrategy) -> Vec<AnomalyRecord> {
        self.primary_table(dataset)
            .map(|(_, table)| detect_anomalies(table, strategy, &self.config))
            .unwrap_or_default()
    }

    /// Forecast of the primary category's daily totals.
    pub fn predictions(
        &self,
        dataset: &Dataset,
        horizon_days: u32,
        step: ForecastStep,
    ) -> PredictionView {
        self.primary_table(dataset)
            .map(|(_, table)| {
                Forecaster::forecast(table, horizon_days, step, self.config.min_forecast_dates)
            })
            .unwrap_or_default()
            .into()
    }

    /// Per-state totals of `category`, sorted by state.
    ///
    /// Empty for an unknown category, a table without a state column, or a
    /// table whose only numeric columns are identifiers.
    pub fn map_data(&self, dataset: &Dataset, category: &str) -> Vec<StateValue> {
        let Some(table) = dataset.get(category) else {
            debug!("Unknown category '{}' for map data", category);
            return Vec::new();
        };
        let schema = table.schema();
        if !schema.has_state || !schema.has_measures() {
            return Vec::new();
        }

        TrendAggregator::aggregate_by_state(table)
            .points
            .into_iter()
            .filter_map(|p| {
                p.state.map(|state| StateValue {
                    state,
                    value: p.total,
                })
            })
            .collect()
    }

    /// Totals and shares of the age-bracket columns of the primary category.
    ///
    /// Empty unless at least two bracket columns are present.
    pub fn age_groups(&self, dataset: &Dataset) -> Vec<AgeGroupShare> {
        let Some((_, table)) = self.primary_table(dataset) else {
            return Vec::new();
        };

        let totals: Vec<(String, f64)> = self
            .config
            .partial_count_columns
            .iter()
            .filter_map(|name| {
                let values = table.numeric(name)?;
                Some((name.clone(), values.iter().flatten().sum()))
            })
            .collect();
        if totals.len() < 2 {
            return Vec::new();
        }

        let grand_total: f64 = totals.iter().map(|(_, t)| t).sum();
        totals
            .into_iter()
            .map(|(column, total)| AgeGroupShare {
                column,
                total,
                share: if grand_total > 0.0 {
                    total / grand_total
                } else {
                    0.0
                },
            })
            .collect()
    }

    /// The lowest and highest states of the primary category by canonical
    /// measure, or by measure total when no canonical measure exists.
    pub fn state_rankings(&self, dataset: &Dataset) -> StateRankings {
        let Some((_, table)) = self.primary_table(dataset) else {
            return StateRankings::default();
        };

        let mut totals = state_activity(table);
        if totals.is_empty() {
            return StateRankings::default();
        }
        totals.sort_by(|a, b| a.value.total_cmp(&b.value));

        let lowest = totals.iter().take(RANKING_SIZE).cloned().collect();
        let highest = totals.iter().rev().take(RANKING_SIZE).cloned().collect();
        StateRankings { lowest, highest }
    }

    /// Trends, anomalies, forecast and map data in one call.
    pub fn build_views(
        &self,
        dataset: &Dataset,
        map_category: &str,
        strategy: AnomalyStrategy,
        horizon_days: u32,
        step: ForecastStep,
    ) -> AnalyticsViews {
        AnalyticsViews {
            trends: self.trends(dataset),
            anomalies: self.anomalies(dataset, strategy),
            forecasts: self.predictions(dataset, horizon_days, step),
            map_data: self.map_data(dataset, map_category),
        }
    }

    /// The table anomaly, forecast and breakdown queries run on.
    ///
    /// The configured primary category when it has rows, otherwise the first
    /// category (by name) that carries a canonical measure.
    pub fn primary_table<'a>(&self, dataset: &'a Dataset) -> Option<(&'a str, &'a NormalizedTable)> {
        let primary = self.config.primary_category.trim().to_lowercase();
        let configured = dataset
            .iter()
            .find(|(name, table)| *name == primary && !table.is_empty());
        if configured.is_some() {
            return configured;
        }

        let fallback = dataset
            .iter()
            .find(|(_, table)| !table.is_empty() && table.schema().canonical_measure.is_some());
        match fallback {
            Some((name, _)) => debug!(
                "Primary category '{}' unavailable; using '{}'",
                primary, name
            ),
            None => debug!("No category available for primary-category views"),
        }
        fallback
    }
}

// ── Internal helpers ──────────────────────────────────────────────────────────

fn daily_view(table: &NormalizedTable) -> Option<TrendView> {
    if !table.schema().has_date {
        return None;
    }
    let (dates, values): (Vec<String>, Vec<f64>) = TrendAggregator::aggregate_daily(table)
        .dated()
        .map(|(date, total)| (date.format(ISO_DATE_FORMAT).to_string(), total))
        .unzip();
    if dates.is_empty() {
        None
    } else {
        Some(TrendView { dates, values })
    }
}

/// Per-state activity: the canonical measure when present, otherwise the
/// measure total.  Rows without a state are dropped.
fn state_activity(table: &NormalizedTable) -> Vec<StateValue> {
    let Some(states) = table.states() else {
        return Vec::new();
    };

    let canonical = table
        .schema()
        .canonical_measure
        .as_ref()
        .and_then(|m| table.numeric(&m.column));

    let Some(canonical) = canonical else {
        if !table.schema().has_measures() {
            return Vec::new();
        }
        return TrendAggregator::aggregate_by_state(table)
            .points
            .into_iter()
            .filter_map(|p| p.state.map(|state| StateValue { state, value: p.total }))
            .collect();
    };

    let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
    for (state, value) in states.iter().zip(canonical) {
        if let Some(state) = state.as_deref() {
            *totals.entry(state).or_default() += value.unwrap_or(0.0);
        }
    }
    totals
        .into_iter()
        .map(|(state, value)| StateValue {
            state: state.to_string(),
            value,
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
