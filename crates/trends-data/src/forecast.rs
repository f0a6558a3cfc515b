//! Linear-trend extrapolation of daily activity.

use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};
use tracing::debug;
use trends_core::models::{ForecastPoint, NormalizedTable, TotalBasis};
use trends_core::stats::LinearFit;

use crate::aggregator::TrendAggregator;

/// Spacing between forecast points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForecastStep {
    /// One point per day.
    #[default]
    Daily,
    /// One point every 30 days.
    Monthly,
}

impl ForecastStep {
    pub fn days(self) -> usize {
        match self {
            ForecastStep::Daily => 1,
            ForecastStep::Monthly => 30,
        }
    }
}

impl FromStr for ForecastStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" | "day" => Ok(ForecastStep::Daily),
            "monthly" | "month" => Ok(ForecastStep::Monthly),
            other => Err(format!("unknown forecast step: {other}")),
        }
    }
}

/// Ordinal day number with 0001-01-01 as day 1.
fn ordinal(date: NaiveDate) -> f64 {
    f64::from(date.num_days_from_ce())
}

/// Stateless helper that fits and extrapolates a linear trend.
pub struct Forecaster;

impl Forecaster {
    /// Forecast total activity for the `horizon_days` after the latest
    /// observed date.
    ///
    /// Daily totals are regressed on their ordinal day number by ordinary
    /// least squares.  Daily offsets run `1..=horizon_days`, one point per
    /// day.  Monthly offsets run `1, 31, 61, …` strictly below the horizon.
    ///
    /// Empty when the table has no date or measure columns, or fewer than
    /// `min_dates` distinct dates.  Values are not clamped.
    pub fn forecast(
        table: &NormalizedTable,
        horizon_days: u32,
        step: ForecastStep,
        min_dates: usize,
    ) -> Vec<ForecastPoint> {
        if !table.schema().has_date {
            debug!("Forecast needs a date column; skipping");
            return Vec::new();
        }

        let daily = TrendAggregator::aggregate_daily(table);
        if daily.basis == TotalBasis::RowCount {
            debug!("Forecast needs measure columns; skipping");
            return Vec::new();
        }

        let observations: Vec<(NaiveDate, f64)> = daily.dated().collect();
        if observations.len() < min_dates.max(2) {
            debug!(
                "Only {} distinct dates (need {}); skipping forecast",
                observations.len(),
                min_dates
            );
            return Vec::new();
        }

        let xs: Vec<f64> = observations.iter().map(|(d, _)| ordinal(*d)).collect();
        let ys: Vec<f64> = observations.iter().map(|(_, v)| *v).collect();
        let Some(fit) = LinearFit::fit(&xs, &ys) else {
            return Vec::new();
        };
        // Observations are sorted by date, so the last one is the latest.
        let Some(&(last_date, _)) = observations.last() else {
            return Vec::new();
        };

        let last_offset = match step {
            ForecastStep::Daily => i64::from(horizon_days),
            ForecastStep::Monthly => (i64::from(horizon_days) - 1).max(1),
        };

        (1..=last_offset)
            .step_by(step.days())
            .filter_map(|offset| last_date.checked_add_signed(Duration::days(offset)))
            .map(|date| ForecastPoint {
                date,
                predicted_value: fit.predict(ordinal(date)),
            })
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::normalize;
    use trends_core::models::RawTable;
    use trends_core::settings::EngineConfig;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// A single-state table with one row per day holding `values[i]` on day `i`.
    fn series_table(values: &[f64]) -> NormalizedTable {
        let start = ymd(2023, 3, 1);
        let raw = RawTable::new(
            vec!["state".into(), "date".into(), "count".into()],
            values
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    vec![
                        "Kerala".to_string(),
                        (start + Duration::days(i as i64)).format("%d/%m/%Y").to_string(),
                        v.to_string(),
                    ]
                })
                .collect(),
        );
        normalize(&raw, &EngineConfig::default())
    }

    fn linear(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + 2.0 * i as f64).collect()
    }

    // ── ForecastStep ──────────────────────────────────────────────────────────

    #[test]
    fn test_step_from_str() {
        assert_eq!("daily".parse::<ForecastStep>(), Ok(ForecastStep::Daily));
        assert_eq!("Monthly".parse::<ForecastStep>(), Ok(ForecastStep::Monthly));
        assert!("weekly".parse::<ForecastStep>().is_err());
    }

    // ── forecast ──────────────────────────────────────────────────────────────

    #[test]
    fn test_fewer_than_five_dates_yields_empty() {
        let table = series_table(&linear(4));
        assert!(Forecaster::forecast(&table, 30, ForecastStep::Daily, 5).is_empty());
    }

    #[test]
    fn test_five_dates_yields_horizon_points_ascending() {
        let table = series_table(&linear(5));
        let points = Forecaster::forecast(&table, 30, ForecastStep::Daily, 5);

        assert_eq!(points.len(), 30);
        assert_eq!(points[0].date, ymd(2023, 3, 6));
        assert_eq!(points[29].date, ymd(2023, 4, 4));
        assert!(points.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn test_linear_input_continues_slope() {
        let n = 20;
        let table = series_table(&linear(n));
        let points = Forecaster::forecast(&table, 10, ForecastStep::Daily, 5);

        for (k, point) in points.iter().enumerate() {
            let day_index = (n + k) as f64;
            let expected = 100.0 + 2.0 * day_index;
            assert!(
                (point.predicted_value - expected).abs() < 1e-6,
                "day {day_index}: {} vs {expected}",
                point.predicted_value
            );
        }
    }

    #[test]
    fn test_monthly_step_offsets() {
        let table = series_table(&linear(10));
        let points = Forecaster::forecast(&table, 90, ForecastStep::Monthly, 5);
        let last = ymd(2023, 3, 10);

        let dates: Vec<NaiveDate> = points.iter().map(|p| p.date).collect();
        assert_eq!(
            dates,
            vec![
                last + Duration::days(1),
                last + Duration::days(31),
                last + Duration::days(61),
            ]
        );
    }

    #[test]
    fn test_monthly_step_excludes_horizon_day() {
        let table = series_table(&linear(10));
        let last = ymd(2023, 3, 10);

        let offsets: Vec<i64> = Forecaster::forecast(&table, 91, ForecastStep::Monthly, 5)
            .iter()
            .map(|p| (p.date - last).num_days())
            .collect();
        assert_eq!(offsets, vec![1, 31, 61]);

        let offsets: Vec<i64> = Forecaster::forecast(&table, 92, ForecastStep::Monthly, 5)
            .iter()
            .map(|p| (p.date - last).num_days())
            .collect();
        assert_eq!(offsets, vec![1, 31, 61, 91]);
    }

    #[test]
    fn test_declining_trend_is_not_clamped() {
        let values: Vec<f64> = (0..6).map(|i| 50.0 - 20.0 * i as f64).collect();
        let table = series_table(&values);
        let points = Forecaster::forecast(&table, 5, ForecastStep::Daily, 5);

        assert_eq!(points.len(), 5);
        assert!(points.iter().all(|p| p.predicted_value < 0.0));
    }

    #[test]
    fn test_identifier_only_table_yields_empty() {
        let raw = RawTable::new(
            vec!["date".into(), "pincode".into()],
            (1..=8)
                .map(|d| vec![format!("{d:02}-01-2023"), "560001".to_string()])
                .collect(),
        );
        let table = normalize(&raw, &EngineConfig::default());
        assert!(Forecaster::forecast(&table, 7, ForecastStep::Daily, 5).is_empty());
    }
}
