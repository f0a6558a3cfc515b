//! Anomaly detection over aggregated activity.
//!
//! Two independent strategies:
//! * [`ZScoreDetector`]: per-state z-score of (state, date) totals.
//! * [`IsolationDetector`]: isolation forest over per-date totals of the
//!   whole table.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;
use trends_core::models::{
    AnomalyRecord, AnomalyStatistic, GroupKeys, NormalizedTable, TotalBasis,
};
use trends_core::settings::EngineConfig;
use trends_core::stats::{mean, percentile, sample_std};

use crate::aggregator::TrendAggregator;
use crate::isolation::IsolationForest;

// ── AnomalyStrategy ───────────────────────────────────────────────────────────

/// Which detector a caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnomalyStrategy {
    /// Per-state z-score, state-level granularity.
    #[default]
    ZScore,
    /// Global isolation forest, no state breakdown.
    Isolation,
}

impl FromStr for AnomalyStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "zscore" | "z-score" | "z_score" => Ok(AnomalyStrategy::ZScore),
            "isolation" | "isolation-forest" | "isolation_forest" => {
                Ok(AnomalyStrategy::Isolation)
            }
            other => Err(format!("unknown anomaly strategy: {other}")),
        }
    }
}

/// Run the detector selected by `strategy` with the tunables in `config`.
pub fn detect_anomalies(
    table: &NormalizedTable,
    strategy: AnomalyStrategy,
    config: &EngineConfig,
) -> Vec<AnomalyRecord> {
    match strategy {
        AnomalyStrategy::ZScore => ZScoreDetector::from_config(config).detect(table),
        AnomalyStrategy::Isolation => IsolationDetector::from_config(config).detect(table),
    }
}

// ── ZScoreDetector ────────────────────────────────────────────────────────────

/// Flags (state, date) totals that sit more than `threshold` standard
/// deviations from their state's mean.
#[derive(Debug, Clone)]
pub struct ZScoreDetector {
    threshold: f64,
}

impl ZScoreDetector {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.z_threshold)
    }

    /// Flagged records only, sorted by descending z-score.
    pub fn detect(&self, table: &NormalizedTable) -> Vec<AnomalyRecord> {
        let mut flagged: Vec<AnomalyRecord> = self
            .score(table)
            .into_iter()
            .filter(|r| r.is_anomaly)
            .collect();
        flagged.sort_by(|a, b| b.severity().total_cmp(&a.severity()));
        flagged
    }

    /// Every scored (state, date) total with its flag, in (state, date) order.
    ///
    /// The standard deviation is the sample deviation of the state's totals;
    /// a zero deviation is replaced with 1, so a perfectly flat state is
    /// never flagged.  States with a single dated total have no deviation
    /// and are skipped.
    pub fn score(&self, table: &NormalizedTable) -> Vec<AnomalyRecord> {
        let schema = table.schema();
        if !schema.has_state || !schema.has_date {
            debug!("Z-score detection needs state and date columns; skipping");
            return Vec::new();
        }

        let series = TrendAggregator::aggregate(table, GroupKeys::STATE_DATE);

        let mut by_state: BTreeMap<&str, Vec<(NaiveDate, f64)>> = BTreeMap::new();
        for point in &series.points {
            if let (Some(state), Some(date)) = (point.state.as_deref(), point.date) {
                by_state.entry(state).or_default().push((date, point.total));
            }
        }

        let mut records = Vec::new();
        for (state, observations) in by_state {
            let values: Vec<f64> = observations.iter().map(|(_, v)| *v).collect();
            let (Some(group_mean), Some(raw_std)) = (mean(&values), sample_std(&values)) else {
                continue;
            };
            let group_std = if raw_std == 0.0 { 1.0 } else { raw_std };

            for (date, value) in observations {
                let z_score = (value - group_mean) / group_std;
                records.push(AnomalyRecord {
                    state: Some(state.to_string()),
                    date,
                    value,
                    statistic: AnomalyStatistic::ZScore {
                        mean: group_mean,
                        std: group_std,
                        z_score,
                    },
                    is_anomaly: z_score.abs() > self.threshold,
                });
            }
        }
        records
    }
}

// ── IsolationDetector ─────────────────────────────────────────────────────────

/// Flags dates whose total activity the isolation forest isolates unusually
/// quickly.
#[derive(Debug, Clone)]
pub struct IsolationDetector {
    n_trees: usize,
    max_samples: usize,
    contamination: f64,
    seed: u64,
    min_dates: usize,
}

impl IsolationDetector {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            n_trees: config.n_trees,
            max_samples: config.max_samples,
            contamination: config.contamination,
            seed: config.seed,
            min_dates: config.min_anomaly_dates,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Outlier dates sorted by descending anomaly score.
    ///
    /// Empty when the table has no date or measure columns, or fewer than
    /// the minimum number of distinct dates.  A date is an outlier when its
    /// score exceeds the `(1 - contamination)` percentile of all scores.
    pub fn detect(&self, table: &NormalizedTable) -> Vec<AnomalyRecord> {
        if !table.schema().has_date {
            debug!("Isolation detection needs a date column; skipping");
            return Vec::new();
        }

        let daily = TrendAggregator::aggregate_daily(table);
        if daily.basis == TotalBasis::RowCount {
            debug!("Isolation detection needs measure columns; skipping");
            return Vec::new();
        }

        let dated = daily.dated().count();
        let observations: Vec<(NaiveDate, f64)> =
            daily.dated().filter(|(_, v)| v.is_finite()).collect();
        if observations.len() < dated {
            debug!(
                "Dropping {} dates with overflowing totals",
                dated - observations.len()
            );
        }
        if observations.len() < self.min_dates {
            debug!(
                "Only {} distinct dates (need {}); skipping isolation detection",
                observations.len(),
                self.min_dates
            );
            return Vec::new();
        }

        let values: Vec<f64> = observations.iter().map(|(_, v)| *v).collect();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let forest = IsolationForest::fit(&values, self.n_trees, self.max_samples, &mut rng);
        let scores = forest.score_samples(&values);

        let mut sorted = scores.clone();
        sorted.sort_by(f64::total_cmp);
        let threshold = percentile(&sorted, 100.0 * (1.0 - self.contamination));

        let mut flagged: Vec<AnomalyRecord> = observations
            .into_iter()
            .zip(scores)
            .filter(|(_, score)| *score > threshold)
            .map(|((date, value), anomaly_score)| AnomalyRecord {
                state: None,
                date,
                value,
                statistic: AnomalyStatistic::Isolation {
                    anomaly_score,
                    threshold,
                },
                is_anomaly: true,
            })
            .collect();
        flagged.sort_by(|a, b| b.severity().total_cmp(&a.severity()));
        flagged
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::normalize;
    use chrono::Duration;
    use trends_core::models::RawTable;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Build a (state, date, count) table from `(state, day offset, count)`.
    fn daily_table(rows: &[(&str, i64, f64)]) -> NormalizedTable {
        let start = ymd(2023, 1, 1);
        let raw = RawTable::new(
            vec!["state".into(), "date".into(), "count".into()],
            rows.iter()
                .map(|(state, day, count)| {
                    vec![
                        state.to_string(),
                        (start + Duration::days(*day)).format("%d-%m-%Y").to_string(),
                        count.to_string(),
                    ]
                })
                .collect(),
        );
        normalize(&raw, &EngineConfig::default())
    }

    // ── AnomalyStrategy ───────────────────────────────────────────────────────

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("zscore".parse::<AnomalyStrategy>(), Ok(AnomalyStrategy::ZScore));
        assert_eq!(
            "Isolation".parse::<AnomalyStrategy>(),
            Ok(AnomalyStrategy::Isolation)
        );
        assert!("lof".parse::<AnomalyStrategy>().is_err());
    }

    // ── ZScoreDetector ────────────────────────────────────────────────────────

    #[test]
    fn test_single_spike_flagged_exactly() {
        let mut rows: Vec<(&str, i64, f64)> = (0..20).map(|d| ("Delhi", d, 100.0)).collect();
        rows[12].2 = 1_100.0;
        rows.extend((0..20).map(|d| ("Goa", d, 40.0 + (d % 3) as f64)));

        let flagged = ZScoreDetector::new(3.0).detect(&daily_table(&rows));

        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].state.as_deref(), Some("Delhi"));
        assert_eq!(flagged[0].date, ymd(2023, 1, 13));
        assert_eq!(flagged[0].value, 1_100.0);
        match flagged[0].statistic {
            AnomalyStatistic::ZScore { z_score, .. } => assert!(z_score > 3.0),
            _ => panic!("expected z-score statistic"),
        }
    }

    #[test]
    fn test_flat_state_uses_unit_std_and_is_never_flagged() {
        let rows: Vec<(&str, i64, f64)> = (0..10).map(|d| ("Goa", d, 75.0)).collect();
        let detector = ZScoreDetector::new(3.0);
        let table = daily_table(&rows);

        let scored = detector.score(&table);
        assert_eq!(scored.len(), 10);
        for record in &scored {
            match record.statistic {
                AnomalyStatistic::ZScore { std, z_score, .. } => {
                    assert_eq!(std, 1.0);
                    assert_eq!(z_score, 0.0);
                }
                _ => panic!("expected z-score statistic"),
            }
            assert!(!record.is_anomaly);
        }
        assert!(detector.detect(&table).is_empty());
    }

    #[test]
    fn test_flagged_sorted_by_descending_z() {
        let mut rows: Vec<(&str, i64, f64)> = (0..60).map(|d| ("Delhi", d, 100.0)).collect();
        rows[5].2 = 2_000.0;
        rows[40].2 = 2_500.0;

        let flagged = ZScoreDetector::new(3.0).detect(&daily_table(&rows));

        assert_eq!(flagged.len(), 2);
        assert_eq!(flagged[0].value, 2_500.0);
        assert_eq!(flagged[1].value, 2_000.0);
        assert!(flagged[0].severity() >= flagged[1].severity());
    }

    #[test]
    fn test_single_date_state_is_skipped() {
        let flagged = ZScoreDetector::new(3.0).score(&daily_table(&[("Goa", 0, 5.0)]));
        assert!(flagged.is_empty());
    }

    #[test]
    fn test_missing_state_column_yields_empty() {
        let raw = RawTable::new(
            vec!["date".into(), "count".into()],
            vec![vec!["01-01-2023".into(), "1".into()]],
        );
        let table = normalize(&raw, &EngineConfig::default());
        assert!(ZScoreDetector::new(3.0).detect(&table).is_empty());
    }

    // ── IsolationDetector ─────────────────────────────────────────────────────

    #[test]
    fn test_isolation_flags_spike_date() {
        let mut rows: Vec<(&str, i64, f64)> =
            (0..30).map(|d| ("Delhi", d, 100.0 + (d % 5) as f64)).collect();
        rows[9].2 = 10_000.0;

        let flagged = IsolationDetector::from_config(&EngineConfig::default())
            .detect(&daily_table(&rows));

        assert!(!flagged.is_empty());
        assert!(flagged.len() <= 2);
        assert_eq!(flagged[0].date, ymd(2023, 1, 10));
        assert_eq!(flagged[0].value, 10_000.0);
        assert!(flagged[0].state.is_none());
    }

    #[test]
    fn test_isolation_is_deterministic_for_a_seed() {
        let rows: Vec<(&str, i64, f64)> =
            (0..25).map(|d| ("Delhi", d, ((d * 37) % 11) as f64)).collect();
        let table = daily_table(&rows);
        let detector = IsolationDetector::from_config(&EngineConfig::default()).with_seed(9);

        assert_eq!(detector.detect(&table), detector.detect(&table));
    }

    #[test]
    fn test_isolation_overflowing_total_is_dropped() {
        let mut rows: Vec<(&str, i64, f64)> = (0..12).map(|d| ("Delhi", d, 1.0)).collect();
        rows.push(("Delhi", 4, 1e308));
        rows.push(("Delhi", 4, 1e308));

        let flagged = IsolationDetector::from_config(&EngineConfig::default())
            .detect(&daily_table(&rows));

        assert!(flagged.iter().all(|r| r.value.is_finite()));
        assert!(flagged.iter().all(|r| r.date != ymd(2023, 1, 5)));
    }

    #[test]
    fn test_isolation_needs_ten_dates() {
        let rows: Vec<(&str, i64, f64)> = (0..9).map(|d| ("Delhi", d, d as f64)).collect();
        let flagged = IsolationDetector::from_config(&EngineConfig::default())
            .detect(&daily_table(&rows));
        assert!(flagged.is_empty());
    }

    #[test]
    fn test_isolation_needs_measure_columns() {
        let raw = RawTable::new(
            vec!["date".into(), "pincode".into()],
            (0..12)
                .map(|d| vec![format!("{:02}-01-2023", d + 1), "110001".to_string()])
                .collect(),
        );
        let table = normalize(&raw, &EngineConfig::default());
        let flagged = detect_anomalies(&table, AnomalyStrategy::Isolation, &EngineConfig::default());
        assert!(flagged.is_empty());
    }
}
