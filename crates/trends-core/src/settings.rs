use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TrendsError};

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// State and date level trends, anomalies and forecasts for Aadhaar activity data
#[derive(Parser, Debug, Clone)]
#[command(
    name = "aadhaar-trends",
    about = "State and date level trends, anomalies and forecasts for Aadhaar activity data",
    version
)]
pub struct Settings {
    /// Root directory holding one sub-directory of CSV files per category
    #[arg(long, default_value = "aadhaar_data")]
    pub data_root: PathBuf,

    /// Which view to compute
    #[arg(long, default_value = "all", value_parser = ["all", "trends", "anomalies", "predictions", "map-data", "age-groups", "rankings"])]
    pub view: String,

    /// Category used by the map-data view
    #[arg(long, default_value = "enrolment")]
    pub category: String,

    /// Number of days to forecast
    #[arg(long, default_value = "30", value_parser = clap::value_parser!(u32).range(1..=3650))]
    pub horizon_days: u32,

    /// Forecast stepping
    #[arg(long, default_value = "daily", value_parser = ["daily", "monthly"])]
    pub step: String,

    /// Anomaly detection strategy
    #[arg(long, default_value = "zscore", value_parser = ["zscore", "isolation"])]
    pub strategy: String,

    /// Random seed for the isolation forest (overrides the config file)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Engine configuration file (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Logging level
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"])]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Settings {
    /// Parse CLI arguments and apply the `--debug` override.
    pub fn load() -> Self {
        Self::load_from_args(std::env::args_os())
    }

    /// Same as [`Settings::load`] but with an explicit argument list.
    pub fn load_from_args<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut settings = Settings::parse_from(args);
        if settings.debug {
            settings.log_level = "DEBUG".to_string();
        }
        settings
    }
}

// ── EngineConfig ───────────────────────────────────────────────────────────────

/// Tunables of the analytics engine.
///
/// Every field has a default, so a config file only needs to list what it
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Numeric columns that identify rather than count (never summed).
    pub identifier_columns: Vec<String>,
    /// Partial age-bracket columns summed into the canonical measure.
    pub partial_count_columns: Vec<String>,
    /// Generic count column copied into the canonical measure when no partial
    /// columns exist.
    pub count_column: String,
    /// Name of the derived canonical measure column.
    pub canonical_measure: String,
    /// Cell values (case-insensitive, trimmed) that read as missing.
    pub null_tokens: Vec<String>,
    /// Category the anomaly and forecast views run on.
    pub primary_category: String,
    /// |z| above which a state/date total is flagged.
    pub z_threshold: f64,
    /// Expected share of outliers for the isolation forest.
    pub contamination: f64,
    /// Seed for the isolation forest.
    pub seed: u64,
    /// Number of isolation trees.
    pub n_trees: usize,
    /// Subsample size per isolation tree.
    pub max_samples: usize,
    /// Minimum distinct dates before the isolation forest runs.
    pub min_anomaly_dates: usize,
    /// Minimum distinct dates before a forecast is produced.
    pub min_forecast_dates: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            identifier_columns: vec!["pincode".into(), "year".into(), "month".into()],
            partial_count_columns: vec!["bio_age_5_17".into(), "bio_age_17_".into()],
            count_column: "count".to_string(),
            canonical_measure: "enrolment_count".to_string(),
            null_tokens: ["", "na", "n/a", "nan", "null", "none", "-"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            primary_category: "enrolment".to_string(),
            z_threshold: 3.0,
            contamination: 0.05,
            seed: 42,
            n_trees: 100,
            max_samples: 256,
            min_anomaly_dates: 10,
            min_forecast_dates: 5,
        }
    }
}

impl EngineConfig {
    /// Default config location: `~/.aadhaar-trends/engine.json`.
    pub fn config_path() -> PathBuf {
        Self::config_path_in(&dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
    }

    /// Config path rooted at `base_dir`.
    pub fn config_path_in(base_dir: &Path) -> PathBuf {
        base_dir.join(".aadhaar-trends").join("engine.json")
    }

    /// Load a config file.
    ///
    /// A missing file yields the defaults; an unreadable, malformed or
    /// out-of-range file is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No engine config at {}; using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| TrendsError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| TrendsError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(TrendsError::Config(format!(
                "contamination must be in (0, 0.5], got {}",
                self.contamination
            )));
        }
        if !(self.z_threshold.is_finite() && self.z_threshold > 0.0) {
            return Err(TrendsError::Config(format!(
                "z_threshold must be positive, got {}",
                self.z_threshold
            )));
        }
        if self.n_trees == 0 || self.max_samples < 2 {
            return Err(TrendsError::Config(
                "n_trees must be >= 1 and max_samples >= 2".to_string(),
            ));
        }
        if self.canonical_measure.trim().is_empty() {
            return Err(TrendsError::Config(
                "canonical_measure must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_identifier(&self, column: &str) -> bool {
        self.identifier_columns.iter().any(|c| c == column)
    }

    pub fn is_null_token(&self, cell: &str) -> bool {
        let trimmed = cell.trim();
        self.null_tokens
            .iter()
            .any(|t| t.eq_ignore_ascii_case(trimmed))
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // ── Settings ─────────────────────────────────────────────────────────────

    #[test]
    fn test_settings_default_values() {
        let settings = Settings::load_from_args(["aadhaar-trends"]);

        assert_eq!(settings.data_root, PathBuf::from("aadhaar_data"));
        assert_eq!(settings.view, "all");
        assert_eq!(settings.category, "enrolment");
        assert_eq!(settings.horizon_days, 30);
        assert_eq!(settings.step, "daily");
        assert_eq!(settings.strategy, "zscore");
        assert!(settings.seed.is_none());
        assert!(settings.config.is_none());
        assert!(!settings.pretty);
        assert_eq!(settings.log_level, "INFO");
        assert!(settings.log_file.is_none());
    }

    #[test]
    fn test_settings_debug_overrides_log_level() {
        let settings = Settings::load_from_args(["aadhaar-trends", "--debug"]);
        assert_eq!(settings.log_level, "DEBUG");
    }

    #[test]
    fn test_settings_cli_explicit_values() {
        let settings = Settings::load_from_args([
            "aadhaar-trends",
            "--view",
            "map-data",
            "--category",
            "biometric",
            "--horizon-days",
            "90",
            "--step",
            "monthly",
            "--strategy",
            "isolation",
            "--seed",
            "7",
        ]);
        assert_eq!(settings.view, "map-data");
        assert_eq!(settings.category, "biometric");
        assert_eq!(settings.horizon_days, 90);
        assert_eq!(settings.step, "monthly");
        assert_eq!(settings.strategy, "isolation");
        assert_eq!(settings.seed, Some(7));
    }

    #[test]
    fn test_settings_rejects_unknown_view() {
        let result = Settings::try_parse_from(["aadhaar-trends", "--view", "heatmap"]);
        assert!(result.is_err());
    }

    // ── EngineConfig ─────────────────────────────────────────────────────────

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert!(config.is_identifier("pincode"));
        assert!(!config.is_identifier("bio_age_5_17"));
        assert_eq!(config.seed, 42);
        assert!((config.contamination - 0.05).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_null_tokens_case_insensitive() {
        let config = EngineConfig::default();
        assert!(config.is_null_token(" NaN "));
        assert!(config.is_null_token(""));
        assert!(config.is_null_token("N/A"));
        assert!(!config.is_null_token("0"));
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let tmp = TempDir::new().expect("tempdir");
        let path = EngineConfig::config_path_in(tmp.path());
        let config = EngineConfig::load_from(&path).expect("load");
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_load_partial_file_keeps_other_defaults() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("engine.json");
        std::fs::write(&path, r#"{"seed": 7, "identifier_columns": ["pin"]}"#).unwrap();

        let config = EngineConfig::load_from(&path).expect("load");
        assert_eq!(config.seed, 7);
        assert_eq!(config.identifier_columns, vec!["pin".to_string()]);
        assert_eq!(config.min_forecast_dates, 5);
    }

    #[test]
    fn test_load_malformed_file_is_config_error() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("engine.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = EngineConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, TrendsError::Config(_)));
    }

    #[test]
    fn test_load_out_of_range_contamination_rejected() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("engine.json");
        std::fs::write(&path, r#"{"contamination": 0.9}"#).unwrap();

        let err = EngineConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("contamination"));
    }
}
