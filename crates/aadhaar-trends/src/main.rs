mod bootstrap;

use anyhow::{Context, Result};
use trends_core::settings::{EngineConfig, Settings};
use trends_data::analysis::AnalyticsEngine;
use trends_data::anomaly::AnomalyStrategy;
use trends_data::forecast::ForecastStep;
use trends_data::reader::load_dataset;

fn main() -> Result<()> {
    let settings = Settings::load();

    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_deref())?;

    tracing::info!("Aadhaar trends v{} starting", env!("CARGO_PKG_VERSION"));

    let config_path = bootstrap::resolve_config_path(settings.config.as_deref());
    let mut config = EngineConfig::load_from(&config_path)?;
    if let Some(seed) = settings.seed {
        config.seed = seed;
    }

    let strategy: AnomalyStrategy = settings.strategy.parse().map_err(anyhow::Error::msg)?;
    let step: ForecastStep = settings.step.parse().map_err(anyhow::Error::msg)?;

    let dataset = load_dataset(&settings.data_root, &config)
        .with_context(|| format!("loading data from {}", settings.data_root.display()))?;
    tracing::info!(
        "Loaded {} categories: {}",
        dataset.len(),
        dataset.categories().collect::<Vec<_>>().join(", ")
    );

    let engine = AnalyticsEngine::new(config);
    tracing::info!("Running {} view...", settings.view);

    let output = match settings.view.as_str() {
        "trends" => match step {
            ForecastStep::Daily => serde_json::to_value(engine.trends(&dataset))?,
            ForecastStep::Monthly => serde_json::to_value(engine.monthly_trends(&dataset))?,
        },
        "anomalies" => serde_json::to_value(engine.anomalies(&dataset, strategy))?,
        "predictions" => serde_json::to_value(engine.predictions(
            &dataset,
            settings.horizon_days,
            step,
        ))?,
        "map-data" => serde_json::to_value(engine.map_data(&dataset, &settings.category))?,
        "age-groups" => serde_json::to_value(engine.age_groups(&dataset))?,
        "rankings" => serde_json::to_value(engine.state_rankings(&dataset))?,
        _ => serde_json::to_value(engine.build_views(
            &dataset,
            &settings.category,
            strategy,
            settings.horizon_days,
            step,
        ))?,
    };

    let rendered = if settings.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{rendered}");

    Ok(())
}
