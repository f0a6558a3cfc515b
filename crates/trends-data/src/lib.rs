//! Data layer for Aadhaar trends.
//!
//! Discovers and reads the category CSV files, normalises them into typed
//! tables, and runs the aggregation, anomaly detection and forecasting
//! behind the [`analysis::AnalyticsEngine`] facade.

pub mod aggregator;
pub mod analysis;
pub mod anomaly;
pub mod forecast;
pub mod isolation;
pub mod normalizer;
pub mod reader;

pub use trends_core as core;
