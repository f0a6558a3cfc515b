//! Shared types for the Aadhaar trends workspace.
//!
//! Holds the table and dataset model, the result records produced by the
//! analytics engine, configuration, errors and the small statistics helpers
//! the engine is built on.

pub mod error;
pub mod models;
pub mod settings;
pub mod stats;
