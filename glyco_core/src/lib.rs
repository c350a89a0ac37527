#![forbid(unsafe_code)]

//! Core model and simulation engine for glucose forecasting.
//!
//! This crate provides:
//! - Domain types (snapshot, per-step results, warnings)
//! - Insulin activity and carbohydrate absorption models
//! - Basal drift, momentum and sensitivity resolution
//! - The anti-panic safety gate and the simulation stepper
//! - Snapshot loading, forecast log and CSV export

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod curves;
pub mod absorption;
pub mod basal;
pub mod momentum;
pub mod autosens;
pub mod safety;
pub mod engine;
pub mod snapshot;
pub mod forecast_log;
pub mod csv_export;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use engine::simulate;
pub use snapshot::load_snapshot;
pub use forecast_log::{ForecastRecord, ForecastSink, JsonlForecastLog};
