//! Snapshot file loader.
//!
//! The state assembler writes the snapshot as JSON. Run-shape fields and the
//! tuning block may be omitted; they are filled from the configuration so
//! that the resulting snapshot is complete and self-describing.

use crate::config::{Config, ModelTuning};
use crate::{
    ActiveBolus, ActiveCarb, BasalContext, BgReading, Result, SimulationParams,
    SimulationSnapshot,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;

/// Parameter block as written by the assembler
#[derive(Debug, Deserialize)]
struct ParamsFile {
    isf: f64,
    icr: f64,
    target_bg: f64,
    dia_minutes: f64,
    insulin_peak_minutes: f64,
    #[serde(default)]
    autosens_ratio: Option<f64>,
    momentum_window_min: Option<f64>,
    horizon_min: Option<u32>,
    step_min: Option<u32>,
    tuning: Option<ModelTuning>,
}

/// Snapshot file format
#[derive(Debug, Deserialize)]
struct SnapshotFile {
    start_bg: f64,
    start_time: DateTime<Utc>,
    #[serde(default)]
    active_boluses: Vec<ActiveBolus>,
    #[serde(default)]
    active_carbs: Vec<ActiveCarb>,
    #[serde(default)]
    basal_context: BasalContext,
    #[serde(default)]
    recent_bg_series: Vec<BgReading>,
    #[serde(default)]
    sensitivity_deviations: Vec<f64>,
    params: ParamsFile,
}

impl SnapshotFile {
    fn into_snapshot(self, config: &Config) -> SimulationSnapshot {
        let p = self.params;
        let mut recent_bg_series = self.recent_bg_series;
        recent_bg_series.sort_by(|a, b| a.offset_min_from_now.total_cmp(&b.offset_min_from_now));

        SimulationSnapshot {
            start_bg: self.start_bg,
            start_time: self.start_time,
            active_boluses: self.active_boluses,
            active_carbs: self.active_carbs,
            basal_context: self.basal_context,
            recent_bg_series,
            sensitivity_deviations: self.sensitivity_deviations,
            params: SimulationParams {
                isf: p.isf,
                icr: p.icr,
                target_bg: p.target_bg,
                dia_minutes: p.dia_minutes,
                insulin_peak_minutes: p.insulin_peak_minutes,
                autosens_ratio: p.autosens_ratio,
                momentum_window_min: p
                    .momentum_window_min
                    .unwrap_or(config.forecast.momentum_window_min),
                horizon_min: p.horizon_min.unwrap_or(config.forecast.horizon_min),
                step_min: p.step_min.unwrap_or(config.forecast.step_min),
                tuning: p.tuning.unwrap_or_else(|| config.tuning.clone()),
            },
        }
    }
}

/// Parse a snapshot from JSON text
pub fn parse_snapshot(json: &str, config: &Config) -> Result<SimulationSnapshot> {
    let file: SnapshotFile = serde_json::from_str(json)?;
    Ok(file.into_snapshot(config))
}

/// Load a snapshot from a JSON file
///
/// Unlike optional side inputs, a missing or malformed snapshot is an error:
/// there is nothing to forecast from.
pub fn load_snapshot(path: &Path, config: &Config) -> Result<SimulationSnapshot> {
    let contents = std::fs::read_to_string(path)?;
    let snapshot = parse_snapshot(&contents, config)?;
    tracing::info!(
        "Loaded snapshot from {:?}: BG {} at {}",
        path,
        snapshot.start_bg,
        snapshot.start_time
    );
    Ok(snapshot)
}
