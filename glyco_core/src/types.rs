//! Core domain types for the glucose forecast engine.
//!
//! This module defines:
//! - The immutable input snapshot (doses, carbs, basal history, readings)
//! - Per-run parameters
//! - The per-step result rows, summary and warning codes

use crate::config::ModelTuning;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ============================================================================
// Curve Kinds
// ============================================================================

/// Shape of the delivery profile of an extended bolus
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WaveShape {
    #[default]
    Uniform,
    Triangular,
}

/// Insulin action profile of a dose
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CurveKind {
    /// Generic rapid-acting: linear rise to peak, linear fall to zero at DIA
    LinearBilinear,
    /// Ultra-rapid exponential profile
    PeakedExponential,
    /// Long-acting basal: near-constant with a short taper at each end
    FlatBasal,
    /// Delivery smeared over `duration_min`
    ExtendedWave {
        #[serde(default)]
        shape: WaveShape,
    },
}

// ============================================================================
// Snapshot Entries
// ============================================================================

/// A bolus that is still (or will become) active
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ActiveBolus {
    pub dose_units: f64,
    /// Minutes relative to `start_time`; negative for past doses
    pub start_offset_min: f64,
    /// Delivery duration, only non-zero for extended waves
    #[serde(default)]
    pub duration_min: f64,
    pub curve_kind: CurveKind,
}

impl ActiveBolus {
    /// A rapid bolus with the generic bilinear profile
    pub fn rapid(dose_units: f64, start_offset_min: f64) -> Self {
        Self {
            dose_units,
            start_offset_min,
            duration_min: 0.0,
            curve_kind: CurveKind::LinearBilinear,
        }
    }

    /// Split a dual-wave bolus into its immediate and extended parts
    ///
    /// `immediate_fraction` is clamped to [0, 1]. Parts with no insulin are
    /// left out.
    pub fn dual_wave(
        total_units: f64,
        immediate_fraction: f64,
        start_offset_min: f64,
        duration_min: f64,
        shape: WaveShape,
    ) -> Vec<ActiveBolus> {
        let fraction = immediate_fraction.clamp(0.0, 1.0);
        let immediate = total_units * fraction;
        let extended = total_units - immediate;

        let mut parts = Vec::with_capacity(2);
        if immediate > 0.0 {
            parts.push(ActiveBolus::rapid(immediate, start_offset_min));
        }
        if extended > 0.0 {
            parts.push(ActiveBolus {
                dose_units: extended,
                start_offset_min,
                duration_min,
                curve_kind: CurveKind::ExtendedWave { shape },
            });
        }
        parts
    }
}

/// Nominal absorption speed of a meal
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CarbProfile {
    Fast,
    #[default]
    Medium,
    Slow,
    Custom {
        absorption_min: f64,
    },
}

/// A carbohydrate entry that is still being absorbed
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ActiveCarb {
    pub grams: f64,
    pub start_offset_min: f64,
    #[serde(default)]
    pub fat_g: f64,
    #[serde(default)]
    pub protein_g: f64,
    #[serde(default)]
    pub fiber_g: f64,
    #[serde(default)]
    pub carb_profile: CarbProfile,
}

impl ActiveCarb {
    /// Plain carbohydrate entry with no macro information
    pub fn simple(grams: f64, start_offset_min: f64, carb_profile: CarbProfile) -> Self {
        Self {
            grams,
            start_offset_min,
            fat_g: 0.0,
            protein_g: 0.0,
            fiber_g: 0.0,
            carb_profile,
        }
    }
}

/// A long-acting dose from the basal history
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BasalDose {
    pub units: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_basal_curve")]
    pub curve_kind: CurveKind,
}

fn default_basal_curve() -> CurveKind {
    CurveKind::FlatBasal
}

/// Basal history and the configured daily requirement
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct BasalContext {
    #[serde(default)]
    pub recent_basal_doses: Vec<BasalDose>,
    #[serde(default)]
    pub configured_daily_units: f64,
}

/// A real glucose reading, `offset_min_from_now <= 0`
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct BgReading {
    pub offset_min_from_now: f64,
    pub bg: f64,
}

/// Per-run parameters
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SimulationParams {
    pub isf: f64,
    pub icr: f64,
    pub target_bg: f64,
    pub dia_minutes: f64,
    pub insulin_peak_minutes: f64,
    /// Ratio computed upstream; `None` lets the adjuster derive one
    #[serde(default)]
    pub autosens_ratio: Option<f64>,
    pub momentum_window_min: f64,
    pub horizon_min: u32,
    pub step_min: u32,
    #[serde(default)]
    pub tuning: ModelTuning,
}

/// Immutable physiological state a forecast is computed from
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SimulationSnapshot {
    pub start_bg: f64,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub active_boluses: Vec<ActiveBolus>,
    #[serde(default)]
    pub active_carbs: Vec<ActiveCarb>,
    #[serde(default)]
    pub basal_context: BasalContext,
    /// Sorted ascending by time
    #[serde(default)]
    pub recent_bg_series: Vec<BgReading>,
    /// Observed minus expected BG change per 5 minutes, for autosens
    #[serde(default)]
    pub sensitivity_deviations: Vec<f64>,
    pub params: SimulationParams,
}

impl SimulationSnapshot {
    /// Preview a bolus given now, leaving `self` untouched
    pub fn with_hypothetical_bolus(&self, dose_units: f64, curve_kind: CurveKind) -> Self {
        let mut preview = self.clone();
        preview.active_boluses.push(ActiveBolus {
            dose_units,
            start_offset_min: 0.0,
            duration_min: 0.0,
            curve_kind,
        });
        preview
    }

    /// Preview carbs eaten now, leaving `self` untouched
    pub fn with_hypothetical_carbs(&self, grams: f64, carb_profile: CarbProfile) -> Self {
        let mut preview = self.clone();
        preview
            .active_carbs
            .push(ActiveCarb::simple(grams, 0.0, carb_profile));
        preview
    }

    /// Number of rows the forecast series will contain
    pub fn step_count(&self) -> usize {
        (self.params.horizon_min / self.params.step_min.max(1)) as usize + 1
    }
}

// ============================================================================
// Output Types
// ============================================================================

/// Non-fatal advisory attached to a forecast
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Warning {
    NoBasalHistory,
    BasalDeficit,
    MomentumUnavailable,
    StaleGlucoseData,
    AutosensInsufficientData,
    AutosensClamped,
    SafetyGateApplied,
    ClampedToRange,
    ExtrapolatedBeyondDia,
    PredictedLow,
}

impl Warning {
    /// Stable snake_case code for display
    pub fn code(&self) -> &'static str {
        match self {
            Warning::NoBasalHistory => "no_basal_history",
            Warning::BasalDeficit => "basal_deficit",
            Warning::MomentumUnavailable => "momentum_unavailable",
            Warning::StaleGlucoseData => "stale_glucose_data",
            Warning::AutosensInsufficientData => "autosens_insufficient_data",
            Warning::AutosensClamped => "autosens_clamped",
            Warning::SafetyGateApplied => "safety_gate_applied",
            Warning::ClampedToRange => "clamped_to_range",
            Warning::ExtrapolatedBeyondDia => "extrapolated_beyond_dia",
            Warning::PredictedLow => "predicted_low",
        }
    }
}

/// Where the autosens ratio of a run came from
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AutosensSource {
    Disabled,
    InsufficientData,
    Computed,
}

/// Resolved sensitivity ratio for one run
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct AutosensResult {
    pub ratio: f64,
    pub source: AutosensSource,
    /// True when the raw ratio fell outside the configured band
    pub clamped: bool,
}

/// How the basal drift resolver classified the basal history
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BasalState {
    /// Recent dose: the current basal is assumed correct
    Intentional,
    /// No recent dose, or a recent one that is no longer active
    Unconfirmed,
    /// Nothing to reason from; basal impact forced to zero
    NoHistory,
}

/// One row of the forecast series
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SimulationStepResult {
    pub offset_min: u32,
    /// BG with undamped insulin
    pub provisional_bg: f64,
    /// BG after the safety gate and range clamp; feeds the next step
    pub final_bg: f64,
    /// Insulin term actually applied (damped when `gated`)
    pub insulin_impact: f64,
    pub carb_impact: f64,
    pub basal_impact: f64,
    pub momentum_impact: f64,
    pub gated: bool,
}

/// Summary statistics derived from the series
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ForecastSummary {
    pub min_bg: f64,
    pub max_bg: f64,
    pub ending_bg: f64,
    /// Offset of the first step reaching `min_bg`
    pub time_to_min: u32,
    pub ending_vs_target: f64,
}

/// Complete result of one `simulate` call
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ForecastOutput {
    pub series: Vec<SimulationStepResult>,
    pub summary: ForecastSummary,
    pub warnings: BTreeSet<Warning>,
    pub autosens: AutosensResult,
    pub basal_state: BasalState,
}

impl ForecastOutput {
    /// Number of steps where the safety gate damped insulin
    pub fn gated_steps(&self) -> usize {
        self.series.iter().filter(|s| s.gated).count()
    }
}
