//! Basal drift resolver.
//!
//! Decides once per run whether the current long-acting insulin should be
//! trusted (`Intentional`) or compared against the last known dose
//! (`Unconfirmed`). A lower-than-usual dose inside the recency window is the
//! user's decision, not a deficit; only a missing or spent dose produces
//! drift.

use crate::config::BasalConfig;
use crate::curves::{ActivityCurve, InsulinTiming};
use crate::{BasalContext, BasalState, Result, Warning};
use chrono::{DateTime, Utc};

/// A basal dose placed on the run's time axis
#[derive(Clone, Debug)]
struct PlacedDose {
    units: f64,
    offset_min: f64,
    curve: ActivityCurve,
}

/// Fixed basal reference for one run
#[derive(Clone, Debug)]
pub struct BasalDrift {
    state: BasalState,
    /// U/min the current activity is compared against (Unconfirmed only)
    reference_rate: f64,
    doses: Vec<PlacedDose>,
    warnings: Vec<Warning>,
}

impl BasalDrift {
    /// Classify the basal history relative to `start_time`
    pub fn resolve(
        context: &BasalContext,
        start_time: DateTime<Utc>,
        timing: InsulinTiming,
        config: &BasalConfig,
    ) -> Result<Self> {
        let mut doses = Vec::with_capacity(context.recent_basal_doses.len());
        for dose in &context.recent_basal_doses {
            let offset_min = (dose.timestamp - start_time).num_seconds() as f64 / 60.0;
            doses.push(PlacedDose {
                units: dose.units.max(0.0),
                offset_min,
                curve: ActivityCurve::for_kind(dose.curve_kind, timing, config, 0.0)?,
            });
        }

        // Most recent dose already given, else the earliest scheduled one
        let last = doses
            .iter()
            .filter(|d| d.offset_min <= 0.0)
            .max_by(|a, b| a.offset_min.total_cmp(&b.offset_min))
            .or_else(|| doses.iter().min_by(|a, b| a.offset_min.total_cmp(&b.offset_min)));
        let Some(last) = last else {
            tracing::debug!("No basal history, basal impact forced to zero");
            return Ok(Self {
                state: BasalState::NoHistory,
                reference_rate: 0.0,
                doses: Vec::new(),
                warnings: vec![Warning::NoBasalHistory],
            });
        };

        let recent = -last.offset_min <= config.recency_window_min;
        let current_rate: f64 = doses.iter().map(|d| rate_of(d, 0.0)).sum();
        let floor = config.near_zero_floor_u_per_hour / 60.0;

        let state = if recent && current_rate >= floor {
            BasalState::Intentional
        } else {
            BasalState::Unconfirmed
        };

        let reference_rate = match state {
            BasalState::Intentional => current_rate,
            _ => reference_for(last, context.configured_daily_units),
        };

        if state == BasalState::Intentional {
            let configured_rate = context.configured_daily_units / 1440.0;
            tracing::debug!(
                "Basal intentional: active {:.3} U/h vs configured {:.3} U/h",
                current_rate * 60.0,
                configured_rate * 60.0
            );
        } else {
            tracing::debug!(
                "Basal unconfirmed: last dose {:.0} min ago, reference {:.3} U/h, active {:.3} U/h",
                -last.offset_min,
                reference_rate * 60.0,
                current_rate * 60.0
            );
        }

        let mut warnings = Vec::new();
        if state == BasalState::Unconfirmed && reference_rate > 0.0 {
            warnings.push(Warning::BasalDeficit);
        }

        Ok(Self {
            state,
            reference_rate,
            doses,
            warnings,
        })
    }

    pub fn state(&self) -> BasalState {
        self.state
    }

    pub fn reference_rate(&self) -> f64 {
        self.reference_rate
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Total basal activity (U/min) at `offset_min`
    pub fn active_rate_at(&self, offset_min: f64) -> f64 {
        self.doses.iter().map(|d| rate_of(d, offset_min)).sum()
    }

    /// Net basal insulin (U/min) at `offset_min`; negative means deficit
    pub fn net_rate_at(&self, offset_min: f64) -> f64 {
        match self.state {
            BasalState::Intentional | BasalState::NoHistory => 0.0,
            BasalState::Unconfirmed => self.active_rate_at(offset_min) - self.reference_rate,
        }
    }
}

fn rate_of(dose: &PlacedDose, offset_min: f64) -> f64 {
    dose.curve.activity_at(dose.units, offset_min - dose.offset_min)
}

/// Steady-state rate the last known dose was meant to provide
fn reference_for(last: &PlacedDose, configured_daily_units: f64) -> f64 {
    let units = if last.units > 0.0 {
        last.units
    } else {
        configured_daily_units.max(0.0)
    };
    match &last.curve {
        ActivityCurve::FlatBasal(curve) => curve.plateau_rate(units),
        other => units / other.window_minutes(),
    }
}
