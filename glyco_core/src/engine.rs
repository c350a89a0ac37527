//! Simulation stepper.
//!
//! `simulate` is a pure function of its snapshot:
//! 1. **Initialize**: validate every invariant, then resolve the run-wide
//!    terms (curves, basal reference, momentum slope, autosens ratio).
//! 2. **Step**: for each step, sum insulin, carb, basal and momentum into a
//!    provisional BG, run the safety gate, then compute the final BG from the
//!    possibly damped insulin term. Only the final value feeds the next step.
//! 3. **Complete**: derive the summary and collect warnings.
//!
//! Any NaN/Inf aborts the run; a truncated series is never returned.

use crate::absorption::AbsorptionCurve;
use crate::basal::BasalDrift;
use crate::curves::{ActivityCurve, InsulinTiming};
use crate::momentum::Momentum;
use crate::safety::SafetyGate;
use crate::{
    autosens, AutosensResult, CurveKind, Error, ForecastOutput, ForecastSummary, Result,
    SimulationSnapshot, SimulationStepResult, Warning,
};
use std::collections::BTreeSet;

/// Upper bound on series length; larger horizon/step ratios are rejected
pub const MAX_STEPS: u32 = 2_880;

/// Project BG forward from `snapshot`
pub fn simulate(snapshot: &SimulationSnapshot) -> Result<ForecastOutput> {
    let mut stepper = Stepper::new(snapshot)?;
    while stepper.step()? {}
    Ok(stepper.finish())
}

/// Check every snapshot invariant without running anything
pub fn validate(snapshot: &SimulationSnapshot) -> Result<()> {
    let p = &snapshot.params;

    if !(snapshot.start_bg.is_finite() && snapshot.start_bg > 0.0) {
        return Err(Error::invalid(format!(
            "start_bg must be positive, got {}",
            snapshot.start_bg
        )));
    }
    for (name, value) in [
        ("isf", p.isf),
        ("icr", p.icr),
        ("dia_minutes", p.dia_minutes),
        ("insulin_peak_minutes", p.insulin_peak_minutes),
        ("target_bg", p.target_bg),
    ] {
        if !(value.is_finite() && value > 0.0) {
            return Err(Error::invalid(format!("{} must be positive, got {}", name, value)));
        }
    }
    if p.insulin_peak_minutes >= p.dia_minutes {
        return Err(Error::invalid(format!(
            "insulin_peak_minutes ({}) must be below dia_minutes ({})",
            p.insulin_peak_minutes, p.dia_minutes
        )));
    }
    if p.step_min == 0 || p.horizon_min == 0 {
        return Err(Error::invalid("step_min and horizon_min must be positive"));
    }
    if p.horizon_min % p.step_min != 0 {
        return Err(Error::invalid(format!(
            "step_min ({}) must divide horizon_min ({})",
            p.step_min, p.horizon_min
        )));
    }
    if p.horizon_min / p.step_min > MAX_STEPS {
        return Err(Error::invalid(format!(
            "{} steps requested, at most {} allowed",
            p.horizon_min / p.step_min,
            MAX_STEPS
        )));
    }
    if !(p.momentum_window_min.is_finite() && p.momentum_window_min >= 0.0) {
        return Err(Error::invalid("momentum_window_min must be non-negative"));
    }
    if let Some(ratio) = p.autosens_ratio {
        if !(ratio.is_finite() && ratio > 0.0) {
            return Err(Error::invalid(format!(
                "autosens_ratio must be positive, got {}",
                ratio
            )));
        }
    }
    p.tuning.validate()?;

    for (i, bolus) in snapshot.active_boluses.iter().enumerate() {
        if !(bolus.dose_units.is_finite() && bolus.dose_units >= 0.0) {
            return Err(Error::invalid(format!(
                "bolus {} has invalid dose {}",
                i, bolus.dose_units
            )));
        }
        if !bolus.start_offset_min.is_finite() {
            return Err(Error::invalid(format!("bolus {} has a non-finite offset", i)));
        }
        let extended = matches!(bolus.curve_kind, CurveKind::ExtendedWave { .. });
        if !extended && bolus.duration_min != 0.0 {
            return Err(Error::invalid(format!(
                "bolus {} has duration {} but is not an extended wave",
                i, bolus.duration_min
            )));
        }
    }
    for (i, carb) in snapshot.active_carbs.iter().enumerate() {
        if !(carb.grams.is_finite() && carb.start_offset_min.is_finite()) {
            return Err(Error::invalid(format!(
                "carb entry {} has non-finite grams or offset",
                i
            )));
        }
    }
    for (i, dose) in snapshot.basal_context.recent_basal_doses.iter().enumerate() {
        if !dose.units.is_finite() {
            return Err(Error::invalid(format!("basal dose {} has non-finite units", i)));
        }
    }
    for reading in &snapshot.recent_bg_series {
        if reading.offset_min_from_now > 0.0 {
            return Err(Error::invalid(format!(
                "glucose reading at +{} min is in the future",
                reading.offset_min_from_now
            )));
        }
    }
    Ok(())
}

/// A dose placed on the run's time axis
struct PlacedBolus {
    dose: f64,
    offset_min: f64,
    curve: ActivityCurve,
}

struct PlacedCarb {
    offset_min: f64,
    curve: AbsorptionCurve,
}

/// One run of the time loop; consumed by `finish`
struct Stepper<'a> {
    snapshot: &'a SimulationSnapshot,
    boluses: Vec<PlacedBolus>,
    carbs: Vec<PlacedCarb>,
    basal: BasalDrift,
    momentum: Momentum,
    gate: SafetyGate,
    autosens: AutosensResult,
    /// Effective ISF after autosens (mg/dL per U)
    isf: f64,
    /// mg/dL per gram of carbohydrate
    carb_sensitivity: f64,
    floor: f64,
    ceiling: f64,
    step_min: u32,
    total_steps: u32,
    series: Vec<SimulationStepResult>,
    warnings: BTreeSet<Warning>,
}

impl<'a> Stepper<'a> {
    fn new(snapshot: &'a SimulationSnapshot) -> Result<Self> {
        validate(snapshot)?;

        let p = &snapshot.params;
        let tuning = &p.tuning;
        let timing = InsulinTiming {
            dia_minutes: p.dia_minutes,
            peak_minutes: p.insulin_peak_minutes,
        };

        let mut boluses = Vec::with_capacity(snapshot.active_boluses.len());
        for bolus in &snapshot.active_boluses {
            boluses.push(PlacedBolus {
                dose: bolus.dose_units,
                offset_min: bolus.start_offset_min,
                curve: ActivityCurve::for_kind(
                    bolus.curve_kind,
                    timing,
                    &tuning.basal,
                    bolus.duration_min,
                )?,
            });
        }

        let carbs = snapshot
            .active_carbs
            .iter()
            .map(|carb| PlacedCarb {
                offset_min: carb.start_offset_min,
                curve: AbsorptionCurve::for_entry(carb, &tuning.carbs),
            })
            .collect();

        let mut warnings = BTreeSet::new();

        let basal = BasalDrift::resolve(
            &snapshot.basal_context,
            snapshot.start_time,
            timing,
            &tuning.basal,
        )?;
        warnings.extend(basal.warnings().iter().copied());

        let momentum = Momentum::from_readings(
            &snapshot.recent_bg_series,
            p.momentum_window_min,
            p.step_min as f64,
            &tuning.momentum,
        );
        warnings.extend(momentum.warnings().iter().copied());

        let (autosens, autosens_warnings) = autosens::resolve(
            &tuning.autosens,
            p.autosens_ratio,
            &snapshot.sensitivity_deviations,
            p.isf,
            snapshot.basal_context.configured_daily_units,
        );
        warnings.extend(autosens_warnings);

        let isf = p.isf / autosens.ratio;
        let icr = p.icr / autosens.ratio;

        if p.horizon_min as f64 > p.dia_minutes {
            warnings.insert(Warning::ExtrapolatedBeyondDia);
        }

        tracing::info!(
            "Simulating {} min in {} min steps from {:.0} mg/dL ({} boluses, {} carb entries, basal {:?})",
            p.horizon_min,
            p.step_min,
            snapshot.start_bg,
            snapshot.active_boluses.len(),
            snapshot.active_carbs.len(),
            basal.state()
        );

        let total_steps = p.horizon_min / p.step_min;
        let mut series = Vec::with_capacity(total_steps as usize + 1);
        series.push(SimulationStepResult {
            offset_min: 0,
            provisional_bg: snapshot.start_bg,
            final_bg: snapshot.start_bg,
            insulin_impact: 0.0,
            carb_impact: 0.0,
            basal_impact: 0.0,
            momentum_impact: 0.0,
            gated: false,
        });

        Ok(Self {
            snapshot,
            boluses,
            carbs,
            basal,
            momentum,
            gate: SafetyGate::new(&tuning.safety, p.step_min as f64),
            autosens,
            isf,
            carb_sensitivity: isf / icr,
            // A real reading outside the band widens it rather than being rewritten
            floor: tuning.range.floor.min(snapshot.start_bg),
            ceiling: tuning.range.ceiling.max(snapshot.start_bg),
            step_min: p.step_min,
            total_steps,
            series,
            warnings,
        })
    }

    /// Advance one step; returns false once the horizon is reached
    fn step(&mut self) -> Result<bool> {
        let index = self.series.len() as u32;
        if index > self.total_steps {
            return Ok(false);
        }

        let offset_min = index * self.step_min;
        let step = self.step_min as f64;
        let end = offset_min as f64;
        let mid = end - step / 2.0;

        let insulin_rate: f64 = self
            .boluses
            .iter()
            .map(|b| b.curve.activity_at(b.dose, mid - b.offset_min))
            .sum();
        let carb_rate: f64 = self
            .carbs
            .iter()
            .map(|c| c.curve.rate_at(mid - c.offset_min))
            .sum();

        let insulin_impact = -insulin_rate * self.isf * step;
        let carb_impact = carb_rate * self.carb_sensitivity * step;
        let basal_impact = -self.basal.net_rate_at(mid) * self.isf * step;
        let momentum_impact = self.momentum.contribution_at(end);

        for (term, value) in [
            ("insulin", insulin_impact),
            ("carb", carb_impact),
            ("basal", basal_impact),
            ("momentum", momentum_impact),
        ] {
            ensure_finite(offset_min, term, value)?;
        }

        let previous_final = self
            .series
            .last()
            .map(|s| s.final_bg)
            .unwrap_or(self.snapshot.start_bg);
        let others = carb_impact + basal_impact + momentum_impact;

        let provisional_bg = previous_final + insulin_impact + others;
        ensure_finite(offset_min, "provisional BG", provisional_bg)?;

        let decision = self.gate.evaluate(end, provisional_bg, previous_final);
        let (applied_insulin, gated_bg) = if decision.gated {
            let damped = insulin_impact * decision.insulin_scale;
            (damped, previous_final + damped + others)
        } else {
            (insulin_impact, provisional_bg)
        };
        ensure_finite(offset_min, "final BG", gated_bg)?;

        // Both reported values share the range; the gate saw the raw provisional
        let final_bg = gated_bg.clamp(self.floor, self.ceiling);
        let reported_provisional = provisional_bg.clamp(self.floor, self.ceiling);
        if final_bg != gated_bg || reported_provisional != provisional_bg {
            self.warnings.insert(Warning::ClampedToRange);
        }
        if decision.gated {
            self.warnings.insert(Warning::SafetyGateApplied);
        }

        tracing::trace!(
            "+{:>4} min: provisional {:.1} final {:.1} (ins {:.2} carb {:.2} basal {:.2} mom {:.2})",
            offset_min,
            provisional_bg,
            final_bg,
            applied_insulin,
            carb_impact,
            basal_impact,
            momentum_impact
        );

        self.series.push(SimulationStepResult {
            offset_min,
            provisional_bg: reported_provisional,
            final_bg,
            insulin_impact: applied_insulin,
            carb_impact,
            basal_impact,
            momentum_impact,
            gated: decision.gated,
        });
        Ok(true)
    }

    fn finish(mut self) -> ForecastOutput {
        let p = &self.snapshot.params;

        let mut min_bg = f64::INFINITY;
        let mut max_bg = f64::NEG_INFINITY;
        let mut time_to_min = 0;
        for row in &self.series {
            if row.final_bg < min_bg {
                min_bg = row.final_bg;
                time_to_min = row.offset_min;
            }
            max_bg = max_bg.max(row.final_bg);
        }
        let ending_bg = self
            .series
            .last()
            .map(|s| s.final_bg)
            .unwrap_or(self.snapshot.start_bg);

        if min_bg < p.tuning.safety.low_bg_threshold {
            self.warnings.insert(Warning::PredictedLow);
        }

        let summary = ForecastSummary {
            min_bg,
            max_bg,
            ending_bg,
            time_to_min,
            ending_vs_target: ending_bg - p.target_bg,
        };

        tracing::info!(
            "Forecast complete: min {:.0} at +{} min, ending {:.0}, {} warnings",
            summary.min_bg,
            summary.time_to_min,
            summary.ending_bg,
            self.warnings.len()
        );

        ForecastOutput {
            series: self.series,
            summary,
            warnings: self.warnings,
            autosens: self.autosens,
            basal_state: self.basal.state(),
        }
    }
}

fn ensure_finite(offset_min: u32, term: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        tracing::warn!("Non-finite {} term at +{} min, aborting run", term, offset_min);
        Err(Error::NumericalFailure {
            offset_min,
            detail: format!("{} evaluated to {}", term, value),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ActiveBolus, ActiveCarb, AutosensSource, BasalContext, BasalDose, BasalState, BgReading,
        CarbProfile, SimulationParams,
    };
    use chrono::{Duration, TimeZone, Utc};

    fn base_snapshot() -> SimulationSnapshot {
        SimulationSnapshot {
            start_bg: 120.0,
            start_time: Utc.with_ymd_and_hms(2024, 5, 10, 8, 0, 0).unwrap(),
            active_boluses: vec![],
            active_carbs: vec![],
            basal_context: BasalContext::default(),
            recent_bg_series: vec![
                BgReading {
                    offset_min_from_now: -10.0,
                    bg: 120.0,
                },
                BgReading {
                    offset_min_from_now: -5.0,
                    bg: 120.0,
                },
                BgReading {
                    offset_min_from_now: 0.0,
                    bg: 120.0,
                },
            ],
            sensitivity_deviations: vec![],
            params: SimulationParams {
                isf: 50.0,
                icr: 10.0,
                target_bg: 110.0,
                dia_minutes: 240.0,
                insulin_peak_minutes: 75.0,
                autosens_ratio: None,
                momentum_window_min: 30.0,
                horizon_min: 180,
                step_min: 5,
                tuning: Default::default(),
            },
        }
    }

    #[test]
    fn test_series_shape() {
        crate::logging::init_test();
        let output = simulate(&base_snapshot()).unwrap();
        assert_eq!(output.series.len(), 37);
        assert_eq!(output.series[0].offset_min, 0);
        assert_eq!(output.series[36].offset_min, 180);
        assert_eq!(output.series[0].final_bg, 120.0);
        for pair in output.series.windows(2) {
            assert_eq!(pair[1].offset_min - pair[0].offset_min, 5);
        }
    }

    #[test]
    fn test_empty_snapshot_is_flat() {
        let output = simulate(&base_snapshot()).unwrap();
        for row in &output.series {
            assert_eq!(row.final_bg, 120.0);
        }
        assert!(output.warnings.contains(&Warning::NoBasalHistory));
        assert!(!output.warnings.contains(&Warning::MomentumUnavailable));
        assert_eq!(output.summary.ending_vs_target, 10.0);
    }

    #[test]
    fn test_bolus_lowers_and_carbs_raise() {
        let mut insulin = base_snapshot();
        insulin.active_boluses.push(ActiveBolus::rapid(2.0, 0.0));
        let output = simulate(&insulin).unwrap();
        // 2 U at ISF 50 is worth 100 mg/dL; ~91% of it acts within 3 hours
        assert!(output.summary.ending_bg < 60.0);
        assert!(output.series.windows(2).all(|w| w[1].final_bg <= w[0].final_bg));

        let mut carbs = base_snapshot();
        carbs
            .active_carbs
            .push(ActiveCarb::simple(30.0, 0.0, CarbProfile::Fast));
        let output = simulate(&carbs).unwrap();
        // 30 g at 5 mg/dL per gram, absorbed within the horizon
        assert!((output.summary.ending_bg - 270.0).abs() < 1.0);
        assert_eq!(output.summary.min_bg, 120.0);
        assert_eq!(output.summary.time_to_min, 0);
    }

    #[test]
    fn test_carbs_and_insulin_cancel() {
        // 1 U covers 10 g: both absorbed in full before the horizon ends
        let mut snapshot = base_snapshot();
        snapshot.params.horizon_min = 300;
        snapshot.active_boluses.push(ActiveBolus::rapid(1.0, 0.0));
        snapshot
            .active_carbs
            .push(ActiveCarb::simple(10.0, 0.0, CarbProfile::Medium));
        let output = simulate(&snapshot).unwrap();
        assert!((output.summary.ending_bg - 120.0).abs() < 1e-6);
    }

    #[test]
    fn test_autosens_scales_insulin() {
        let mut snapshot = base_snapshot();
        snapshot.active_boluses.push(ActiveBolus::rapid(1.0, -60.0));

        let neutral = simulate(&snapshot).unwrap();
        assert_eq!(neutral.autosens.source, AutosensSource::InsufficientData);

        snapshot.params.autosens_ratio = Some(1.2);
        let resistant = simulate(&snapshot).unwrap();
        assert_eq!(resistant.autosens.source, AutosensSource::Computed);
        assert!(resistant.summary.ending_bg > neutral.summary.ending_bg);

        let ratio = neutral.series[1].insulin_impact / resistant.series[1].insulin_impact;
        assert!((ratio - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_momentum_applies_only_inside_window() {
        let mut snapshot = base_snapshot();
        snapshot.recent_bg_series = vec![
            BgReading {
                offset_min_from_now: -10.0,
                bg: 110.0,
            },
            BgReading {
                offset_min_from_now: -5.0,
                bg: 115.0,
            },
            BgReading {
                offset_min_from_now: 0.0,
                bg: 120.0,
            },
        ];
        let output = simulate(&snapshot).unwrap();
        assert_eq!(output.series[0].momentum_impact, 0.0);
        assert!((output.series[1].momentum_impact - 5.0).abs() < 1e-9);
        for row in output.series.iter().filter(|r| r.offset_min >= 30) {
            assert_eq!(row.momentum_impact, 0.0);
        }
        assert!(output.summary.ending_bg > 120.0);
    }

    #[test]
    fn test_range_clamp() {
        let mut snapshot = base_snapshot();
        snapshot.active_boluses.push(ActiveBolus::rapid(10.0, -60.0));
        snapshot.params.tuning.safety.damping_factor = 1.0;
        let output = simulate(&snapshot).unwrap();
        assert_eq!(output.summary.min_bg, 39.0);
        assert!(output.warnings.contains(&Warning::ClampedToRange));
        for row in &output.series {
            assert!(row.provisional_bg >= 39.0);
            assert_eq!(row.final_bg, row.provisional_bg);
        }
        assert!(output.warnings.contains(&Warning::PredictedLow));
    }

    #[test]
    fn test_extrapolation_warning() {
        let mut snapshot = base_snapshot();
        snapshot.params.horizon_min = 360;
        let output = simulate(&snapshot).unwrap();
        assert!(output.warnings.contains(&Warning::ExtrapolatedBeyondDia));

        let output = simulate(&base_snapshot()).unwrap();
        assert!(!output.warnings.contains(&Warning::ExtrapolatedBeyondDia));
    }

    #[test]
    fn test_intentional_basal_is_neutral() {
        let mut snapshot = base_snapshot();
        snapshot.basal_context = BasalContext {
            recent_basal_doses: vec![BasalDose {
                units: 15.0,
                timestamp: snapshot.start_time - Duration::hours(8),
                curve_kind: CurveKind::FlatBasal,
            }],
            configured_daily_units: 15.0,
        };
        let output = simulate(&snapshot).unwrap();
        assert_eq!(output.basal_state, BasalState::Intentional);
        assert!(output.series.iter().all(|r| r.basal_impact == 0.0));
        assert_eq!(output.summary.ending_bg, 120.0);
    }

    #[test]
    fn test_invalid_snapshots_rejected() {
        let mut s = base_snapshot();
        s.params.isf = 0.0;
        assert!(matches!(simulate(&s), Err(Error::InvalidSnapshot(_))));

        let mut s = base_snapshot();
        s.params.step_min = 7;
        assert!(matches!(simulate(&s), Err(Error::InvalidSnapshot(_))));

        let mut s = base_snapshot();
        s.start_bg = -5.0;
        assert!(matches!(simulate(&s), Err(Error::InvalidSnapshot(_))));

        let mut s = base_snapshot();
        s.recent_bg_series.push(BgReading {
            offset_min_from_now: 5.0,
            bg: 130.0,
        });
        assert!(matches!(simulate(&s), Err(Error::InvalidSnapshot(_))));

        let mut s = base_snapshot();
        s.active_boluses.push(ActiveBolus {
            dose_units: 1.0,
            start_offset_min: 0.0,
            duration_min: 60.0,
            curve_kind: CurveKind::LinearBilinear,
        });
        assert!(matches!(simulate(&s), Err(Error::InvalidSnapshot(_))));

        let mut s = base_snapshot();
        s.params.horizon_min = 5 * (MAX_STEPS + 1);
        assert!(matches!(simulate(&s), Err(Error::InvalidSnapshot(_))));

        let mut s = base_snapshot();
        s.active_boluses.push(ActiveBolus {
            dose_units: 1.0,
            start_offset_min: 0.0,
            duration_min: 0.0,
            curve_kind: CurveKind::ExtendedWave {
                shape: crate::WaveShape::Uniform,
            },
        });
        assert!(matches!(simulate(&s), Err(Error::InvalidSnapshot(_))));
    }

    #[test]
    fn test_numerical_failure_aborts() {
        let mut s = base_snapshot();
        s.params.isf = 1e10;
        s.active_boluses.push(ActiveBolus::rapid(1e308, -60.0));
        match simulate(&s) {
            Err(Error::NumericalFailure { offset_min, .. }) => assert_eq!(offset_min, 5),
            other => panic!("expected numerical failure, got {:?}", other.map(|o| o.summary)),
        }
    }
}
