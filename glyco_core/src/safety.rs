//! Anti-panic safety gate.
//!
//! Low starting BG plus an insulin tail plus a falling trend can produce a
//! forecast that plunges faster than physiology allows. Inside the early
//! window the gate inspects each provisional value against the previous
//! final value and damps the insulin term (never carbs or momentum) when
//! the drop is steep and the provisional value is already low.

use crate::config::SafetyGateConfig;

/// Outcome of inspecting one step
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GateDecision {
    pub gated: bool,
    /// Multiplier for this step's insulin impact
    pub insulin_scale: f64,
}

impl GateDecision {
    const PASS: GateDecision = GateDecision {
        gated: false,
        insulin_scale: 1.0,
    };
}

#[derive(Clone, Debug)]
pub struct SafetyGate {
    config: SafetyGateConfig,
    step_min: f64,
}

impl SafetyGate {
    pub fn new(config: &SafetyGateConfig, step_min: f64) -> Self {
        Self {
            config: config.clone(),
            step_min,
        }
    }

    /// True when the gate can never fire
    pub fn is_disabled(&self) -> bool {
        self.config.damping_factor >= 1.0 || self.config.window_min <= 0.0
    }

    /// Decide whether the step ending at `offset_min` is damped
    ///
    /// `previous_final` must be the gated value of the prior step, never its
    /// provisional value.
    pub fn evaluate(&self, offset_min: f64, provisional_bg: f64, previous_final: f64) -> GateDecision {
        if self.is_disabled() || offset_min > self.config.window_min {
            return GateDecision::PASS;
        }

        let instant_slope = provisional_bg - previous_final;
        let is_low_risk = provisional_bg < self.config.low_bg_threshold;
        let steep = instant_slope / self.step_min < -self.config.steep_drop_per_min;

        if steep && is_low_risk {
            tracing::trace!(
                "Gate fired at +{} min: slope {:.1} mg/dL over step, provisional {:.1}",
                offset_min,
                instant_slope,
                provisional_bg
            );
            GateDecision {
                gated: true,
                insulin_scale: self.config.damping_factor,
            }
        } else {
            GateDecision::PASS
        }
    }
}
