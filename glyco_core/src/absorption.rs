//! Carbohydrate absorption model.
//!
//! A meal is absorbed along a trapezoid: linear rise, plateau, linear fall.
//! Fat, protein and fiber slow gastric emptying, which stretches the window
//! and pushes the peak later. The trapezoid height is always solved from the
//! carb mass, so the absorbed total never changes.

use crate::config::CarbConfig;
use crate::{ActiveCarb, CarbProfile};

/// Treat missing, NaN and negative inputs as zero
fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Resolved absorption shape of one carb entry (rates in g/min)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AbsorptionCurve {
    grams: f64,
    window: f64,
    rise: f64,
    fall: f64,
}

impl AbsorptionCurve {
    /// Resolve the trapezoid for `carb` under `config`
    pub fn for_entry(carb: &ActiveCarb, config: &CarbConfig) -> Self {
        let grams = non_negative(carb.grams);
        let base_window = match carb.carb_profile {
            CarbProfile::Fast => config.fast_absorption_min,
            CarbProfile::Medium => config.medium_absorption_min,
            CarbProfile::Slow => config.slow_absorption_min,
            CarbProfile::Custom { absorption_min } if absorption_min > 0.0 => absorption_min,
            CarbProfile::Custom { .. } => config.medium_absorption_min,
        };

        let load = macro_load(carb, grams, config);
        let window = base_window * (1.0 + config.max_window_extension * load);
        let fall_fraction = config.fall_fraction;
        let rise_fraction =
            (config.rise_fraction + config.max_peak_delay_fraction * load).min(1.0 - fall_fraction);

        Self {
            grams,
            window,
            rise: window * rise_fraction,
            fall: window * fall_fraction,
        }
    }

    /// Total absorption time
    pub fn window_minutes(&self) -> f64 {
        self.window
    }

    /// Height of the plateau
    pub fn peak_rate(&self) -> f64 {
        if self.grams == 0.0 {
            return 0.0;
        }
        self.grams / (self.window - (self.rise + self.fall) / 2.0)
    }

    /// Absorption rate (g/min) after `elapsed` minutes
    pub fn rate_at(&self, elapsed: f64) -> f64 {
        if self.grams == 0.0 || !(0.0..=self.window).contains(&elapsed) {
            return 0.0;
        }
        let peak = self.peak_rate();
        if self.rise > 0.0 && elapsed < self.rise {
            peak * elapsed / self.rise
        } else if self.fall > 0.0 && elapsed > self.window - self.fall {
            peak * (self.window - elapsed) / self.fall
        } else {
            peak
        }
    }
}

/// Slowing load in [0, 1]: weighted macro grams per carb gram
fn macro_load(carb: &ActiveCarb, grams: f64, config: &CarbConfig) -> f64 {
    if grams == 0.0 {
        return 0.0;
    }
    let weighted = non_negative(carb.fat_g) * config.fat_weight
        + non_negative(carb.protein_g) * config.protein_weight
        + non_negative(carb.fiber_g) * config.fiber_weight;
    (weighted / grams).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curves::tests::integrate;

    fn meal(grams: f64, fat: f64, protein: f64, fiber: f64) -> ActiveCarb {
        ActiveCarb {
            grams,
            start_offset_min: 0.0,
            fat_g: fat,
            protein_g: protein,
            fiber_g: fiber,
            carb_profile: CarbProfile::Medium,
        }
    }

    #[test]
    fn test_mass_conservation() {
        let config = CarbConfig::default();
        for carb in [
            meal(45.0, 0.0, 0.0, 0.0),
            meal(45.0, 20.0, 30.0, 8.0),
            meal(10.0, 40.0, 0.0, 0.0),
        ] {
            let curve = AbsorptionCurve::for_entry(&carb, &config);
            let total = integrate(|t| curve.rate_at(t), curve.window_minutes());
            assert!(
                (total - carb.grams).abs() / carb.grams < 0.01,
                "{:?} absorbed {}",
                carb,
                total
            );
        }
    }

    #[test]
    fn test_macros_lengthen_and_flatten() {
        let config = CarbConfig::default();
        let plain = AbsorptionCurve::for_entry(&meal(50.0, 0.0, 0.0, 0.0), &config);
        let pizza = AbsorptionCurve::for_entry(&meal(50.0, 25.0, 20.0, 4.0), &config);

        assert!(pizza.window_minutes() > plain.window_minutes());
        assert!(pizza.peak_rate() < plain.peak_rate());
        assert!(pizza.rise > plain.rise);
    }

    #[test]
    fn test_zero_and_negative_inputs() {
        let config = CarbConfig::default();
        let nothing = AbsorptionCurve::for_entry(&meal(0.0, 10.0, 10.0, 0.0), &config);
        assert_eq!(nothing.rate_at(30.0), 0.0);
        assert_eq!(nothing.peak_rate(), 0.0);

        let negative_macros = AbsorptionCurve::for_entry(&meal(30.0, -5.0, f64::NAN, -1.0), &config);
        let plain = AbsorptionCurve::for_entry(&meal(30.0, 0.0, 0.0, 0.0), &config);
        assert_eq!(negative_macros, plain);

        let negative_carbs = AbsorptionCurve::for_entry(&meal(-20.0, 0.0, 0.0, 0.0), &config);
        assert_eq!(negative_carbs.rate_at(60.0), 0.0);
    }

    #[test]
    fn test_profile_windows() {
        let config = CarbConfig::default();
        let mut carb = meal(20.0, 0.0, 0.0, 0.0);

        carb.carb_profile = CarbProfile::Fast;
        assert_eq!(AbsorptionCurve::for_entry(&carb, &config).window_minutes(), 120.0);

        carb.carb_profile = CarbProfile::Slow;
        assert_eq!(AbsorptionCurve::for_entry(&carb, &config).window_minutes(), 240.0);

        carb.carb_profile = CarbProfile::Custom {
            absorption_min: 90.0,
        };
        assert_eq!(AbsorptionCurve::for_entry(&carb, &config).window_minutes(), 90.0);
    }

    #[test]
    fn test_rate_zero_outside_window() {
        let config = CarbConfig::default();
        let curve = AbsorptionCurve::for_entry(&meal(30.0, 0.0, 0.0, 0.0), &config);
        assert_eq!(curve.rate_at(-1.0), 0.0);
        assert_eq!(curve.rate_at(curve.window_minutes() + 1.0), 0.0);
    }
}
