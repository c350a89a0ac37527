//! Insulin activity curve models.
//!
//! Each curve maps (dose, elapsed minutes) to an activity rate in units per
//! minute. Every curve is normalized so its integral over
//! [`ActivityCurve::window_minutes`] equals the dose, is non-negative, and is
//! exactly zero outside `[0, window]`. Simultaneous doses are summed.

use crate::config::BasalConfig;
use crate::{CurveKind, Error, Result, WaveShape};

/// Spacing of the sub-doses an extended wave is broken into
const WAVE_SUBDOSE_SPACING_MIN: f64 = 5.0;

/// Rapid-acting insulin timing shared by bolus curves
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InsulinTiming {
    pub dia_minutes: f64,
    pub peak_minutes: f64,
}

/// Linear rise to the peak, linear fall to zero at DIA
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bilinear {
    dia: f64,
    peak: f64,
}

impl Bilinear {
    pub fn new(timing: InsulinTiming) -> Result<Self> {
        let InsulinTiming {
            dia_minutes: dia,
            peak_minutes: peak,
        } = timing;
        if !(dia > 0.0) || !(peak > 0.0 && peak < dia) {
            return Err(Error::invalid(format!(
                "bilinear curve needs 0 < peak < dia, got peak {} dia {}",
                peak, dia
            )));
        }
        Ok(Self { dia, peak })
    }

    fn activity_at(&self, dose: f64, elapsed: f64) -> f64 {
        if !(0.0..=self.dia).contains(&elapsed) {
            return 0.0;
        }
        // Triangle of base `dia` and unit area
        let height = 2.0 / self.dia;
        if elapsed <= self.peak {
            dose * height * elapsed / self.peak
        } else {
            dose * height * (self.dia - elapsed) / (self.dia - self.peak)
        }
    }
}

/// Exponential activity profile for ultra-rapid insulins
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Exponential {
    dia: f64,
    tau: f64,
    scale: f64,
}

impl Exponential {
    pub fn new(timing: InsulinTiming) -> Result<Self> {
        let td = timing.dia_minutes;
        let tp = timing.peak_minutes;
        if !(td > 0.0) || !(tp > 0.0 && tp < td / 2.0) {
            return Err(Error::invalid(format!(
                "peaked-exponential curve needs 0 < peak < dia/2, got peak {} dia {}",
                tp, td
            )));
        }
        let tau = tp * (1.0 - tp / td) / (1.0 - 2.0 * tp / td);
        let a = 2.0 * tau / td;
        let s = 1.0 / (1.0 - a + (1.0 + a) * (-td / tau).exp());
        Ok(Self {
            dia: td,
            tau,
            scale: s / (tau * tau),
        })
    }

    fn activity_at(&self, dose: f64, elapsed: f64) -> f64 {
        if !(0.0..=self.dia).contains(&elapsed) {
            return 0.0;
        }
        let t = elapsed;
        let value = dose * self.scale * t * (1.0 - t / self.dia) * (-t / self.tau).exp();
        value.max(0.0)
    }
}

/// Trapezoid: ramp up, long plateau, ramp down
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlatBasal {
    duration: f64,
    ramp: f64,
}

impl FlatBasal {
    pub fn new(config: &BasalConfig) -> Result<Self> {
        let duration = config.duration_min;
        if !(duration > 0.0) || !(0.0..0.5).contains(&config.taper_fraction) {
            return Err(Error::invalid(
                "flat-basal curve needs a positive duration and taper in [0, 0.5)",
            ));
        }
        Ok(Self {
            duration,
            ramp: duration * config.taper_fraction,
        })
    }

    /// Rate on the plateau for `dose`
    pub fn plateau_rate(&self, dose: f64) -> f64 {
        dose / (self.duration - self.ramp)
    }

    fn activity_at(&self, dose: f64, elapsed: f64) -> f64 {
        if !(0.0..=self.duration).contains(&elapsed) {
            return 0.0;
        }
        let plateau = self.plateau_rate(dose);
        if self.ramp > 0.0 && elapsed < self.ramp {
            plateau * elapsed / self.ramp
        } else if self.ramp > 0.0 && elapsed > self.duration - self.ramp {
            plateau * (self.duration - elapsed) / self.ramp
        } else {
            plateau
        }
    }
}

/// Bolus delivered over `duration`, each slice acting on the bilinear kernel
#[derive(Clone, Debug, PartialEq)]
pub struct ExtendedWave {
    kernel: Bilinear,
    duration: f64,
    /// (delivery offset, fraction of the dose)
    slices: Vec<(f64, f64)>,
}

impl ExtendedWave {
    pub fn new(timing: InsulinTiming, duration: f64, shape: WaveShape) -> Result<Self> {
        if !(duration > 0.0) || !duration.is_finite() {
            return Err(Error::invalid(format!(
                "extended wave needs a positive duration, got {}",
                duration
            )));
        }
        let kernel = Bilinear::new(timing)?;

        let n = (duration / WAVE_SUBDOSE_SPACING_MIN).ceil().max(1.0) as usize;
        let width = duration / n as f64;
        let raw: Vec<(f64, f64)> = (0..n)
            .map(|i| {
                let mid = (i as f64 + 0.5) * width;
                let weight = match shape {
                    WaveShape::Uniform => 1.0,
                    WaveShape::Triangular => 1.0 - (2.0 * mid / duration - 1.0).abs(),
                };
                (mid, weight)
            })
            .collect();
        let total: f64 = raw.iter().map(|(_, w)| w).sum();
        let slices = raw.into_iter().map(|(at, w)| (at, w / total)).collect();

        Ok(Self {
            kernel,
            duration,
            slices,
        })
    }

    fn activity_at(&self, dose: f64, elapsed: f64) -> f64 {
        if !(0.0..=self.duration + self.kernel.dia).contains(&elapsed) {
            return 0.0;
        }
        self.slices
            .iter()
            .map(|(at, fraction)| self.kernel.activity_at(dose * fraction, elapsed - at))
            .sum()
    }
}

/// Closed set of insulin action profiles
#[derive(Clone, Debug, PartialEq)]
pub enum ActivityCurve {
    Bilinear(Bilinear),
    Exponential(Exponential),
    FlatBasal(FlatBasal),
    ExtendedWave(ExtendedWave),
}

impl ActivityCurve {
    /// Build the curve for a dose of the given kind
    ///
    /// `duration_min` is only meaningful for extended waves.
    pub fn for_kind(
        kind: CurveKind,
        timing: InsulinTiming,
        basal: &BasalConfig,
        duration_min: f64,
    ) -> Result<Self> {
        Ok(match kind {
            CurveKind::LinearBilinear => ActivityCurve::Bilinear(Bilinear::new(timing)?),
            CurveKind::PeakedExponential => ActivityCurve::Exponential(Exponential::new(timing)?),
            CurveKind::FlatBasal => ActivityCurve::FlatBasal(FlatBasal::new(basal)?),
            CurveKind::ExtendedWave { shape } => {
                ActivityCurve::ExtendedWave(ExtendedWave::new(timing, duration_min, shape)?)
            }
        })
    }

    /// Instantaneous activity (U/min) of `dose` after `elapsed` minutes
    pub fn activity_at(&self, dose: f64, elapsed: f64) -> f64 {
        match self {
            ActivityCurve::Bilinear(c) => c.activity_at(dose, elapsed),
            ActivityCurve::Exponential(c) => c.activity_at(dose, elapsed),
            ActivityCurve::FlatBasal(c) => c.activity_at(dose, elapsed),
            ActivityCurve::ExtendedWave(c) => c.activity_at(dose, elapsed),
        }
    }

    /// Span after which the curve is exactly zero
    pub fn window_minutes(&self) -> f64 {
        match self {
            ActivityCurve::Bilinear(c) => c.dia,
            ActivityCurve::Exponential(c) => c.dia,
            ActivityCurve::FlatBasal(c) => c.duration,
            ActivityCurve::ExtendedWave(c) => c.duration + c.kernel.dia,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Midpoint-rule integral of `f` over [0, end]
    pub(crate) fn integrate(f: impl Fn(f64) -> f64, end: f64) -> f64 {
        let n = 20_000;
        let h = end / n as f64;
        (0..n).map(|i| f((i as f64 + 0.5) * h)).sum::<f64>() * h
    }

    fn timing() -> InsulinTiming {
        InsulinTiming {
            dia_minutes: 240.0,
            peak_minutes: 75.0,
        }
    }

    fn all_curves() -> Vec<ActivityCurve> {
        let basal = BasalConfig::default();
        let ultra = InsulinTiming {
            dia_minutes: 300.0,
            peak_minutes: 55.0,
        };
        vec![
            ActivityCurve::for_kind(CurveKind::LinearBilinear, timing(), &basal, 0.0).unwrap(),
            ActivityCurve::for_kind(CurveKind::PeakedExponential, ultra, &basal, 0.0).unwrap(),
            ActivityCurve::for_kind(CurveKind::FlatBasal, timing(), &basal, 0.0).unwrap(),
            ActivityCurve::for_kind(
                CurveKind::ExtendedWave {
                    shape: WaveShape::Uniform,
                },
                timing(),
                &basal,
                120.0,
            )
            .unwrap(),
            ActivityCurve::for_kind(
                CurveKind::ExtendedWave {
                    shape: WaveShape::Triangular,
                },
                timing(),
                &basal,
                93.0,
            )
            .unwrap(),
        ]
    }

    #[test]
    fn test_mass_conservation() {
        for curve in all_curves() {
            for dose in [0.5, 3.0, 18.0] {
                let area = integrate(|t| curve.activity_at(dose, t), curve.window_minutes());
                let err = (area - dose).abs() / dose;
                assert!(err < 0.01, "{:?} dose {} integrated to {}", curve, dose, area);
            }
        }
    }

    #[test]
    fn test_zero_outside_window_and_non_negative() {
        for curve in all_curves() {
            let window = curve.window_minutes();
            assert_eq!(curve.activity_at(2.0, -0.1), 0.0);
            assert_eq!(curve.activity_at(2.0, -60.0), 0.0);
            assert_eq!(curve.activity_at(2.0, window + 0.1), 0.0);
            assert_eq!(curve.activity_at(2.0, window + 600.0), 0.0);

            let mut t = 0.0;
            while t <= window {
                assert!(curve.activity_at(2.0, t) >= 0.0, "{:?} negative at {}", curve, t);
                t += 1.0;
            }
        }
    }

    #[test]
    fn test_bilinear_peaks_at_peak() {
        let curve = Bilinear::new(timing()).unwrap();
        let at_peak = curve.activity_at(1.0, 75.0);
        assert!((at_peak - 2.0 / 240.0).abs() < 1e-12);
        assert!(curve.activity_at(1.0, 60.0) < at_peak);
        assert!(curve.activity_at(1.0, 90.0) < at_peak);
        assert_eq!(curve.activity_at(1.0, 240.0), 0.0);
    }

    #[test]
    fn test_exponential_peak_location() {
        let curve = Exponential::new(InsulinTiming {
            dia_minutes: 300.0,
            peak_minutes: 55.0,
        })
        .unwrap();
        let at_peak = curve.activity_at(1.0, 55.0);
        assert!(curve.activity_at(1.0, 45.0) < at_peak);
        assert!(curve.activity_at(1.0, 65.0) < at_peak);
    }

    #[test]
    fn test_flat_basal_plateau() {
        let curve = FlatBasal::new(&BasalConfig::default()).unwrap();
        let plateau = curve.plateau_rate(24.0);
        assert_eq!(curve.activity_at(24.0, 600.0), plateau);
        assert!(curve.activity_at(24.0, 30.0) < plateau);
        assert!(curve.activity_at(24.0, 1420.0) < plateau);
    }

    #[test]
    fn test_superposition_is_linear() {
        let curve = Bilinear::new(timing()).unwrap();
        let combined = curve.activity_at(1.0, 100.0) + curve.activity_at(2.0, 100.0);
        assert!((combined - curve.activity_at(3.0, 100.0)).abs() < 1e-12);
    }

    #[test]
    fn test_extended_wave_is_flatter_than_bolus() {
        let basal = BasalConfig::default();
        let wave = ActivityCurve::for_kind(
            CurveKind::ExtendedWave {
                shape: WaveShape::Uniform,
            },
            timing(),
            &basal,
            180.0,
        )
        .unwrap();
        let rapid = ActivityCurve::for_kind(CurveKind::LinearBilinear, timing(), &basal, 0.0).unwrap();
        assert!(wave.activity_at(4.0, 75.0) < rapid.activity_at(4.0, 75.0));
        assert_eq!(wave.window_minutes(), 420.0);
    }

    #[test]
    fn test_invalid_timing_rejected() {
        let bad = InsulinTiming {
            dia_minutes: 240.0,
            peak_minutes: 240.0,
        };
        assert!(Bilinear::new(bad).is_err());

        let too_late = InsulinTiming {
            dia_minutes: 240.0,
            peak_minutes: 130.0,
        };
        assert!(Exponential::new(too_late).is_err());
        assert!(ExtendedWave::new(timing(), 0.0, WaveShape::Uniform).is_err());
    }
}
