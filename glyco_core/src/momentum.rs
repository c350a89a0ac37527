//! Momentum blender.
//!
//! Carries the recent real glucose trend into the first minutes of the
//! forecast so the curve does not jump away from where BG is heading. The
//! term fades linearly and is exactly zero from `momentum_window_min` on.

use crate::config::MomentumConfig;
use crate::{BgReading, Warning};

/// Trend term for one run
#[derive(Clone, Debug, PartialEq)]
pub struct Momentum {
    /// mg/dL per minute, already clamped
    slope_per_min: f64,
    window_min: f64,
    step_min: f64,
    warnings: Vec<Warning>,
}

impl Momentum {
    /// Fit the trailing slope of `readings`
    ///
    /// Fewer than two usable readings, or readings that are too old, give a
    /// zero term and a `MomentumUnavailable` warning.
    pub fn from_readings(
        readings: &[BgReading],
        window_min: f64,
        step_min: f64,
        config: &MomentumConfig,
    ) -> Self {
        let unavailable = |extra: Option<Warning>| {
            let mut warnings = vec![Warning::MomentumUnavailable];
            warnings.extend(extra);
            Self {
                slope_per_min: 0.0,
                window_min,
                step_min,
                warnings,
            }
        };

        let usable: Vec<&BgReading> = readings
            .iter()
            .filter(|r| r.bg.is_finite() && r.bg > 0.0 && r.offset_min_from_now.is_finite())
            .collect();

        let Some(newest) = usable
            .iter()
            .map(|r| r.offset_min_from_now)
            .max_by(|a, b| a.total_cmp(b))
        else {
            tracing::debug!("No glucose readings for momentum");
            return unavailable(None);
        };

        if -newest > config.max_staleness_min {
            tracing::warn!(
                "Newest glucose reading is {:.0} min old, momentum disabled",
                -newest
            );
            return unavailable(Some(Warning::StaleGlucoseData));
        }

        let window: Vec<(f64, f64)> = usable
            .iter()
            .filter(|r| r.offset_min_from_now >= newest - config.lookback_min)
            .map(|r| (r.offset_min_from_now, r.bg))
            .collect();

        let Some(raw) = least_squares_slope(&window) else {
            tracing::debug!("Fewer than two distinct readings, momentum unavailable");
            return unavailable(None);
        };

        let limit = config.max_slope_per_min;
        let slope_per_min = raw.clamp(-limit, limit);
        if slope_per_min != raw {
            tracing::debug!("Momentum slope {:.2} clamped to {:.2}", raw, slope_per_min);
        }

        Self {
            slope_per_min,
            window_min,
            step_min,
            warnings: Vec::new(),
        }
    }

    pub fn slope_per_min(&self) -> f64 {
        self.slope_per_min
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Trend term of the first forecast step (mg/dL)
    pub fn full_term(&self) -> f64 {
        self.slope_per_min * self.step_min
    }

    /// BG change (mg/dL) carried by the series row at `row_offset_min`
    ///
    /// Row 0 is the observed reading and carries nothing. The first stepped
    /// row carries the full term, which then fades linearly to exactly 0 at
    /// the row for `window_min`.
    pub fn contribution_at(&self, row_offset_min: f64) -> f64 {
        if row_offset_min < self.step_min || row_offset_min >= self.window_min {
            return 0.0;
        }
        let weight = 1.0 - (row_offset_min - self.step_min) / (self.window_min - self.step_min);
        self.full_term() * weight
    }
}

/// Slope of the least-squares line through `points`
fn least_squares_slope(points: &[(f64, f64)]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    if sxx <= f64::EPSILON {
        return None;
    }
    let sxy: f64 = points
        .iter()
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    Some(sxy / sxx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readings(values: &[(f64, f64)]) -> Vec<BgReading> {
        values
            .iter()
            .map(|&(offset_min_from_now, bg)| BgReading {
                offset_min_from_now,
                bg,
            })
            .collect()
    }

    fn momentum(values: &[(f64, f64)]) -> Momentum {
        Momentum::from_readings(&readings(values), 30.0, 5.0, &MomentumConfig::default())
    }

    #[test]
    fn test_rising_trend() {
        let m = momentum(&[(-10.0, 100.0), (-5.0, 105.0), (0.0, 110.0)]);
        assert!((m.slope_per_min() - 1.0).abs() < 1e-9);
        assert!(m.warnings().is_empty());
    }

    #[test]
    fn test_decay_endpoints() {
        let m = momentum(&[(-10.0, 140.0), (-5.0, 130.0), (0.0, 120.0)]);
        let full = m.full_term();
        assert_eq!(full, -10.0);
        assert_eq!(m.contribution_at(0.0), 0.0);
        assert_eq!(m.contribution_at(5.0), full);
        assert_eq!(m.contribution_at(30.0), 0.0);
        assert_eq!(m.contribution_at(45.0), 0.0);
        assert!((m.contribution_at(17.5) - full / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_no_longer_than_step_is_silent() {
        let m = Momentum::from_readings(
            &readings(&[(-5.0, 100.0), (0.0, 110.0)]),
            5.0,
            5.0,
            &MomentumConfig::default(),
        );
        assert_eq!(m.full_term(), 10.0);
        assert_eq!(m.contribution_at(5.0), 0.0);
    }

    #[test]
    fn test_single_point_is_unavailable() {
        let m = momentum(&[(0.0, 120.0)]);
        assert_eq!(m.slope_per_min(), 0.0);
        assert_eq!(m.contribution_at(5.0), 0.0);
        assert_eq!(m.warnings(), &[Warning::MomentumUnavailable]);
    }

    #[test]
    fn test_empty_is_unavailable() {
        let m = momentum(&[]);
        assert_eq!(m.warnings(), &[Warning::MomentumUnavailable]);
    }

    #[test]
    fn test_stale_readings() {
        let m = momentum(&[(-40.0, 100.0), (-35.0, 110.0), (-30.0, 120.0)]);
        assert_eq!(m.contribution_at(5.0), 0.0);
        assert!(m.warnings().contains(&Warning::StaleGlucoseData));
        assert!(m.warnings().contains(&Warning::MomentumUnavailable));
    }

    #[test]
    fn test_slope_is_clamped() {
        let m = momentum(&[(-5.0, 100.0), (0.0, 160.0)]);
        assert_eq!(m.slope_per_min(), 3.0);
    }

    #[test]
    fn test_old_points_outside_lookback_ignored() {
        // The -60 reading would flip the trend if it were used
        let m = momentum(&[(-60.0, 250.0), (-10.0, 100.0), (-5.0, 102.0), (0.0, 104.0)]);
        assert!(m.slope_per_min() > 0.0);
    }

    #[test]
    fn test_invalid_readings_filtered() {
        let m = momentum(&[(-5.0, f64::NAN), (0.0, 120.0)]);
        assert_eq!(m.warnings(), &[Warning::MomentumUnavailable]);
    }
}
