//! Sensitivity adjuster (autosens).
//!
//! Produces one ratio per run. A ratio above 1 means the user is currently
//! more insulin resistant: effective ISF and ICR are both divided by it. The
//! ratio is always clamped to the configured band.

use crate::config::AutosensConfig;
use crate::{AutosensResult, AutosensSource, Warning};

/// Deviation samples are expressed per this many minutes
const DEVIATION_INTERVAL_MIN: f64 = 5.0;

/// Resolve the ratio for a run
///
/// `upstream` is a ratio already computed by a collaborator; when absent the
/// ratio is derived from `deviations` (observed minus insulin-expected BG
/// change per 5 minutes).
pub fn resolve(
    config: &AutosensConfig,
    upstream: Option<f64>,
    deviations: &[f64],
    isf: f64,
    configured_daily_units: f64,
) -> (AutosensResult, Vec<Warning>) {
    if !config.enabled {
        tracing::debug!("Autosens disabled, using neutral ratio");
        return (neutral(AutosensSource::Disabled), Vec::new());
    }

    let raw = match upstream.filter(|r| r.is_finite() && *r > 0.0) {
        Some(ratio) => Some(ratio),
        None => ratio_from_deviations(config, deviations, isf, configured_daily_units),
    };

    let Some(raw) = raw else {
        tracing::debug!(
            "Autosens has {} deviation samples (needs {}), using neutral ratio",
            deviations.len(),
            config.min_samples
        );
        return (
            neutral(AutosensSource::InsufficientData),
            vec![Warning::AutosensInsufficientData],
        );
    };

    let ratio = raw.clamp(config.min_ratio, config.max_ratio);
    let clamped = ratio != raw;
    let mut warnings = Vec::new();
    if clamped {
        tracing::warn!(
            "Autosens ratio {:.3} clamped to [{}, {}]",
            raw,
            config.min_ratio,
            config.max_ratio
        );
        warnings.push(Warning::AutosensClamped);
    }

    (
        AutosensResult {
            ratio,
            source: AutosensSource::Computed,
            clamped,
        },
        warnings,
    )
}

fn neutral(source: AutosensSource) -> AutosensResult {
    AutosensResult {
        ratio: 1.0,
        source,
        clamped: false,
    }
}

/// Median deviation converted into a basal-equivalent offset
fn ratio_from_deviations(
    config: &AutosensConfig,
    deviations: &[f64],
    isf: f64,
    configured_daily_units: f64,
) -> Option<f64> {
    let mut samples: Vec<f64> = deviations.iter().copied().filter(|d| d.is_finite()).collect();
    let hourly_basal = configured_daily_units / 24.0;
    if samples.len() < config.min_samples.max(1) || !(hourly_basal > 0.0) || !(isf > 0.0) {
        return None;
    }

    samples.sort_by(f64::total_cmp);
    let mid = samples.len() / 2;
    let median = if samples.len() % 2 == 0 {
        (samples[mid - 1] + samples[mid]) / 2.0
    } else {
        samples[mid]
    };

    // mg/dL per interval -> U/h of missing insulin
    let basal_off = median * (60.0 / DEVIATION_INTERVAL_MIN) / isf;
    let ratio = 1.0 + basal_off / hourly_basal;
    tracing::debug!(
        "Autosens median deviation {:.2} mg/dL/5m, raw ratio {:.3}",
        median,
        ratio
    );
    Some(ratio)
}
