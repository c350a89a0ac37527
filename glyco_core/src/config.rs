//! Configuration file support for glyco.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/glyco/config.toml`.
//! Everything that shapes a forecast lives under `[tuning]` and is copied
//! into each snapshot's params, so a run never reads process-wide state.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub forecast: ForecastConfig,

    #[serde(default)]
    pub tuning: ModelTuning,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Fallbacks for snapshot files that leave the run shape unspecified
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ForecastConfig {
    #[serde(default = "default_horizon_min")]
    pub horizon_min: u32,

    #[serde(default = "default_step_min")]
    pub step_min: u32,

    #[serde(default = "default_momentum_window_min")]
    pub momentum_window_min: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizon_min: default_horizon_min(),
            step_min: default_step_min(),
            momentum_window_min: default_momentum_window_min(),
        }
    }
}

/// Model constants that were tuned empirically.
///
/// None of these are clinical law; they are carried per run so that
/// different users or hypotheses can be simulated side by side.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelTuning {
    #[serde(default)]
    pub safety: SafetyGateConfig,

    #[serde(default)]
    pub basal: BasalConfig,

    #[serde(default)]
    pub carbs: CarbConfig,

    #[serde(default)]
    pub autosens: AutosensConfig,

    #[serde(default)]
    pub momentum: MomentumConfig,

    #[serde(default)]
    pub range: BgRange,
}

/// Anti-panic gate parameters
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SafetyGateConfig {
    /// Provisional BG below this counts as low risk (mg/dL)
    #[serde(default = "default_low_bg_threshold")]
    pub low_bg_threshold: f64,

    /// A drop faster than this is "steep" (mg/dL per minute, positive)
    #[serde(default = "default_steep_drop_per_min")]
    pub steep_drop_per_min: f64,

    /// Multiplier applied to the insulin term when the gate fires; 1.0 disables
    #[serde(default = "default_damping_factor")]
    pub damping_factor: f64,

    /// Only steps at or before this offset may be gated; 0 disables
    #[serde(default = "default_gate_window_min")]
    pub window_min: f64,
}

impl Default for SafetyGateConfig {
    fn default() -> Self {
        Self {
            low_bg_threshold: default_low_bg_threshold(),
            steep_drop_per_min: default_steep_drop_per_min(),
            damping_factor: default_damping_factor(),
            window_min: default_gate_window_min(),
        }
    }
}

/// Long-acting insulin parameters
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BasalConfig {
    /// A dose inside this window marks the current basal as intentional
    #[serde(default = "default_recency_window_min")]
    pub recency_window_min: f64,

    /// Active basal below this rate is treated as an omission (U/h)
    #[serde(default = "default_near_zero_floor")]
    pub near_zero_floor_u_per_hour: f64,

    /// Action duration of a flat-basal dose
    #[serde(default = "default_basal_duration_min")]
    pub duration_min: f64,

    /// Fraction of the duration spent ramping up (and again ramping down)
    #[serde(default = "default_taper_fraction")]
    pub taper_fraction: f64,
}

impl Default for BasalConfig {
    fn default() -> Self {
        Self {
            recency_window_min: default_recency_window_min(),
            near_zero_floor_u_per_hour: default_near_zero_floor(),
            duration_min: default_basal_duration_min(),
            taper_fraction: default_taper_fraction(),
        }
    }
}

/// Carbohydrate absorption parameters
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CarbConfig {
    #[serde(default = "default_fast_absorption_min")]
    pub fast_absorption_min: f64,

    #[serde(default = "default_medium_absorption_min")]
    pub medium_absorption_min: f64,

    #[serde(default = "default_slow_absorption_min")]
    pub slow_absorption_min: f64,

    #[serde(default = "default_rise_fraction")]
    pub rise_fraction: f64,

    #[serde(default = "default_fall_fraction")]
    pub fall_fraction: f64,

    #[serde(default = "default_fat_weight")]
    pub fat_weight: f64,

    #[serde(default = "default_protein_weight")]
    pub protein_weight: f64,

    #[serde(default = "default_fiber_weight")]
    pub fiber_weight: f64,

    /// Window growth at full macro load (1.0 doubles the window)
    #[serde(default = "default_max_window_extension")]
    pub max_window_extension: f64,

    /// Extra rise fraction at full macro load
    #[serde(default = "default_max_peak_delay_fraction")]
    pub max_peak_delay_fraction: f64,
}

impl Default for CarbConfig {
    fn default() -> Self {
        Self {
            fast_absorption_min: default_fast_absorption_min(),
            medium_absorption_min: default_medium_absorption_min(),
            slow_absorption_min: default_slow_absorption_min(),
            rise_fraction: default_rise_fraction(),
            fall_fraction: default_fall_fraction(),
            fat_weight: default_fat_weight(),
            protein_weight: default_protein_weight(),
            fiber_weight: default_fiber_weight(),
            max_window_extension: default_max_window_extension(),
            max_peak_delay_fraction: default_max_peak_delay_fraction(),
        }
    }
}

/// Sensitivity adjustment parameters
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AutosensConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_min_ratio")]
    pub min_ratio: f64,

    #[serde(default = "default_max_ratio")]
    pub max_ratio: f64,

    /// Minimum number of deviation samples needed to compute a ratio
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
}

impl Default for AutosensConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_ratio: default_min_ratio(),
            max_ratio: default_max_ratio(),
            min_samples: default_min_samples(),
        }
    }
}

/// Short-term trend parameters
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MomentumConfig {
    #[serde(default = "default_lookback_min")]
    pub lookback_min: f64,

    #[serde(default = "default_max_staleness_min")]
    pub max_staleness_min: f64,

    #[serde(default = "default_max_slope_per_min")]
    pub max_slope_per_min: f64,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            lookback_min: default_lookback_min(),
            max_staleness_min: default_max_staleness_min(),
            max_slope_per_min: default_max_slope_per_min(),
        }
    }
}

/// Physiological bounds for a forecast value (mg/dL)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BgRange {
    #[serde(default = "default_bg_floor")]
    pub floor: f64,

    #[serde(default = "default_bg_ceiling")]
    pub ceiling: f64,
}

impl Default for BgRange {
    fn default() -> Self {
        Self {
            floor: default_bg_floor(),
            ceiling: default_bg_ceiling(),
        }
    }
}

impl ModelTuning {
    /// Reject tuning values that would make the model meaningless
    pub fn validate(&self) -> Result<()> {
        let s = &self.safety;
        if !(s.damping_factor > 0.0 && s.damping_factor <= 1.0) {
            return Err(Error::invalid(format!(
                "safety damping_factor must be in (0, 1], got {}",
                s.damping_factor
            )));
        }
        if !(s.window_min >= 0.0) || !(s.steep_drop_per_min >= 0.0) {
            return Err(Error::invalid(
                "safety window_min and steep_drop_per_min must be non-negative",
            ));
        }
        if !s.low_bg_threshold.is_finite() {
            return Err(Error::invalid("safety low_bg_threshold must be finite"));
        }

        let b = &self.basal;
        if !(b.duration_min > 0.0) || !b.duration_min.is_finite() {
            return Err(Error::invalid("basal duration_min must be positive"));
        }
        if !(0.0..0.5).contains(&b.taper_fraction) {
            return Err(Error::invalid("basal taper_fraction must be in [0, 0.5)"));
        }
        if !(b.recency_window_min >= 0.0) || !(b.near_zero_floor_u_per_hour >= 0.0) {
            return Err(Error::invalid(
                "basal recency window and near-zero floor must be non-negative",
            ));
        }

        let c = &self.carbs;
        for (name, window) in [
            ("fast", c.fast_absorption_min),
            ("medium", c.medium_absorption_min),
            ("slow", c.slow_absorption_min),
        ] {
            if !(window > 0.0) || !window.is_finite() {
                return Err(Error::invalid(format!(
                    "{} absorption window must be positive",
                    name
                )));
            }
        }
        if c.rise_fraction < 0.0 || c.fall_fraction < 0.0 || c.rise_fraction + c.fall_fraction > 1.0
        {
            return Err(Error::invalid(
                "carb rise_fraction + fall_fraction must be within [0, 1]",
            ));
        }
        if c.max_window_extension < 0.0 || c.max_peak_delay_fraction < 0.0 {
            return Err(Error::invalid("carb macro adjustments must be non-negative"));
        }

        let a = &self.autosens;
        if !(a.min_ratio > 0.0) || !(a.min_ratio <= 1.0) || !(a.max_ratio >= 1.0) {
            return Err(Error::invalid(format!(
                "autosens band must satisfy 0 < min <= 1 <= max, got [{}, {}]",
                a.min_ratio, a.max_ratio
            )));
        }

        if !(self.momentum.max_slope_per_min >= 0.0) || !(self.momentum.lookback_min > 0.0) {
            return Err(Error::invalid(
                "momentum lookback must be positive and max slope non-negative",
            ));
        }

        if !(self.range.floor > 0.0) || !(self.range.floor < self.range.ceiling) {
            return Err(Error::invalid(format!(
                "BG range must satisfy 0 < floor < ceiling, got [{}, {}]",
                self.range.floor, self.range.ceiling
            )));
        }

        Ok(())
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".local/share"))
            .unwrap_or_else(|| PathBuf::from("."))
    });
    base.join("glyco")
}

fn default_horizon_min() -> u32 {
    180
}

fn default_step_min() -> u32 {
    5
}

fn default_momentum_window_min() -> f64 {
    30.0
}

fn default_low_bg_threshold() -> f64 {
    80.0
}

fn default_steep_drop_per_min() -> f64 {
    2.0
}

fn default_damping_factor() -> f64 {
    0.5
}

fn default_gate_window_min() -> f64 {
    90.0
}

fn default_recency_window_min() -> f64 {
    26.0 * 60.0
}

fn default_near_zero_floor() -> f64 {
    0.1
}

fn default_basal_duration_min() -> f64 {
    24.0 * 60.0
}

fn default_taper_fraction() -> f64 {
    0.1
}

fn default_fast_absorption_min() -> f64 {
    120.0
}

fn default_medium_absorption_min() -> f64 {
    180.0
}

fn default_slow_absorption_min() -> f64 {
    240.0
}

fn default_rise_fraction() -> f64 {
    0.25
}

fn default_fall_fraction() -> f64 {
    0.5
}

fn default_fat_weight() -> f64 {
    1.0
}

fn default_protein_weight() -> f64 {
    0.5
}

fn default_fiber_weight() -> f64 {
    0.5
}

fn default_max_window_extension() -> f64 {
    1.0
}

fn default_max_peak_delay_fraction() -> f64 {
    0.15
}

fn default_true() -> bool {
    true
}

fn default_min_ratio() -> f64 {
    0.7
}

fn default_max_ratio() -> f64 {
    1.2
}

fn default_min_samples() -> usize {
    12
}

fn default_lookback_min() -> f64 {
    20.0
}

fn default_max_staleness_min() -> f64 {
    12.0
}

fn default_max_slope_per_min() -> f64 {
    3.0
}

fn default_bg_floor() -> f64 {
    39.0
}

fn default_bg_ceiling() -> f64 {
    400.0
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        Self::load_or_default(&Self::default_config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it is absent
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config
            .tuning
            .validate()
            .map_err(|e| Error::Config(format!("{:?}: {}", path, e)))?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .unwrap_or_else(|| PathBuf::from("."))
        });
        base.join("glyco").join("config.toml")
    }

    /// Render as pretty TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Save the current configuration to a specific path
    ///
    /// Written to a temp file in the same directory and renamed into place.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;

        let contents = self.to_toml()?;

        let mut temp = NamedTempFile::new_in(parent)?;
        temp.write_all(contents.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}
