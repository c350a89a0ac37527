//! CSV export of a forecast series for charting tools.

use crate::{Error, ForecastOutput, Result, SimulationStepResult};
use std::path::Path;
use tempfile::NamedTempFile;

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow {
    offset_min: u32,
    provisional_bg: f64,
    final_bg: f64,
    insulin_impact: f64,
    carb_impact: f64,
    basal_impact: f64,
    momentum_impact: f64,
    gated: bool,
}

impl From<&SimulationStepResult> for CsvRow {
    fn from(step: &SimulationStepResult) -> Self {
        CsvRow {
            offset_min: step.offset_min,
            provisional_bg: round2(step.provisional_bg),
            final_bg: round2(step.final_bg),
            insulin_impact: round2(step.insulin_impact),
            carb_impact: round2(step.carb_impact),
            basal_impact: round2(step.basal_impact),
            momentum_impact: round2(step.momentum_impact),
            gated: step.gated,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Write the series to `csv_path`, replacing any previous file atomically
///
/// Returns the number of rows written.
pub fn write_series_csv(output: &ForecastOutput, csv_path: &Path) -> Result<usize> {
    let parent = match csv_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let temp = NamedTempFile::new_in(parent)?;
    {
        let mut writer = csv::Writer::from_writer(temp.as_file());
        for step in &output.series {
            writer.serialize(CsvRow::from(step))?;
        }
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(csv_path).map_err(|e| Error::Io(e.error))?;

    tracing::info!("Wrote {} forecast rows to {:?}", output.series.len(), csv_path);
    Ok(output.series.len())
}
