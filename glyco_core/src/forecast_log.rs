//! Append-only forecast log.
//!
//! Each forecast that is shown to the user is appended as one JSON line so
//! banners can be audited later. Writers take an exclusive file lock so
//! concurrent runs never interleave lines.

use crate::{ForecastOutput, ForecastSummary, Result, SimulationSnapshot, Warning};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Audit record of one forecast
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ForecastRecord {
    pub id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub start_bg: f64,
    /// True when the run included hypothetical entries
    pub what_if: bool,
    pub summary: ForecastSummary,
    pub warnings: BTreeSet<Warning>,
    pub gated_steps: usize,
}

impl ForecastRecord {
    pub fn new(snapshot: &SimulationSnapshot, output: &ForecastOutput, what_if: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            generated_at: Utc::now(),
            start_time: snapshot.start_time,
            start_bg: snapshot.start_bg,
            what_if,
            summary: output.summary.clone(),
            warnings: output.warnings.clone(),
            gated_steps: output.gated_steps(),
        }
    }
}

/// Destination for forecast records
pub trait ForecastSink {
    fn append(&mut self, record: &ForecastRecord) -> Result<()>;
}

/// JSONL-based forecast log with file locking
pub struct JsonlForecastLog {
    path: PathBuf,
}

impl JsonlForecastLog {
    /// Create a new log writer for the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl ForecastSink for JsonlForecastLog {
    fn append(&mut self, record: &ForecastRecord) -> Result<()> {
        self.ensure_parent_dir()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.lock_exclusive()?;

        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        // Whole line in a single write
        let write_result = (&file).write_all(line.as_bytes()).and_then(|_| (&file).flush());

        file.unlock()?;
        write_result?;

        tracing::debug!("Appended forecast {} to {:?}", record.id, self.path);
        Ok(())
    }
}

/// Read all records from a log file, oldest first
pub fn read_records(path: &Path) -> Result<Vec<ForecastRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut records = Vec::new();

    // Raw bytes: a torn write may leave a line that is not even UTF-8
    for (line_num, line_result) in reader.split(b'\n').enumerate() {
        let line = line_result?;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match serde_json::from_slice::<ForecastRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!("Skipping unreadable forecast at line {}: {}", line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} forecasts from {:?}", records.len(), path);
    Ok(records)
}
