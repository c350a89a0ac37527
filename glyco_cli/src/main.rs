use clap::{Parser, Subcommand};
use glyco_core::csv_export::write_series_csv;
use glyco_core::forecast_log::read_records;
use glyco_core::*;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "glyco")]
#[command(about = "Blood glucose forecast simulator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log to stderr (-v run decisions, -vv every step)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate the BG trajectory from a snapshot file
    Forecast {
        /// Snapshot JSON produced by the state assembler
        #[arg(long)]
        snapshot: PathBuf,

        /// Preview an extra rapid bolus (units) given now
        #[arg(long)]
        what_if_bolus: Option<f64>,

        /// Preview extra carbs (grams) eaten now
        #[arg(long)]
        what_if_carbs: Option<f64>,

        /// Also write the per-step series to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Print the full output as JSON instead of a summary
        #[arg(long)]
        json: bool,

        /// Do not append the forecast to the log
        #[arg(long)]
        no_log: bool,
    },

    /// Show recently logged forecasts
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Print the effective configuration
    Config {
        /// Write the effective configuration to the config path
        #[arg(long)]
        write_default: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    glyco_core::logging::init(cli.verbose);

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(Config::default_config_path);
    let config = Config::load_or_default(&config_path)?;
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());
    let log_path = data_dir.join("forecasts.jsonl");

    match cli.command {
        Commands::Forecast {
            snapshot,
            what_if_bolus,
            what_if_carbs,
            csv,
            json,
            no_log,
        } => cmd_forecast(
            &snapshot,
            what_if_bolus,
            what_if_carbs,
            csv.as_deref(),
            json,
            (!no_log).then_some(log_path.as_path()),
            &config,
        ),
        Commands::History { limit } => cmd_history(&log_path, limit),
        Commands::Config { write_default } => cmd_config(&config, &config_path, write_default),
    }
}

fn cmd_forecast(
    snapshot_path: &Path,
    what_if_bolus: Option<f64>,
    what_if_carbs: Option<f64>,
    csv_path: Option<&Path>,
    json: bool,
    log_path: Option<&Path>,
    config: &Config,
) -> Result<()> {
    let mut snapshot = load_snapshot(snapshot_path, config)?;

    if let Some(units) = what_if_bolus {
        snapshot = snapshot.with_hypothetical_bolus(units, CurveKind::LinearBilinear);
    }
    if let Some(grams) = what_if_carbs {
        snapshot = snapshot.with_hypothetical_carbs(grams, CarbProfile::Medium);
    }
    let what_if = what_if_bolus.is_some() || what_if_carbs.is_some();

    let output = simulate(&snapshot)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        display_forecast(&snapshot, &output, what_if);
    }

    if let Some(path) = csv_path {
        let rows = write_series_csv(&output, path)?;
        if !json {
            println!("✓ Wrote {} rows to {}", rows, path.display());
        }
    }

    if let Some(path) = log_path {
        let record = ForecastRecord::new(&snapshot, &output, what_if);
        let mut log = JsonlForecastLog::new(path);
        log.append(&record)?;
        tracing::info!("Logged forecast {}", record.id);
        if !json {
            println!("✓ Forecast logged");
        }
    }

    Ok(())
}

fn cmd_history(log_path: &Path, limit: usize) -> Result<()> {
    let records = read_records(log_path)?;
    if records.is_empty() {
        println!("No forecasts logged yet.");
        return Ok(());
    }

    let skip = records.len().saturating_sub(limit);
    for record in &records[skip..] {
        let warnings: Vec<&str> = record.warnings.iter().map(|w| w.code()).collect();
        println!(
            "{}  {:>5.0} → {:>5.0} mg/dL  (min {:.0} at +{} min){}{}",
            record.generated_at.format("%Y-%m-%d %H:%M"),
            record.start_bg,
            record.summary.ending_bg,
            record.summary.min_bg,
            record.summary.time_to_min,
            if record.what_if { "  [what-if]" } else { "" },
            if warnings.is_empty() {
                String::new()
            } else {
                format!("  ! {}", warnings.join(", "))
            }
        );
    }
    println!("{} of {} forecasts shown", records.len() - skip, records.len());
    Ok(())
}

fn cmd_config(config: &Config, config_path: &Path, write_default: bool) -> Result<()> {
    print!("{}", config.to_toml()?);
    if write_default {
        config.save_to(config_path)?;
        println!("\n✓ Config written to {}", config_path.display());
    }
    Ok(())
}

fn display_forecast(snapshot: &SimulationSnapshot, output: &ForecastOutput, what_if: bool) {
    let summary = &output.summary;

    println!("\n╭─────────────────────────────────────────╮");
    if what_if {
        println!("│  BG FORECAST (what-if preview)");
    } else {
        println!("│  BG FORECAST");
    }
    println!("╰─────────────────────────────────────────╯");
    println!();
    println!(
        "  Now:     {:.0} mg/dL  (target {:.0})",
        snapshot.start_bg, snapshot.params.target_bg
    );
    println!(
        "  In {}:   {:.0} mg/dL  ({:+.0} vs target)",
        horizon_label(snapshot.params.horizon_min),
        summary.ending_bg,
        summary.ending_vs_target
    );
    println!(
        "  Range:   {:.0} – {:.0} mg/dL, lowest at +{} min",
        summary.min_bg, summary.max_bg, summary.time_to_min
    );
    println!(
        "  Autosens: {:.2} ({:?}), basal {:?}",
        output.autosens.ratio, output.autosens.source, output.basal_state
    );
    println!();

    // Hourly checkpoints keep the terminal view short
    for row in output.series.iter().filter(|r| r.offset_min % 60 == 0) {
        println!(
            "  +{:>4} min  {:>5.0} mg/dL{}",
            row.offset_min,
            row.final_bg,
            if row.gated { "  (damped)" } else { "" }
        );
    }

    if !output.warnings.is_empty() {
        println!();
        for warning in &output.warnings {
            println!("  ⚠ {}", warning.code());
        }
    }
    println!();
}

/// Whole hours as "3h", anything else in minutes
fn horizon_label(horizon_min: u32) -> String {
    if horizon_min % 60 == 0 {
        format!("{}h", horizon_min / 60)
    } else {
        format!("{} min", horizon_min)
    }
}
