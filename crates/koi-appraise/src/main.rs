//! koi-appraise: command-line koi appraisal.
//!
//! Appraises photographs whose vision-model detections are stored in a
//! sidecar file (see [`sidecar`]), runs batches in parallel, and trains
//! the price model from a label table.
//!
//! # Usage
//!
//! ```text
//! koi-appraise [--model model.json] appraise koi.jpg [--json] [--csv history.csv]
//! koi-appraise --model model.json batch ponds/*.jpg --csv history.csv
//! koi-appraise train --labels prices.csv --output model.json
//! ```
//!
//! Logs go to stderr (`RUST_LOG` filters them); results go to stdout.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod error;
mod sidecar;

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use koi_export::{
    TrainingReport, history_row, model_from_json, model_to_json, needs_header, parse_label_table,
};
use koi_metrics::{
    AppraisalConfig, AppraisalContext, AppraisalMetrics, Appraiser, CalibrationTable,
    CoinReference, Detections, ModelSlot, RgbImage,
};
use serde::de::DeserializeOwned;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::CliError;

const DEFAULT_LOG_FILTER: &str = "koi_appraise=info,koi_metrics=info";

/// Koi appraisal from photographs.
///
/// Every photograph needs a `<name>.detections.json` sidecar with the
/// fish masks, coin masks and pattern prediction produced by the vision
/// models.
#[derive(Parser)]
#[command(name = "koi-appraise", version)]
struct Cli {
    /// Stage parameters as JSON (`AppraisalConfig`). Defaults are used
    /// when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Color calibration table as JSON.
    #[arg(long, global = true)]
    calibration: Option<PathBuf>,

    /// Coin diameter table as JSON (`{"label": diameter_cm}`).
    #[arg(long, global = true)]
    coins: Option<PathBuf>,

    /// Price model file.
    #[arg(long, global = true, default_value = "model.json")]
    model: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Appraise one photograph.
    Appraise {
        /// The photograph (PNG, JPEG, BMP, WebP).
        image: PathBuf,

        /// Detections sidecar. Defaults to `<image>.detections.json`.
        #[arg(long)]
        detections: Option<PathBuf>,

        /// Print the full record as JSON instead of a report.
        #[arg(long)]
        json: bool,

        /// Append the result to this history CSV.
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Appraise many photographs in parallel.
    Batch {
        /// The photographs.
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Print one JSON record per line instead of a table.
        #[arg(long)]
        json: bool,

        /// Append successful results to this history CSV.
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Fit a new price model from a label table.
    Train {
        /// CSV with `image_reference,price` columns.
        #[arg(long)]
        labels: PathBuf,

        /// Directory the image references are relative to. Defaults to
        /// the label table's directory.
        #[arg(long)]
        images_dir: Option<PathBuf>,

        /// Where to write the model. Defaults to `--model`.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Where to write the training report. Defaults to
        /// `<output>.report.json`.
        #[arg(long)]
        report: Option<PathBuf>,

        /// Fraction of rows held out for validation. Overrides the
        /// configured value.
        #[arg(long)]
        val_split: Option<f64>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error[{}]: {e}", e.kind());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode, CliError> {
    let mut context = load_context(cli)?;
    match &cli.command {
        Command::Appraise {
            image,
            detections,
            json,
            csv,
        } => {
            let appraiser = Appraiser::new(context, load_model(&cli.model)?);
            let sidecar = detections
                .clone()
                .unwrap_or_else(|| sidecar::sidecar_path(image));
            let (photo, detections) = load_photograph(image, &sidecar)?;
            let metrics = match appraiser.appraise_detected(&photo, &detections) {
                Ok(metrics) => metrics,
                Err(e) if *json => {
                    print_json(&serde_json::json!({
                        "image": image.display().to_string(),
                        "error": e,
                    }))?;
                    return Ok(ExitCode::FAILURE);
                }
                Err(e) => return Err(e.into()),
            };
            if *json {
                print_json(&metrics)?;
            } else {
                print_report(image, &metrics);
            }
            if let Some(csv) = csv {
                append_history(csv, &[&metrics])?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Batch { images, json, csv } => {
            let appraiser = Appraiser::new(context, load_model(&cli.model)?);
            tracing::info!(photographs = images.len(), "starting batch");
            let results = appraiser.appraise_batch(images, |image| {
                load_photograph(image, &sidecar::sidecar_path(image))
            });

            let mut failed = 0_usize;
            for (image, result) in images.iter().zip(&results) {
                match result {
                    Ok(metrics) if *json => {
                        println!(
                            "{}",
                            serde_json::json!({
                                "image": image.display().to_string(),
                                "metrics": metrics,
                            })
                        );
                    }
                    Ok(metrics) => println!(
                        "{:<40} {:>8.2} cm  {:<8} {:>12.2}",
                        image.display().to_string(),
                        metrics.size_cm,
                        metrics.pattern.as_str(),
                        metrics.predicted_price,
                    ),
                    Err(e) => {
                        failed += 1;
                        tracing::warn!(image = %image.display(), kind = e.kind(), "appraisal failed: {e}");
                        if *json {
                            println!(
                                "{}",
                                serde_json::json!({
                                    "image": image.display().to_string(),
                                    "error": e.kind(),
                                    "message": e.to_string(),
                                })
                            );
                        }
                    }
                }
            }
            if let Some(csv) = csv {
                let ok: Vec<&AppraisalMetrics> =
                    results.iter().filter_map(|r| r.as_ref().ok()).collect();
                append_history(csv, &ok)?;
            }
            tracing::info!(
                succeeded = images.len() - failed,
                failed,
                "batch finished"
            );
            Ok(if failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Train {
            labels,
            images_dir,
            output,
            report,
            val_split,
        } => {
            if let Some(split) = *val_split {
                context.config.training.validation_split = split;
                context.config.validate()?;
            }
            let output = output.clone().unwrap_or_else(|| cli.model.clone());
            let report_path = report
                .clone()
                .unwrap_or_else(|| output.with_extension("report.json"));
            train(
                context,
                labels,
                images_dir.as_deref(),
                &output,
                &report_path,
            )?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn train(
    context: AppraisalContext,
    labels: &Path,
    images_dir: Option<&Path>,
    output: &Path,
    report_path: &Path,
) -> Result<(), CliError> {
    let text = std::fs::read_to_string(labels).map_err(|e| CliError::io(labels, e))?;
    let table = parse_label_table(&text)?;
    for rejected in &table.rejected {
        tracing::warn!(line = rejected.line, reason = %rejected.reason, "skipping label line");
    }
    let base = images_dir
        .or_else(|| labels.parent())
        .unwrap_or_else(|| Path::new("."));
    tracing::info!(rows = table.rows.len(), "training price model");

    // Training never touches a live model, so the slot stays empty.
    let appraiser = Appraiser::new(context, Arc::new(ModelSlot::new()));
    let outcome = appraiser.train(&table.rows, |row| {
        let image = base.join(&row.reference);
        load_photograph(&image, &sidecar::sidecar_path(&image))
    })?;

    let report = TrainingReport::new(&outcome, &table.rejected, Utc::now());
    write_file(output, &model_to_json(&outcome.model)?)?;
    write_file(report_path, &report.to_json()?)?;

    let m = &outcome.metrics;
    println!(
        "trained on {} rows ({} skipped); {} R2={:.4} MAE={:.2} RMSE={:.2}",
        report.rows_used,
        report.rows_skipped,
        if outcome.evaluated_on_training {
            "training fit"
        } else {
            "validation"
        },
        m.r2,
        m.mae,
        m.rmse,
    );
    for (name, coefficient) in outcome.model.coefficients_by_name() {
        println!("  {name:<18} {coefficient:>14.4}");
    }
    println!("  {:<18} {:>14.4}", "intercept", outcome.model.intercept);
    tracing::info!(model = %output.display(), report = %report_path.display(), "wrote model");
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let text = std::fs::read_to_string(path).map_err(|e| CliError::io(path, e))?;
    serde_json::from_str(&text).map_err(|e| CliError::json(path, e))
}

fn load_context(cli: &Cli) -> Result<AppraisalContext, CliError> {
    let config: AppraisalConfig = match &cli.config {
        Some(path) => read_json(path)?,
        None => AppraisalConfig::default(),
    };
    let calibration: CalibrationTable = match &cli.calibration {
        Some(path) => read_json(path)?,
        None => CalibrationTable::default(),
    };
    let coins: CoinReference = match &cli.coins {
        Some(path) => read_json(path)?,
        None => CoinReference::default(),
    };
    Ok(AppraisalContext::new(config, calibration, coins)?)
}

fn load_model(path: &Path) -> Result<Arc<ModelSlot>, CliError> {
    let text = std::fs::read_to_string(path).map_err(|e| CliError::io(path, e))?;
    let model = model_from_json(&text)?;
    Ok(Arc::new(ModelSlot::with_model(model)?))
}

fn load_photograph(image: &Path, sidecar: &Path) -> Result<(RgbImage, Detections), CliError> {
    let bytes = std::fs::read(image).map_err(|e| CliError::io(image, e))?;
    let photo = koi_metrics::decode(&bytes)?;
    let detections = sidecar::load(sidecar)?;
    Ok((photo, detections))
}

fn append_history(path: &Path, rows: &[&AppraisalMetrics]) -> Result<(), CliError> {
    let existing = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(CliError::io(path, e)),
    };
    let mut out = String::new();
    if needs_header(&existing) {
        out.push_str(koi_export::HISTORY_HEADER);
        out.push('\n');
    }
    let now = Utc::now();
    for metrics in rows {
        out.push_str(&history_row(now, metrics));
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(out.as_bytes()))
        .map_err(|e| CliError::io(path, e))
}

fn write_file(path: &Path, contents: &str) -> Result<(), CliError> {
    std::fs::write(path, contents).map_err(|e| CliError::io(path, e))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::Export(koi_export::ExportError::Json(e)))?;
    println!("{json}");
    Ok(())
}

fn print_report(image: &Path, m: &AppraisalMetrics) {
    println!("{}", image.display());
    println!("{}", "=".repeat(48));
    println!(
        "Size             {:>10.2} cm  ({:.1} px, {} coin, {:.5} cm/px)",
        m.size_cm, m.length_px, m.coin_label, m.cm_per_px
    );
    println!(
        "Pattern          {:>10}     (classifier: {} @ {:.2}{})",
        m.pattern.as_str(),
        m.pattern_label,
        m.pattern_confidence,
        if m.pattern_low_confidence {
            ", below floor"
        } else {
            ""
        }
    );
    println!(
        "Color            white {:.1}%  red {:.1}%  black {:.1}%",
        m.color.white_pct, m.color.red_pct, m.color.black_pct
    );
    println!(
        "Color quality    {:>10.3}     (saturation {:.2}, edges {:.2}, evenness {:.2})",
        m.color_quality,
        m.color_breakdown.saturation,
        m.color_breakdown.edge_sharpness,
        m.color_breakdown.evenness
    );
    println!("Symmetry         {:>10.3}", m.symmetry_score);
    println!("{}", "-".repeat(48));
    println!("Predicted price  {:>10.2}", m.predicted_price);
}
