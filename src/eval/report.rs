//! Rendering of evaluation reports: terminal tables and on-disk artifacts.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Table};
use serde::Serialize;

use super::metrics::{BinaryConfusion, EvaluationReport, F1Scores};
use crate::error::Result;

pub const CONFUSION_FILE: &str = "confusion.csv";
pub const METRICS_FILE: &str = "metrics.json";

/// Side-effecting sink for an [`EvaluationReport`].
pub trait ReportRenderer {
    fn render(&self, report: &EvaluationReport, label_names: &[String]) -> Result<()>;
}

/// Display name for label `index`, falling back to `label_<index>`.
pub fn label_name(label_names: &[String], index: usize) -> String {
    label_names
        .get(index)
        .cloned()
        .unwrap_or_else(|| format!("label_{index}"))
}

fn format_metric(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else {
        format!("{value:.4}")
    }
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS);
    table
}

/// 2×2 table for one label: truth rows against predicted columns.
pub fn confusion_table(cm: &BinaryConfusion) -> Table {
    let mut table = new_table();
    table.set_header(vec!["", "Pred Absent", "Pred Present"]);
    let [[tn, fp], [fn_, tp]] = cm.as_matrix();
    table.add_row(vec![Cell::new("Absent"), Cell::new(tn), Cell::new(fp)]);
    table.add_row(vec![Cell::new("Present"), Cell::new(fn_), Cell::new(tp)]);
    table
}

/// One row per label with counts, F1 and AUC.
pub fn summary_table(report: &EvaluationReport, label_names: &[String], zero_division: f64) -> Table {
    let mut table = new_table();
    table.set_header(vec!["Label", "Support", "TP", "FP", "FN", "TN", "F1", "AUC"]);
    for (i, (cm, roc)) in report.confusion.iter().zip(&report.roc).enumerate() {
        table.add_row(vec![
            label_name(label_names, i),
            cm.support().to_string(),
            cm.tp.to_string(),
            cm.fp.to_string(),
            cm.fn_.to_string(),
            cm.tn.to_string(),
            format_metric(cm.f1(zero_division)),
            format_metric(roc.auc),
        ]);
    }
    table
}

fn scores_table(scores: &F1Scores) -> Table {
    let mut table = new_table();
    table.set_header(vec!["Average", "F1"]);
    for (name, value) in scores.to_metrics() {
        table.add_row(vec![name.to_string(), format_metric(value)]);
    }
    table
}

/// Prints tables to stdout.
#[derive(Debug, Clone, Copy)]
pub struct TerminalRenderer {
    /// Also print one 2×2 confusion table per label.
    pub per_label: bool,
    pub zero_division: f64,
}

impl Default for TerminalRenderer {
    fn default() -> Self {
        Self {
            per_label: true,
            zero_division: 1.0,
        }
    }
}

impl ReportRenderer for TerminalRenderer {
    fn render(&self, report: &EvaluationReport, label_names: &[String]) -> Result<()> {
        println!("\n{}\n", "Evaluation".bold());
        println!("{}", scores_table(&report.scores));
        println!("{}", summary_table(report, label_names, self.zero_division));

        if self.per_label {
            for (i, cm) in report.confusion.iter().enumerate() {
                println!("\n{}", label_name(label_names, i).bold().underline());
                println!("{}", confusion_table(cm));
            }
        }

        let undefined = report.undefined_roc_labels();
        if !undefined.is_empty() {
            let names: Vec<String> = undefined.iter().map(|&i| label_name(label_names, i)).collect();
            println!(
                "{}",
                format!("ROC undefined (single-class truth): {}", names.join(", ")).dimmed()
            );
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct MetricsFile<'a> {
    generated_at: DateTime<Utc>,
    labels: Vec<String>,
    scores: &'a F1Scores,
    /// NaN serializes as `null`.
    auc: Vec<f64>,
}

/// Writes CSV/JSON artifacts into a directory.
///
/// - `confusion.csv`: one row per label
/// - `roc_class_{i}.csv`: `threshold,fpr,tpr` points for label `i`
/// - `metrics.json`: F1 aggregates and per-label AUC
#[derive(Debug, Clone)]
pub struct CsvReportWriter {
    dir: PathBuf,
}

impl CsvReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn roc_file(index: usize) -> String {
        format!("roc_class_{index}.csv")
    }

    fn write_confusion(&self, report: &EvaluationReport, label_names: &[String]) -> Result<()> {
        let mut writer = csv::Writer::from_path(self.dir.join(CONFUSION_FILE))?;
        writer.write_record(["label", "tn", "fp", "fn", "tp"])?;
        for (i, cm) in report.confusion.iter().enumerate() {
            writer.write_record([
                label_name(label_names, i),
                cm.tn.to_string(),
                cm.fp.to_string(),
                cm.fn_.to_string(),
                cm.tp.to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    fn write_roc(&self, report: &EvaluationReport) -> Result<()> {
        for (i, roc) in report.roc.iter().enumerate() {
            let mut writer = csv::Writer::from_path(self.dir.join(Self::roc_file(i)))?;
            writer.write_record(["threshold", "fpr", "tpr"])?;
            for ((t, fpr), tpr) in roc.thresholds.iter().zip(&roc.fpr).zip(&roc.tpr) {
                writer.write_record([t.to_string(), fpr.to_string(), tpr.to_string()])?;
            }
            writer.flush()?;
        }
        Ok(())
    }
}

impl ReportRenderer for CsvReportWriter {
    fn render(&self, report: &EvaluationReport, label_names: &[String]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        self.write_confusion(report, label_names)?;
        self.write_roc(report)?;

        let metrics = MetricsFile {
            generated_at: Utc::now(),
            labels: (0..report.confusion.len())
                .map(|i| label_name(label_names, i))
                .collect(),
            scores: &report.scores,
            auc: report.roc.iter().map(|r| r.auc).collect(),
        };
        fs::write(
            self.dir.join(METRICS_FILE),
            serde_json::to_string_pretty(&metrics)?,
        )?;

        tracing::info!(dir = %self.dir.display(), "Wrote evaluation report");
        Ok(())
    }
}
