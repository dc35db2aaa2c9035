//! `evaluate` command handler.

use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use crate::cli::output::{output_json, print_kv, print_success, print_warning, OutputMode};
use crate::eval::{
    CsvReportWriter, EvalOptions, EvaluationReport, PlotRenderer, ReportRenderer, TerminalRenderer,
};
use crate::model::select_device;
use crate::pipeline::evaluate_adapter;
use crate::tokenize::{HfTokenizer, TokenizationPolicy};

/// Arguments of one `evaluate` invocation.
#[derive(Debug, Clone)]
pub struct EvaluateRequest<'a> {
    pub adapter: &'a Path,
    pub data: &'a Path,
    /// Defaults to the tokenizer saved in the adapter directory.
    pub tokenizer: Option<&'a str>,
    pub batch_size: usize,
    pub policy: TokenizationPolicy,
    pub report_dir: Option<&'a Path>,
    pub prefer_gpu: bool,
}

#[derive(Serialize)]
struct EvaluateOutput<'a> {
    labels: &'a [String],
    loss: f64,
    skipped_records: usize,
    #[serde(flatten)]
    report: &'a EvaluationReport,
}

pub fn handle_evaluate(request: &EvaluateRequest<'_>, mode: OutputMode) -> Result<()> {
    let source = match request.tokenizer {
        Some(source) => source.to_string(),
        None => request.adapter.display().to_string(),
    };
    let tokenizer = HfTokenizer::load(&source, None)?;
    let device = select_device(request.prefer_gpu);
    let options = EvalOptions::default();

    let outcome = evaluate_adapter(
        request.adapter,
        request.data,
        &tokenizer,
        &options,
        request.policy,
        request.batch_size,
        &device,
    )?;

    if let Some(dir) = request.report_dir {
        CsvReportWriter::new(dir).render(&outcome.report, &outcome.label_names)?;
        PlotRenderer::new(dir).render(&outcome.report, &outcome.label_names)?;
    }

    match mode {
        OutputMode::Json => output_json(&EvaluateOutput {
            labels: &outcome.label_names,
            loss: outcome.loss,
            skipped_records: outcome.skipped_records,
            report: &outcome.report,
        }),
        OutputMode::Human => {
            TerminalRenderer {
                per_label: true,
                zero_division: options.zero_division,
            }
            .render(&outcome.report, &outcome.label_names)?;
            print_kv("Loss", &format!("{:.4}", outcome.loss));
            if outcome.skipped_records > 0 {
                print_warning(&format!(
                    "{} record(s) skipped during tokenization",
                    outcome.skipped_records
                ));
            }
            if let Some(dir) = request.report_dir {
                print_success(&format!("Reports written to {}", dir.display()));
            }
        }
    }
    Ok(())
}
