//! `train` command handler.

use anyhow::Result;

use crate::cli::output::{output_json, print_header, print_kv, print_success, print_table, print_warning, OutputMode};
use crate::config::TrainConfig;
use crate::eval::{ReportRenderer, TerminalRenderer};
use crate::model::select_device;
use crate::pipeline::{self, PipelineOutcome};
use crate::progress::{BarProgressReporter, NoopProgressReporter, ProgressReporter};
use crate::tokenize::HfTokenizer;

pub fn handle_train(config: &TrainConfig, mode: OutputMode) -> Result<()> {
    config.validate()?;
    let tokenizer = HfTokenizer::load(&config.model.tokenizer, config.model.pad_token.as_deref())?;
    let device = select_device(config.model.prefer_gpu);

    let progress: Box<dyn ProgressReporter> = match mode {
        OutputMode::Human => Box::new(BarProgressReporter::new()),
        OutputMode::Json => Box::new(NoopProgressReporter),
    };
    let terminal = TerminalRenderer {
        per_label: true,
        zero_division: config.eval.zero_division,
    };
    let renderers: Vec<&dyn ReportRenderer> = match mode {
        OutputMode::Human => vec![&terminal as &dyn ReportRenderer],
        OutputMode::Json => Vec::new(),
    };

    let outcome = pipeline::run(
        config,
        &tokenizer,
        &device,
        progress.as_ref(),
        &renderers,
    )?;

    match mode {
        OutputMode::Json => output_json(&outcome),
        OutputMode::Human => print_outcome(&outcome),
    }
    Ok(())
}

fn print_outcome(outcome: &PipelineOutcome) {
    print_header("Training");
    let rows = outcome
        .training
        .history
        .iter()
        .map(|epoch| {
            let marker = if epoch.epoch == outcome.training.best_epoch { " *" } else { "" };
            vec![
                format!("{}{}", epoch.epoch, marker),
                format!("{:.4}", epoch.train_loss),
                format!("{:.4}", epoch.eval_loss),
                format_opt(epoch.metrics.get("f1_micro")),
                format_opt(epoch.metrics.get("f1_macro")),
                format_opt(epoch.metrics.get("f1_weighted")),
            ]
        })
        .collect();
    print_table(
        &["Epoch", "Train loss", "Eval loss", "F1 micro", "F1 macro", "F1 weighted"],
        rows,
    );

    print_kv("Train records", &outcome.split.train.to_string());
    print_kv("Validation records", &outcome.split.validation.to_string());
    if outcome.skipped_records > 0 {
        print_kv("Skipped records", &outcome.skipped_records.to_string());
    }
    for imbalance in &outcome.split.imbalanced {
        print_warning(&format!(
            "label {} has {} positive example(s); it may be missing from one partition",
            outcome
                .split
                .label_names
                .get(imbalance.label)
                .map(String::as_str)
                .unwrap_or("?"),
            imbalance.positives
        ));
    }
    print_kv("Best epoch", &outcome.training.best_epoch.to_string());
    print_kv("Best metric", &format!("{:.4}", outcome.training.best_metric));
    if let Some(dir) = &outcome.reports_dir {
        print_kv("Reports", &dir.display().to_string());
    }
    print_success(&format!("Adapter saved to {}", outcome.adapter_dir.display()));
}

fn format_opt(value: Option<&f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.4}", v))
}
