//! `split` command handler.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::output::{output_json, print_header, print_kv, print_success, print_table, print_warning, OutputMode};
use crate::config::TrainConfig;
use crate::data::LabelWeights;
use crate::pipeline::{split_dataset, SplitSummary};

#[derive(Serialize)]
struct SplitIds {
    train: Vec<i64>,
    validation: Vec<i64>,
}

#[derive(Serialize)]
struct SplitReport<'a> {
    #[serde(flatten)]
    summary: &'a SplitSummary,
    label_weights: &'a [f32],
}

pub fn handle_split(config: &TrainConfig, output: Option<&Path>, mode: OutputMode) -> Result<()> {
    config.validate()?;
    let (split, summary, full_weights) = split_dataset(config)?;
    let weights = match full_weights {
        Some(weights) => weights,
        None => LabelWeights::from_records(&split.train, summary.label_names.len())?,
    };

    if let Some(path) = output {
        let ids = SplitIds {
            train: split.train.iter().map(|r| r.id).collect(),
            validation: split.validation.iter().map(|r| r.id).collect(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&ids)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    match mode {
        OutputMode::Json => output_json(&SplitReport {
            summary: &summary,
            label_weights: weights.as_slice(),
        }),
        OutputMode::Human => {
            print_header("Split");
            print_kv("Train records", &summary.train.to_string());
            print_kv("Validation records", &summary.validation.to_string());
            println!();

            let rows = summary
                .label_names
                .iter()
                .enumerate()
                .map(|(j, name)| {
                    vec![
                        name.clone(),
                        summary.train_positives[j].to_string(),
                        summary.validation_positives[j].to_string(),
                        format!("{:.4}", weights.as_slice()[j]),
                    ]
                })
                .collect();
            print_table(&["Label", "Train +", "Validation +", "Weight"], rows);

            for imbalance in &summary.imbalanced {
                print_warning(&format!(
                    "label '{}' has {} positive example(s); it may be missing from one partition",
                    summary.label_names[imbalance.label], imbalance.positives
                ));
            }
            if let Some(path) = output {
                print_success(&format!("Wrote split ids to {}", path.display()));
            }
        }
    }
    Ok(())
}
