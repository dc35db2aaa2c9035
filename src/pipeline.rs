//! End-to-end fine-tuning run:
//! load → split → weights → tokenize → build model → train → evaluate → save.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use candle_core::Device;
use serde::Serialize;

use crate::collate::BatchCollator;
use crate::config::TrainConfig;
use crate::data::{self, label_matrix, DatasetSplit, LabelWeights, SplitImbalance, WeightSource};
use crate::eval::{evaluate, CsvReportWriter, EvalOptions, EvaluationReport, PlotRenderer, ReportRenderer};
use crate::loss::WeightedBceLoss;
use crate::model::{BackboneWeights, ClassifierModel, LoraDecoderClassifier};
use crate::progress::ProgressReporter;
use crate::tokenize::{tokenize_records, TextTokenizer, TokenizationPolicy};
use crate::train::{self, F1Callback, TrainOutcome, Trainer};

/// Training history written next to the adapter.
pub const TRAINER_STATE_FILE: &str = "trainer_state.json";

/// Sizes and warnings of a completed split.
#[derive(Debug, Clone, Serialize)]
pub struct SplitSummary {
    pub label_names: Vec<String>,
    pub train: usize,
    pub validation: usize,
    pub imbalanced: Vec<SplitImbalance>,
    /// Positives per label in the training partition.
    pub train_positives: Vec<usize>,
    /// Positives per label in the validation partition.
    pub validation_positives: Vec<usize>,
}

impl SplitSummary {
    pub fn from_split(label_names: Vec<String>, split: &DatasetSplit) -> Self {
        let k = label_names.len();
        let positives = |records: &[data::Record]| -> Vec<usize> {
            (0..k)
                .map(|j| {
                    records
                        .iter()
                        .filter(|r| r.labels.get(j).copied().unwrap_or(0) == 1)
                        .count()
                })
                .collect()
        };
        Self {
            train: split.train.len(),
            validation: split.validation.len(),
            imbalanced: split.imbalanced.clone(),
            train_positives: positives(&split.train),
            validation_positives: positives(&split.validation),
            label_names,
        }
    }
}

/// What a completed run produced.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub split: SplitSummary,
    pub label_weights: Vec<f32>,
    pub skipped_records: usize,
    pub training: TrainOutcome,
    pub report: EvaluationReport,
    pub adapter_dir: PathBuf,
    pub reports_dir: Option<PathBuf>,
}

/// Load the CSV and split it, returning the split and its summary.
pub fn split_dataset(config: &TrainConfig) -> Result<(DatasetSplit, SplitSummary, Option<LabelWeights>)> {
    let dataset = data::load_records(&config.data.path)
        .with_context(|| format!("Failed to load {}", config.data.path.display()))?;

    let full_weights = match config.data.weights_from {
        WeightSource::Full => Some(LabelWeights::from_matrix(&label_matrix(
            &dataset.records,
            dataset.num_labels(),
        )?)),
        WeightSource::Train => None,
    };

    let (label_names, split) =
        data::shuffle_and_split(dataset, config.data.validation_fraction, config.data.seed)?;
    let summary = SplitSummary::from_split(label_names, &split);
    tracing::info!(
        train = summary.train,
        validation = summary.validation,
        imbalanced = summary.imbalanced.len(),
        "Split dataset"
    );
    Ok((split, summary, full_weights))
}

/// Run the full fine-tuning pipeline.
///
/// `renderers` receive the final evaluation report in addition to the CSV and
/// SVG artifacts written when `output.write_reports` is set.
pub fn run(
    config: &TrainConfig,
    tokenizer: &dyn TextTokenizer,
    device: &Device,
    progress: &dyn ProgressReporter,
    renderers: &[&dyn ReportRenderer],
) -> Result<PipelineOutcome> {
    config.validate()?;

    let (split, summary, full_weights) = split_dataset(config)?;
    let num_labels = summary.label_names.len();

    let weights = match full_weights {
        Some(weights) => weights,
        None => LabelWeights::from_records(&split.train, num_labels)?,
    };
    tracing::info!(weights = ?weights.as_slice(), "Label weights");

    let policy = config.data.tokenization_policy;
    let train_examples = tokenize_records(&split.train, tokenizer, policy)
        .context("Failed to tokenize training records")?;
    let validation_examples = tokenize_records(&split.validation, tokenizer, policy)
        .context("Failed to tokenize validation records")?;
    let skipped = split.total() - train_examples.len() - validation_examples.len();
    if policy == TokenizationPolicy::Skip && skipped > 0 {
        tracing::warn!(skipped, "Records dropped during tokenization");
    }

    let backbone_path = config.model.resolve_backbone()?;
    let backbone = BackboneWeights::from_file(&backbone_path, device)
        .with_context(|| format!("Failed to load backbone {}", backbone_path.display()))?;
    let pad_token_id = tokenizer.pad_token_id();
    if pad_token_id as usize >= backbone.config.vocab_size {
        anyhow::bail!(
            "pad token id {} is outside the backbone vocabulary of {}",
            pad_token_id,
            backbone.config.vocab_size
        );
    }

    let mut model = LoraDecoderClassifier::new(
        &backbone,
        &config.lora,
        config.model.quantization,
        num_labels,
        config.model.seed,
        device,
    )
    .context("Failed to build classifier")?;
    model.set_pad_token_id(pad_token_id);
    model.set_label_info(summary.label_names.clone(), weights.as_slice().to_vec());

    let loss = Arc::new(WeightedBceLoss::new(&weights, device)?);
    let callback = F1Callback {
        options: config.eval,
    };
    let mut trainer = Trainer::new(
        model,
        loss,
        BatchCollator::new(pad_token_id),
        config.training.clone(),
    )?;
    let training = trainer.train(&train_examples, &validation_examples, &callback, progress)?;

    let (prediction, _) = trainer.predict(&validation_examples)?;
    let report = evaluate(&prediction, &config.eval);

    let adapter_dir = config.adapter_dir();
    trainer
        .model()
        .save_adapter(&adapter_dir)
        .with_context(|| format!("Failed to save adapter to {}", adapter_dir.display()))?;
    tokenizer.save(&adapter_dir)?;
    std::fs::write(
        config.training.output_dir.join(TRAINER_STATE_FILE),
        serde_json::to_string_pretty(&training)?,
    )
    .context("Failed to write trainer state")?;
    tracing::info!("Saved adapter and tokenizer to {}", adapter_dir.display());

    let reports_dir = if config.output.write_reports {
        let dir = config.reports_dir();
        CsvReportWriter::new(&dir).render(&report, &summary.label_names)?;
        PlotRenderer::new(&dir).render(&report, &summary.label_names)?;
        Some(dir)
    } else {
        None
    };
    for renderer in renderers {
        renderer.render(&report, &summary.label_names)?;
    }

    Ok(PipelineOutcome {
        split: summary,
        label_weights: weights.as_slice().to_vec(),
        skipped_records: skipped,
        training,
        report,
        adapter_dir,
        reports_dir,
    })
}

/// Result of scoring a saved adapter.
#[derive(Debug, Clone, Serialize)]
pub struct AdapterEvaluation {
    pub label_names: Vec<String>,
    pub report: EvaluationReport,
    pub loss: f64,
    /// Records dropped by [`TokenizationPolicy::Skip`].
    pub skipped_records: usize,
}

/// Score a saved adapter against every record of a CSV.
///
/// The loss uses the label weights recorded at training time. Adapters saved
/// without them fall back to weights computed from `data_path`.
pub fn evaluate_adapter(
    adapter_dir: &Path,
    data_path: &Path,
    tokenizer: &dyn TextTokenizer,
    options: &EvalOptions,
    policy: TokenizationPolicy,
    batch_size: usize,
    device: &Device,
) -> Result<AdapterEvaluation> {
    let model = LoraDecoderClassifier::from_adapter_dir(adapter_dir, device)
        .with_context(|| format!("Failed to load adapter from {}", adapter_dir.display()))?;
    score_adapter(model, data_path, tokenizer, options, policy, batch_size)
}

/// [`evaluate_adapter`] for an already restored model.
pub fn score_adapter(
    model: LoraDecoderClassifier,
    data_path: &Path,
    tokenizer: &dyn TextTokenizer,
    options: &EvalOptions,
    policy: TokenizationPolicy,
    batch_size: usize,
) -> Result<AdapterEvaluation> {
    let dataset = data::load_records(data_path)
        .with_context(|| format!("Failed to load {}", data_path.display()))?;
    if dataset.num_labels() != model.num_labels() {
        anyhow::bail!(
            "dataset has {} labels but adapter was trained on {}",
            dataset.num_labels(),
            model.num_labels()
        );
    }
    if !model.label_names().is_empty() && model.label_names() != dataset.label_names.as_slice() {
        tracing::warn!(
            adapter = ?model.label_names(),
            data = ?dataset.label_names,
            "Label names differ from the ones the adapter was trained on"
        );
    }

    let weights = match model.label_weights() {
        Some(weights) => LabelWeights::from_vec(weights.to_vec()),
        None => {
            tracing::warn!("Adapter has no stored label weights; deriving them from the evaluation data");
            LabelWeights::from_matrix(&label_matrix(&dataset.records, dataset.num_labels())?)
        }
    };
    let loss = WeightedBceLoss::new(&weights, model.device())?;
    let pad_token_id = model.pad_token_id().unwrap_or_else(|| tokenizer.pad_token_id());
    let examples = tokenize_records(&dataset.records, tokenizer, policy)
        .context("Failed to tokenize evaluation records")?;
    let skipped_records = dataset.records.len() - examples.len();
    if skipped_records > 0 {
        tracing::warn!(skipped = skipped_records, "Records dropped during tokenization");
    }

    let (prediction, mean_loss) = train::predict(
        &model,
        &loss,
        &BatchCollator::new(pad_token_id),
        &examples,
        batch_size,
    )?;
    Ok(AdapterEvaluation {
        label_names: dataset.label_names,
        report: evaluate(&prediction, options),
        loss: mean_loss,
        skipped_records,
    })
}
