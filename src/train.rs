//! Epoch-based training loop with per-epoch evaluation and best-model
//! retention.
//!
//! The loop owns no policy beyond scheduling: the loss, the collator, the
//! metric computation and progress display are all handed in by the caller.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::collate::BatchCollator;
use crate::error::{ClassifierError, Result};
use crate::eval::{evaluate, EvalOptions, EvalPrediction};
use crate::loss::LossFn;
use crate::model::ClassifierModel;
use crate::progress::ProgressReporter;
use crate::tokenize::TokenizedExample;

/// Directory under `output_dir` holding the best checkpoint so far.
pub const BEST_CHECKPOINT_DIR: &str = "checkpoint-best";
/// Metric name of the validation loss.
pub const EVAL_LOSS: &str = "eval_loss";

/// Named evaluation metrics for one epoch.
pub type Metrics = BTreeMap<String, f64>;

/// Hyperparameters and output location for a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingArgs {
    pub learning_rate: f64,
    pub batch_size: usize,
    pub eval_batch_size: usize,
    pub epoch_count: usize,
    pub weight_decay: f64,
    /// Seeds the per-epoch shuffle of the training order.
    pub seed: u64,
    /// Metric used to pick the best epoch. Names ending in `loss` are
    /// minimized, everything else is maximized.
    pub metric_for_best_model: String,
    pub load_best_model_at_end: bool,
    pub output_dir: PathBuf,
}

impl Default for TrainingArgs {
    fn default() -> Self {
        Self {
            learning_rate: 1e-4,
            batch_size: 8,
            eval_batch_size: 8,
            epoch_count: 10,
            weight_decay: 0.01,
            seed: 0,
            metric_for_best_model: EVAL_LOSS.to_string(),
            load_best_model_at_end: true,
            output_dir: PathBuf::from("multilabel_classification"),
        }
    }
}

impl TrainingArgs {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.eval_batch_size == 0 {
            return Err(ClassifierError::Config(
                "batch sizes must be > 0".to_string(),
            ));
        }
        if self.epoch_count == 0 {
            return Err(ClassifierError::Config(
                "epoch_count must be > 0".to_string(),
            ));
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(ClassifierError::Config(format!(
                "learning_rate must be > 0, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }

    pub fn greater_is_better(&self) -> bool {
        !self.metric_for_best_model.ends_with("loss")
    }

    pub fn best_checkpoint_dir(&self) -> PathBuf {
        self.output_dir.join(BEST_CHECKPOINT_DIR)
    }
}

/// Computes metrics from an epoch's validation predictions.
pub trait EvalCallback {
    fn on_evaluate(&self, epoch: usize, prediction: &EvalPrediction) -> Result<Metrics>;
}

impl<F> EvalCallback for F
where
    F: Fn(usize, &EvalPrediction) -> Result<Metrics>,
{
    fn on_evaluate(&self, epoch: usize, prediction: &EvalPrediction) -> Result<Metrics> {
        self(epoch, prediction)
    }
}

/// Default callback: F1 micro/macro/weighted on thresholded sigmoid outputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct F1Callback {
    pub options: EvalOptions,
}

impl EvalCallback for F1Callback {
    fn on_evaluate(&self, _epoch: usize, prediction: &EvalPrediction) -> Result<Metrics> {
        let scores = evaluate(prediction, &self.options).scores;
        Ok(scores
            .to_metrics()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    /// 1-based.
    pub epoch: usize,
    pub train_loss: f64,
    pub eval_loss: f64,
    pub metrics: Metrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainOutcome {
    pub history: Vec<EpochSummary>,
    pub best_epoch: usize,
    pub best_metric: f64,
}

/// Drives optimization of a [`ClassifierModel`].
pub struct Trainer<M: ClassifierModel> {
    model: M,
    loss: Arc<dyn LossFn>,
    collator: BatchCollator,
    args: TrainingArgs,
}

impl<M: ClassifierModel> Trainer<M> {
    pub fn new(
        model: M,
        loss: Arc<dyn LossFn>,
        collator: BatchCollator,
        args: TrainingArgs,
    ) -> Result<Self> {
        args.validate()?;
        Ok(Self {
            model,
            loss,
            collator,
            args,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn args(&self) -> &TrainingArgs {
        &self.args
    }

    /// Train for `epoch_count` epochs, evaluating after each one.
    ///
    /// The best epoch by `metric_for_best_model` is checkpointed to
    /// `output_dir/checkpoint-best` and, if `load_best_model_at_end` is set,
    /// restored into the model before returning.
    pub fn train(
        &mut self,
        train: &[TokenizedExample],
        validation: &[TokenizedExample],
        callback: &dyn EvalCallback,
        progress: &dyn ProgressReporter,
    ) -> Result<TrainOutcome> {
        if train.is_empty() {
            return Err(ClassifierError::Validation(
                "training set is empty".to_string(),
            ));
        }
        if validation.is_empty() {
            return Err(ClassifierError::Validation(
                "validation set is empty".to_string(),
            ));
        }

        let params = ParamsAdamW {
            lr: self.args.learning_rate,
            weight_decay: self.args.weight_decay,
            ..ParamsAdamW::default()
        };
        let mut optimizer = AdamW::new(self.model.trainable_vars(), params)?;
        let mut rng = StdRng::seed_from_u64(self.args.seed);
        let mut order: Vec<usize> = (0..train.len()).collect();

        let steps_per_epoch = train.len().div_ceil(self.args.batch_size);
        let total_steps = steps_per_epoch * self.args.epoch_count;
        let checkpoint_dir = self.args.best_checkpoint_dir();
        let greater_is_better = self.args.greater_is_better();

        tracing::info!(
            train = train.len(),
            validation = validation.len(),
            epochs = self.args.epoch_count,
            steps_per_epoch,
            metric = %self.args.metric_for_best_model,
            "Starting training"
        );

        let mut history = Vec::with_capacity(self.args.epoch_count);
        let mut best: Option<(usize, f64)> = None;
        let mut global_step = 0usize;

        for epoch in 1..=self.args.epoch_count {
            order.shuffle(&mut rng);

            let mut epoch_loss = 0.0;
            let mut batches = 0usize;
            for chunk in order.chunks(self.args.batch_size) {
                let examples: Vec<&TokenizedExample> = chunk.iter().map(|&i| &train[i]).collect();
                let batch = self.collator.collate(&examples)?;
                let tensors = batch.to_tensors(self.model.device())?;

                let logits = self.model.forward(&tensors.input_ids, &tensors.attention_mask, true)?;
                let loss = self.loss.compute(&logits, &tensors.labels)?;
                optimizer.backward_step(&loss)?;

                epoch_loss += f64::from(loss.to_scalar::<f32>()?);
                batches += 1;
                global_step += 1;
                progress.step(
                    global_step,
                    total_steps,
                    &format!("epoch {epoch} loss {:.4}", epoch_loss / batches as f64),
                );
            }
            let train_loss = epoch_loss / batches.max(1) as f64;

            let (prediction, eval_loss) = self.predict(validation)?;
            let mut metrics = callback.on_evaluate(epoch, &prediction)?;
            metrics.insert(EVAL_LOSS.to_string(), eval_loss);

            let monitored = *metrics.get(&self.args.metric_for_best_model).ok_or_else(|| {
                ClassifierError::Config(format!(
                    "metric_for_best_model '{}' not among evaluation metrics {:?}",
                    self.args.metric_for_best_model,
                    metrics.keys().collect::<Vec<_>>()
                ))
            })?;

            tracing::info!(epoch, train_loss, eval_loss, ?metrics, "Epoch completed");

            let improved = match best {
                None => true,
                Some((_, previous)) => is_improvement(monitored, previous, greater_is_better),
            };
            if improved {
                self.model.save_adapter(&checkpoint_dir)?;
                tracing::info!(epoch, metric = monitored, "New best checkpoint");
                best = Some((epoch, monitored));
            }

            history.push(EpochSummary {
                epoch,
                train_loss,
                eval_loss,
                metrics,
            });
        }
        progress.finish("training complete");

        let (best_epoch, best_metric) = best.ok_or_else(|| {
            ClassifierError::Validation("no epoch produced a checkpoint".to_string())
        })?;

        if self.args.load_best_model_at_end {
            self.load_checkpoint(&checkpoint_dir)?;
            tracing::info!(best_epoch, best_metric, "Restored best checkpoint");
        }

        Ok(TrainOutcome {
            history,
            best_epoch,
            best_metric,
        })
    }

    /// Run the model over `examples` in order without dropout.
    pub fn predict(&self, examples: &[TokenizedExample]) -> Result<(EvalPrediction, f64)> {
        predict(
            &self.model,
            self.loss.as_ref(),
            &self.collator,
            examples,
            self.args.eval_batch_size,
        )
    }

    fn load_checkpoint(&mut self, dir: &Path) -> Result<()> {
        self.model.load_adapter(dir)
    }
}

/// Forward `examples` through `model` in batches of `batch_size`, in order
/// and without dropout.
///
/// Returns the stacked logits with their labels and the mean loss per
/// example.
pub fn predict<M: ClassifierModel + ?Sized>(
    model: &M,
    loss: &dyn LossFn,
    collator: &BatchCollator,
    examples: &[TokenizedExample],
    batch_size: usize,
) -> Result<(EvalPrediction, f64)> {
    if batch_size == 0 {
        return Err(ClassifierError::Config("batch size must be > 0".to_string()));
    }
    let num_labels = model.num_labels();
    let mut logits: Vec<f32> = Vec::with_capacity(examples.len() * num_labels);
    let mut labels: Vec<u8> = Vec::with_capacity(examples.len() * num_labels);
    let mut loss_sum = 0.0;

    for chunk in examples.chunks(batch_size) {
        let batch = collator.collate_slice(chunk)?;
        let tensors = batch.to_tensors(model.device())?;
        let out = model.forward(&tensors.input_ids, &tensors.attention_mask, false)?;
        let batch_loss = loss.compute(&out, &tensors.labels)?;
        loss_sum += f64::from(batch_loss.to_scalar::<f32>()?) * batch.batch_size as f64;

        logits.extend(out.flatten_all()?.to_vec1::<f32>()?);
        labels.extend(batch.labels.iter().flatten().copied());
    }

    let shape = (examples.len(), num_labels);
    let to_shape_err = |e: ndarray::ShapeError| ClassifierError::Validation(e.to_string());
    let prediction = EvalPrediction::new(
        Array2::from_shape_vec(shape, logits).map_err(to_shape_err)?,
        Array2::from_shape_vec(shape, labels).map_err(to_shape_err)?,
    )?;
    let mean_loss = loss_sum / examples.len().max(1) as f64;
    Ok((prediction, mean_loss))
}

fn is_improvement(candidate: f64, previous: f64, greater_is_better: bool) -> bool {
    if greater_is_better {
        candidate > previous
    } else {
        candidate < previous
    }
}
