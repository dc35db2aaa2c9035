//! Stratified train/validation splitting for multi-label data.
//!
//! Uses iterative stratification (Sechidis, Tsoumakas & Vlahavas, 2011):
//! the rarest label is placed first, each of its rows going to the partition
//! that still wants the most positives of that label. This keeps rare labels
//! represented on both sides, which a plain random split does not.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::data::record::Record;
use crate::error::{ClassifierError, Result};

/// Fold index of the training partition.
pub const TRAIN_FOLD: usize = 0;
/// Fold index of the validation partition.
pub const VALIDATION_FOLD: usize = 1;

const TIE_EPSILON: f64 = 1e-9;

/// A label with too few positives to appear on both sides of the split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SplitImbalance {
    pub label: usize,
    pub positives: usize,
}

/// Disjoint train/validation partitions of a record set.
#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub train: Vec<Record>,
    pub validation: Vec<Record>,
    /// Labels that could not be guaranteed in both partitions.
    pub imbalanced: Vec<SplitImbalance>,
}

impl DatasetSplit {
    pub fn total(&self) -> usize {
        self.train.len() + self.validation.len()
    }
}

/// Split `records` into train and validation sets, stratified over labels.
///
/// Relative order of records is preserved inside each partition, so a caller
/// that shuffled beforehand keeps that order.
pub fn stratified_split(
    records: Vec<Record>,
    num_labels: usize,
    validation_fraction: f64,
    rng: &mut StdRng,
) -> Result<DatasetSplit> {
    if validation_fraction.is_nan() || validation_fraction <= 0.0 || validation_fraction >= 1.0 {
        return Err(ClassifierError::Config(format!(
            "validation_fraction must be in (0, 1), got {}",
            validation_fraction
        )));
    }

    let rows: Vec<&[u8]> = records.iter().map(|r| r.labels.as_slice()).collect();
    if let Some(bad) = records.iter().find(|r| r.labels.len() != num_labels) {
        return Err(ClassifierError::Validation(format!(
            "record {} has {} labels, expected {}",
            bad.id,
            bad.labels.len(),
            num_labels
        )));
    }

    let imbalanced = find_imbalanced_labels(&rows, num_labels);
    for item in &imbalanced {
        tracing::warn!(
            label = item.label,
            positives = item.positives,
            "label has fewer than 2 positive examples; stratification cannot place it in both partitions"
        );
    }

    let fractions = [1.0 - validation_fraction, validation_fraction];
    let folds = iterative_stratification(&rows, num_labels, &fractions, rng);

    let mut train = Vec::new();
    let mut validation = Vec::new();
    for (record, fold) in records.into_iter().zip(folds) {
        if fold == TRAIN_FOLD {
            train.push(record);
        } else {
            validation.push(record);
        }
    }

    tracing::info!(
        train = train.len(),
        validation = validation.len(),
        "Stratified split complete"
    );

    Ok(DatasetSplit {
        train,
        validation,
        imbalanced,
    })
}

/// Labels with fewer than two positive rows.
pub fn find_imbalanced_labels(rows: &[&[u8]], num_labels: usize) -> Vec<SplitImbalance> {
    (0..num_labels)
        .filter_map(|label| {
            let positives = rows.iter().filter(|row| row[label] == 1).count();
            (positives < 2).then_some(SplitImbalance { label, positives })
        })
        .collect()
}

/// Assign every row to a fold, returning one fold index per row.
///
/// `fractions` are the desired share of rows per fold and should sum to 1.
pub fn iterative_stratification(
    rows: &[&[u8]],
    num_labels: usize,
    fractions: &[f64],
    rng: &mut StdRng,
) -> Vec<usize> {
    let n = rows.len();
    let n_folds = fractions.len();

    let label_totals: Vec<usize> = (0..num_labels)
        .map(|label| rows.iter().filter(|row| row[label] == 1).count())
        .collect();

    let mut desired_samples: Vec<f64> = fractions.iter().map(|f| f * n as f64).collect();
    let mut desired_labels: Vec<Vec<f64>> = fractions
        .iter()
        .map(|f| label_totals.iter().map(|&c| f * c as f64).collect())
        .collect();

    let mut assignment: Vec<Option<usize>> = vec![None; n];

    loop {
        // Rarest label among rows that are still unassigned.
        let remaining: Vec<usize> = (0..num_labels)
            .map(|label| {
                (0..n)
                    .filter(|&i| assignment[i].is_none() && rows[i][label] == 1)
                    .count()
            })
            .collect();
        let Some(label) = (0..num_labels)
            .filter(|&l| remaining[l] > 0)
            .min_by_key(|&l| remaining[l])
        else {
            break;
        };

        let candidates: Vec<usize> = (0..n)
            .filter(|&i| assignment[i].is_none() && rows[i][label] == 1)
            .collect();

        for row_idx in candidates {
            let by_label: Vec<f64> = (0..n_folds).map(|f| desired_labels[f][label]).collect();
            let tied = argmax_all(&by_label, 0..n_folds);
            let fold = if tied.len() == 1 {
                tied[0]
            } else {
                let by_samples = argmax_all(&desired_samples, tied.iter().copied());
                pick(&by_samples, rng)
            };

            assignment[row_idx] = Some(fold);
            desired_samples[fold] -= 1.0;
            for (l, &value) in rows[row_idx].iter().enumerate() {
                if value == 1 {
                    desired_labels[fold][l] -= 1.0;
                }
            }
        }
    }

    // Rows without any positive label fill the remaining demand.
    for slot in assignment.iter_mut().filter(|slot| slot.is_none()) {
        let tied = argmax_all(&desired_samples, 0..n_folds);
        let fold = pick(&tied, rng);
        *slot = Some(fold);
        desired_samples[fold] -= 1.0;
    }

    assignment
        .into_iter()
        .map(|slot| slot.unwrap_or(TRAIN_FOLD))
        .collect()
}

/// Indices (restricted to `among`) whose value equals the maximum.
fn argmax_all(values: &[f64], among: impl Iterator<Item = usize> + Clone) -> Vec<usize> {
    let best = among
        .clone()
        .map(|i| values[i])
        .fold(f64::NEG_INFINITY, f64::max);
    among
        .filter(|&i| (values[i] - best).abs() < TIE_EPSILON)
        .collect()
}

fn pick(choices: &[usize], rng: &mut StdRng) -> usize {
    choices.choose(rng).copied().unwrap_or(TRAIN_FOLD)
}
