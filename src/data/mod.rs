//! Dataset loading, shuffling and stratified splitting.

pub mod record;
pub mod split;
pub mod weights;

use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;

pub use record::{format_text, label_matrix, load_records, read_records, LabeledDataset, Record};
pub use split::{stratified_split, DatasetSplit, SplitImbalance};
pub use weights::{LabelWeights, WeightSource};

use crate::error::Result;

/// Shuffle a loaded dataset and split it into train/validation partitions.
///
/// The same seeded generator drives both the shuffle and the split's
/// tie-breaking, so `(dataset, fraction, seed)` fully determines the result.
pub fn shuffle_and_split(
    mut dataset: LabeledDataset,
    validation_fraction: f64,
    seed: u64,
) -> Result<(Vec<String>, DatasetSplit)> {
    let mut rng = StdRng::seed_from_u64(seed);
    dataset.shuffle(&mut rng);
    let num_labels = dataset.num_labels();
    let split = stratified_split(dataset.records, num_labels, validation_fraction, &mut rng)?;
    Ok((dataset.label_names, split))
}

/// Load a CSV from disk, shuffle it and split it.
pub fn load_and_split(
    path: &Path,
    validation_fraction: f64,
    seed: u64,
) -> Result<(Vec<String>, DatasetSplit)> {
    shuffle_and_split(load_records(path)?, validation_fraction, seed)
}
