//! Per-label positive weights for the multilabel loss.

use candle_core::{Device, Tensor};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::data::record::{label_matrix, Record};
use crate::error::Result;

/// Which records label weights are computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightSource {
    /// Training partition only, so validation statistics never leak into the loss.
    #[default]
    Train,
    /// Every record before splitting.
    Full,
}

/// One positive weight per label: `1 - column_sum / total_sum`.
///
/// Labels with fewer positives get weights closer to 1. A label with
/// positives always weighs less than 1; a label with none weighs exactly 1,
/// which is also every weight of a matrix with no positives at all.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelWeights(Vec<f32>);

impl LabelWeights {
    pub fn from_matrix(labels: &Array2<u8>) -> Self {
        let column_sums = labels.map(|&v| v as f64).sum_axis(Axis(0));
        let total: f64 = column_sums.sum();
        if total == 0.0 {
            return Self(vec![1.0; labels.ncols()]);
        }
        Self(
            column_sums
                .iter()
                .map(|&c| (1.0 - c / total) as f32)
                .collect(),
        )
    }

    /// Weights restored from saved adapter metadata.
    pub fn from_vec(weights: Vec<f32>) -> Self {
        Self(weights)
    }

    pub fn from_records(records: &[Record], num_labels: usize) -> Result<Self> {
        Ok(Self::from_matrix(&label_matrix(records, num_labels)?))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Upload the weights as a `(num_labels,)` f32 tensor.
    pub fn to_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        Tensor::from_slice(&self.0, self.0.len(), device)
    }
}
