//! Batch collation: right-pad variable-length examples into uniform grids.

use candle_core::{DType, Device, Tensor};

use crate::error::{ClassifierError, Result};
use crate::tokenize::TokenizedExample;

/// Pads token sequences per batch. Holds only the pad id, so it is cheap to
/// clone and safe to share between threads.
#[derive(Debug, Clone, Copy)]
pub struct BatchCollator {
    pub pad_token_id: u32,
}

/// A collated batch ready for the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Input token IDs [batch_size, seq_len].
    pub input_ids: Vec<Vec<u32>>,
    /// Attention mask [batch_size, seq_len].
    pub attention_mask: Vec<Vec<u32>>,
    /// Multi-hot labels [batch_size, num_labels].
    pub labels: Vec<Vec<u8>>,
    pub batch_size: usize,
    pub seq_len: usize,
}

/// Tensor view of a [`Batch`] on a device.
#[derive(Debug, Clone)]
pub struct BatchTensors {
    /// `u32` ids, shape `(batch, seq_len)`.
    pub input_ids: Tensor,
    /// `u32` mask, shape `(batch, seq_len)`.
    pub attention_mask: Tensor,
    /// `f32` labels, shape `(batch, num_labels)`.
    pub labels: Tensor,
}

impl BatchCollator {
    pub fn new(pad_token_id: u32) -> Self {
        Self { pad_token_id }
    }

    /// Collate examples into one batch.
    ///
    /// Every row is padded on the right to the longest sequence in the batch:
    /// ids with `pad_token_id`, masks with 0.
    pub fn collate(&self, examples: &[&TokenizedExample]) -> Result<Batch> {
        let batch_size = examples.len();
        let seq_len = examples.iter().map(|e| e.input_ids.len()).max().unwrap_or(0);
        let num_labels = examples.first().map_or(0, |e| e.labels.len());

        let mut input_ids = vec![vec![self.pad_token_id; seq_len]; batch_size];
        let mut attention_mask = vec![vec![0u32; seq_len]; batch_size];
        let mut labels = Vec::with_capacity(batch_size);

        for (i, example) in examples.iter().enumerate() {
            if example.labels.len() != num_labels {
                return Err(ClassifierError::Validation(format!(
                    "example {} has {} labels, batch expects {}",
                    example.id,
                    example.labels.len(),
                    num_labels
                )));
            }
            if example.attention_mask.len() != example.input_ids.len() {
                return Err(ClassifierError::Validation(format!(
                    "example {} has mismatched ids/mask lengths",
                    example.id
                )));
            }
            let len = example.input_ids.len();
            input_ids[i][..len].copy_from_slice(&example.input_ids);
            attention_mask[i][..len].copy_from_slice(&example.attention_mask);
            labels.push(example.labels.clone());
        }

        Ok(Batch {
            input_ids,
            attention_mask,
            labels,
            batch_size,
            seq_len,
        })
    }

    /// Collate an owned slice of examples, e.g. a contiguous chunk of a dataset.
    pub fn collate_slice(&self, examples: &[TokenizedExample]) -> Result<Batch> {
        let refs: Vec<&TokenizedExample> = examples.iter().collect();
        self.collate(&refs)
    }
}

impl Batch {
    pub fn num_labels(&self) -> usize {
        self.labels.first().map_or(0, |l| l.len())
    }

    /// Move the batch onto `device` as tensors.
    pub fn to_tensors(&self, device: &Device) -> candle_core::Result<BatchTensors> {
        let ids: Vec<u32> = self.input_ids.iter().flatten().copied().collect();
        let mask: Vec<u32> = self.attention_mask.iter().flatten().copied().collect();
        let labels: Vec<u8> = self.labels.iter().flatten().copied().collect();

        let shape = (self.batch_size, self.seq_len);
        Ok(BatchTensors {
            input_ids: Tensor::from_vec(ids, shape, device)?,
            attention_mask: Tensor::from_vec(mask, shape, device)?,
            labels: Tensor::from_vec(labels, (self.batch_size, self.num_labels()), device)?
                .to_dtype(DType::F32)?,
        })
    }
}
