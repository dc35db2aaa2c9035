//! Weighted binary cross-entropy for multi-label classification.

use candle_core::{Device, Tensor};

use crate::data::LabelWeights;

/// Pluggable training objective.
///
/// The trainer calls this once per batch with raw logits and the `f32`
/// multi-hot label grid, both shaped `(batch, num_labels)`, and
/// backpropagates through the returned scalar.
pub trait LossFn: Send + Sync {
    fn compute(&self, logits: &Tensor, labels: &Tensor) -> candle_core::Result<Tensor>;
}

/// Binary cross-entropy with logits, positive terms scaled per label.
///
/// Per element: `w * y * softplus(-x) + (1 - y) * softplus(x)`, averaged over
/// every element of the batch. This matches `pos_weight` semantics: only the
/// positive term is scaled, so rare labels pull harder when present.
#[derive(Debug, Clone)]
pub struct WeightedBceLoss {
    pos_weight: Tensor,
}

impl WeightedBceLoss {
    pub fn new(weights: &LabelWeights, device: &Device) -> candle_core::Result<Self> {
        Ok(Self {
            pos_weight: weights.to_tensor(device)?,
        })
    }

    pub fn pos_weight(&self) -> &Tensor {
        &self.pos_weight
    }
}

/// `log(1 + exp(x))` without overflow: `max(x, 0) + log(1 + exp(-|x|))`.
pub fn softplus(x: &Tensor) -> candle_core::Result<Tensor> {
    let tail = x.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    x.relu()?.add(&tail)
}

impl LossFn for WeightedBceLoss {
    fn compute(&self, logits: &Tensor, labels: &Tensor) -> candle_core::Result<Tensor> {
        let labels = labels.to_dtype(logits.dtype())?;
        let pos_weight = self.pos_weight.to_dtype(logits.dtype())?;

        // -log(sigmoid(x)) and -log(1 - sigmoid(x))
        let neg_log_p = softplus(&logits.neg()?)?;
        let neg_log_not_p = softplus(logits)?;

        let positive = labels.broadcast_mul(&pos_weight)?.mul(&neg_log_p)?;
        let negative = labels.affine(-1.0, 1.0)?.mul(&neg_log_not_p)?;
        positive.add(&negative)?.mean_all()
    }
}
