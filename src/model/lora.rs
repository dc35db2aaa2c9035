//! Low-rank adapters over frozen, quantized projections.
//!
//! ```text
//!   x -> [W (frozen, quantized)] ------------------------------+
//!    \-> dropout -> [A] -> [B] * alpha/r -----------------------+-> y
//! ```
//!
//! `A` and `B` are the only trainable tensors of a projection. `B` starts at
//! zero so an adapted layer initially equals its base layer.

use std::sync::Arc;

use candle_core::quantized::{GgmlDType, QTensor};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Init, VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};

/// Projection names accepted in `target_modules`, with their GGUF tensor names.
pub const PROJECTIONS: &[(&str, &str)] = &[
    ("q_proj", "attn_q"),
    ("k_proj", "attn_k"),
    ("v_proj", "attn_v"),
    ("o_proj", "attn_output"),
    ("gate_proj", "ffn_gate"),
    ("up_proj", "ffn_up"),
    ("down_proj", "ffn_down"),
];

/// Low-rank adapter hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoraConfig {
    /// Rank of the `A`/`B` matrices.
    pub rank: usize,
    /// Scaling numerator; the update is multiplied by `alpha / rank`.
    pub alpha: f64,
    /// Dropout applied to the adapter input during training.
    pub dropout: f32,
    /// Projections that receive an adapter, by their `*_proj` names.
    pub target_modules: Vec<String>,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            rank: 16,
            alpha: 8.0,
            dropout: 0.05,
            target_modules: ["q_proj", "k_proj", "v_proj", "o_proj"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl LoraConfig {
    pub fn scaling(&self) -> f64 {
        self.alpha / self.rank as f64
    }

    pub fn validate(&self) -> Result<()> {
        if self.rank == 0 {
            return Err(ClassifierError::Config("lora.rank must be > 0".to_string()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ClassifierError::Config(format!(
                "lora.dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if self.target_modules.is_empty() {
            return Err(ClassifierError::Config(
                "lora.target_modules must name at least one projection".to_string(),
            ));
        }
        for module in &self.target_modules {
            if !PROJECTIONS.iter().any(|(name, _)| name == module) {
                return Err(ClassifierError::Config(format!(
                    "unknown lora target module '{}'",
                    module
                )));
            }
        }
        Ok(())
    }

    /// Whether the projection stored under the GGUF name `tensor` is adapted.
    pub fn targets(&self, tensor: &str) -> bool {
        PROJECTIONS
            .iter()
            .any(|(name, gguf)| *gguf == tensor && self.target_modules.iter().any(|m| m == name))
    }
}

/// Storage precision for frozen projections that arrive unquantized.
///
/// Projections already quantized in the checkpoint are kept as they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantization {
    /// 4-bit blocks of 32 weights.
    #[default]
    Q4_0,
    /// 8-bit blocks of 32 weights.
    Q8_0,
    /// Keep the checkpoint precision.
    None,
}

impl Quantization {
    fn ggml_dtype(self) -> Option<GgmlDType> {
        match self {
            Quantization::Q4_0 => Some(GgmlDType::Q4_0),
            Quantization::Q8_0 => Some(GgmlDType::Q8_0),
            Quantization::None => None,
        }
    }
}

/// A frozen linear layer without bias, `y = x W^T`.
///
/// The weight stays in its block format and is expanded for each forward
/// pass, so gradients flow through to the input while `W` itself is never
/// tracked.
#[derive(Debug, Clone)]
pub struct FrozenLinear {
    weight: Arc<QTensor>,
    in_features: usize,
    out_features: usize,
}

impl FrozenLinear {
    pub fn new(weight: Arc<QTensor>, quantization: Quantization) -> Result<Self> {
        let (out_features, in_features) = weight.shape().dims2()?;
        let weight = requantize(weight, quantization, in_features)?;
        Ok(Self {
            weight,
            in_features,
            out_features,
        })
    }

    pub fn dtype(&self) -> GgmlDType {
        self.weight.dtype()
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let w = self.weight.dequantize(x.device())?;
        x.broadcast_matmul(&w.t()?)
    }
}

fn requantize(
    weight: Arc<QTensor>,
    quantization: Quantization,
    in_features: usize,
) -> Result<Arc<QTensor>> {
    let is_float = matches!(
        weight.dtype(),
        GgmlDType::F32 | GgmlDType::F16 | GgmlDType::BF16
    );
    let target = match quantization.ggml_dtype() {
        Some(target) if is_float => target,
        _ => return Ok(weight),
    };
    if in_features % target.block_size() != 0 {
        tracing::warn!(
            in_features,
            block = target.block_size(),
            "Projection width not divisible by quantization block; keeping checkpoint precision"
        );
        return Ok(weight);
    }
    let dense = weight.dequantize(&weight.device())?;
    Ok(Arc::new(QTensor::quantize(&dense, target)?))
}

#[derive(Debug, Clone)]
struct Adapter {
    a: Tensor,
    b: Tensor,
    scaling: f64,
    dropout: f32,
}

/// A frozen projection with an optional trainable low-rank update.
#[derive(Debug, Clone)]
pub struct LoraLinear {
    base: FrozenLinear,
    adapter: Option<Adapter>,
}

impl LoraLinear {
    /// Projection with no adapter.
    pub fn frozen(base: FrozenLinear) -> Self {
        Self {
            base,
            adapter: None,
        }
    }

    /// Attach an adapter registered in `varmap` as `{name}.lora_a` / `{name}.lora_b`.
    ///
    /// `A` is drawn from a Kaiming-uniform range using `rng`; `B` is zero.
    pub fn adapted(
        base: FrozenLinear,
        name: &str,
        config: &LoraConfig,
        varmap: &mut VarMap,
        rng: &mut StdRng,
        device: &Device,
    ) -> Result<Self> {
        let (rank, in_features, out_features) =
            (config.rank, base.in_features, base.out_features);
        let a_name = format!("{name}.lora_a");
        let b_name = format!("{name}.lora_b");

        let vb = VarBuilder::from_varmap(varmap, DType::F32, device);
        let a = vb.get_with_hints((rank, in_features), &a_name, Init::Const(0.0))?;
        let b = vb.get_with_hints((out_features, rank), &b_name, Init::Const(0.0))?;
        let bound = 1.0 / (in_features as f32).sqrt();
        varmap.set_one(&a_name, uniform((rank, in_features), bound, rng, device)?)?;

        Ok(Self {
            base,
            adapter: Some(Adapter {
                a,
                b,
                scaling: config.scaling(),
                dropout: config.dropout,
            }),
        })
    }

    pub fn is_adapted(&self) -> bool {
        self.adapter.is_some()
    }

    pub fn base(&self) -> &FrozenLinear {
        &self.base
    }

    pub fn forward(&self, x: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let base = self.base.forward(x)?;
        let Some(adapter) = &self.adapter else {
            return Ok(base);
        };
        let input = if train && adapter.dropout > 0.0 {
            candle_nn::ops::dropout(x, adapter.dropout)?
        } else {
            x.clone()
        };
        let delta = input
            .broadcast_matmul(&adapter.a.t()?)?
            .broadcast_matmul(&adapter.b.t()?)?
            .affine(adapter.scaling, 0.0)?;
        base.add(&delta)
    }
}

/// Uniform samples in `[-bound, bound]` from a seeded generator.
pub fn uniform(
    shape: (usize, usize),
    bound: f32,
    rng: &mut StdRng,
    device: &Device,
) -> candle_core::Result<Tensor> {
    let values: Vec<f32> = (0..shape.0 * shape.1)
        .map(|_| rng.gen_range(-bound..=bound))
        .collect();
    Tensor::from_vec(values, shape, device)
}
