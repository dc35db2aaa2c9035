//! Sequence classifier over a Llama-family decoder.
//!
//! ```text
//!   ids -> embedding -> N x [rms_norm -> attention(q,k,v,o) -> +
//!                            rms_norm -> swiglu mlp -> +] -> rms_norm
//!       -> hidden state of the last non-pad token -> score -> logits
//! ```
//!
//! Backbone weights come from a GGUF checkpoint and stay frozen. Adapters sit
//! on the projections named in [`LoraConfig::target_modules`]; they and the
//! score head are the only trainable tensors.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Module, Tensor, Var, D};
use candle_nn::{Embedding, Init, Linear, VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};
use crate::model::gguf::{BackboneWeights, DecoderConfig};
use crate::model::lora::{uniform, FrozenLinear, LoraConfig, LoraLinear, Quantization};
use crate::model::ClassifierModel;

/// File holding the trainable weights inside an adapter directory.
pub const ADAPTER_WEIGHTS_FILE: &str = "adapter_model.safetensors";
/// File holding adapter metadata inside an adapter directory.
pub const ADAPTER_CONFIG_FILE: &str = "adapter_config.json";

/// Additive bias for masked attention scores. Finite so rows with no visible
/// key still normalize.
const MASKED: f32 = -1e9;

/// Metadata saved next to adapter weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterMetadata {
    pub lora: LoraConfig,
    pub decoder: DecoderConfig,
    /// GGUF file the adapter was trained against.
    pub backbone_path: Option<PathBuf>,
    pub quantization: Quantization,
    pub num_labels: usize,
    pub pad_token_id: Option<u32>,
    #[serde(default)]
    pub label_names: Vec<String>,
    /// Per-label loss weights used during training.
    #[serde(default)]
    pub label_weights: Option<Vec<f32>>,
    pub seed: u64,
}

impl AdapterMetadata {
    pub fn read(dir: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(dir.join(ADAPTER_CONFIG_FILE))?;
        Ok(serde_json::from_str(&contents)?)
    }
}

#[derive(Debug, Clone)]
struct RmsNorm {
    weight: Tensor,
    eps: f64,
}

impl RmsNorm {
    fn load(vb: &candle_transformers::quantized_var_builder::VarBuilder, size: usize, name: &str, eps: f64) -> Result<Self> {
        let weight = vb.get(size, name)?.dequantize(vb.device())?;
        Ok(Self { weight, eps })
    }

    /// Composed from primitive ops so it stays differentiable.
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let variance = x.sqr()?.mean_keepdim(D::Minus1)?;
        let inv_rms = (variance + self.eps)?.sqrt()?.recip()?;
        x.broadcast_mul(&inv_rms)?.broadcast_mul(&self.weight)
    }
}

#[derive(Debug, Clone)]
struct Attention {
    q_proj: LoraLinear,
    k_proj: LoraLinear,
    v_proj: LoraLinear,
    o_proj: LoraLinear,
    num_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
}

impl Attention {
    fn forward(
        &self,
        x: &Tensor,
        rope: &(Tensor, Tensor),
        bias: &Tensor,
        train: bool,
    ) -> candle_core::Result<Tensor> {
        let (batch_size, seq_len, _) = x.dims3()?;

        let q = self.q_proj.forward(x, train)?;
        let k = self.k_proj.forward(x, train)?;
        let v = self.v_proj.forward(x, train)?;

        // (batch, heads, seq_len, head_dim)
        let q = q
            .reshape((batch_size, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let k = k
            .reshape((batch_size, seq_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let v = v
            .reshape((batch_size, seq_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        let (cos, sin) = rope;
        let q = candle_nn::rotary_emb::rope_i_slow(&q, cos, sin)?;
        let k = candle_nn::rotary_emb::rope_i_slow(&k, cos, sin)?;

        let n_rep = self.num_heads / self.num_kv_heads;
        let k = candle_transformers::utils::repeat_kv(k, n_rep)?.contiguous()?;
        let v = candle_transformers::utils::repeat_kv(v, n_rep)?.contiguous()?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?)? * scale)?.broadcast_add(bias)?;
        let weights = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let out = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((batch_size, seq_len, self.num_heads * self.head_dim))?;
        self.o_proj.forward(&out, train)
    }
}

#[derive(Debug, Clone)]
struct Mlp {
    gate_proj: LoraLinear,
    up_proj: LoraLinear,
    down_proj: LoraLinear,
}

impl Mlp {
    fn forward(&self, x: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let gate = candle_nn::ops::silu(&self.gate_proj.forward(x, train)?)?;
        let up = self.up_proj.forward(x, train)?;
        self.down_proj.forward(&(gate * up)?, train)
    }
}

#[derive(Debug, Clone)]
struct DecoderLayer {
    attn_norm: RmsNorm,
    attention: Attention,
    ffn_norm: RmsNorm,
    mlp: Mlp,
}

impl DecoderLayer {
    fn forward(
        &self,
        x: &Tensor,
        rope: &(Tensor, Tensor),
        bias: &Tensor,
        train: bool,
    ) -> candle_core::Result<Tensor> {
        let residual = x;
        let h = self
            .attention
            .forward(&self.attn_norm.forward(x)?, rope, bias, train)?;
        let x = (h + residual)?;
        let h = self.mlp.forward(&self.ffn_norm.forward(&x)?, train)?;
        h + x
    }
}

/// Llama-family decoder with a multi-label classification head.
pub struct LoraDecoderClassifier {
    embedding: Embedding,
    layers: Vec<DecoderLayer>,
    norm: RmsNorm,
    score: Linear,
    varmap: VarMap,
    decoder: DecoderConfig,
    backbone_path: Option<PathBuf>,
    lora: LoraConfig,
    quantization: Quantization,
    seed: u64,
    num_labels: usize,
    pad_token_id: Option<u32>,
    label_names: Vec<String>,
    label_weights: Option<Vec<f32>>,
    device: Device,
}

impl LoraDecoderClassifier {
    /// Build the classifier on top of `backbone`.
    ///
    /// `seed` drives adapter `A` and score head initialization.
    pub fn new(
        backbone: &BackboneWeights,
        lora: &LoraConfig,
        quantization: Quantization,
        num_labels: usize,
        seed: u64,
        device: &Device,
    ) -> Result<Self> {
        lora.validate()?;
        if num_labels == 0 {
            return Err(ClassifierError::Config(
                "classifier needs at least one label".to_string(),
            ));
        }
        let config = &backbone.config;
        if config.num_kv_heads == 0 || config.num_heads % config.num_kv_heads != 0 {
            return Err(ClassifierError::Config(format!(
                "{} attention heads cannot be shared across {} kv heads",
                config.num_heads, config.num_kv_heads
            )));
        }

        let vb = &backbone.vb;
        let hidden = config.hidden_size;
        let kv_width = config.num_kv_heads * config.head_dim();
        let ffn = config.intermediate_size;

        let table = vb
            .get((config.vocab_size, hidden), "token_embd.weight")?
            .dequantize(device)?;
        let embedding = Embedding::new(table, hidden);

        let mut varmap = VarMap::new();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut projection = |block: &candle_transformers::quantized_var_builder::VarBuilder,
                              prefix: &str,
                              name: &str,
                              shape: (usize, usize)|
         -> Result<LoraLinear> {
            let base = FrozenLinear::new(block.get(shape, &format!("{name}.weight"))?, quantization)?;
            if lora.targets(name) {
                LoraLinear::adapted(base, &format!("{prefix}.{name}"), lora, &mut varmap, &mut rng, device)
            } else {
                Ok(LoraLinear::frozen(base))
            }
        };

        let mut layers = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            let prefix = format!("blk.{i}");
            let block = vb.pp(&prefix);
            let attention = Attention {
                q_proj: projection(&block, &prefix, "attn_q", (hidden, hidden))?,
                k_proj: projection(&block, &prefix, "attn_k", (kv_width, hidden))?,
                v_proj: projection(&block, &prefix, "attn_v", (kv_width, hidden))?,
                o_proj: projection(&block, &prefix, "attn_output", (hidden, hidden))?,
                num_heads: config.num_heads,
                num_kv_heads: config.num_kv_heads,
                head_dim: config.head_dim(),
            };
            let mlp = Mlp {
                gate_proj: projection(&block, &prefix, "ffn_gate", (ffn, hidden))?,
                up_proj: projection(&block, &prefix, "ffn_up", (ffn, hidden))?,
                down_proj: projection(&block, &prefix, "ffn_down", (hidden, ffn))?,
            };
            layers.push(DecoderLayer {
                attn_norm: RmsNorm::load(&block, hidden, "attn_norm.weight", config.rms_norm_eps)?,
                attention,
                ffn_norm: RmsNorm::load(&block, hidden, "ffn_norm.weight", config.rms_norm_eps)?,
                mlp,
            });
        }
        let norm = RmsNorm::load(vb, hidden, "output_norm.weight", config.rms_norm_eps)?;

        let score_w = VarBuilder::from_varmap(&varmap, DType::F32, device).get_with_hints(
            (num_labels, hidden),
            "score.weight",
            Init::Const(0.0),
        )?;
        let bound = 1.0 / (hidden as f32).sqrt();
        varmap.set_one("score.weight", uniform((num_labels, hidden), bound, &mut rng, device)?)?;

        tracing::info!(
            architecture = %config.architecture,
            layers = config.num_layers,
            hidden,
            rank = lora.rank,
            targets = ?lora.target_modules,
            num_labels,
            "Built LoRA decoder classifier"
        );

        Ok(Self {
            embedding,
            layers,
            norm,
            score: Linear::new(score_w, None),
            varmap,
            decoder: config.clone(),
            backbone_path: backbone.source.clone(),
            lora: lora.clone(),
            quantization,
            seed,
            num_labels,
            pad_token_id: None,
            label_names: Vec::new(),
            label_weights: None,
            device: device.clone(),
        })
    }

    /// Rebuild a classifier from a directory written by
    /// [`ClassifierModel::save_adapter`], loading the recorded backbone file.
    pub fn from_adapter_dir(dir: &Path, device: &Device) -> Result<Self> {
        let metadata = AdapterMetadata::read(dir)?;
        let path = metadata.backbone_path.as_deref().ok_or_else(|| {
            ClassifierError::Config(format!(
                "adapter in {} does not record its backbone file",
                dir.display()
            ))
        })?;
        let backbone = BackboneWeights::from_file(path, device)?;
        Self::from_adapter_dir_with_backbone(dir, &backbone, device)
    }

    /// Like [`Self::from_adapter_dir`] with an already loaded backbone.
    pub fn from_adapter_dir_with_backbone(
        dir: &Path,
        backbone: &BackboneWeights,
        device: &Device,
    ) -> Result<Self> {
        let metadata = AdapterMetadata::read(dir)?;
        if metadata.decoder != backbone.config {
            return Err(ClassifierError::Config(format!(
                "adapter in {} was trained on a different backbone shape",
                dir.display()
            )));
        }
        let mut model = Self::new(
            backbone,
            &metadata.lora,
            metadata.quantization,
            metadata.num_labels,
            metadata.seed,
            device,
        )?;
        model.load_adapter(dir)?;
        model.pad_token_id = metadata.pad_token_id;
        model.label_names = metadata.label_names;
        model.label_weights = metadata.label_weights;
        Ok(model)
    }

    /// Record label names and training loss weights in saved metadata.
    pub fn set_label_info(&mut self, names: Vec<String>, weights: Vec<f32>) {
        self.label_names = names;
        self.label_weights = Some(weights);
    }

    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    pub fn label_weights(&self) -> Option<&[f32]> {
        self.label_weights.as_deref()
    }

    pub fn metadata(&self) -> AdapterMetadata {
        AdapterMetadata {
            lora: self.lora.clone(),
            decoder: self.decoder.clone(),
            backbone_path: self.backbone_path.clone(),
            quantization: self.quantization,
            num_labels: self.num_labels,
            pad_token_id: self.pad_token_id,
            label_names: self.label_names.clone(),
            label_weights: self.label_weights.clone(),
            seed: self.seed,
        }
    }

    /// Final-norm hidden states, shape `(batch, seq_len, hidden)`.
    fn hidden_states(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        train: bool,
    ) -> candle_core::Result<Tensor> {
        let (_, seq_len) = input_ids.dims2()?;
        if seq_len > self.decoder.context_length {
            candle_core::bail!(
                "sequence of {} tokens exceeds the backbone context of {}",
                seq_len,
                self.decoder.context_length
            );
        }
        let rope = rope_tables(
            seq_len,
            self.decoder.head_dim(),
            self.decoder.rope_theta,
            &self.device,
        )?;
        let bias = attention_bias(attention_mask)?;

        let mut x = self.embedding.forward(input_ids)?;
        for layer in &self.layers {
            x = layer.forward(&x, &rope, &bias, train)?;
        }
        self.norm.forward(&x)
    }
}

impl ClassifierModel for LoraDecoderClassifier {
    fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        train: bool,
    ) -> candle_core::Result<Tensor> {
        let hidden = self.hidden_states(input_ids, attention_mask, train)?;
        let (batch_size, _, width) = hidden.dims3()?;
        let last = last_token_index(input_ids, attention_mask, self.pad_token_id)?;
        let index = last
            .reshape((batch_size, 1, 1))?
            .broadcast_as((batch_size, 1, width))?
            .contiguous()?;
        let pooled = hidden.gather(&index, 1)?.squeeze(1)?;
        self.score.forward(&pooled)
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn num_labels(&self) -> usize {
        self.num_labels
    }

    fn pad_token_id(&self) -> Option<u32> {
        self.pad_token_id
    }

    fn set_pad_token_id(&mut self, pad_token_id: u32) {
        self.pad_token_id = Some(pad_token_id);
    }

    fn trainable_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    fn save_adapter(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        self.varmap.save(dir.join(ADAPTER_WEIGHTS_FILE))?;
        let metadata = serde_json::to_string_pretty(&self.metadata())?;
        std::fs::write(dir.join(ADAPTER_CONFIG_FILE), metadata)?;
        tracing::debug!("Saved adapter to {}", dir.display());
        Ok(())
    }

    fn load_adapter(&mut self, dir: &Path) -> Result<()> {
        self.varmap.load(dir.join(ADAPTER_WEIGHTS_FILE))?;
        Ok(())
    }
}

/// Position of the last token that is attended and not padding, per row.
///
/// A row with no such token pools position 0.
fn last_token_index(
    input_ids: &Tensor,
    attention_mask: &Tensor,
    pad_token_id: Option<u32>,
) -> candle_core::Result<Tensor> {
    let (_, seq_len) = input_ids.dims2()?;
    let device = input_ids.device();
    let mut keep = attention_mask.to_dtype(DType::F32)?;
    if let Some(pad) = pad_token_id {
        let pad = Tensor::full(pad, input_ids.dims(), device)?;
        keep = keep.mul(&input_ids.ne(&pad)?.to_dtype(DType::F32)?)?;
    }
    let positions = Tensor::arange(1u32, seq_len as u32 + 1, device)?
        .to_dtype(DType::F32)?
        .unsqueeze(0)?;
    let last = keep.broadcast_mul(&positions)?.max(1)?;
    (last - 1.0)?.relu()?.to_dtype(DType::U32)
}

/// Causal mask plus key padding, shape `(batch, 1, seq_len, seq_len)`.
fn attention_bias(attention_mask: &Tensor) -> candle_core::Result<Tensor> {
    let (batch_size, seq_len) = attention_mask.dims2()?;
    let device = attention_mask.device();
    let causal: Vec<f32> = (0..seq_len)
        .flat_map(|i| (0..seq_len).map(move |j| if j > i { MASKED } else { 0.0 }))
        .collect();
    let causal = Tensor::from_vec(causal, (1, 1, seq_len, seq_len), device)?;
    let padding = attention_mask
        .to_dtype(DType::F32)?
        .affine(-f64::from(MASKED), f64::from(MASKED))?
        .reshape((batch_size, 1, 1, seq_len))?;
    causal.broadcast_add(&padding)
}

/// Rotary `(cos, sin)` tables of shape `(seq_len, head_dim / 2)`.
fn rope_tables(
    seq_len: usize,
    head_dim: usize,
    theta: f32,
    device: &Device,
) -> candle_core::Result<(Tensor, Tensor)> {
    let inv_freq: Vec<f32> = (0..head_dim)
        .step_by(2)
        .map(|i| 1.0 / theta.powf(i as f32 / head_dim as f32))
        .collect();
    let inv_freq = Tensor::from_vec(inv_freq, (1, head_dim / 2), device)?;
    let positions = Tensor::arange(0u32, seq_len as u32, device)?
        .to_dtype(DType::F32)?
        .reshape((seq_len, 1))?;
    let freqs = positions.matmul(&inv_freq)?;
    Ok((freqs.cos()?, freqs.sin()?))
}
