//! Frozen decoder weights read from GGUF files.
//!
//! Llama-family checkpoints (Llama, Mistral) share one tensor layout:
//! `token_embd.weight`, `blk.{i}.attn_{q,k,v,output}.weight`,
//! `blk.{i}.ffn_{gate,up,down}.weight`, per-block RMS norms and
//! `output_norm.weight`. Quantized blocks stay quantized in memory.

use std::collections::HashMap;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use anyhow::Context;
use candle_core::quantized::{gguf_file, GgmlDType, QTensor};
use candle_core::{DType, Device, Tensor};
use candle_transformers::quantized_var_builder::VarBuilder;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};

/// Architectures whose GGUF layout the decoder understands.
pub const SUPPORTED_ARCHITECTURES: &[&str] = &["llama", "mistral"];

/// Shape of a Llama-family decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderConfig {
    pub architecture: String,
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_layers: usize,
    pub num_heads: usize,
    pub num_kv_heads: usize,
    pub rms_norm_eps: f64,
    pub rope_theta: f32,
    pub context_length: usize,
}

impl DecoderConfig {
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_heads
    }

    /// Read the decoder shape from GGUF metadata.
    pub fn from_gguf(content: &gguf_file::Content) -> Result<Self> {
        let metadata = &content.metadata;
        let architecture = match metadata.get("general.architecture") {
            Some(gguf_file::Value::String(arch)) => arch.clone(),
            _ => {
                return Err(ClassifierError::Config(
                    "GGUF metadata has no general.architecture".to_string(),
                ))
            }
        };
        if !SUPPORTED_ARCHITECTURES.contains(&architecture.as_str()) {
            return Err(ClassifierError::Config(format!(
                "unsupported backbone architecture '{}', expected one of {:?}",
                architecture, SUPPORTED_ARCHITECTURES
            )));
        }

        let get_usize = |key: &str| -> Option<usize> {
            metadata.get(&format!("{architecture}.{key}")).and_then(|v| match v {
                gguf_file::Value::U32(n) => Some(*n as usize),
                gguf_file::Value::I32(n) => Some(*n as usize),
                gguf_file::Value::U64(n) => Some(*n as usize),
                gguf_file::Value::I64(n) => Some(*n as usize),
                _ => None,
            })
        };
        let get_f64 = |key: &str| -> Option<f64> {
            metadata.get(&format!("{architecture}.{key}")).and_then(|v| match v {
                gguf_file::Value::F32(n) => Some(f64::from(*n)),
                gguf_file::Value::F64(n) => Some(*n),
                _ => None,
            })
        };
        let require = |key: &str| -> Result<usize> {
            get_usize(key).ok_or_else(|| {
                ClassifierError::Config(format!("GGUF metadata is missing {architecture}.{key}"))
            })
        };

        let hidden_size = require("embedding_length")?;
        let num_heads = require("attention.head_count")?;
        let vocab_size = match content.tensor_infos.get("token_embd.weight") {
            Some(info) => info.shape.dims()[0],
            None => require("vocab_size")?,
        };
        if num_heads == 0 || hidden_size % num_heads != 0 {
            return Err(ClassifierError::Config(format!(
                "hidden size {} is not divisible by {} heads",
                hidden_size, num_heads
            )));
        }

        Ok(Self {
            vocab_size,
            hidden_size,
            intermediate_size: require("feed_forward_length")?,
            num_layers: require("block_count")?,
            num_heads,
            num_kv_heads: get_usize("attention.head_count_kv").unwrap_or(num_heads),
            rms_norm_eps: get_f64("attention.layer_norm_rms_epsilon").unwrap_or(1e-5),
            rope_theta: get_f64("rope.freq_base").unwrap_or(10_000.0) as f32,
            context_length: get_usize("context_length").unwrap_or(4096),
            architecture,
        })
    }
}

/// A parsed GGUF checkpoint: decoder shape plus its tensors.
#[derive(Clone)]
pub struct BackboneWeights {
    pub config: DecoderConfig,
    pub vb: VarBuilder,
    /// File the weights came from, recorded in saved adapters.
    pub source: Option<PathBuf>,
}

impl BackboneWeights {
    /// Load a GGUF file from disk.
    pub fn from_file(path: &Path, device: &Device) -> Result<Self> {
        let config = read_config(&mut std::fs::File::open(path)?)?;
        let vb = VarBuilder::from_gguf(path, device)?;
        tracing::info!(
            path = %path.display(),
            architecture = %config.architecture,
            layers = config.num_layers,
            hidden = config.hidden_size,
            vocab = config.vocab_size,
            "Loaded backbone"
        );
        Ok(Self {
            config,
            vb,
            source: Some(path.to_path_buf()),
        })
    }

    /// Load GGUF bytes already in memory.
    pub fn from_buffer(buffer: &[u8], device: &Device) -> Result<Self> {
        let config = read_config(&mut std::io::Cursor::new(buffer))?;
        let vb = VarBuilder::from_gguf_buffer(buffer, device)?;
        Ok(Self {
            config,
            vb,
            source: None,
        })
    }
}

fn read_config<R: Read + Seek>(reader: &mut R) -> Result<DecoderConfig> {
    let content = gguf_file::Content::read(reader)?;
    DecoderConfig::from_gguf(&content)
}

/// Resolve a backbone to a local GGUF path.
///
/// `source` is a `.gguf` file, a directory holding `file`, or a Hub repo id
/// from which `file` is downloaded (cached under `~/.cache/huggingface/hub/`).
pub fn resolve_backbone(source: &str, file: &str) -> anyhow::Result<PathBuf> {
    let path = Path::new(source);
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    if path.is_dir() {
        return Ok(path.join(file));
    }

    tracing::info!("Fetching {} from {}", file, source);
    let api = hf_hub::api::sync::Api::new().context("Failed to initialize HuggingFace Hub API")?;
    api.model(source.to_string())
        .get(file)
        .with_context(|| format!("Failed to download {} from {}", file, source))
}

/// Metadata entries for a GGUF file describing `config`.
pub fn config_metadata(config: &DecoderConfig) -> HashMap<String, gguf_file::Value> {
    let arch = &config.architecture;
    let mut metadata = HashMap::new();
    metadata.insert(
        "general.architecture".to_string(),
        gguf_file::Value::String(arch.clone()),
    );
    let ints = [
        ("embedding_length", config.hidden_size),
        ("feed_forward_length", config.intermediate_size),
        ("block_count", config.num_layers),
        ("attention.head_count", config.num_heads),
        ("attention.head_count_kv", config.num_kv_heads),
        ("context_length", config.context_length),
    ];
    for (key, value) in ints {
        metadata.insert(format!("{arch}.{key}"), gguf_file::Value::U32(value as u32));
    }
    metadata.insert(
        format!("{arch}.attention.layer_norm_rms_epsilon"),
        gguf_file::Value::F32(config.rms_norm_eps as f32),
    );
    metadata.insert(
        format!("{arch}.rope.freq_base"),
        gguf_file::Value::F32(config.rope_theta),
    );
    metadata
}

/// Serialize a randomly initialized checkpoint with the shape of `config`.
///
/// Projections are stored as `projection_dtype`, norms and the embedding
/// table as F32. Useful for smoke runs that should not download a model.
pub fn random_checkpoint(
    config: &DecoderConfig,
    projection_dtype: GgmlDType,
    seed: u64,
) -> Result<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let device = Device::Cpu;
    let h = config.hidden_size;
    let kv = config.num_kv_heads * config.head_dim();
    let ffn = config.intermediate_size;
    let attn_bound = 1.0 / (h as f32).sqrt();
    let ffn_bound = 1.0 / (ffn as f32).sqrt();

    let mut random = |shape: (usize, usize), bound: f32| -> candle_core::Result<Tensor> {
        let values: Vec<f32> = (0..shape.0 * shape.1)
            .map(|_| rng.gen_range(-bound..=bound))
            .collect();
        Tensor::from_vec(values, shape, &device)
    };

    let mut tensors: Vec<(String, QTensor)> = Vec::new();
    let embedding = random((config.vocab_size, h), 1.0)?;
    tensors.push(("token_embd.weight".to_string(), QTensor::quantize(&embedding, GgmlDType::F32)?));
    let ones = Tensor::ones(h, DType::F32, &device)?;
    for i in 0..config.num_layers {
        for norm in ["attn_norm", "ffn_norm"] {
            tensors.push((format!("blk.{i}.{norm}.weight"), QTensor::quantize(&ones, GgmlDType::F32)?));
        }
        let projections = [
            ("attn_q", (h, h), attn_bound),
            ("attn_k", (kv, h), attn_bound),
            ("attn_v", (kv, h), attn_bound),
            ("attn_output", (h, h), attn_bound),
            ("ffn_gate", (ffn, h), attn_bound),
            ("ffn_up", (ffn, h), attn_bound),
            ("ffn_down", (h, ffn), ffn_bound),
        ];
        for (name, shape, bound) in projections {
            let weight = random(shape, bound)?;
            tensors.push((format!("blk.{i}.{name}.weight"), QTensor::quantize(&weight, projection_dtype)?));
        }
    }
    tensors.push(("output_norm.weight".to_string(), QTensor::quantize(&ones, GgmlDType::F32)?));

    let metadata = config_metadata(config);
    let metadata: Vec<(&str, &gguf_file::Value)> =
        metadata.iter().map(|(k, v)| (k.as_str(), v)).collect();
    let tensors: Vec<(&str, &QTensor)> = tensors.iter().map(|(k, v)| (k.as_str(), v)).collect();
    let mut buffer = std::io::Cursor::new(Vec::new());
    gguf_file::write(&mut buffer, &metadata, &tensors)?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn tiny_config() -> DecoderConfig {
        DecoderConfig {
            architecture: "llama".to_string(),
            vocab_size: 64,
            hidden_size: 32,
            intermediate_size: 64,
            num_layers: 2,
            num_heads: 4,
            num_kv_heads: 2,
            rms_norm_eps: 1e-5,
            rope_theta: 10_000.0,
            context_length: 128,
        }
    }

    pub fn tiny_gguf(config: &DecoderConfig, seed: u64) -> Vec<u8> {
        random_checkpoint(config, GgmlDType::Q8_0, seed).unwrap()
    }

    pub fn tiny_backbone(seed: u64) -> BackboneWeights {
        BackboneWeights::from_buffer(&tiny_gguf(&tiny_config(), seed), &Device::Cpu).unwrap()
    }
}
