//! Run configuration.
//!
//! Resolution order (first match wins, CLI flags are applied afterwards):
//! 1. `--config <file>` given on the command line
//! 2. `MULTILABEL_LORA_CONFIG` env var (JSON)
//! 3. `./train.toml` if present
//! 4. Defaults

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::WeightSource;
use crate::error::{ClassifierError, Result};
use crate::eval::EvalOptions;
use crate::model::{resolve_backbone, LoraConfig, Quantization};
use crate::tokenize::TokenizationPolicy;
use crate::train::TrainingArgs;

pub const CONFIG_ENV: &str = "MULTILABEL_LORA_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "train.toml";

/// Input data and split settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// CSV with header `id,title,abstract,label_1..label_k`.
    pub path: PathBuf,
    pub validation_fraction: f64,
    /// Seeds the shuffle and the split tie-breaking.
    pub seed: u64,
    pub weights_from: WeightSource,
    pub tokenization_policy: TokenizationPolicy,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("train.csv"),
            validation_fraction: 0.1,
            seed: 0,
            weights_from: WeightSource::default(),
            tokenization_policy: TokenizationPolicy::default(),
        }
    }
}

/// Tokenizer and backbone settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Local `tokenizer.json`, a directory containing one, or a Hub repo id.
    pub tokenizer: String,
    /// Padding token; defaults to the tokenizer's end-of-sequence token.
    pub pad_token: Option<String>,
    /// Local GGUF file, a directory containing `backbone_file`, or a Hub repo id.
    pub backbone: String,
    /// GGUF file name inside a directory or Hub repo.
    pub backbone_file: String,
    pub quantization: Quantization,
    /// Seeds adapter and score head initialization.
    pub seed: u64,
    pub prefer_gpu: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            tokenizer: "mistralai/Mistral-7B-v0.1".to_string(),
            pad_token: None,
            backbone: "TheBloke/Mistral-7B-v0.1-GGUF".to_string(),
            backbone_file: "mistral-7b-v0.1.Q4_0.gguf".to_string(),
            quantization: Quantization::default(),
            seed: 0,
            prefer_gpu: true,
        }
    }
}

impl ModelConfig {
    /// Local path of the backbone, downloading it first if needed.
    pub fn resolve_backbone(&self) -> anyhow::Result<PathBuf> {
        resolve_backbone(&self.backbone, &self.backbone_file)
    }
}

/// Where artifacts go, relative to `training.output_dir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub adapter_name: String,
    pub write_reports: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            adapter_name: "multilabel_adapter".to_string(),
            write_reports: true,
        }
    }
}

/// Full configuration of a fine-tuning run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub data: DataConfig,
    pub model: ModelConfig,
    pub lora: LoraConfig,
    pub training: TrainingArgs,
    pub eval: EvalOptions,
    pub output: OutputConfig,
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        let fraction = self.data.validation_fraction;
        if fraction.is_nan() || fraction <= 0.0 || fraction >= 1.0 {
            return Err(ClassifierError::Config(format!(
                "data.validation_fraction must be in (0, 1), got {}",
                fraction
            )));
        }
        if self.model.backbone.trim().is_empty() {
            return Err(ClassifierError::Config(
                "model.backbone must not be empty".to_string(),
            ));
        }
        if self.output.adapter_name.trim().is_empty() {
            return Err(ClassifierError::Config(
                "output.adapter_name must not be empty".to_string(),
            ));
        }
        self.lora.validate()?;
        self.training.validate()
    }

    /// Set every seed (data, model init, epoch shuffle) at once.
    pub fn set_seed(&mut self, seed: u64) {
        self.data.seed = seed;
        self.model.seed = seed;
        self.training.seed = seed;
    }

    pub fn adapter_dir(&self) -> PathBuf {
        self.training.output_dir.join(&self.output.adapter_name)
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.training.output_dir.join("reports")
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| {
            ClassifierError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }
}

/// Load configuration from the process environment and working directory.
pub fn load_config(explicit: Option<&Path>) -> Result<TrainConfig> {
    let env_json = std::env::var(CONFIG_ENV).ok();
    resolve_config(explicit, env_json.as_deref(), Path::new(DEFAULT_CONFIG_FILE))
}

/// Resolve configuration from explicit inputs.
///
/// An explicit file that fails to load is an error. A malformed env value or
/// default file is logged and skipped.
pub fn resolve_config(
    explicit: Option<&Path>,
    env_json: Option<&str>,
    default_file: &Path,
) -> Result<TrainConfig> {
    if let Some(path) = explicit {
        let config = TrainConfig::from_toml_file(path)?;
        info!("Loaded config from {}", path.display());
        return Ok(config);
    }

    if let Some(json) = env_json {
        match serde_json::from_str::<TrainConfig>(json) {
            Ok(config) => {
                info!("Loaded config from {} env", CONFIG_ENV);
                return Ok(config);
            }
            Err(e) => {
                tracing::warn!("Failed to parse {}: {}. Ignoring.", CONFIG_ENV, e);
            }
        }
    }

    if default_file.exists() {
        match TrainConfig::from_toml_file(default_file) {
            Ok(config) => {
                info!("Loaded config from {}", default_file.display());
                return Ok(config);
            }
            Err(e) => {
                tracing::warn!("{}. Using defaults.", e);
            }
        }
    }

    Ok(TrainConfig::default())
}
