//! Test harness for filesystem fixtures and a deterministic tokenizer.
//!
//! Provides an isolated working directory per test using tempfile.

use std::path::{Path, PathBuf};

use candle_core::quantized::GgmlDType;
use tempfile::TempDir;

use multilabel_lora::config::TrainConfig;
use multilabel_lora::model::gguf::random_checkpoint;
use multilabel_lora::model::{DecoderConfig, LoraConfig, Quantization};
use multilabel_lora::tokenize::{TextTokenizer, TokenizerError};
use multilabel_lora::ClassifierError;

/// Test harness that owns a temporary directory.
///
/// Everything written through the harness is removed when it is dropped.
pub struct TestHarness {
    pub temp_dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write `contents` to `name` inside the harness directory.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path().join(name);
        std::fs::write(&path, contents).expect("Failed to write fixture");
        path
    }

    /// Write a randomly initialised two-layer llama checkpoint and return its
    /// path.
    pub fn tiny_backbone(&self) -> PathBuf {
        let config = DecoderConfig {
            architecture: "llama".to_string(),
            vocab_size: WhitespaceTokenizer::VOCAB_SIZE,
            hidden_size: 32,
            intermediate_size: 64,
            num_layers: 2,
            num_heads: 4,
            num_kv_heads: 2,
            rms_norm_eps: 1e-5,
            rope_theta: 10_000.0,
            context_length: 512,
        };
        let bytes = random_checkpoint(&config, GgmlDType::Q8_0, 11).expect("Failed to build checkpoint");
        let path = self.path().join("tiny-llama.gguf");
        std::fs::write(&path, bytes).expect("Failed to write checkpoint");
        path
    }

    /// A small, fast configuration pointing at `data` with output in the
    /// harness directory.
    pub fn tiny_config(&self, data: &Path) -> TrainConfig {
        let mut config = TrainConfig::default();
        config.data.path = data.to_path_buf();
        config.data.validation_fraction = 0.25;
        config.model.backbone = self.tiny_backbone().display().to_string();
        config.model.quantization = Quantization::Q4_0;
        config.model.prefer_gpu = false;
        config.lora = LoraConfig {
            rank: 4,
            dropout: 0.0,
            ..LoraConfig::default()
        };
        config.training.epoch_count = 3;
        config.training.batch_size = 4;
        config.training.eval_batch_size = 4;
        config.training.learning_rate = 1e-2;
        config.training.output_dir = self.path().join("out");
        config
    }
}

/// Hashes lowercase words into a fixed vocabulary. Id 0 is padding.
///
/// Text containing [`WhitespaceTokenizer::UNENCODABLE`] fails to encode.
pub struct WhitespaceTokenizer;

impl WhitespaceTokenizer {
    pub const VOCAB_SIZE: usize = 128;
    pub const UNENCODABLE: &'static str = "\u{fffd}";

    fn word_id(word: &str) -> u32 {
        let hash = word
            .to_lowercase()
            .bytes()
            .fold(2166136261u32, |h, b| (h ^ u32::from(b)).wrapping_mul(16777619));
        1 + hash % (Self::VOCAB_SIZE as u32 - 1)
    }
}

impl TextTokenizer for WhitespaceTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        if text.contains(Self::UNENCODABLE) {
            return Err("replacement character in input".into());
        }
        Ok(text.split_whitespace().map(Self::word_id).collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String, TokenizerError> {
        Ok(ids.iter().map(u32::to_string).collect::<Vec<_>>().join(" "))
    }

    fn pad_token_id(&self) -> u32 {
        0
    }

    fn save(&self, dir: &Path) -> Result<(), ClassifierError> {
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join("tokenizer.json"), r#"{"kind":"whitespace"}"#)?;
        Ok(())
    }
}
