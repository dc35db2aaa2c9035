//! Hugging Face `tokenizers` backend.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tokenizers::Tokenizer;

use crate::error::{ClassifierError, Result};
use crate::tokenize::{TextTokenizer, TokenizerError};

/// End-of-sequence spellings tried, in order, when no pad token is configured.
const EOS_CANDIDATES: &[&str] = &["</s>", "<|endoftext|>", "<eos>", "<|end_of_text|>", "[SEP]"];

/// Tokenizer file name written next to a saved adapter.
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Download `tokenizer.json` for a model from the Hugging Face Hub.
///
/// Cached under `~/.cache/huggingface/hub/` by `hf_hub`.
pub fn download_tokenizer(repo_id: &str) -> anyhow::Result<PathBuf> {
    let api = hf_hub::api::sync::Api::new().context("Failed to initialize HuggingFace Hub API")?;
    let repo = api.model(repo_id.to_string());
    repo.get(TOKENIZER_FILE)
        .with_context(|| format!("Failed to download {} from {}", TOKENIZER_FILE, repo_id))
}

/// [`TextTokenizer`] over a `tokenizers::Tokenizer`.
///
/// Padding is disabled on the inner tokenizer. Causal LM tokenizers usually
/// ship without a pad token, so the end-of-sequence token doubles as padding.
pub struct HfTokenizer {
    tokenizer: Tokenizer,
    pad_token_id: u32,
}

impl HfTokenizer {
    /// Wrap an already-built tokenizer.
    ///
    /// `pad_token` names the padding token explicitly; when `None` the first
    /// known end-of-sequence token present in the vocabulary is used.
    pub fn new(mut tokenizer: Tokenizer, pad_token: Option<&str>) -> Result<Self> {
        tokenizer.with_padding(None);

        let pad_token_id = match pad_token {
            Some(token) => tokenizer.token_to_id(token).ok_or_else(|| {
                ClassifierError::Config(format!("pad token '{}' is not in the vocabulary", token))
            })?,
            None => EOS_CANDIDATES
                .iter()
                .find_map(|t| tokenizer.token_to_id(t))
                .ok_or_else(|| {
                    ClassifierError::Config(
                        "tokenizer has no end-of-sequence token to use for padding; set pad_token"
                            .to_string(),
                    )
                })?,
        };

        tracing::debug!(pad_token_id, "Tokenizer ready");
        Ok(Self {
            tokenizer,
            pad_token_id,
        })
    }

    /// Load from a local `tokenizer.json`.
    pub fn from_file(path: &Path, pad_token: Option<&str>) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path).map_err(|e| {
            ClassifierError::Config(format!(
                "Failed to load tokenizer from {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::new(tokenizer, pad_token)
    }

    /// Load from a local file if `source` exists on disk, otherwise treat it as a Hub repo id.
    pub fn load(source: &str, pad_token: Option<&str>) -> anyhow::Result<Self> {
        let path = Path::new(source);
        let file = if path.exists() {
            if path.is_dir() {
                path.join(TOKENIZER_FILE)
            } else {
                path.to_path_buf()
            }
        } else {
            tracing::info!("Fetching tokenizer for {} from the Hub", source);
            download_tokenizer(source)?
        };
        Ok(Self::from_file(&file, pad_token)?)
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> std::result::Result<Vec<u32>, TokenizerError> {
        let encoding = self.tokenizer.encode(text, true)?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> std::result::Result<String, TokenizerError> {
        self.tokenizer.decode(ids, true)
    }

    fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }

    fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        self.tokenizer
            .save(dir.join(TOKENIZER_FILE), false)
            .map_err(|e| ClassifierError::Serialization(format!("Failed to save tokenizer: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokenizers::{PaddingParams, PaddingStrategy};

    /// Word-level tokenizer with `</s>` and no pad token.
    fn word_level(extra_vocab: &str) -> Tokenizer {
        let json = format!(
            r#"{{
                "version": "1.0",
                "truncation": null,
                "padding": null,
                "added_tokens": [],
                "normalizer": null,
                "pre_tokenizer": {{"type": "Whitespace"}},
                "post_processor": null,
                "decoder": null,
                "model": {{
                    "type": "WordLevel",
                    "vocab": {{"<unk>": 0, "hello": 1, "world": 2, "quantum": 3{extra_vocab}}},
                    "unk_token": "<unk>"
                }}
            }}"#
        );
        Tokenizer::from_bytes(json.as_bytes()).unwrap()
    }

    fn with_eos() -> Tokenizer {
        word_level(r#", "</s>": 4"#)
    }

    #[test]
    fn test_pad_falls_back_to_eos() {
        let tokenizer = HfTokenizer::new(with_eos(), None).unwrap();
        assert_eq!(tokenizer.pad_token_id(), 4);
        assert_eq!(tokenizer.vocab_size(), 5);
    }

    #[test]
    fn test_explicit_pad_token_used() {
        let tokenizer = HfTokenizer::new(with_eos(), Some("<unk>")).unwrap();
        assert_eq!(tokenizer.pad_token_id(), 0);
    }

    #[test]
    fn test_unknown_pad_token_is_config_error() {
        let err = HfTokenizer::new(with_eos(), Some("<pad>")).err().unwrap();
        assert!(matches!(err, ClassifierError::Config(ref msg) if msg.contains("<pad>")));
    }

    #[test]
    fn test_no_eos_and_no_pad_is_config_error() {
        assert!(matches!(
            HfTokenizer::new(word_level(""), None),
            Err(ClassifierError::Config(_))
        ));
    }

    #[test]
    fn test_inner_padding_disabled() {
        let mut inner = with_eos();
        inner.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(8),
            pad_id: 4,
            pad_token: "</s>".to_string(),
            ..PaddingParams::default()
        }));
        assert_eq!(inner.encode("hello world", true).unwrap().get_ids().len(), 8);

        let tokenizer = HfTokenizer::new(inner, None).unwrap();
        assert_eq!(tokenizer.encode("hello world").unwrap(), vec![1, 2]);
        assert_eq!(tokenizer.encode("hello physics").unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_save_writes_loadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let tokenizer = HfTokenizer::new(with_eos(), None).unwrap();
        tokenizer.save(&dir.path().join("adapter")).unwrap();

        let file = dir.path().join("adapter").join(TOKENIZER_FILE);
        assert!(file.exists());
        let from_dir = HfTokenizer::load(&dir.path().join("adapter").display().to_string(), None).unwrap();
        assert_eq!(from_dir.pad_token_id(), 4);
        assert_eq!(from_dir.encode("quantum world").unwrap(), vec![3, 2]);
        let from_file = HfTokenizer::from_file(&file, Some("<unk>")).unwrap();
        assert_eq!(from_file.pad_token_id(), 0);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            HfTokenizer::from_file(&dir.path().join(TOKENIZER_FILE), None),
            Err(ClassifierError::Config(_))
        ));
    }
}
