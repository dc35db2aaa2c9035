//! Tokenization adapter: raw records to unpadded token sequences.
//!
//! Padding is deliberately left to [`crate::collate::BatchCollator`] so each
//! example keeps its native length until it is batched.

pub mod hf;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::Record;
use crate::error::{ClassifierError, Result};

pub use hf::HfTokenizer;

/// Error type returned by tokenizer backends.
pub type TokenizerError = Box<dyn std::error::Error + Send + Sync>;

/// Capability interface over a concrete tokenizer.
///
/// The rest of the crate only needs ids for a text and the id used for padding,
/// so swapping backbones never changes the data pipeline.
pub trait TextTokenizer: Send + Sync {
    /// Encode text into token ids, including any special tokens the model expects.
    fn encode(&self, text: &str) -> std::result::Result<Vec<u32>, TokenizerError>;

    /// Decode ids back into text, skipping special tokens.
    fn decode(&self, ids: &[u32]) -> std::result::Result<String, TokenizerError>;

    /// Id written into padded positions.
    fn pad_token_id(&self) -> u32;

    /// Persist the tokenizer next to a saved adapter.
    fn save(&self, dir: &Path) -> Result<()>;
}

/// A record after tokenization. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenizedExample {
    pub id: i64,
    pub input_ids: Vec<u32>,
    /// All ones before padding; same length as `input_ids`.
    pub attention_mask: Vec<u32>,
    pub labels: Vec<u8>,
}

impl TokenizedExample {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// What to do when a record cannot be tokenized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizationPolicy {
    /// Fail the whole dataset on the first bad record.
    #[default]
    Abort,
    /// Drop the record and keep going.
    Skip,
}

/// Tokenize a single record. Labels are copied through unchanged.
pub fn tokenize_record(record: &Record, tokenizer: &dyn TextTokenizer) -> Result<TokenizedExample> {
    if record.text.trim().is_empty() {
        return Err(ClassifierError::Tokenization {
            id: record.id,
            reason: "text is empty".to_string(),
        });
    }

    let input_ids = tokenizer
        .encode(&record.text)
        .map_err(|e| ClassifierError::Tokenization {
            id: record.id,
            reason: e.to_string(),
        })?;

    if input_ids.is_empty() {
        return Err(ClassifierError::Tokenization {
            id: record.id,
            reason: "tokenizer produced no tokens".to_string(),
        });
    }

    Ok(TokenizedExample {
        id: record.id,
        attention_mask: vec![1; input_ids.len()],
        input_ids,
        labels: record.labels.clone(),
    })
}

/// Tokenize a batch of records according to `policy`.
pub fn tokenize_records(
    records: &[Record],
    tokenizer: &dyn TextTokenizer,
    policy: TokenizationPolicy,
) -> Result<Vec<TokenizedExample>> {
    let mut examples = Vec::with_capacity(records.len());
    let mut skipped = 0usize;

    for record in records {
        match tokenize_record(record, tokenizer) {
            Ok(example) => examples.push(example),
            Err(e) if policy == TokenizationPolicy::Skip => {
                tracing::warn!("Skipping record: {}", e);
                skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    if skipped > 0 {
        tracing::warn!(
            skipped,
            kept = examples.len(),
            "Some records could not be tokenized"
        );
    }

    Ok(examples)
}
