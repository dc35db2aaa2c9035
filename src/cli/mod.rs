//! CLI interface for multilabel-lora.

pub mod handlers;
pub mod output;

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::TrainConfig;
use crate::data::WeightSource;
use crate::tokenize::TokenizationPolicy;
use output::OutputMode;

/// multilabel-lora - fine-tune a LoRA multi-label text classifier
#[derive(Parser)]
#[command(name = "multilabel-lora", version, about, long_about = None)]
pub struct Cli {
    /// Config file (TOML). Falls back to MULTILABEL_LORA_CONFIG, then ./train.toml
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Output as JSON instead of human-readable format
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags that override individual config fields.
#[derive(Args, Debug, Clone, Default)]
pub struct DataOverrides {
    /// Input CSV (id,title,abstract,label_1..label_k)
    #[arg(long)]
    pub data: Option<PathBuf>,

    /// Share of records held out for validation, in (0, 1)
    #[arg(long)]
    pub validation_fraction: Option<f64>,

    /// Seed for shuffling, splitting and initialization
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Split the data, train the adapter, evaluate and save
    Train {
        #[command(flatten)]
        data: DataOverrides,

        /// Output directory for checkpoints, adapter and reports
        #[arg(long, short)]
        output_dir: Option<PathBuf>,

        /// Tokenizer file, directory or Hub repo id
        #[arg(long, env = "MULTILABEL_LORA_TOKENIZER")]
        tokenizer: Option<String>,

        /// Backbone GGUF file, directory or Hub repo id
        #[arg(long, env = "MULTILABEL_LORA_BACKBONE")]
        backbone: Option<String>,

        /// GGUF file name inside a backbone directory or Hub repo
        #[arg(long)]
        backbone_file: Option<String>,

        #[arg(long)]
        epochs: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long)]
        learning_rate: Option<f64>,

        /// Compute label weights from the training split or all records
        #[arg(long, value_parser = parse_weight_source)]
        weights_from: Option<WeightSource>,

        /// Drop records that fail to tokenize instead of aborting
        #[arg(long)]
        skip_bad_records: bool,

        /// Do not write CSV/JSON/SVG reports
        #[arg(long)]
        no_reports: bool,

        /// Force CPU even if a GPU backend is available
        #[arg(long)]
        cpu: bool,
    },

    /// Shuffle and split the data, report per-label balance
    Split {
        #[command(flatten)]
        data: DataOverrides,

        /// Write train/validation record ids as JSON to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Evaluate a saved adapter on a labeled CSV
    Evaluate {
        /// Adapter directory (contains adapter_config.json)
        adapter: PathBuf,

        /// Labeled CSV to score
        #[arg(long)]
        data: PathBuf,

        /// Tokenizer source (default: tokenizer.json in the adapter directory)
        #[arg(long)]
        tokenizer: Option<String>,

        #[arg(long, default_value = "8")]
        batch_size: usize,

        /// Drop records that fail to tokenize instead of aborting
        #[arg(long)]
        skip_bad_records: bool,

        /// Also write CSV/JSON/SVG reports to this directory
        #[arg(long)]
        report_dir: Option<PathBuf>,

        /// Force CPU even if a GPU backend is available
        #[arg(long)]
        cpu: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell type (bash, zsh, fish, elvish, powershell)
        shell: clap_complete::Shell,
    },
}

fn parse_weight_source(value: &str) -> Result<WeightSource, String> {
    match value {
        "train" => Ok(WeightSource::Train),
        "full" => Ok(WeightSource::Full),
        other => Err(format!("expected 'train' or 'full', got '{}'", other)),
    }
}

/// Apply data flags on top of a loaded config.
pub fn apply_data_overrides(config: &mut TrainConfig, overrides: &DataOverrides) {
    if let Some(path) = &overrides.data {
        config.data.path = path.clone();
    }
    if let Some(fraction) = overrides.validation_fraction {
        config.data.validation_fraction = fraction;
    }
    if let Some(seed) = overrides.seed {
        config.set_seed(seed);
    }
}

/// Execute a CLI command.
pub fn execute(command: &Commands, config_path: Option<&std::path::Path>, mode: OutputMode) -> anyhow::Result<()> {
    match command {
        Commands::Train {
            data,
            output_dir,
            tokenizer,
            backbone,
            backbone_file,
            epochs,
            batch_size,
            learning_rate,
            weights_from,
            skip_bad_records,
            no_reports,
            cpu,
        } => {
            let mut config = crate::config::load_config(config_path)?;
            apply_data_overrides(&mut config, data);
            if let Some(dir) = output_dir {
                config.training.output_dir = dir.clone();
            }
            if let Some(source) = tokenizer {
                config.model.tokenizer = source.clone();
            }
            if let Some(source) = backbone {
                config.model.backbone = source.clone();
            }
            if let Some(file) = backbone_file {
                config.model.backbone_file = file.clone();
            }
            if let Some(n) = epochs {
                config.training.epoch_count = *n;
            }
            if let Some(n) = batch_size {
                config.training.batch_size = *n;
                config.training.eval_batch_size = *n;
            }
            if let Some(lr) = learning_rate {
                config.training.learning_rate = *lr;
            }
            if let Some(source) = weights_from {
                config.data.weights_from = *source;
            }
            if *skip_bad_records {
                config.data.tokenization_policy = TokenizationPolicy::Skip;
            }
            if *no_reports {
                config.output.write_reports = false;
            }
            if *cpu {
                config.model.prefer_gpu = false;
            }
            handlers::train::handle_train(&config, mode)?
        }

        Commands::Split { data, output } => {
            let mut config = crate::config::load_config(config_path)?;
            apply_data_overrides(&mut config, data);
            handlers::split::handle_split(&config, output.as_deref(), mode)?
        }

        Commands::Evaluate {
            adapter,
            data,
            tokenizer,
            batch_size,
            skip_bad_records,
            report_dir,
            cpu,
        } => handlers::evaluate::handle_evaluate(
            &handlers::evaluate::EvaluateRequest {
                adapter,
                data,
                tokenizer: tokenizer.as_deref(),
                batch_size: *batch_size,
                policy: if *skip_bad_records {
                    TokenizationPolicy::Skip
                } else {
                    TokenizationPolicy::Abort
                },
                report_dir: report_dir.as_deref(),
                prefer_gpu: !*cpu,
            },
            mode,
        )?,

        Commands::Completions { shell } => {
            clap_complete::generate(
                *shell,
                &mut Cli::command(),
                "multilabel-lora",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}
