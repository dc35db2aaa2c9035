//! multilabel-lora - fine-tune a LoRA multi-label text classifier
//!
//! Usage:
//!   multilabel-lora train --data train.csv        Split, train, evaluate, save adapter
//!   multilabel-lora split --data train.csv        Show the stratified split
//!   multilabel-lora evaluate <adapter> --data x   Score a saved adapter
//!   multilabel-lora completions zsh               Shell completions
//!   multilabel-lora --help                        Show all commands

use anyhow::Result;
use clap::Parser;

use multilabel_lora::cli::output::OutputMode;
use multilabel_lora::cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Tracing to stderr so --json output on stdout stays clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("multilabel_lora=info".parse()?),
        )
        .init();

    let mode = OutputMode::from_json_flag(cli.json);
    multilabel_lora::cli::execute(&cli.command, cli.config.as_deref(), mode)?;

    Ok(())
}
