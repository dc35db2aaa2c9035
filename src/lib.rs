pub mod cli;
pub mod collate;
pub mod config;
pub mod data;
pub mod error;
pub mod eval;
pub mod loss;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod tokenize;
pub mod train;
pub mod utils;

pub use error::ClassifierError;
