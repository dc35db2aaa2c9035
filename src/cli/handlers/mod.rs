//! CLI command handlers.

pub mod evaluate;
pub mod split;
pub mod train;
