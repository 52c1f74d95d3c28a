//! CLI subcommand implementations.

pub mod list;
pub mod proxy;
