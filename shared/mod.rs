//! Configuration and result export shared by the library and the CLI.

pub mod config;
pub mod export;

pub use config::{ConfigError, EngineConfig};
pub use export::{write_tsv, write_tsv_file};
