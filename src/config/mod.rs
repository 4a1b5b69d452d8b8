//! Configuration module for Tidepool
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use tidepool::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("tidepool.toml")).unwrap();
//! println!("Retries per call: {}", config.rate.max_retries);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    parse_month, BackendKind, CheckpointConfig, ClientConfig, Config, ExpandConfig, RateConfig,
    ScanConfig, WalkConfig,
};

pub use parser::{compute_config_hash, load_config, load_config_with_hash};
