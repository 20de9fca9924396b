//! Configuration module for fare-harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every value the crawl needs is known and checked here, before any network
//! activity starts.
//!
//! # Example
//!
//! ```no_run
//! use fare_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Workers: {}", config.crawler.concurrency);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlerConfig, ExtractConfig, FieldConfig, OutputConfig, RequestConfig, RoutesConfig,
    DEFAULT_USER_AGENTS,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;
