//! Settings file for options that rarely change between runs.
//!
//! ```toml
//! # psrio.toml
//! [split]
//! minutes = 10.0
//! block_samples = 131072
//! infix = "sec"
//! output_dir = "/scratch/sections"
//!
//! [copy]
//! buffer_bytes = 4194304
//! ```
//!
//! Flags given on the command line take precedence.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub split: SplitConfig,
    #[serde(default)]
    pub copy: CopyConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SplitConfig {
    /// Requested section length, rounded up to a power of two samples
    pub minutes: Option<f64>,
    /// Samples moved per read
    pub block_samples: Option<u64>,
    pub infix: Option<String>,
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopyConfig {
    pub buffer_bytes: Option<usize>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_str(&content)
            .with_context(|| format!("Failed to load config file {}", path.display()))
    }

    pub fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML configuration")
    }
}
