// src/config.rs

//! Run parameters for the kernel.
//!
//! A [`KernelConfig`] can be deserialized from JSON; every field has a
//! default, so a config file only needs the values it changes:
//!
//! ```json
//! { "initial_capacity": 2, "completion_time": 100.0 }
//! ```
//!
//! [`CONFIG`] is the process-wide config. It is read once from the file named
//! by `DDE_KERNEL_CONFIG`, falling back to defaults if the variable is unset
//! or the file cannot be parsed.

use std::path::Path;

use anyhow::Context;
use log::{info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::time::CompletionTime;

/// Environment variable naming the config file read by [`CONFIG`].
pub const CONFIG_ENV_VAR: &str = "DDE_KERNEL_CONFIG";

/// Process-wide configuration.
pub static CONFIG: Lazy<KernelConfig> = Lazy::new(|| match std::env::var(CONFIG_ENV_VAR) {
    Ok(path) => KernelConfig::load(&path).unwrap_or_else(|e| {
        warn!("Failed to load kernel config from {}: {:#}. Using defaults.", path, e);
        KernelConfig::default()
    }),
    Err(_) => KernelConfig::default(),
});

/// Kernel run parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Capacity given to every new actor-to-actor channel.
    pub initial_capacity: usize,
    /// Deadlock recovery fails instead of growing a channel past this.
    /// `0` disables the limit.
    pub max_capacity: usize,
    /// Model completion time. `None` runs forever.
    pub completion_time: Option<f64>,
    /// Consume advance-only events inside the kernel instead of handing
    /// them to actors.
    pub hide_null_tokens: bool,
    /// Actor threads are named "{prefix}-{actor}".
    pub thread_name_prefix: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            initial_capacity: 1,
            max_capacity: 65536,
            completion_time: None,
            hide_null_tokens: true,
            thread_name_prefix: "dde".to_string(),
        }
    }
}

impl KernelConfig {
    /// Parses a config from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("Failed to parse kernel config JSON")
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_json(&text)?;
        info!("Loaded kernel config from {}", path.display());
        Ok(config)
    }

    /// The completion time channels are cut off at.
    #[must_use]
    pub fn completion(&self) -> CompletionTime {
        CompletionTime::from(self.completion_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_process_network_conventions() {
        let config = KernelConfig::default();
        assert_eq!(config.initial_capacity, 1);
        assert_eq!(config.max_capacity, 65536);
        assert!(config.hide_null_tokens);
        assert_eq!(config.completion(), CompletionTime::Eternity);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = KernelConfig::from_json(r#"{ "initial_capacity": 4, "completion_time": 12.5 }"#)
            .unwrap();
        assert_eq!(config.initial_capacity, 4);
        assert_eq!(config.max_capacity, 65536);
        assert_eq!(config.completion(), CompletionTime::At(12.5));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(KernelConfig::from_json("{ initial_capacity: ").is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = KernelConfig::load("/nonexistent/dde-kernel.json").unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read config file"));
    }
}
