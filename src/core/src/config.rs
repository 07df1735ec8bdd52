//! Layered transfer configuration.
//!
//! Values come from a YAML file (`~/.a3s/transfer.yaml` by default) and are
//! overridden field by field by command-line flags. Every field is optional;
//! `None` means "not set at this layer".

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{OciError, Result};

/// Default number of layers transferred at once.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Default number of whole-call attempts.
pub const DEFAULT_RETRIES: u32 = 1;

/// Default delay before the first retry.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// Transfer configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct TransferConfig {
    /// Maximum layers in flight during a copy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,

    /// Talk to registries over plain HTTP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plain_http: Option<bool>,

    /// Skip TLS certificate verification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_skip_verify: Option<bool>,

    /// User agent sent with registry requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// OCI layout directory used as a read-through blob cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Whole-call attempts for copy and pull
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,

    /// Delay before the first retry, doubled on every further attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,

    /// Target architecture for multi-platform references
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
}

impl TransferConfig {
    /// Path of the default config file (`~/.a3s/transfer.yaml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".a3s").join("transfer.yaml"))
    }

    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            OciError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&data).map_err(|e| {
            OciError::ConfigError(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Load the default config file, or an empty config when it does not exist.
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Overlay `overrides` on top of `self`. Set fields in `overrides` win.
    pub fn merge(self, overrides: TransferConfig) -> Self {
        Self {
            concurrency: overrides.concurrency.or(self.concurrency),
            plain_http: overrides.plain_http.or(self.plain_http),
            insecure_skip_verify: overrides.insecure_skip_verify.or(self.insecure_skip_verify),
            user_agent: overrides.user_agent.or(self.user_agent),
            cache_dir: overrides.cache_dir.or(self.cache_dir),
            retries: overrides.retries.or(self.retries),
            retry_delay_ms: overrides.retry_delay_ms.or(self.retry_delay_ms),
            arch: overrides.arch.or(self.arch),
        }
    }

    /// Effective concurrency (at least one).
    pub fn concurrency(&self) -> usize {
        self.concurrency.unwrap_or(DEFAULT_CONCURRENCY).max(1)
    }

    /// Effective number of attempts (at least one).
    pub fn retries(&self) -> u32 {
        self.retries.unwrap_or(DEFAULT_RETRIES).max(1)
    }

    /// Effective retry delay.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS))
    }

    /// Effective target architecture, defaulting to the host's in OCI naming.
    pub fn arch(&self) -> String {
        self.arch.clone().unwrap_or_else(|| host_arch().to_string())
    }
}

/// Host CPU architecture in OCI naming (`amd64`, `arm64`, ...).
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}
