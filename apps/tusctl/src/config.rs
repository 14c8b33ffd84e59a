//! tusctl configuration.
//!
//! Configuration is stored as TOML:
//! - Linux/macOS: `~/.config/tuskit/tusctl.toml`
//! - Windows: `%APPDATA%/tuskit/tusctl.toml`
//!
//! Every field is optional; a missing file means all defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tuskit_client::{HttpConfig, TransferOptions, UploadOptions};
use tuskit_protocol::Headers;
use tuskit_transfer::DEFAULT_CHUNK_SIZE;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Creation endpoint, e.g. `https://tus.example.org/files/`.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Bytes per PATCH request.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Recovery cycles allowed before an upload gives up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Negotiate `Upload-Checksum` with servers that support it.
    #[serde(default = "default_true")]
    pub checksum: bool,

    /// Concurrent partial uploads (needs the `concatenation` extension).
    #[serde(default = "default_parallel")]
    pub parallel: u32,

    /// Per-request timeout in seconds (0 = none).
    #[serde(default)]
    pub timeout_secs: u64,

    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_parallel() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            chunk_size: default_chunk_size(),
            max_retries: default_max_retries(),
            checksum: default_true(),
            parallel: default_parallel(),
            timeout_secs: 0,
            headers: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Loads `path`, or the platform default when `None`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path(),
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn http(&self) -> HttpConfig {
        let mut headers = Headers::new();
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        HttpConfig {
            timeout: (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs)),
            headers,
            ..HttpConfig::default()
        }
    }

    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            chunk_size: self.chunk_size,
            max_retries: self.max_retries,
            ..UploadOptions::default()
        }
    }

    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            upload: self.upload_options(),
            checksum: self.checksum,
            parallel: self.parallel.max(1) as usize,
        }
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("tuskit").join("tusctl.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("tuskit")
            .join("tusctl.toml")
    }
}
