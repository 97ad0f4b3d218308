use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crate::intake::DEFAULT_MAX_UPLOAD_BYTES;
use crate::residency::SlotKey;

/// Retry policy for engine loads (optional section in config.toml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of load attempts per acquire (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.5 = 500ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay_secs: 0.5,
            max_delay_secs: 10,
        }
    }
}

/// Residency policy for the shared accelerator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidencyConfig {
    /// Unload a slot as soon as its last job finishes. `true` keeps memory
    /// headroom free; `false` keeps weights resident so back-to-back jobs of
    /// the same kind skip the reload.
    pub auto_unload: bool,
}

impl Default for ResidencyConfig {
    fn default() -> Self {
        Self { auto_unload: true }
    }
}

/// Progress bridge tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Bounded channel capacity between worker and consumer.
    pub channel_capacity: usize,
    /// Consumer poll timeout in milliseconds.
    pub poll_interval_ms: u64,
    /// How long to wait for the worker to exit after the terminal event.
    pub join_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 32,
            poll_interval_ms: 100,
            join_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Fixed sampling seed passed to every engine run.
    pub seed: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self { seed: 42 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeConfig {
    /// Largest accepted upload in bytes.
    pub max_upload_bytes: u64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// How to start the worker process for one slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker executable.
    pub command: PathBuf,
    /// Extra arguments passed before the protocol starts.
    #[serde(default)]
    pub args: Vec<String>,
    /// Weights/checkpoint the worker loads; must exist for the slot to be available.
    pub checkpoint: PathBuf,
}

/// Global configuration loaded from `~/.config/fitroom/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitroomConfig {
    /// Root for generated artifacts (None = `$XDG_DATA_HOME/fitroom/outputs`).
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// URL prefix under which `output_dir` is served (None = `/outputs`).
    #[serde(default)]
    pub public_url_prefix: Option<String>,
    #[serde(default)]
    pub residency: ResidencyConfig,
    /// Optional load retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub load_retry: Option<RetryConfig>,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub intake: IntakeConfig,
    /// Worker engines keyed by slot ("body", "clothing").
    #[serde(default)]
    pub engines: BTreeMap<SlotKey, EngineConfig>,
}

impl FitroomConfig {
    /// Resolved artifact root.
    pub fn output_root(&self) -> Result<PathBuf> {
        match &self.output_dir {
            Some(dir) => Ok(dir.clone()),
            None => {
                let xdg_dirs = xdg::BaseDirectories::with_prefix("fitroom")?;
                Ok(xdg_dirs.get_data_home().join("outputs"))
            }
        }
    }

    pub fn url_prefix(&self) -> &str {
        self.public_url_prefix.as_deref().unwrap_or("/outputs")
    }

    pub fn retry(&self) -> RetryConfig {
        self.load_retry.clone().unwrap_or_default()
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("fitroom")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<FitroomConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = FitroomConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: FitroomConfig =
        toml::from_str(&data).with_context(|| format!("parse config: {}", path.display()))?;
    Ok(cfg)
}
