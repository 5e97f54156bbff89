use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::destination::Destination;
use crate::scheduler::SchedulerSettings;

/// libcurl timeouts and limits (optional `[transport]` section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportConfig {
    /// Seconds allowed for connection setup.
    pub connect_timeout_secs: u64,
    /// Bytes per second under which a transfer counts as stalled (0 disables the check).
    pub low_speed_limit: u32,
    /// Seconds below `low_speed_limit` before the transfer is aborted.
    pub low_speed_time_secs: u64,
    /// Overall cap per transfer in seconds, not counting time paused (0 = no cap).
    pub timeout_secs: u64,
    /// Maximum redirects followed.
    pub max_redirections: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            low_speed_limit: 1024,
            low_speed_time_secs: 60,
            timeout_secs: 3600,
            max_redirections: 10,
        }
    }
}

/// Shape of the payloads produced by `mdm run --simulate`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimulationConfig {
    pub chunk_count: usize,
    pub chunk_bytes: usize,
    /// Delay between chunks in milliseconds.
    pub chunk_delay_ms: u64,
    /// Randomize each delay in `0..=2 * chunk_delay_ms`.
    pub randomize: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            chunk_count: 20,
            chunk_bytes: 4096,
            chunk_delay_ms: 50,
            randomize: false,
        }
    }
}

/// Global configuration loaded from `~/.config/mdm/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdmConfig {
    /// Maximum number of transfers transmitting at once.
    pub max_parallel: usize,
    /// Where finished downloads are moved; defaults to `~/.local/share/mdm/downloads`.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Where in-flight payloads are staged; defaults to `<output_dir>/.staging`.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
    /// Replace existing files in the output directory instead of failing the task.
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl Default for MdmConfig {
    fn default() -> Self {
        Self {
            max_parallel: 2,
            output_dir: None,
            staging_dir: None,
            overwrite: false,
            transport: TransportConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl MdmConfig {
    /// Output directory from config, or the XDG data default.
    pub fn resolved_output_dir(&self) -> Result<PathBuf> {
        match &self.output_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_output_dir(),
        }
    }

    /// Resolves paths and limits into the settings the scheduler runs with.
    pub fn scheduler_settings(&self) -> Result<SchedulerSettings> {
        let output_dir = self.resolved_output_dir()?;
        let staging_dir = self
            .staging_dir
            .clone()
            .unwrap_or_else(|| output_dir.join(".staging"));
        Ok(SchedulerSettings {
            max_parallel: self.max_parallel,
            destination: Destination::new(output_dir, self.overwrite),
            staging_dir,
        })
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("mdm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

pub fn default_output_dir() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("mdm")?;
    Ok(xdg_dirs.get_data_home().join("downloads"))
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<MdmConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = MdmConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: MdmConfig =
        toml::from_str(&data).with_context(|| format!("parse config: {}", path.display()))?;
    Ok(cfg)
}
