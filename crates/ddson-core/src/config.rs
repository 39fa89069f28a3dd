//! Coordinator configuration loaded from `<workspace>/ddson.toml`.
//!
//! Defaults reproduce the protocol constants (10 MiB chunks, 20 s heartbeat
//! timeout, 5 minute bans). Tests shrink the chunk size to exercise
//! multi-chunk plans without multi-megabyte fixtures.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::util;

/// Directory holding the cache blob dir, cache index, and config file.
pub fn workspace_dir() -> Result<PathBuf> {
    Ok(util::original_user_home()?.join("workspace_ddson"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Fixed chunk size for subtask planning, in bytes.
    pub chunk_size: u64,
    /// Server-side heartbeat timeout, in seconds.
    pub heartbeat_timeout_secs: u64,
    /// How long a retired agent's address stays banned, in seconds.
    pub ban_duration_secs: u64,
    /// Retry budget per subtask (attempts after the first).
    pub subtask_retries: u32,
    /// Cadence of `Downloading` status frames, in seconds.
    pub status_interval_secs: u64,
    /// Cache cleanup: rows idle longer than this are eligible in phase 2, in days.
    pub cache_max_life_days: u64,
    /// Cache cleanup: hard ceiling on summed blob size, in bytes.
    pub cache_max_size: u64,
    /// Cache cleanup: target size once age-based eviction kicks in, in bytes.
    pub cache_tolerance_size: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10 * 1024 * 1024,
            heartbeat_timeout_secs: 20,
            ban_duration_secs: 5 * 60,
            subtask_retries: 3,
            status_interval_secs: 2,
            cache_max_life_days: 30,
            cache_max_size: 20 * 1024 * 1024 * 1024,
            cache_tolerance_size: 15 * 1024 * 1024 * 1024,
        }
    }
}

impl CoordinatorConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn ban_duration(&self) -> Duration {
        Duration::from_secs(self.ban_duration_secs)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    pub fn cache_max_life(&self) -> Duration {
        Duration::from_secs(self.cache_max_life_days * 24 * 60 * 60)
    }
}

/// Load configuration from `<workspace>/ddson.toml`, creating a default file
/// if none exists.
pub fn load_or_init(workspace: &Path) -> Result<CoordinatorConfig> {
    let path = workspace.join("ddson.toml");
    if !path.exists() {
        let default_cfg = CoordinatorConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        fs::create_dir_all(workspace)?;
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: CoordinatorConfig = toml::from_str(&data)?;
    Ok(cfg)
}
