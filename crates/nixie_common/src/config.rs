//! Nixie configuration.
//!
//! User configuration for pipeline behavior and state locations.
//! Config file: ~/.config/nixie/config.toml or /etc/nixie/config.toml

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::backend::DEFAULT_TIMEOUT_SECS;
use crate::search_cache::{DEFAULT_CAPACITY, DEFAULT_TTL_SECS};

/// Pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Intents below this confidence are treated as unknown.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// Deadline for any single call to the underlying manager.
    #[serde(default = "default_manager_timeout_secs")]
    pub manager_timeout_secs: u64,
}

fn default_confidence_threshold() -> f32 {
    0.5
}

fn default_manager_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            manager_timeout_secs: default_manager_timeout_secs(),
        }
    }
}

/// Search cache tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_TTL_SECS
}

fn default_cache_capacity() -> usize {
    DEFAULT_CAPACITY
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            capacity: default_cache_capacity(),
        }
    }
}

/// Main nixie configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NixieConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Override for the state directory holding generations, history and
    /// the cache file. Defaults to the XDG state home.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

impl NixieConfig {
    /// Default user config path: ~/.config/nixie/config.toml
    pub fn user_config_path() -> Result<PathBuf> {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return Ok(Path::new(&xdg).join("nixie").join("config.toml"));
        }
        let home = std::env::var("HOME").context("cannot determine home directory")?;
        Ok(Path::new(&home).join(".config").join("nixie").join("config.toml"))
    }

    /// System config path: /etc/nixie/config.toml
    pub fn system_config_path() -> PathBuf {
        PathBuf::from("/etc/nixie/config.toml")
    }

    /// Load configuration.
    ///
    /// Priority:
    /// 1. User config (~/.config/nixie/config.toml)
    /// 2. System config (/etc/nixie/config.toml)
    /// 3. Defaults
    pub fn load() -> Result<Self> {
        if let Ok(user_path) = Self::user_config_path() {
            if user_path.exists() {
                return Self::load_from(&user_path);
            }
        }

        let system_path = Self::system_config_path();
        if system_path.exists() {
            return Self::load_from(&system_path);
        }

        Ok(Self::default())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Save to the user config file.
    pub fn save(&self) -> Result<()> {
        let path = Self::user_config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let toml_string = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(&path, toml_string)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Resolve the state directory: explicit config, then
    /// $NIXIE_STATE_DIR, then $XDG_STATE_HOME/nixie, then
    /// ~/.local/state/nixie.
    pub fn resolve_state_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.state_dir {
            return Ok(dir.clone());
        }
        if let Ok(dir) = std::env::var("NIXIE_STATE_DIR") {
            return Ok(PathBuf::from(dir));
        }
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            return Ok(Path::new(&xdg).join("nixie"));
        }
        let home = std::env::var("HOME").context("cannot determine home directory")?;
        Ok(Path::new(&home).join(".local").join("state").join("nixie"))
    }
}
