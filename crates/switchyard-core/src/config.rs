//! Configuration management for Switchyard
//!
//! Handles loading and saving the connector's own configuration: where the
//! layered profile settings live, which directories a conversation may move
//! into, and where thread associations are persisted.

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::paths::expand_home;

/// Profile used when no settings layer declares one
pub const DEFAULT_PROFILE: &str = "foundation";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Session routing settings
    #[serde(default)]
    pub router: RouterConfig,
    /// Workspace and project settings
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    /// General application settings
    #[serde(default)]
    pub general: GeneralConfig,
}

/// Session routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Hardcoded last step of the profile waterfall
    pub default_profile: String,
    /// Working directory for conversations without a project or override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_workdir: Option<PathBuf>,
    /// Directory holding the global `settings.yaml` and shared `bundles/`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings_home: Option<PathBuf>,
    /// Extra directories searched for `<name>.yaml` profile manifests
    pub bundle_dirs: Vec<PathBuf>,
    /// Profile names accepted in project settings without a registered URI
    pub well_known_profiles: Vec<String>,
    /// Timeout for approval requests (seconds)
    pub approval_timeout_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_profile: DEFAULT_PROFILE.to_string(),
            default_workdir: None,
            settings_home: None,
            bundle_dirs: Vec::new(),
            well_known_profiles: Vec::new(),
            approval_timeout_secs: 300,
        }
    }
}

impl RouterConfig {
    /// Working directory used when nothing more specific applies
    pub fn effective_default_workdir(&self) -> PathBuf {
        self.default_workdir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Directory of the global settings layer (`~/.switchyard` by default)
    pub fn effective_settings_home(&self) -> PathBuf {
        self.settings_home
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".switchyard")))
            .unwrap_or_else(|| PathBuf::from(".switchyard"))
    }
}

/// Workspace configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Base directory for projects
    pub workspace_dir: PathBuf,
    /// Roots a conversation may change its working directory into
    pub allowed_roots: Vec<PathBuf>,
    /// File holding conversation -> project associations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub associations_path: Option<PathBuf>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from("~/workspace"),
            allowed_roots: vec![PathBuf::from("~/workspace"), PathBuf::from("~/projects")],
            associations_path: None,
        }
    }
}

impl WorkspaceConfig {
    /// Allowed roots with `~` expanded
    pub fn expanded_allowed_roots(&self) -> Vec<PathBuf> {
        self.allowed_roots.iter().map(|p| expand_home(p)).collect()
    }

    pub fn effective_associations_path(&self) -> PathBuf {
        self.associations_path.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".switchyard")
                .join("workspaces")
                .join("thread-associations.json")
        })
    }
}

/// General application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Configuration manager for loading and saving config
pub struct ConfigManager {
    config_path: PathBuf,
    config: Config,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::with_path(config_path)
    }

    /// Create a config manager with a specific path
    pub fn with_path(config_path: PathBuf) -> Result<Self> {
        let config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            Config::default()
        };

        Ok(Self { config_path, config })
    }

    /// Get the default config path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not find config directory".to_string()))?;

        Ok(config_dir.join("switchyard").join("config.toml"))
    }

    /// Load configuration from a file
    fn load_from_path(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Path the configuration is read from and saved to
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Get the current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get mutable access to configuration
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Save the current configuration to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config dir: {}", e)))?;
        }

        let content = toml::to_string_pretty(&self.config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&self.config_path, content)
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Set the profile used when no settings layer declares one
    pub fn set_default_profile(&mut self, name: &str) {
        self.config.router.default_profile = name.to_string();
    }

    /// Get the default profile name
    pub fn default_profile(&self) -> &str {
        &self.config.router.default_profile
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self {
            config_path: PathBuf::from("config.toml"),
            config: Config::default(),
        })
    }
}
