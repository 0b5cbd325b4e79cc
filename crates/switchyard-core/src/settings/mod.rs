//! Layered settings for profile selection
//!
//! Three YAML layers can declare which profile a conversation should run:
//!
//! - `<project>/.switchyard/settings.local.yaml` (machine-local, highest priority)
//! - `<project>/.switchyard/settings.yaml` (shared with the project)
//! - `<home>/settings.yaml` (user-level global)
//!
//! Each layer may contain:
//!
//! ```yaml
//! bundle:
//!   active: my-agent
//!   added:
//!     my-agent: ./bundles/my-agent.yaml
//! ```
//!
//! Layers are deep-merged: mapping keys are overlaid, never replaced wholesale.

mod resolver;

pub use resolver::{ProfileResolver, Resolution};

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde_yml::Value;
use tracing::debug;

use crate::error::{Error, Result};

/// Directory inside a project holding its settings files
pub const PROJECT_SETTINGS_DIR: &str = ".switchyard";

/// A settings layer, ordered from highest to lowest priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SettingsLayer {
    Local = 0,
    Project = 1,
    Global = 2,
}

impl SettingsLayer {
    /// Layers that belong to a project rather than the user
    pub fn is_project_scoped(&self) -> bool {
        matches!(self, SettingsLayer::Local | SettingsLayer::Project)
    }
}

impl fmt::Display for SettingsLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsLayer::Local => write!(f, "local"),
            SettingsLayer::Project => write!(f, "project"),
            SettingsLayer::Global => write!(f, "global"),
        }
    }
}

/// File locations of the settings layers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsPaths {
    pub global: PathBuf,
    pub project: Option<PathBuf>,
    pub local: Option<PathBuf>,
}

impl SettingsPaths {
    /// Only the user-level layer
    pub fn global_only(home: &Path) -> Self {
        Self {
            global: home.join("settings.yaml"),
            project: None,
            local: None,
        }
    }

    /// All three layers for a project directory
    pub fn for_project(home: &Path, project_dir: &Path) -> Self {
        let dir = project_dir.join(PROJECT_SETTINGS_DIR);
        Self {
            global: home.join("settings.yaml"),
            project: Some(dir.join("settings.yaml")),
            local: Some(dir.join("settings.local.yaml")),
        }
    }

    /// Present layers, highest priority first
    pub fn layers(&self) -> Vec<(SettingsLayer, &Path)> {
        let mut layers = Vec::with_capacity(3);
        if let Some(local) = &self.local {
            layers.push((SettingsLayer::Local, local.as_path()));
        }
        if let Some(project) = &self.project {
            layers.push((SettingsLayer::Project, project.as_path()));
        }
        layers.push((SettingsLayer::Global, self.global.as_path()));
        layers
    }
}

/// Parsed settings layers plus their deep-merged view
#[derive(Debug, Clone, Default)]
pub struct AppSettings {
    /// Highest priority first
    layers: Vec<(SettingsLayer, Value)>,
    merged: Value,
    project_dir: Option<PathBuf>,
}

impl AppSettings {
    /// Read every layer from disk. Missing files are empty layers.
    pub fn load(paths: &SettingsPaths, project_dir: Option<&Path>) -> Result<Self> {
        let mut layers = Vec::new();
        for (layer, path) in paths.layers() {
            if let Some(value) = read_layer(path)? {
                debug!(layer = %layer, path = %path.display(), "Loaded settings layer");
                layers.push((layer, value));
            }
        }
        Ok(Self::from_layers(layers, project_dir.map(Path::to_path_buf)))
    }

    /// Build from already-parsed layers in any order
    pub fn from_layers(mut layers: Vec<(SettingsLayer, Value)>, project_dir: Option<PathBuf>) -> Self {
        layers.sort_by_key(|(layer, _)| *layer);

        // Lowest priority first so higher layers overlay it
        let mut merged = Value::Mapping(Default::default());
        for (_, value) in layers.iter().rev() {
            deep_merge(&mut merged, value.clone());
        }

        Self {
            layers,
            merged,
            project_dir,
        }
    }

    /// The `bundle.active` declaration of a single layer
    pub fn active_profile_in(&self, layer: SettingsLayer) -> Option<&str> {
        self.layers
            .iter()
            .find(|(l, _)| *l == layer)
            .and_then(|(_, value)| value.get("bundle"))
            .and_then(|bundle| bundle.get("active"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// Merged `bundle.added` map of profile name to source URI
    pub fn registered_profiles(&self) -> BTreeMap<String, String> {
        let mut registered = BTreeMap::new();
        let Some(Value::Mapping(added)) = self.merged.get("bundle").and_then(|b| b.get("added")) else {
            return registered;
        };
        for (name, uri) in added {
            if let (Some(name), Some(uri)) = (name.as_str(), uri.as_str()) {
                registered.insert(name.to_string(), uri.to_string());
            }
        }
        registered
    }

    /// Layers that were present on disk, highest priority first
    pub fn present_layers(&self) -> Vec<SettingsLayer> {
        self.layers.iter().map(|(layer, _)| *layer).collect()
    }

    pub fn merged(&self) -> &Value {
        &self.merged
    }

    /// Project directory these settings were scoped to, if any
    pub fn project_dir(&self) -> Option<&Path> {
        self.project_dir.as_deref()
    }
}

fn read_layer(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Settings(format!("Failed to read {}: {}", path.display(), e)))?;
    if content.trim().is_empty() {
        return Ok(None);
    }

    let value: Value = serde_yml::from_str(&content)
        .map_err(|e| Error::Settings(format!("Failed to parse {}: {}", path.display(), e)))?;
    match value {
        Value::Mapping(_) => Ok(Some(value)),
        Value::Null => Ok(None),
        _ => Err(Error::Settings(format!(
            "{} must contain a YAML mapping",
            path.display()
        ))),
    }
}

/// Overlay `overlay` onto `base`, recursing into mappings
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Where settings come from
///
/// Implementations must be cheap to call; resolution reads settings on every
/// inbound message.
pub trait SettingsSource: Send + Sync {
    fn load(&self, project_dir: Option<&Path>) -> Result<AppSettings>;
}

/// Settings read from YAML files on disk
#[derive(Debug, Clone)]
pub struct FileSettingsSource {
    home: PathBuf,
}

impl FileSettingsSource {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Directory holding the global layer
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Layer paths for an optional project
    pub fn paths_for(&self, project_dir: Option<&Path>) -> SettingsPaths {
        match project_dir {
            Some(dir) => SettingsPaths::for_project(&self.home, dir),
            None => SettingsPaths::global_only(&self.home),
        }
    }
}

impl SettingsSource for FileSettingsSource {
    fn load(&self, project_dir: Option<&Path>) -> Result<AppSettings> {
        let project_dir = project_dir.map(normalize_project_dir);
        let paths = self.paths_for(project_dir.as_deref());
        AppSettings::load(&paths, project_dir.as_deref())
    }
}

/// Expand `~` and make a project path absolute without requiring it to exist
pub fn normalize_project_dir(path: &Path) -> PathBuf {
    crate::paths::resolve_existing_or_lexical(path)
}
