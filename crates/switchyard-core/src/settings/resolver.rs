//! Profile name resolution over the settings waterfall

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use super::{AppSettings, SettingsLayer, SettingsSource};
use crate::error::{Error, Result};

/// Outcome of a waterfall resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub profile: String,
    /// Layer that declared the profile; `None` means the hardcoded default
    pub layer: Option<SettingsLayer>,
}

/// Determines which profile applies to a project
///
/// Precedence: local layer, project layer, global layer, hardcoded default.
/// Nothing is cached here; every call re-reads the settings source.
pub struct ProfileResolver {
    source: Arc<dyn SettingsSource>,
    default_profile: String,
    well_known: HashSet<String>,
}

impl ProfileResolver {
    pub fn new(source: Arc<dyn SettingsSource>, default_profile: impl Into<String>) -> Self {
        Self {
            source,
            default_profile: default_profile.into(),
            well_known: HashSet::new(),
        }
    }

    /// Profile names a project may activate without registering a URI
    pub fn with_well_known<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.well_known.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn default_profile(&self) -> &str {
        &self.default_profile
    }

    /// Read settings scoped to a project
    pub fn load_settings(&self, project_dir: Option<&Path>) -> Result<AppSettings> {
        self.source.load(project_dir)
    }

    /// [`load_settings`](Self::load_settings) on the blocking pool
    pub async fn load_settings_async(
        self: Arc<Self>,
        project_dir: Option<PathBuf>,
    ) -> Result<AppSettings> {
        tokio::task::spawn_blocking(move || self.load_settings(project_dir.as_deref()))
            .await
            .map_err(|e| Error::Settings(format!("settings task failed: {}", e)))?
    }

    /// [`resolve`](Self::resolve) on the blocking pool, for async callers
    pub async fn resolve_async(self: Arc<Self>, project_dir: Option<PathBuf>) -> String {
        let fallback = self.default_profile.clone();
        match tokio::task::spawn_blocking(move || self.resolve(project_dir.as_deref())).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!("Profile resolution task failed: {}; falling back to '{}'", e, fallback);
                fallback
            }
        }
    }

    /// Resolve the profile name for a project. Never fails.
    pub fn resolve(&self, project_dir: Option<&Path>) -> String {
        self.resolve_detailed(project_dir).profile
    }

    /// Resolve and report which layer won
    pub fn resolve_detailed(&self, project_dir: Option<&Path>) -> Resolution {
        match self.source.load(project_dir) {
            Ok(settings) => self.resolve_with(&settings),
            Err(e) => {
                warn!(
                    "Could not read profile settings: {}; falling back to '{}'",
                    e, self.default_profile
                );
                self.fallback()
            }
        }
    }

    /// Walk the waterfall over already-loaded settings
    pub fn resolve_with(&self, settings: &AppSettings) -> Resolution {
        let registered = settings.registered_profiles();
        let project = settings
            .project_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(default)".to_string());

        for layer in [SettingsLayer::Local, SettingsLayer::Project, SettingsLayer::Global] {
            let Some(name) = settings.active_profile_in(layer) else {
                continue;
            };

            if layer.is_project_scoped()
                && !registered.contains_key(name)
                && !self.is_well_known(name)
            {
                warn!(
                    layer = %layer,
                    project = %project,
                    "Active profile '{}' is not registered; ignoring this layer",
                    name
                );
                continue;
            }

            debug!(layer = %layer, project = %project, "Resolved profile '{}'", name);
            return Resolution {
                profile: name.to_string(),
                layer: Some(layer),
            };
        }

        self.fallback()
    }

    fn is_well_known(&self, name: &str) -> bool {
        name == self.default_profile || self.well_known.contains(name)
    }

    fn fallback(&self) -> Resolution {
        Resolution {
            profile: self.default_profile.clone(),
            layer: None,
        }
    }
}
