//! Profile manifests read from the filesystem
//!
//! Manifests are YAML documents:
//!
//! ```yaml
//! name: agent
//! description: Project assistant
//! instructions: |
//!   You help with this repository.
//! tools: [filesystem, shell]
//! metadata:
//!   owner: platform-team
//! ```
//!
//! Discovery by name checks, in order, `<project>/.switchyard/bundles/`,
//! `<settings home>/bundles/` and any extra directories. Within a directory
//! `<name>.yaml`, `<name>.yml` and `<name>/bundle.yaml` are accepted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{LoadTarget, PreparedProfile, ProfileLoader, URI_SCHEMES};
use crate::error::{LoadError, Result};
use crate::session::{AgentSession, SessionSpec};
use crate::settings::{AppSettings, PROJECT_SETTINGS_DIR};

/// Manifest file name inside a profile directory
const DIR_MANIFEST: &str = "bundle.yaml";

/// Parsed profile manifest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileManifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// The agent runtime that turns a manifest into live sessions
#[async_trait]
pub trait RuntimeFactory: Send + Sync {
    async fn create_session(
        &self,
        manifest: &ProfileManifest,
        spec: SessionSpec,
    ) -> Result<Arc<dyn AgentSession>>;
}

/// A manifest bound to a runtime
pub struct ManifestProfile {
    manifest: ProfileManifest,
    source: PathBuf,
    runtime: Arc<dyn RuntimeFactory>,
}

impl ManifestProfile {
    pub fn manifest(&self) -> &ProfileManifest {
        &self.manifest
    }

    /// File the manifest was read from
    pub fn source(&self) -> &Path {
        &self.source
    }
}

#[async_trait]
impl PreparedProfile for ManifestProfile {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    async fn create_session(&self, spec: SessionSpec) -> Result<Arc<dyn AgentSession>> {
        self.runtime.create_session(&self.manifest, spec).await
    }
}

/// Loads profile manifests from disk
pub struct FileProfileLoader {
    home: PathBuf,
    extra_dirs: Vec<PathBuf>,
    runtime: Arc<dyn RuntimeFactory>,
}

impl FileProfileLoader {
    /// `home` is the settings home; its `bundles/` directory is searched
    pub fn new(home: impl Into<PathBuf>, runtime: Arc<dyn RuntimeFactory>) -> Self {
        Self {
            home: home.into(),
            extra_dirs: Vec::new(),
            runtime,
        }
    }

    pub fn with_search_dirs(mut self, dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        self.extra_dirs.extend(dirs);
        self
    }

    /// Directories searched for a name, in priority order
    pub fn search_dirs(&self, project_dir: Option<&Path>) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(project) = project_dir {
            dirs.push(project.join(PROJECT_SETTINGS_DIR).join("bundles"));
        }
        dirs.push(self.home.join("bundles"));
        dirs.extend(self.extra_dirs.iter().cloned());
        dirs
    }

    /// Find the manifest file for a target
    pub fn locate(
        &self,
        target: &LoadTarget,
        project_dir: Option<&Path>,
    ) -> std::result::Result<PathBuf, LoadError> {
        match target {
            LoadTarget::Name(name) => discover(name, &self.search_dirs(project_dir)),
            LoadTarget::Uri(uri) => locate_uri(uri),
        }
    }

    /// [`locate`](Self::locate) with the filesystem probing moved to the
    /// blocking pool
    pub async fn locate_async(
        &self,
        target: &LoadTarget,
        project_dir: Option<&Path>,
    ) -> std::result::Result<PathBuf, LoadError> {
        let target = target.clone();
        let dirs = self.search_dirs(project_dir);
        tokio::task::spawn_blocking(move || match &target {
            LoadTarget::Name(name) => discover(name, &dirs),
            LoadTarget::Uri(uri) => locate_uri(uri),
        })
        .await
        .map_err(|e| LoadError::Transient(format!("manifest lookup failed: {}", e)))?
    }

    /// Read and validate a manifest file
    pub async fn read_manifest(path: &Path) -> std::result::Result<ProfileManifest, LoadError> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut manifest: ProfileManifest = serde_yml::from_str(&content)
            .map_err(|e| LoadError::InvalidManifest(format!("{}: {}", path.display(), e)))?;

        if manifest.name.trim().is_empty() {
            manifest.name = fallback_name(path);
        }
        Ok(manifest)
    }
}

#[async_trait]
impl ProfileLoader for FileProfileLoader {
    async fn load(
        &self,
        target: &LoadTarget,
        settings: &AppSettings,
    ) -> std::result::Result<Arc<dyn PreparedProfile>, LoadError> {
        let path = self.locate_async(target, settings.project_dir()).await?;
        let manifest = Self::read_manifest(&path).await?;
        Ok(Arc::new(ManifestProfile {
            manifest,
            source: path,
            runtime: self.runtime.clone(),
        }))
    }
}

fn discover(name: &str, dirs: &[PathBuf]) -> std::result::Result<PathBuf, LoadError> {
    if name.is_empty() || name.contains(['/', '\\']) {
        return Err(LoadError::NotFound(format!("invalid profile name '{}'", name)));
    }

    for dir in dirs {
        let candidates = [
            dir.join(format!("{}.yaml", name)),
            dir.join(format!("{}.yml", name)),
            dir.join(name).join(DIR_MANIFEST),
        ];
        if let Some(found) = candidates.into_iter().find(|p| p.is_file()) {
            debug!(profile = name, "Discovered manifest at {}", found.display());
            return Ok(found);
        }
    }

    Err(LoadError::NotFound(format!(
        "no manifest named '{}' in any bundle directory",
        name
    )))
}

fn locate_uri(uri: &str) -> std::result::Result<PathBuf, LoadError> {
    let Some(raw_path) = uri.strip_prefix("file://") else {
        let scheme = URI_SCHEMES
            .iter()
            .find(|s| uri.starts_with(*s))
            .copied()
            .unwrap_or("unknown");
        return Err(LoadError::UnsupportedUri(format!(
            "{} ({} sources are not handled by the file loader)",
            uri, scheme
        )));
    };

    let path = PathBuf::from(raw_path);
    if path.is_dir() {
        let manifest = path.join(DIR_MANIFEST);
        if manifest.is_file() {
            return Ok(manifest);
        }
        return Err(LoadError::NotFound(format!(
            "{} has no {}",
            path.display(),
            DIR_MANIFEST
        )));
    }
    if path.is_file() {
        return Ok(path);
    }
    Err(LoadError::NotFound(uri.to_string()))
}

fn fallback_name(path: &Path) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    if stem == "bundle" {
        path.parent()
            .and_then(Path::file_name)
            .and_then(|s| s.to_str())
            .unwrap_or(stem)
            .to_string()
    } else {
        stem.to_string()
    }
}
