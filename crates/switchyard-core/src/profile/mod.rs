//! Profiles: loadable agent configurations
//!
//! A profile (or "bundle") is named by the settings waterfall and turned into a
//! [`PreparedProfile`] by a [`ProfileLoader`]. Preparing is expensive, so the
//! [`ProfileCache`] memoizes prepared profiles per `(name, project)` for the
//! lifetime of the router.

mod cache;
mod file;

pub use cache::{ProfileCache, ProfileKey};
pub use file::{FileProfileLoader, ManifestProfile, ProfileManifest, RuntimeFactory};

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{LoadError, Result};
use crate::paths::{normalize_path, path_to_display};
use crate::session::{AgentSession, SessionSpec};
use crate::settings::{normalize_project_dir, AppSettings};

/// URI prefixes that bypass name-based discovery
pub const URI_SCHEMES: [&str; 5] = ["git+", "file://", "http://", "https://", "zip+"];

/// A fully loaded profile, ready to instantiate sessions
#[async_trait]
pub trait PreparedProfile: Send + Sync {
    /// Name the profile was prepared under
    fn name(&self) -> &str;

    /// Instantiate a new session bound to `spec.session_id`
    async fn create_session(&self, spec: SessionSpec) -> Result<Arc<dyn AgentSession>>;
}

/// Resolves a load target to a prepared profile
#[async_trait]
pub trait ProfileLoader: Send + Sync {
    async fn load(
        &self,
        target: &LoadTarget,
        settings: &AppSettings,
    ) -> std::result::Result<Arc<dyn PreparedProfile>, LoadError>;
}

/// What the loader is asked to load
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadTarget {
    /// Discover by profile name
    Name(String),
    /// Load from an explicit source
    Uri(String),
}

impl LoadTarget {
    /// Pick the load target for a resolved profile.
    ///
    /// Project-scoped, non-default profiles use the URI registered for them in
    /// the project settings, if any. Everything else is discovered by name.
    pub fn select(
        profile: &str,
        project_dir: Option<&Path>,
        settings: &AppSettings,
        default_profile: &str,
    ) -> Self {
        let Some(project_dir) = project_dir else {
            return LoadTarget::Name(profile.to_string());
        };
        if profile == default_profile {
            return LoadTarget::Name(profile.to_string());
        }

        match settings.registered_profiles().get(profile) {
            Some(raw) => Self::from_registered(raw, project_dir),
            None => LoadTarget::Name(profile.to_string()),
        }
    }

    /// Interpret a registered value: absolute URI, project-relative path, or
    /// another name
    pub fn from_registered(raw: &str, project_dir: &Path) -> Self {
        if URI_SCHEMES.iter().any(|scheme| raw.starts_with(scheme)) {
            return LoadTarget::Uri(raw.to_string());
        }
        if raw.starts_with("./") || raw.starts_with("../") {
            let base = normalize_project_dir(project_dir);
            let resolved = dunce::canonicalize(base.join(raw))
                .unwrap_or_else(|_| normalize_path(&base.join(raw)));
            return LoadTarget::Uri(format!("file://{}", path_to_display(&resolved)));
        }
        LoadTarget::Name(raw.to_string())
    }

    pub fn as_str(&self) -> &str {
        match self {
            LoadTarget::Name(name) => name,
            LoadTarget::Uri(uri) => uri,
        }
    }
}

impl fmt::Display for LoadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
