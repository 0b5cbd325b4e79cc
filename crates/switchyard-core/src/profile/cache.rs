//! Memoized, single-flight profile preparation

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{LoadTarget, PreparedProfile, ProfileLoader};
use crate::error::{Error, Result};
use crate::settings::{AppSettings, ProfileResolver};

/// Cache key: profile name plus the project it was prepared for.
///
/// Project-scoped because two projects may carry different overrides for a
/// profile of the same name.
pub type ProfileKey = (String, Option<PathBuf>);

/// Prepared profiles, loaded at most once per key
pub struct ProfileCache {
    loader: Arc<dyn ProfileLoader>,
    resolver: Arc<ProfileResolver>,
    entries: RwLock<HashMap<ProfileKey, Arc<dyn PreparedProfile>>>,
    /// Serializes misses only; hits never touch it
    load_lock: Mutex<()>,
}

impl ProfileCache {
    pub fn new(loader: Arc<dyn ProfileLoader>, resolver: Arc<ProfileResolver>) -> Self {
        Self {
            loader,
            resolver,
            entries: RwLock::new(HashMap::new()),
            load_lock: Mutex::new(()),
        }
    }

    /// Return the cached profile or load it.
    ///
    /// Failures are not cached; the next call retries the load.
    pub async fn get_or_create(
        &self,
        profile: &str,
        project_dir: Option<&Path>,
    ) -> Result<Arc<dyn PreparedProfile>> {
        let key: ProfileKey = (profile.to_string(), project_dir.map(Path::to_path_buf));

        if let Some(prepared) = self.lookup(&key) {
            return Ok(prepared);
        }

        let _guard = self.load_lock.lock().await;

        // Another caller may have finished the same load while we waited
        if let Some(prepared) = self.lookup(&key) {
            debug!(profile, "Profile loaded by a concurrent caller");
            return Ok(prepared);
        }

        let project = project_dir
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(default)".to_string());
        info!(project = %project, "Loading profile '{}'", profile);

        let settings = self.scoped_settings(project_dir).await;
        let target = LoadTarget::select(
            profile,
            project_dir,
            &settings,
            self.resolver.default_profile(),
        );
        if let LoadTarget::Uri(uri) = &target {
            debug!(profile, "Using registered URI {}", uri);
        }

        let prepared = self
            .loader
            .load(&target, &settings)
            .await
            .map_err(|e| Error::profile_load(profile, e))?;

        self.entries.write().insert(key, prepared.clone());
        info!(project = %project, "Profile '{}' prepared", profile);
        Ok(prepared)
    }

    fn lookup(&self, key: &ProfileKey) -> Option<Arc<dyn PreparedProfile>> {
        self.entries.read().get(key).cloned()
    }

    async fn scoped_settings(&self, project_dir: Option<&Path>) -> AppSettings {
        let resolver = self.resolver.clone();
        match resolver
            .load_settings_async(project_dir.map(Path::to_path_buf))
            .await
        {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Could not read settings for profile loading: {}; using name discovery", e);
                AppSettings::from_layers(Vec::new(), project_dir.map(Path::to_path_buf))
            }
        }
    }

    pub fn contains(&self, profile: &str, project_dir: Option<&Path>) -> bool {
        let key: ProfileKey = (profile.to_string(), project_dir.map(Path::to_path_buf));
        self.entries.read().contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every prepared profile
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
