//! Per-conversation working directories

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::paths::absolutize_from_cwd;

/// Working-directory overrides, independent of session lifetime.
///
/// Entries survive session recreation and are only dropped by [`clear`].
///
/// [`clear`]: WorkingDirs::clear
pub struct WorkingDirs {
    default: PathBuf,
    overrides: RwLock<HashMap<String, PathBuf>>,
}

impl WorkingDirs {
    pub fn new(default: impl Into<PathBuf>) -> Self {
        Self {
            default: default.into(),
            overrides: RwLock::new(HashMap::new()),
        }
    }

    pub fn default_dir(&self) -> &Path {
        &self.default
    }

    /// Override for a conversation, or the process default
    pub fn get(&self, conversation_id: &str) -> PathBuf {
        self.get_override(conversation_id)
            .unwrap_or_else(|| self.default.clone())
    }

    pub fn get_override(&self, conversation_id: &str) -> Option<PathBuf> {
        self.overrides.read().get(conversation_id).cloned()
    }

    /// Override, else project directory, else default
    pub fn effective(&self, conversation_id: &str, project_dir: Option<&Path>) -> PathBuf {
        self.get_override(conversation_id)
            .or_else(|| project_dir.map(Path::to_path_buf))
            .unwrap_or_else(|| self.default.clone())
    }

    /// Store an override; returns the absolute path that was stored
    pub fn set(&self, conversation_id: &str, path: &Path) -> PathBuf {
        let absolute = absolutize_from_cwd(path);
        self.overrides
            .write()
            .insert(conversation_id.to_string(), absolute.clone());
        absolute
    }

    pub fn len(&self) -> usize {
        self.overrides.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.read().is_empty()
    }

    pub fn clear(&self) {
        self.overrides.write().clear();
    }
}
