//! Conversation -> project associations
//!
//! Adapters let users point a channel or thread at a project directory. The
//! association is what they pass as the project path when routing messages.
//! Stored as `{"threads": {"<conversation>": "<path>"}}`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::paths::{expand_home, path_to_display};

pub use crate::paths::project_slug;

#[derive(Debug, Default, Serialize, Deserialize)]
struct AssociationFile {
    #[serde(default)]
    threads: BTreeMap<String, String>,
}

/// Persistent conversation -> project path map
pub struct ThreadAssociations {
    path: PathBuf,
    threads: RwLock<BTreeMap<String, String>>,
}

impl ThreadAssociations {
    /// Open the association file, starting empty when it is missing or
    /// unreadable
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let threads = match load_file(&path) {
            Ok(threads) => {
                if !threads.is_empty() {
                    info!("Loaded {} thread association(s)", threads.len());
                }
                threads
            }
            Err(e) => {
                warn!("Could not load thread associations from {:?}: {}", path, e);
                BTreeMap::new()
            }
        };

        Self {
            path,
            threads: RwLock::new(threads),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn associate(&self, conversation_id: &str, project_path: impl AsRef<Path>) -> Result<()> {
        let project = path_to_display(project_path.as_ref());
        {
            // held across the write so the file and the map change together
            let mut threads = self.threads.write();
            let mut updated = threads.clone();
            updated.insert(conversation_id.to_string(), project.clone());
            self.save(&updated)?;
            *threads = updated;
        }
        info!(conversation = %conversation_id, "Associated with {}", project);
        Ok(())
    }

    pub fn project_for(&self, conversation_id: &str) -> Option<PathBuf> {
        self.threads.read().get(conversation_id).map(PathBuf::from)
    }

    /// Remove an association; `false` when there was none
    pub fn clear(&self, conversation_id: &str) -> Result<bool> {
        {
            let mut threads = self.threads.write();
            if !threads.contains_key(conversation_id) {
                return Ok(false);
            }
            let mut updated = threads.clone();
            updated.remove(conversation_id);
            self.save(&updated)?;
            *threads = updated;
        }
        info!(conversation = %conversation_id, "Cleared project association");
        Ok(true)
    }

    /// Directory name of the associated project
    pub fn display_name(&self, conversation_id: &str) -> Option<String> {
        let project = self.project_for(conversation_id)?;
        project
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }

    pub fn list(&self) -> Vec<(String, PathBuf)> {
        self.threads
            .read()
            .iter()
            .map(|(id, path)| (id.clone(), PathBuf::from(path)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.threads.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.read().is_empty()
    }

    fn save(&self, threads: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = AssociationFile {
            threads: threads.clone(),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }
}

fn load_file(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let content = std::fs::read_to_string(path)?;
    let file: AssociationFile = serde_json::from_str(&content)?;
    Ok(file.threads)
}

/// Resolve user input to an existing project directory.
///
/// Returns the canonical path and its directory name.
pub fn resolve_project_path(input: &str) -> Result<(PathBuf, String)> {
    let expanded = expand_home(Path::new(input.trim()));
    let resolved = dunce::canonicalize(&expanded)
        .map_err(|_| Error::InvalidPath(format!("path does not exist: {}", expanded.display())))?;

    if !resolved.is_dir() {
        return Err(Error::InvalidPath(format!(
            "path is not a directory: {}",
            resolved.display()
        )));
    }

    let display_name = resolved
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path_to_display(&resolved));
    Ok((resolved, display_name))
}
