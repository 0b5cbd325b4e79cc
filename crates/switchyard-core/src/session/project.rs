//! Lets an agent inspect and move its conversation's working directory

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::capability::{PlatformTool, PROJECT_MANAGER};
use super::router::{SessionRouter, WeakRouter};
use super::types::WORKING_DIRECTORY_KEY;
use crate::error::{Error, Result};
use crate::paths::{absolutize, is_within_any, path_to_display};

/// A directory found by [`ProjectManager::list_projects`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectEntry {
    pub name: String,
    pub path: PathBuf,
    /// Has a `.git` directory
    pub git: bool,
}

/// Working-directory control for one conversation
pub struct ProjectManager {
    conversation_id: String,
    router: WeakRouter,
    allowed_roots: Vec<PathBuf>,
}

impl ProjectManager {
    pub(crate) fn new(
        conversation_id: impl Into<String>,
        router: WeakRouter,
        allowed_roots: Vec<PathBuf>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            router,
            allowed_roots,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn allowed_roots(&self) -> &[PathBuf] {
        &self.allowed_roots
    }

    fn router(&self) -> Result<SessionRouter> {
        self.router
            .upgrade()
            .ok_or_else(|| Error::Session("session router has shut down".to_string()))
    }

    pub fn current_directory(&self) -> Result<PathBuf> {
        Ok(self.router()?.current_working_dir(&self.conversation_id))
    }

    /// Move the conversation to `path`, relative to the current directory.
    ///
    /// The target must exist and sit under one of the allowed roots. The new
    /// directory is persisted in the session metadata so a recreated session
    /// picks it up again.
    pub async fn change_directory(&self, path: &str) -> Result<PathBuf> {
        let router = self.router()?;
        let current = router.current_working_dir(&self.conversation_id);
        let target = absolutize(Path::new(path), &current);

        self.check_allowed(&target)?;
        if !is_dir(&target).await {
            return Err(Error::InvalidPath(format!(
                "directory does not exist: {}",
                path_to_display(&target)
            )));
        }

        let stored = router.set_working_dir(&self.conversation_id, &target);
        info!(conversation = %self.conversation_id, "Changed working directory to {}", stored.display());

        if let Some(session) = router.session(&self.conversation_id) {
            let value = Value::String(path_to_display(&stored));
            if let Err(e) = session.set_metadata(WORKING_DIRECTORY_KEY, value).await {
                debug!(conversation = %self.conversation_id, "Working directory not persisted: {}", e);
            }
        }

        Ok(stored)
    }

    /// Subdirectories of `directory` (default: the current directory), sorted
    /// by name. The listed directory must sit under the allowed roots.
    pub async fn list_projects(&self, directory: Option<&str>) -> Result<(PathBuf, Vec<ProjectEntry>)> {
        let current = self.current_directory()?;
        let target = match directory {
            Some(dir) => absolutize(Path::new(dir), &current),
            None => current,
        };

        self.check_allowed(&target)?;
        if !is_dir(&target).await {
            return Err(Error::InvalidPath(format!(
                "not a directory: {}",
                path_to_display(&target)
            )));
        }

        let mut projects = Vec::new();
        let mut entries = tokio::fs::read_dir(&target).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_dir(&path).await {
                continue;
            }
            projects.push(ProjectEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                git: is_dir(&path.join(".git")).await,
                path,
            });
        }
        projects.sort_by(|a, b| a.name.cmp(&b.name));

        debug!(conversation = %self.conversation_id, "Listed {} project(s) in {}", projects.len(), target.display());
        Ok((target, projects))
    }

    fn check_allowed(&self, target: &Path) -> Result<()> {
        if self.allowed_roots.is_empty() || is_within_any(target, &self.allowed_roots) {
            return Ok(());
        }
        let allowed: Vec<String> = self.allowed_roots.iter().map(|r| path_to_display(r)).collect();
        Err(Error::InvalidPath(format!(
            "{} is outside the allowed directories ({})",
            path_to_display(target),
            allowed.join(", ")
        )))
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

#[async_trait]
impl PlatformTool for ProjectManager {
    fn name(&self) -> String {
        PROJECT_MANAGER.to_string()
    }

    fn description(&self) -> &str {
        "Show or change the working directory for this conversation. \
         Operations: current_directory, change_directory (requires path), \
         list_projects (optional directory)."
    }

    async fn invoke(&self, params: Value) -> Result<Value> {
        let operation = params
            .get("operation")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Capability("missing 'operation'".to_string()))?;

        match operation {
            "current_directory" => {
                let dir = self.current_directory()?;
                Ok(json!({ "working_directory": path_to_display(&dir) }))
            }
            "change_directory" => {
                let path = params
                    .get("path")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Capability("change_directory requires 'path'".to_string()))?;
                let dir = self.change_directory(path).await?;
                Ok(json!({ "working_directory": path_to_display(&dir) }))
            }
            "list_projects" => {
                let directory = params.get("directory").and_then(Value::as_str);
                let (dir, projects) = self.list_projects(directory).await?;
                let projects = serde_json::to_value(&projects)?;
                Ok(json!({
                    "directory": path_to_display(&dir),
                    "projects": projects,
                }))
            }
            other => Err(Error::Capability(format!(
                "unknown project_manager operation: {}",
                other
            ))),
        }
    }
}
