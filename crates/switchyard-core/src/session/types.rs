//! Session types shared between the router, profiles and runtimes

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use super::capability::PlatformTool;
use crate::approval::{ApprovalHandler, DisplayHandler};

/// Unique identifier for a session
pub type SessionId = String;

/// Session metadata key under which a runtime persists the working directory
pub const WORKING_DIRECTORY_KEY: &str = "working_directory";

/// Everything a prepared profile needs to instantiate a session
#[derive(Clone)]
pub struct SessionSpec {
    pub session_id: SessionId,
    pub approval: Arc<dyn ApprovalHandler>,
    /// `None` when the caller posts the final response itself
    pub display: Option<Arc<dyn DisplayHandler>>,
    pub working_dir: PathBuf,
}

impl std::fmt::Debug for SessionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSpec")
            .field("session_id", &self.session_id)
            .field("display", &self.display.is_some())
            .field("working_dir", &self.working_dir)
            .finish()
    }
}

/// Collaborators an adapter hands over when routing a message
#[derive(Clone)]
pub struct SessionRequest {
    pub approval: Arc<dyn ApprovalHandler>,
    pub project_path: Option<PathBuf>,
    pub display: Option<Arc<dyn DisplayHandler>>,
    pub platform_tool: Option<Arc<dyn PlatformTool>>,
}

impl SessionRequest {
    pub fn new(approval: Arc<dyn ApprovalHandler>) -> Self {
        Self {
            approval,
            project_path: None,
            display: None,
            platform_tool: None,
        }
    }

    pub fn with_project(mut self, project_path: impl Into<PathBuf>) -> Self {
        self.project_path = Some(project_path.into());
        self
    }

    pub fn with_optional_project(mut self, project_path: Option<PathBuf>) -> Self {
        self.project_path = project_path;
        self
    }

    pub fn with_display(mut self, display: Arc<dyn DisplayHandler>) -> Self {
        self.display = Some(display);
        self
    }

    pub fn with_platform_tool(mut self, tool: Arc<dyn PlatformTool>) -> Self {
        self.platform_tool = Some(tool);
        self
    }

    pub fn project_path(&self) -> Option<&Path> {
        self.project_path.as_deref()
    }
}

/// Snapshot of a registered session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub conversation_id: String,
    pub session_id: SessionId,
    pub profile: String,
    pub project: Option<PathBuf>,
    pub working_dir: PathBuf,
    pub capabilities: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
