//! Detached child sessions for delegated sub-tasks

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::router::WeakRouter;
use super::types::SessionSpec;
use super::AgentSession;
use crate::approval::ApprovalHandler;
use crate::error::{Error, Result};
use crate::profile::PreparedProfile;

/// Parameters for a child session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpawnConfig {
    /// Id for the child; a UUID is generated when absent or empty
    #[serde(default)]
    pub session_id: Option<String>,
}

impl SpawnConfig {
    pub fn with_session_id(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
        }
    }
}

/// Creates sessions from the parent conversation's prepared profile.
///
/// Children get no display collaborator and no lock in the router; whoever
/// spawns one owns its lifecycle and must close it.
pub struct SubSessionSpawner {
    parent: String,
    prepared: Arc<dyn PreparedProfile>,
    approval: Arc<dyn ApprovalHandler>,
    project: Option<PathBuf>,
    router: WeakRouter,
}

impl SubSessionSpawner {
    pub(crate) fn new(
        parent: impl Into<String>,
        prepared: Arc<dyn PreparedProfile>,
        approval: Arc<dyn ApprovalHandler>,
        project: Option<PathBuf>,
        router: WeakRouter,
    ) -> Self {
        Self {
            parent: parent.into(),
            prepared,
            approval,
            project,
            router,
        }
    }

    /// Conversation this spawner belongs to
    pub fn parent(&self) -> &str {
        &self.parent
    }

    pub fn profile_name(&self) -> &str {
        self.prepared.name()
    }

    pub async fn spawn(&self, config: SpawnConfig) -> Result<Arc<dyn AgentSession>> {
        let router = self
            .router
            .upgrade()
            .ok_or_else(|| Error::Session("session router has shut down".to_string()))?;

        let session_id = config
            .session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let working_dir = router.working_dir_for(&self.parent, self.project.as_deref());

        info!(
            conversation = %self.parent,
            profile = %self.prepared.name(),
            "Spawning sub-session {} in {}",
            session_id,
            working_dir.display()
        );

        self.prepared
            .create_session(SessionSpec {
                session_id,
                approval: self.approval.clone(),
                display: None,
                working_dir,
            })
            .await
    }
}
