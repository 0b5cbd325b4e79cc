//! Inbound message handling for platform adapters
//!
//! Ties the pieces together the way every adapter needs them: look up the
//! conversation's project, route to a session, serialize on the conversation
//! lock, execute, and turn failures into chat-safe text.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::approval::ApprovalHandler;
use crate::associations::ThreadAssociations;
use crate::error::{Error, ErrorCategory, Result};
use crate::session::{SessionRequest, SessionRouter};

/// A message received from a chat platform
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub conversation_id: String,
    pub text: String,
    /// Explicit project; falls back to the conversation's association
    pub project_path: Option<PathBuf>,
}

impl InboundMessage {
    pub fn new(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            text: text.into(),
            project_path: None,
        }
    }

    pub fn with_project(mut self, project_path: impl Into<PathBuf>) -> Self {
        self.project_path = Some(project_path.into());
        self
    }
}

/// What to post back to the conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Response(String),
    Failure {
        message: String,
        category: ErrorCategory,
    },
}

impl Reply {
    pub fn text(&self) -> &str {
        match self {
            Reply::Response(text) => text,
            Reply::Failure { message, .. } => message,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Reply::Failure { .. })
    }
}

/// Routes inbound messages to sessions and runs them one at a time per
/// conversation
pub struct Dispatcher {
    router: SessionRouter,
    approval: Arc<dyn ApprovalHandler>,
    associations: Option<Arc<ThreadAssociations>>,
    execute_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(router: SessionRouter, approval: Arc<dyn ApprovalHandler>) -> Self {
        Self {
            router,
            approval,
            associations: None,
            execute_timeout: None,
        }
    }

    pub fn with_associations(mut self, associations: Arc<ThreadAssociations>) -> Self {
        self.associations = Some(associations);
        self
    }

    pub fn with_execute_timeout(mut self, timeout: Duration) -> Self {
        self.execute_timeout = Some(timeout);
        self
    }

    pub fn router(&self) -> &SessionRouter {
        &self.router
    }

    /// Handle a message with the dispatcher's default collaborators
    pub async fn dispatch(&self, message: InboundMessage) -> Reply {
        let request = SessionRequest::new(self.approval.clone());
        self.dispatch_with(message, request).await
    }

    /// Handle a message with adapter-supplied collaborators.
    ///
    /// The project in `request` is replaced by the message's project, or the
    /// conversation's association when the message has none.
    pub async fn dispatch_with(&self, message: InboundMessage, request: SessionRequest) -> Reply {
        match self.execute(&message, request).await {
            Ok(response) => Reply::Response(response),
            Err(e) => {
                let category = e.category();
                match category {
                    ErrorCategory::Internal => {
                        error!(conversation = %message.conversation_id, "Message failed: {}", e)
                    }
                    _ => warn!(conversation = %message.conversation_id, "Message failed: {}", e),
                }
                Reply::Failure {
                    message: e.user_message(),
                    category,
                }
            }
        }
    }

    /// Same as [`dispatch_with`](Self::dispatch_with) but returns the error
    /// itself
    pub async fn execute(&self, message: &InboundMessage, request: SessionRequest) -> Result<String> {
        let project = self.project_for(message);
        let request = request.with_optional_project(project);

        let (session, lock) = self
            .router
            .get_or_create_session(&message.conversation_id, request)
            .await?;

        let _guard = lock.lock().await;
        debug!(conversation = %message.conversation_id, "Executing message");

        match self.execute_timeout {
            Some(timeout) => tokio::time::timeout(timeout, session.execute(&message.text))
                .await
                .map_err(|_| Error::Timeout(timeout))?,
            None => session.execute(&message.text).await,
        }
    }

    fn project_for(&self, message: &InboundMessage) -> Option<PathBuf> {
        message.project_path.clone().or_else(|| {
            self.associations
                .as_ref()
                .and_then(|associations| associations.project_for(&message.conversation_id))
        })
    }
}
