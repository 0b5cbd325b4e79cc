//! Human-in-the-loop collaborators
//!
//! The router never decides approvals itself. Each conversation is handed an
//! [`ApprovalHandler`] by its platform adapter, and the agent runtime asks it
//! before doing anything risky. An optional [`DisplayHandler`] lets the runtime
//! push intermediate content while a prompt is still running.
//!
//! [`ChannelApproval`] is the adapter-friendly implementation: requests travel
//! over an mpsc channel, each carrying a oneshot sender for the decision, so
//! an adapter can render buttons and answer whenever the user clicks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::error::{Error, Result};

/// A yes/no decision put to a human
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub description: String,
    pub details: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl ApprovalRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            details: None,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Presents approval requests to a human
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    /// `Ok(true)` when approved, `Ok(false)` when denied
    async fn request_approval(&self, request: ApprovalRequest) -> Result<bool>;
}

/// Receives intermediate content from a running prompt
#[async_trait]
pub trait DisplayHandler: Send + Sync {
    async fn show(&self, content: &str) -> Result<()>;
}

/// Answers every request the same way
#[derive(Debug, Clone, Copy)]
pub struct StaticApproval {
    approve: bool,
}

impl StaticApproval {
    /// Approve everything (use with caution!)
    pub fn trust_all() -> Self {
        Self { approve: true }
    }

    pub fn deny_all() -> Self {
        Self { approve: false }
    }
}

#[async_trait]
impl ApprovalHandler for StaticApproval {
    async fn request_approval(&self, _request: ApprovalRequest) -> Result<bool> {
        Ok(self.approve)
    }
}

/// Bounded wait around another handler; a timeout counts as a denial
pub struct TimedApproval {
    inner: Arc<dyn ApprovalHandler>,
    timeout: Duration,
}

impl TimedApproval {
    pub fn new(inner: Arc<dyn ApprovalHandler>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl ApprovalHandler for TimedApproval {
    async fn request_approval(&self, request: ApprovalRequest) -> Result<bool> {
        let id = request.id.clone();
        match tokio::time::timeout(self.timeout, self.inner.request_approval(request)).await {
            Ok(decision) => decision,
            Err(_) => {
                warn!(
                    request = %id,
                    "Approval timed out after {}s; denying",
                    self.timeout.as_secs()
                );
                Ok(false)
            }
        }
    }
}

/// An approval request waiting for an adapter to answer it
#[derive(Debug)]
pub struct PendingApproval {
    pub request: ApprovalRequest,
    response_tx: oneshot::Sender<bool>,
}

impl PendingApproval {
    /// Send the decision back to the waiting runtime
    pub fn respond(self, approved: bool) {
        // The requester may have timed out and gone away
        let _ = self.response_tx.send(approved);
    }
}

/// Receiver half handed to the platform adapter
pub type ApprovalReceiver = mpsc::UnboundedReceiver<PendingApproval>;

/// Channel-backed approval handler
#[derive(Clone)]
pub struct ChannelApproval {
    tx: mpsc::UnboundedSender<PendingApproval>,
}

impl ChannelApproval {
    pub fn new() -> (Self, ApprovalReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ApprovalHandler for ChannelApproval {
    async fn request_approval(&self, request: ApprovalRequest) -> Result<bool> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(PendingApproval {
                request,
                response_tx,
            })
            .map_err(|_| Error::Approval("approval channel closed".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::Approval("approval dropped without a decision".to_string()))
    }
}
