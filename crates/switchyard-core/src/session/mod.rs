//! Session module - conversation to agent-session routing
//!
//! Key components:
//!
//! - `SessionRouter`: owns the conversation -> session map, recreates sessions
//!   when a conversation's profile changes, and tears everything down on
//!   shutdown
//! - `ConversationLocks`: one message lock per conversation, stable across
//!   session recreation
//! - `WorkingDirs`: per-conversation working directory overrides
//! - `CapabilityMap`: typed capabilities mounted into each session
//!
//! # Architecture
//!
//! ```text
//! inbound (conversation_id, project_path)
//!         │
//!         ▼
//! ┌─────────────────── SessionRouter ───────────────────┐
//! │ ProfileResolver ──▶ profile name                    │
//! │        │                                            │
//! │        ├── same as recorded? ──▶ reuse session      │
//! │        └── differs/absent ──▶ close old, then       │
//! │             ProfileCache ──▶ PreparedProfile        │
//! │                    └──▶ create_session(spec)        │
//! │                                                     │
//! │ sessions: conversation -> (session, profile)        │
//! │ locks:    conversation -> Mutex<()>   (kept)        │
//! │ workdirs: conversation -> PathBuf     (kept)        │
//! └─────────────────────────────────────────────────────┘
//!         │
//!         ▼
//! caller: lock.lock().await; session.execute(prompt)
//! ```
//!
//! # Example Usage
//!
//! ```ignore
//! use switchyard_core::session::{SessionRequest, SessionRouter};
//!
//! let router = SessionRouter::new(resolver, loader, default_workdir);
//! router.initialize().await?;
//!
//! let request = SessionRequest::new(approval).with_project("/path/to/project");
//! let (session, lock) = router.get_or_create_session("slack-C123", request).await?;
//!
//! let _guard = lock.lock().await;
//! let reply = session.execute("What changed today?").await?;
//! ```

mod capability;
mod locks;
mod project;
mod router;
mod spawn;
mod types;
mod workdir;

pub use capability::{
    tool_name_from_type, Capability, CapabilityMap, PlatformTool, PROJECT_MANAGER, SPAWN,
    WORKING_DIR,
};
pub use locks::{ConversationLock, ConversationLocks};
pub use project::{ProjectEntry, ProjectManager};
pub use router::{SessionRouter, SessionRouterBuilder, WeakRouter};
pub use spawn::{SpawnConfig, SubSessionSpawner};
pub use types::{SessionId, SessionInfo, SessionRequest, SessionSpec, WORKING_DIRECTORY_KEY};
pub use workdir::WorkingDirs;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};

/// A live, stateful agent session
///
/// Sessions are shared (`Arc<dyn AgentSession>`), so everything takes `&self`;
/// implementations use interior mutability for their state.
#[async_trait]
pub trait AgentSession: Send + Sync {
    fn session_id(&self) -> &str;

    /// Run one prompt to completion and return the final response
    async fn execute(&self, prompt: &str) -> Result<String>;

    /// Capabilities mounted into this session
    fn capabilities(&self) -> &CapabilityMap;

    /// Read persisted session metadata
    async fn get_metadata(&self, _key: &str) -> Result<Option<Value>> {
        Ok(None)
    }

    /// Persist session metadata
    async fn set_metadata(&self, key: &str, _value: Value) -> Result<()> {
        Err(Error::Session(format!(
            "session {} does not persist metadata ('{}')",
            self.session_id(),
            key
        )))
    }

    /// Release the session. Errors are reported, never retried.
    async fn close(&self) -> Result<()>;
}
