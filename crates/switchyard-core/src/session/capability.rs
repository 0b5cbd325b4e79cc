//! Capabilities attached to a live session
//!
//! A session exposes a name -> capability map that the router fills in after
//! construction and keeps current (the working directory is pushed here every
//! time it changes). Capabilities are a closed set of variants rather than
//! arbitrary objects, so consumers match on what they need.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::project::ProjectManager;
use super::spawn::SubSessionSpawner;
use crate::error::Result;

/// Capability holding the conversation's current working directory
pub const WORKING_DIR: &str = "session.working_dir";
/// Capability for delegating to sub-sessions
pub const SPAWN: &str = "spawn";
/// Capability for switching directories from inside a session
pub const PROJECT_MANAGER: &str = "project_manager";

/// A platform-specific tool mounted into sessions (e.g. "reply in this thread")
#[async_trait]
pub trait PlatformTool: Send + Sync {
    /// Mount name. Defaults to the implementing type's name in snake_case with
    /// any `Tool` suffix removed, so `SlackReplyTool` mounts as `slack_reply`.
    fn name(&self) -> String {
        tool_name_from_type(std::any::type_name::<Self>())
    }

    fn description(&self) -> &str;

    async fn invoke(&self, params: Value) -> Result<Value>;
}

/// Derive a mount name from a (possibly path-qualified) type name
pub fn tool_name_from_type(type_name: &str) -> String {
    let without_generics = type_name.split('<').next().unwrap_or(type_name);
    let base = without_generics.rsplit("::").next().unwrap_or(without_generics);
    let base = base.strip_suffix("Tool").unwrap_or(base);

    let mut name = String::with_capacity(base.len() + 4);
    for (i, c) in base.chars().enumerate() {
        if c.is_uppercase() && i > 0 {
            name.push('_');
        }
        name.extend(c.to_lowercase());
    }
    name
}

/// Everything a session can be given
#[derive(Clone)]
pub enum Capability {
    WorkingDir(PathBuf),
    Spawn(Arc<SubSessionSpawner>),
    ProjectManager(Arc<ProjectManager>),
    Tool(Arc<dyn PlatformTool>),
}

impl Capability {
    pub fn kind(&self) -> &'static str {
        match self {
            Capability::WorkingDir(_) => "working_dir",
            Capability::Spawn(_) => "spawn",
            Capability::ProjectManager(_) => "project_manager",
            Capability::Tool(_) => "tool",
        }
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::WorkingDir(path) => f.debug_tuple("WorkingDir").field(path).finish(),
            Capability::Tool(tool) => f.debug_tuple("Tool").field(&tool.name()).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// Name -> capability registry owned by a session
#[derive(Default)]
pub struct CapabilityMap {
    entries: RwLock<HashMap<String, Capability>>,
}

impl CapabilityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a capability
    pub fn register(&self, name: impl Into<String>, capability: Capability) {
        self.entries.write().insert(name.into(), capability);
    }

    pub fn get(&self, name: &str) -> Option<Capability> {
        self.entries.read().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Capability> {
        self.entries.write().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn working_dir(&self) -> Option<PathBuf> {
        match self.get(WORKING_DIR)? {
            Capability::WorkingDir(path) => Some(path),
            _ => None,
        }
    }

    pub fn spawner(&self) -> Option<Arc<SubSessionSpawner>> {
        match self.get(SPAWN)? {
            Capability::Spawn(spawner) => Some(spawner),
            _ => None,
        }
    }

    pub fn project_manager(&self) -> Option<Arc<ProjectManager>> {
        match self.get(PROJECT_MANAGER)? {
            Capability::ProjectManager(manager) => Some(manager),
            _ => None,
        }
    }

    pub fn tool(&self, name: &str) -> Option<Arc<dyn PlatformTool>> {
        match self.get(name)? {
            Capability::Tool(tool) => Some(tool),
            _ => None,
        }
    }
}
