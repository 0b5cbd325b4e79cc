//! Stand-in agent runtime for exercising routing from the command line
//!
//! Sessions answer with what they were configured with instead of running a
//! model, which is enough to see which profile and directory a message lands
//! in.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use switchyard_core::profile::{ProfileManifest, RuntimeFactory};
use switchyard_core::session::{AgentSession, CapabilityMap, SessionSpec};
use switchyard_core::Result;

pub struct DryRunRuntime;

#[async_trait]
impl RuntimeFactory for DryRunRuntime {
    async fn create_session(
        &self,
        manifest: &ProfileManifest,
        spec: SessionSpec,
    ) -> Result<Arc<dyn AgentSession>> {
        Ok(Arc::new(DryRunSession {
            id: spec.session_id,
            manifest: manifest.clone(),
            capabilities: CapabilityMap::new(),
            metadata: Mutex::new(HashMap::new()),
        }))
    }
}

struct DryRunSession {
    id: String,
    manifest: ProfileManifest,
    capabilities: CapabilityMap,
    metadata: Mutex<HashMap<String, Value>>,
}

#[async_trait]
impl AgentSession for DryRunSession {
    fn session_id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, prompt: &str) -> Result<String> {
        let working_dir = self
            .capabilities
            .working_dir()
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|| "(unset)".to_string());
        Ok(format!(
            "profile '{}' in {} received: {}",
            self.manifest.name, working_dir, prompt
        ))
    }

    fn capabilities(&self) -> &CapabilityMap {
        &self.capabilities
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.metadata.lock().await.get(key).cloned())
    }

    async fn set_metadata(&self, key: &str, value: Value) -> Result<()> {
        self.metadata.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
