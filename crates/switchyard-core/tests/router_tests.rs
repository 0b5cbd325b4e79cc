//! Session router integration tests
//!
//! Tests for conversation routing including:
//! - Initialization and the not-initialized guard
//! - Session identity, drift recreation and lock stability
//! - Working directory tracking and live sync
//! - Capabilities (platform tool, spawn, project manager)
//! - Shutdown
//! - Message dispatch

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use switchyard_core::approval::StaticApproval;
use switchyard_core::error::{Error, LoadError, Result};
use switchyard_core::profile::{LoadTarget, PreparedProfile, ProfileLoader};
use switchyard_core::session::{
    AgentSession, CapabilityMap, PlatformTool, SessionRequest, SessionRouter, SessionSpec,
    SpawnConfig, PROJECT_MANAGER, SPAWN, WORKING_DIRECTORY_KEY, WORKING_DIR,
};
use switchyard_core::settings::{AppSettings, ProfileResolver, SettingsLayer, SettingsSource};

const DEFAULT_WORKDIR: &str = "/srv/switchyard";

// ============================================================================
// Test doubles
// ============================================================================

/// Settings source backed by a map of project -> active profile.
///
/// Every declared profile is also registered under its own name, so the
/// waterfall accepts it.
#[derive(Default)]
struct MapSettings {
    global: Mutex<Option<String>>,
    projects: Mutex<HashMap<PathBuf, String>>,
}

impl MapSettings {
    fn set_project(&self, project: &str, profile: &str) {
        self.projects
            .lock()
            .insert(PathBuf::from(project), profile.to_string());
    }
}

impl SettingsSource for MapSettings {
    fn load(&self, project_dir: Option<&Path>) -> Result<AppSettings> {
        let mut layers = Vec::new();
        if let Some(global) = self.global.lock().clone() {
            let yaml = format!("bundle:\n  active: {}\n", global);
            layers.push((SettingsLayer::Global, serde_yml::from_str(&yaml).unwrap()));
        }
        if let Some(profile) = project_dir.and_then(|dir| self.projects.lock().get(dir).cloned()) {
            let yaml = format!(
                "bundle:\n  active: {p}\n  added:\n    {p}: {p}\n",
                p = profile
            );
            layers.push((SettingsLayer::Project, serde_yml::from_str(&yaml).unwrap()));
        }
        Ok(AppSettings::from_layers(
            layers,
            project_dir.map(Path::to_path_buf),
        ))
    }
}

struct MockSession {
    id: String,
    profile: String,
    serial: usize,
    working_dir: PathBuf,
    has_display: bool,
    capabilities: CapabilityMap,
    metadata: Mutex<HashMap<String, Value>>,
    close_calls: AtomicUsize,
    fail_close: bool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[async_trait]
impl AgentSession for MockSession {
    fn session_id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, prompt: &str) -> Result<String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if prompt == "boom" {
            return Err(Error::Session("runtime exploded".into()));
        }
        Ok(format!("{}#{}: {}", self.profile, self.serial, prompt))
    }

    fn capabilities(&self) -> &CapabilityMap {
        &self.capabilities
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.metadata.lock().get(key).cloned())
    }

    async fn set_metadata(&self, key: &str, value: Value) -> Result<()> {
        self.metadata.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(Error::Session("close failed".into()));
        }
        Ok(())
    }
}

/// Shared record of everything the mock runtime did
#[derive(Default)]
struct Runtime {
    loads: Mutex<Vec<String>>,
    sessions: Mutex<Vec<Arc<MockSession>>>,
    /// Metadata every new session starts with
    saved_metadata: Mutex<HashMap<String, Value>>,
    fail_close_profile: Mutex<Option<String>>,
    /// Number of upcoming loads that should fail
    failing_loads: AtomicUsize,
    /// How long `create_session` takes; 5ms when unset
    create_delay: Mutex<Option<Duration>>,
}

impl Runtime {
    fn load_count(&self) -> usize {
        self.loads.lock().len()
    }

    fn session(&self, index: usize) -> Arc<MockSession> {
        self.sessions.lock()[index].clone()
    }

    fn created(&self) -> usize {
        self.sessions.lock().len()
    }
}

struct MockProfile {
    name: String,
    runtime: Arc<Runtime>,
}

#[async_trait]
impl PreparedProfile for MockProfile {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_session(&self, spec: SessionSpec) -> Result<Arc<dyn AgentSession>> {
        let delay = self
            .runtime
            .create_delay
            .lock()
            .unwrap_or(Duration::from_millis(5));
        tokio::time::sleep(delay).await;
        let mut sessions = self.runtime.sessions.lock();
        let session = Arc::new(MockSession {
            id: spec.session_id,
            profile: self.name.clone(),
            serial: sessions.len() + 1,
            working_dir: spec.working_dir,
            has_display: spec.display.is_some(),
            capabilities: CapabilityMap::new(),
            metadata: Mutex::new(self.runtime.saved_metadata.lock().clone()),
            close_calls: AtomicUsize::new(0),
            fail_close: self.runtime.fail_close_profile.lock().as_deref() == Some(self.name.as_str()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        sessions.push(session.clone());
        Ok(session)
    }
}

struct MockLoader {
    runtime: Arc<Runtime>,
}

#[async_trait]
impl ProfileLoader for MockLoader {
    async fn load(
        &self,
        target: &LoadTarget,
        _settings: &AppSettings,
    ) -> std::result::Result<Arc<dyn PreparedProfile>, LoadError> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.runtime.loads.lock().push(target.to_string());

        let failing = self.runtime.failing_loads.load(Ordering::SeqCst);
        if failing > 0 {
            self.runtime.failing_loads.store(failing - 1, Ordering::SeqCst);
            return Err(LoadError::NotFound(target.to_string()));
        }

        Ok(Arc::new(MockProfile {
            name: target.to_string(),
            runtime: self.runtime.clone(),
        }))
    }
}

struct SlackReplyTool;

#[async_trait]
impl PlatformTool for SlackReplyTool {
    fn description(&self) -> &str {
        "Reply in the current Slack thread"
    }

    async fn invoke(&self, params: Value) -> Result<Value> {
        Ok(params)
    }
}

struct Harness {
    router: SessionRouter,
    settings: Arc<MapSettings>,
    runtime: Arc<Runtime>,
}

fn harness() -> Harness {
    harness_with_roots(Vec::new())
}

fn harness_with_roots(allowed_roots: Vec<PathBuf>) -> Harness {
    let settings = Arc::new(MapSettings::default());
    let runtime = Arc::new(Runtime::default());
    let resolver = Arc::new(ProfileResolver::new(settings.clone(), "foundation"));
    let loader = Arc::new(MockLoader {
        runtime: runtime.clone(),
    });
    let router = SessionRouter::builder(resolver, loader)
        .default_workdir(DEFAULT_WORKDIR)
        .allowed_roots(allowed_roots)
        .build();
    Harness {
        router,
        settings,
        runtime,
    }
}

async fn ready() -> Harness {
    let h = harness();
    h.router.initialize().await.unwrap();
    h
}

fn request() -> SessionRequest {
    SessionRequest::new(Arc::new(StaticApproval::trust_all()))
}

// ============================================================================
// Initialization
// ============================================================================

mod initialization_tests {
    use super::*;

    #[tokio::test]
    async fn test_requires_initialize() {
        let h = harness();
        assert!(!h.router.is_initialized());

        let err = h.router.get_or_create_session("X", request()).await.err().unwrap();
        assert!(matches!(err, Error::NotInitialized));
        assert_eq!(h.router.session_count(), 0);
        assert_eq!(h.router.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_initialize_preloads_default_profile() {
        let h = harness();
        h.router.initialize().await.unwrap();

        assert!(h.router.is_initialized());
        assert_eq!(*h.runtime.loads.lock(), vec!["foundation".to_string()]);
        assert!(h.router.profiles().contains("foundation", None));

        // Second call is a no-op
        h.router.initialize().await.unwrap();
        assert_eq!(h.runtime.load_count(), 1);
    }

    #[tokio::test]
    async fn test_initialize_fails_when_profile_cannot_load() {
        let h = harness();
        h.runtime.failing_loads.store(1, Ordering::SeqCst);

        let err = h.router.initialize().await.err().unwrap();
        assert!(matches!(err, Error::ProfileLoad { ref profile, .. } if profile == "foundation"));
        assert!(!h.router.is_initialized());

        h.router.initialize().await.unwrap();
        assert!(h.router.is_initialized());
    }

    #[tokio::test]
    async fn test_initialize_uses_global_declaration() {
        let h = harness();
        *h.settings.global.lock() = Some("team".to_string());
        h.router.initialize().await.unwrap();
        assert_eq!(*h.runtime.loads.lock(), vec!["team".to_string()]);
    }
}

// ============================================================================
// Routing
// ============================================================================

mod routing_tests {
    use super::*;

    #[tokio::test]
    async fn test_identity_stability() {
        let h = ready().await;

        let (s1, l1) = h.router.get_or_create_session("slack-C1", request()).await.unwrap();
        let (s2, l2) = h.router.get_or_create_session("slack-C1", request()).await.unwrap();

        assert!(Arc::ptr_eq(&s1, &s2));
        assert!(Arc::ptr_eq(&l1, &l2));
        assert_eq!(h.runtime.created(), 1);
        assert_eq!(h.router.session_count(), 1);
    }

    #[tokio::test]
    async fn test_conversations_are_independent() {
        let h = ready().await;

        let (s1, l1) = h.router.get_or_create_session("a", request()).await.unwrap();
        let (s2, l2) = h.router.get_or_create_session("b", request()).await.unwrap();

        assert!(!Arc::ptr_eq(&s1, &s2));
        assert!(!Arc::ptr_eq(&l1, &l2));
        assert_eq!(h.router.list_conversations(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_profile_switch_scenario() {
        let h = ready().await;
        h.settings.set_project("/p", "agent");

        let (s1, lock1) = h.router.get_or_create_session("X", request()).await.unwrap();
        assert_eq!(h.router.session_profile("X").as_deref(), Some("foundation"));
        assert_eq!(s1.execute("hi").await.unwrap(), "foundation#1: hi");

        let (s2, lock2) = h
            .router
            .get_or_create_session("X", request().with_project("/p"))
            .await
            .unwrap();

        assert_eq!(h.runtime.session(0).close_calls.load(Ordering::SeqCst), 1);
        assert!(!Arc::ptr_eq(&s1, &s2));
        assert_eq!(s2.execute("hi").await.unwrap(), "agent#2: hi");
        assert!(Arc::ptr_eq(&lock1, &lock2));
        assert_eq!(h.router.session_profile("X").as_deref(), Some("agent"));
        assert_eq!(h.router.session_project("X"), Some(PathBuf::from("/p")));
        assert_eq!(h.router.session_count(), 1);
    }

    #[tokio::test]
    async fn test_drift_closes_old_session_exactly_once() {
        let h = ready().await;
        h.settings.set_project("/a", "alpha");
        h.settings.set_project("/b", "beta");

        h.router.get_or_create_session("c", request().with_project("/a")).await.unwrap();
        h.router.get_or_create_session("c", request().with_project("/b")).await.unwrap();
        h.router.get_or_create_session("c", request().with_project("/b")).await.unwrap();

        assert_eq!(h.runtime.created(), 2);
        assert_eq!(h.runtime.session(0).close_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.runtime.session(1).close_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_false_recreation_for_shared_profile() {
        let h = ready().await;
        h.settings.set_project("/a", "agent");
        h.settings.set_project("/b", "agent");

        let (s1, _) = h.router.get_or_create_session("c", request().with_project("/a")).await.unwrap();
        let (s2, _) = h.router.get_or_create_session("c", request().with_project("/b")).await.unwrap();

        assert!(Arc::ptr_eq(&s1, &s2));
        assert_eq!(h.runtime.created(), 1);
        assert_eq!(h.runtime.session(0).close_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_project_without_declaration_uses_default() {
        let h = ready().await;

        let (s1, _) = h.router.get_or_create_session("c", request()).await.unwrap();
        let (s2, _) = h
            .router
            .get_or_create_session("c", request().with_project("/plain"))
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&s1, &s2));
        assert_eq!(h.router.session_profile("c").as_deref(), Some("foundation"));
    }

    #[tokio::test]
    async fn test_prepared_profiles_are_project_scoped() {
        let h = ready().await;
        h.settings.set_project("/a", "agent");
        h.settings.set_project("/b", "agent");

        h.router.get_or_create_session("c1", request().with_project("/a")).await.unwrap();
        h.router.get_or_create_session("c2", request().with_project("/b")).await.unwrap();
        h.router.get_or_create_session("c3", request().with_project("/a")).await.unwrap();

        // foundation at init, then agent for /a and /b
        assert_eq!(h.runtime.load_count(), 3);
        assert!(h.router.profiles().contains("agent", Some(Path::new("/a"))));
        assert!(h.router.profiles().contains("agent", Some(Path::new("/b"))));
    }

    #[tokio::test]
    async fn test_load_failure_leaves_state_intact() {
        let h = ready().await;
        h.settings.set_project("/p", "agent");

        let (_, lock) = h.router.get_or_create_session("c", request()).await.unwrap();
        h.router.set_working_dir("c", "/work/c");
        h.runtime.failing_loads.store(1, Ordering::SeqCst);

        let err = h
            .router
            .get_or_create_session("c", request().with_project("/p"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::ProfileLoad { ref profile, .. } if profile == "agent"));
        assert!(!h.router.has_session("c"));
        assert_eq!(h.router.get_working_dir("c"), PathBuf::from("/work/c"));

        let (session, lock_after) = h
            .router
            .get_or_create_session("c", request().with_project("/p"))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&lock, &lock_after));
        assert_eq!(session.execute("x").await.unwrap(), "agent#2: x");
    }

    #[tokio::test]
    async fn test_concurrent_first_messages_keep_one_session() {
        let h = ready().await;
        let router = h.router.clone();

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let router = router.clone();
                tokio::spawn(async move {
                    let (session, _) = router.get_or_create_session("new", request()).await.unwrap();
                    session.execute("ping").await.unwrap()
                })
            })
            .collect();

        let replies: Vec<String> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert!(replies.iter().all(|reply| reply == &replies[0]));
        assert_eq!(h.router.session_count(), 1);

        let live = h.router.session("new").unwrap();
        let closed: usize = (0..h.runtime.created())
            .map(|i| h.runtime.session(i).close_calls.load(Ordering::SeqCst))
            .sum();
        assert_eq!(closed, h.runtime.created() - 1);
        assert_eq!(live.execute("ping").await.unwrap(), replies[0]);
    }

    #[tokio::test]
    async fn test_session_is_bound_to_conversation() {
        let h = ready().await;
        let (session, _) = h.router.get_or_create_session("slack-C9", request()).await.unwrap();
        assert_eq!(session.session_id(), "slack-C9");

        let info = h.router.session_info("slack-C9").unwrap();
        assert_eq!(info.profile, "foundation");
        assert_eq!(info.working_dir, PathBuf::from(DEFAULT_WORKDIR));
        assert!(info.capabilities.contains(&SPAWN.to_string()));
    }
}

// ============================================================================
// Working directories
// ============================================================================

mod working_dir_tests {
    use super::*;

    #[tokio::test]
    async fn test_default_and_project_precedence() {
        let h = ready().await;

        h.router.get_or_create_session("plain", request()).await.unwrap();
        assert_eq!(h.runtime.session(0).working_dir, PathBuf::from(DEFAULT_WORKDIR));

        h.router
            .get_or_create_session("proj", request().with_project("/p"))
            .await
            .unwrap();
        assert_eq!(h.runtime.session(1).working_dir, PathBuf::from("/p"));
        assert_eq!(h.router.current_working_dir("proj"), PathBuf::from("/p"));
        assert_eq!(h.router.get_working_dir("proj"), PathBuf::from(DEFAULT_WORKDIR));
    }

    #[tokio::test]
    async fn test_set_before_session_is_honored() {
        let h = ready().await;

        let stored = h.router.set_working_dir("c", "/work/early");
        assert_eq!(stored, PathBuf::from("/work/early"));
        assert!(!h.router.has_session("c"));

        let (session, _) = h
            .router
            .get_or_create_session("c", request().with_project("/p"))
            .await
            .unwrap();
        assert_eq!(h.runtime.session(0).working_dir, PathBuf::from("/work/early"));
        assert_eq!(
            session.capabilities().working_dir(),
            Some(PathBuf::from("/work/early"))
        );
    }

    #[tokio::test]
    async fn test_set_pushes_into_live_session() {
        let h = ready().await;
        let (session, _) = h.router.get_or_create_session("c", request()).await.unwrap();
        assert_eq!(
            session.capabilities().working_dir(),
            Some(PathBuf::from(DEFAULT_WORKDIR))
        );

        h.router.set_working_dir("c", "/work/moved/../now");
        assert_eq!(
            session.capabilities().working_dir(),
            Some(PathBuf::from("/work/now"))
        );
        assert_eq!(h.router.get_working_dir("c"), PathBuf::from("/work/now"));
    }

    #[tokio::test]
    async fn test_override_survives_recreation() {
        let h = ready().await;
        h.settings.set_project("/p", "agent");

        h.router.get_or_create_session("c", request()).await.unwrap();
        h.router.set_working_dir("c", "/work/kept");
        h.router
            .get_or_create_session("c", request().with_project("/p"))
            .await
            .unwrap();

        assert_eq!(h.runtime.session(1).working_dir, PathBuf::from("/work/kept"));
    }

    #[tokio::test]
    async fn test_saved_working_directory_is_recovered() {
        let h = ready().await;
        let saved = TempDir::new().unwrap();
        h.runtime.saved_metadata.lock().insert(
            WORKING_DIRECTORY_KEY.to_string(),
            Value::String(saved.path().to_string_lossy().into_owned()),
        );

        let (session, _) = h.router.get_or_create_session("c", request()).await.unwrap();
        assert_eq!(h.router.get_working_dir("c"), saved.path());
        assert_eq!(session.capabilities().working_dir(), Some(saved.path().to_path_buf()));
    }

    #[tokio::test]
    async fn test_missing_saved_directory_is_ignored() {
        let h = ready().await;
        h.runtime.saved_metadata.lock().insert(
            WORKING_DIRECTORY_KEY.to_string(),
            Value::String("/nonexistent/switchyard/saved".into()),
        );

        h.router.get_or_create_session("c", request()).await.unwrap();
        assert_eq!(h.router.get_working_dir("c"), PathBuf::from(DEFAULT_WORKDIR));
        assert_eq!(h.router.working_dir_count(), 0);
    }
}

// ============================================================================
// Capabilities
// ============================================================================

mod capability_tests {
    use super::*;

    #[tokio::test]
    async fn test_platform_tool_mounted_by_derived_name() {
        let h = ready().await;
        let (session, _) = h
            .router
            .get_or_create_session("c", request().with_platform_tool(Arc::new(SlackReplyTool)))
            .await
            .unwrap();

        let tool = session.capabilities().tool("slack_reply").unwrap();
        assert_eq!(tool.invoke(Value::from(1)).await.unwrap(), Value::from(1));
        assert_eq!(
            session.capabilities().names(),
            vec![PROJECT_MANAGER, WORKING_DIR, "slack_reply", SPAWN]
        );
    }

    #[tokio::test]
    async fn test_spawn_inherits_profile_and_working_dir() {
        let h = ready().await;
        h.settings.set_project("/p", "agent");

        let (session, _) = h
            .router
            .get_or_create_session("parent", request().with_project("/p"))
            .await
            .unwrap();
        h.router.set_working_dir("parent", "/work/parent");
        let locks_before = h.router.lock_count();

        let spawner = session.capabilities().spawner().unwrap();
        assert_eq!(spawner.profile_name(), "agent");

        let child = spawner.spawn(SpawnConfig::default()).await.unwrap();
        assert_ne!(child.session_id(), "parent");
        assert!(uuid::Uuid::parse_str(child.session_id()).is_ok());

        let mock = h.runtime.session(1);
        assert_eq!(mock.working_dir, PathBuf::from("/work/parent"));
        assert!(!mock.has_display);
        assert_eq!(child.execute("sub").await.unwrap(), "agent#2: sub");

        let named = spawner.spawn(SpawnConfig::with_session_id("child-7")).await.unwrap();
        assert_eq!(named.session_id(), "child-7");

        // Children are not registered with the router
        assert_eq!(h.router.lock_count(), locks_before);
        assert_eq!(h.router.session_count(), 1);
        assert_eq!(h.runtime.load_count(), 2);
    }

    #[tokio::test]
    async fn test_spawn_without_override_uses_parent_project() {
        let h = ready().await;
        let (session, _) = h
            .router
            .get_or_create_session("parent", request().with_project("/proj"))
            .await
            .unwrap();

        let spawner = session.capabilities().spawner().unwrap();
        spawner.spawn(SpawnConfig::default()).await.unwrap();
        assert_eq!(h.runtime.session(1).working_dir, PathBuf::from("/proj"));
    }

    #[tokio::test]
    async fn test_project_manager_changes_directory() {
        let root = TempDir::new().unwrap();
        let root_path = dunce::canonicalize(root.path()).unwrap();
        std::fs::create_dir(root_path.join("app")).unwrap();

        let h = harness_with_roots(vec![root_path.clone()]);
        h.router.initialize().await.unwrap();
        h.router.set_working_dir("c", &root_path);

        let (session, _) = h.router.get_or_create_session("c", request()).await.unwrap();
        let manager = session.capabilities().project_manager().unwrap();
        assert_eq!(manager.current_directory().unwrap(), root_path);

        let moved = manager.change_directory("app").await.unwrap();
        assert_eq!(moved, root_path.join("app"));
        assert_eq!(h.router.get_working_dir("c"), moved);
        assert_eq!(session.capabilities().working_dir(), Some(moved.clone()));
        assert_eq!(
            session.get_metadata(WORKING_DIRECTORY_KEY).await.unwrap(),
            Some(Value::String(moved.to_string_lossy().into_owned()))
        );
    }

    #[tokio::test]
    async fn test_project_manager_rejects_bad_paths() {
        let root = TempDir::new().unwrap();
        let root_path = dunce::canonicalize(root.path()).unwrap();

        let h = harness_with_roots(vec![root_path.clone()]);
        h.router.initialize().await.unwrap();
        h.router.set_working_dir("c", &root_path);
        let (session, _) = h.router.get_or_create_session("c", request()).await.unwrap();
        let manager = session.capabilities().project_manager().unwrap();

        let err = manager.change_directory("/").await.unwrap_err();
        assert!(matches!(err, Error::InvalidPath(ref msg) if msg.contains("outside")));

        let err = manager.change_directory("missing").await.unwrap_err();
        assert!(matches!(err, Error::InvalidPath(ref msg) if msg.contains("does not exist")));

        assert_eq!(h.router.get_working_dir("c"), root_path);
    }

    #[tokio::test]
    async fn test_project_manager_lists_projects() {
        let root = TempDir::new().unwrap();
        let root_path = dunce::canonicalize(root.path()).unwrap();
        std::fs::create_dir_all(root_path.join("web").join(".git")).unwrap();
        std::fs::create_dir(root_path.join("api")).unwrap();
        std::fs::write(root_path.join("notes.txt"), "not a project").unwrap();

        let h = harness_with_roots(vec![root_path.clone()]);
        h.router.initialize().await.unwrap();
        h.router.set_working_dir("c", &root_path);
        let (session, _) = h.router.get_or_create_session("c", request()).await.unwrap();
        let manager = session.capabilities().project_manager().unwrap();

        let (dir, projects) = manager.list_projects(None).await.unwrap();
        assert_eq!(dir, root_path);
        let listed: Vec<(&str, bool)> = projects.iter().map(|p| (p.name.as_str(), p.git)).collect();
        assert_eq!(listed, vec![("api", false), ("web", true)]);
        assert_eq!(projects[1].path, root_path.join("web"));

        let (_, nested) = manager.list_projects(Some("web")).await.unwrap();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].name, ".git");
        assert!(!nested[0].git);

        let err = manager.list_projects(Some("/")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidPath(ref msg) if msg.contains("outside")));

        let err = manager.list_projects(Some("notes.txt")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidPath(ref msg) if msg.contains("not a directory")));

        let reply = manager
            .invoke(serde_json::json!({ "operation": "list_projects" }))
            .await
            .unwrap();
        assert_eq!(reply["projects"][0]["name"], "api");
        assert_eq!(reply["projects"][1]["git"], true);
    }

    #[tokio::test]
    async fn test_project_manager_as_tool() {
        let h = ready().await;
        let (session, _) = h.router.get_or_create_session("c", request()).await.unwrap();
        let manager = session.capabilities().project_manager().unwrap();

        let reply = manager
            .invoke(serde_json::json!({ "operation": "current_directory" }))
            .await
            .unwrap();
        assert_eq!(reply["working_directory"], DEFAULT_WORKDIR);

        let err = manager
            .invoke(serde_json::json!({ "operation": "create_project" }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Capability(_)));
    }
}

// ============================================================================
// Shutdown
// ============================================================================

mod shutdown_tests {
    use super::*;

    #[tokio::test]
    async fn test_close_all_clears_everything() {
        let h = ready().await;
        h.settings.set_project("/p", "agent");

        h.router.get_or_create_session("a", request()).await.unwrap();
        h.router.get_or_create_session("b", request().with_project("/p")).await.unwrap();
        h.router.set_working_dir("a", "/work/a");
        h.router.set_working_dir("idle", "/work/idle");

        h.router.close_all().await;

        for i in 0..h.runtime.created() {
            assert_eq!(h.runtime.session(i).close_calls.load(Ordering::SeqCst), 1);
        }
        assert_eq!(h.router.session_count(), 0);
        assert_eq!(h.router.lock_count(), 0);
        assert_eq!(h.router.working_dir_count(), 0);
        assert!(h.router.profiles().is_empty());
        assert!(!h.router.is_initialized());

        let err = h.router.get_or_create_session("a", request()).await.err().unwrap();
        assert!(matches!(err, Error::NotInitialized));

        h.router.initialize().await.unwrap();
        h.router.get_or_create_session("a", request()).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_all_during_creation_closes_new_session() {
        let h = ready().await;
        *h.runtime.create_delay.lock() = Some(Duration::from_millis(50));

        let router = h.router.clone();
        let creating =
            tokio::spawn(async move { router.get_or_create_session("X", request()).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        h.router.close_all().await;

        let err = creating.await.unwrap().err().unwrap();
        assert!(matches!(err, Error::NotInitialized));
        assert_eq!(h.runtime.created(), 1);
        assert_eq!(h.runtime.session(0).close_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.router.session_count(), 0);
        assert_eq!(h.router.lock_count(), 0);
        assert!(!h.router.has_session("X"));
    }

    #[tokio::test]
    async fn test_close_failure_does_not_block_others() {
        let h = ready().await;
        h.settings.set_project("/p", "agent");
        *h.runtime.fail_close_profile.lock() = Some("agent".to_string());

        h.router.get_or_create_session("bad", request().with_project("/p")).await.unwrap();
        h.router.get_or_create_session("good", request()).await.unwrap();

        h.router.close_all().await;

        assert_eq!(h.runtime.session(0).close_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.runtime.session(1).close_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.router.session_count(), 0);
    }

    #[tokio::test]
    async fn test_drift_close_failure_is_not_propagated() {
        let h = ready().await;
        h.settings.set_project("/p", "agent");
        *h.runtime.fail_close_profile.lock() = Some("foundation".to_string());

        h.router.get_or_create_session("c", request()).await.unwrap();
        let (session, _) = h
            .router
            .get_or_create_session("c", request().with_project("/p"))
            .await
            .unwrap();
        assert_eq!(session.execute("ok").await.unwrap(), "agent#2: ok");
    }

    #[tokio::test]
    async fn test_capabilities_do_not_keep_router_alive() {
        let h = ready().await;
        let (session, _) = h.router.get_or_create_session("c", request()).await.unwrap();
        let spawner = session.capabilities().spawner().unwrap();

        h.router.close_all().await;
        drop(h.router);

        let err = spawner.spawn(SpawnConfig::default()).await.err().unwrap();
        assert!(matches!(err, Error::Session(_)));
    }
}

// ============================================================================
// Dispatch
// ============================================================================

mod dispatch_tests {
    use super::*;
    use switchyard_core::associations::ThreadAssociations;
    use switchyard_core::dispatch::{Dispatcher, InboundMessage, Reply};
    use switchyard_core::error::ErrorCategory;

    fn dispatcher(h: &Harness) -> Dispatcher {
        Dispatcher::new(h.router.clone(), Arc::new(StaticApproval::deny_all()))
    }

    #[tokio::test]
    async fn test_dispatch_returns_response() {
        let h = ready().await;
        let reply = dispatcher(&h).dispatch(InboundMessage::new("c", "hello")).await;
        assert_eq!(reply, Reply::Response("foundation#1: hello".to_string()));
    }

    #[tokio::test]
    async fn test_messages_in_one_conversation_run_sequentially() {
        let h = ready().await;
        let dispatcher = Arc::new(dispatcher(&h));

        let tasks: Vec<_> = (0..4)
            .map(|i| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    dispatcher
                        .dispatch(InboundMessage::new("c", format!("m{}", i)))
                        .await
                })
            })
            .collect();
        for reply in futures::future::join_all(tasks).await {
            assert!(!reply.unwrap().is_failure());
        }

        let live = h.router.session_count();
        assert_eq!(live, 1);
        for i in 0..h.runtime.created() {
            assert!(h.runtime.session(i).max_in_flight.load(Ordering::SeqCst) <= 1);
        }
    }

    #[tokio::test]
    async fn test_not_initialized_becomes_user_message() {
        let h = harness();
        let reply = dispatcher(&h).dispatch(InboundMessage::new("c", "hello")).await;
        match reply {
            Reply::Failure { message, category } => {
                assert_eq!(category, ErrorCategory::Internal);
                assert!(!message.contains("initialize()"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_profile_failure_is_configuration_error() {
        let h = ready().await;
        h.settings.set_project("/p", "agent");
        h.runtime.failing_loads.store(1, Ordering::SeqCst);

        let reply = dispatcher(&h)
            .dispatch(InboundMessage::new("c", "hello").with_project("/p"))
            .await;
        match reply {
            Reply::Failure { message, category } => {
                assert_eq!(category, ErrorCategory::Configuration);
                assert!(message.contains("'agent'"));
                assert!(!message.contains("profile not found"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_association_supplies_project() {
        let h = ready().await;
        h.settings.set_project("/p", "agent");
        let dir = TempDir::new().unwrap();
        let associations = Arc::new(ThreadAssociations::open(dir.path().join("threads.json")));
        associations.associate("c", "/p").unwrap();

        let reply = dispatcher(&h)
            .with_associations(associations)
            .dispatch(InboundMessage::new("c", "hello"))
            .await;
        assert_eq!(reply.text(), "agent#1: hello");
    }

    #[tokio::test]
    async fn test_execute_timeout() {
        let h = ready().await;
        let reply = dispatcher(&h)
            .with_execute_timeout(Duration::from_millis(1))
            .dispatch(InboundMessage::new("c", "slow"))
            .await;
        match reply {
            Reply::Failure { category, .. } => assert_eq!(category, ErrorCategory::Transient),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_timeout_reports_duration() {
        let h = ready().await;
        let err = dispatcher(&h)
            .with_execute_timeout(Duration::from_millis(1))
            .execute(&InboundMessage::new("c", "slow"), request())
            .await
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Operation timed out after 1ms");
        assert!(matches!(err, Error::Timeout(d) if d == Duration::from_millis(1)));
    }

    #[tokio::test]
    async fn test_runtime_error_is_internal() {
        let h = ready().await;
        let reply = dispatcher(&h).dispatch(InboundMessage::new("c", "boom")).await;
        match reply {
            Reply::Failure { message, category } => {
                assert_eq!(category, ErrorCategory::Internal);
                assert!(!message.contains("exploded"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
