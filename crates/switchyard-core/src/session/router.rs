//! Conversation -> session routing

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::capability::{Capability, PROJECT_MANAGER, SPAWN, WORKING_DIR};
use super::locks::{ConversationLock, ConversationLocks};
use super::project::ProjectManager;
use super::spawn::SubSessionSpawner;
use super::types::{SessionInfo, SessionRequest, SessionSpec, WORKING_DIRECTORY_KEY};
use super::workdir::WorkingDirs;
use super::AgentSession;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::paths::path_to_display;
use crate::profile::{PreparedProfile, ProfileCache, ProfileLoader};
use crate::settings::{normalize_project_dir, FileSettingsSource, ProfileResolver};

/// A registered session and what it was created for
#[derive(Clone)]
struct SessionEntry {
    session: Arc<dyn AgentSession>,
    profile: String,
    project: Option<PathBuf>,
    created_at: DateTime<Utc>,
}

struct RouterInner {
    resolver: Arc<ProfileResolver>,
    profiles: ProfileCache,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    locks: ConversationLocks,
    workdirs: WorkingDirs,
    allowed_roots: Vec<PathBuf>,
    initialized: AtomicBool,
}

/// Routes conversations to long-lived agent sessions.
///
/// Cheap to clone; clones share all state. Call [`initialize`] once before
/// routing and [`close_all`] on shutdown.
///
/// [`initialize`]: SessionRouter::initialize
/// [`close_all`]: SessionRouter::close_all
#[derive(Clone)]
pub struct SessionRouter {
    inner: Arc<RouterInner>,
}

/// Non-owning handle held by capabilities mounted into sessions
#[derive(Clone)]
pub struct WeakRouter {
    inner: Weak<RouterInner>,
}

impl WeakRouter {
    pub fn upgrade(&self) -> Option<SessionRouter> {
        self.inner.upgrade().map(|inner| SessionRouter { inner })
    }
}

/// Builder for [`SessionRouter`]
pub struct SessionRouterBuilder {
    resolver: Arc<ProfileResolver>,
    loader: Arc<dyn ProfileLoader>,
    default_workdir: Option<PathBuf>,
    allowed_roots: Vec<PathBuf>,
}

impl SessionRouterBuilder {
    pub fn default_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.default_workdir = Some(dir.into());
        self
    }

    /// Roots the `project_manager` capability may move into. Empty means
    /// unrestricted.
    pub fn allowed_roots(mut self, roots: impl IntoIterator<Item = PathBuf>) -> Self {
        self.allowed_roots = roots.into_iter().collect();
        self
    }

    pub fn build(self) -> SessionRouter {
        let default_workdir = self
            .default_workdir
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        SessionRouter {
            inner: Arc::new(RouterInner {
                profiles: ProfileCache::new(self.loader, self.resolver.clone()),
                resolver: self.resolver,
                sessions: RwLock::new(HashMap::new()),
                locks: ConversationLocks::new(),
                workdirs: WorkingDirs::new(default_workdir),
                allowed_roots: self.allowed_roots,
                initialized: AtomicBool::new(false),
            }),
        }
    }
}

impl SessionRouter {
    pub fn new(
        resolver: Arc<ProfileResolver>,
        loader: Arc<dyn ProfileLoader>,
        default_workdir: impl Into<PathBuf>,
    ) -> Self {
        Self::builder(resolver, loader)
            .default_workdir(default_workdir)
            .build()
    }

    pub fn builder(
        resolver: Arc<ProfileResolver>,
        loader: Arc<dyn ProfileLoader>,
    ) -> SessionRouterBuilder {
        SessionRouterBuilder {
            resolver,
            loader,
            default_workdir: None,
            allowed_roots: Vec::new(),
        }
    }

    /// Router reading layered settings from disk as described by `config`
    pub fn from_config(config: &Config, loader: Arc<dyn ProfileLoader>) -> Self {
        let source = Arc::new(FileSettingsSource::new(
            config.router.effective_settings_home(),
        ));
        let resolver = ProfileResolver::new(source, config.router.default_profile.clone())
            .with_well_known(config.router.well_known_profiles.iter().cloned());

        Self::builder(Arc::new(resolver), loader)
            .default_workdir(config.router.effective_default_workdir())
            .allowed_roots(config.workspace.expanded_allowed_roots())
            .build()
    }

    pub fn downgrade(&self) -> WeakRouter {
        WeakRouter {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn resolver(&self) -> &Arc<ProfileResolver> {
        &self.inner.resolver
    }

    pub fn profiles(&self) -> &ProfileCache {
        &self.inner.profiles
    }

    pub fn allowed_roots(&self) -> &[PathBuf] {
        &self.inner.allowed_roots
    }

    /// Pre-load the default profile. Must succeed before sessions are routed.
    pub async fn initialize(&self) -> Result<()> {
        if self.is_initialized() {
            debug!("Session router already initialized");
            return Ok(());
        }

        let profile = self.inner.resolver.clone().resolve_async(None).await;
        info!(profile = %profile, "Initializing session router");
        self.inner.profiles.get_or_create(&profile, None).await?;

        self.inner.initialized.store(true, Ordering::SeqCst);
        info!("Session router ready");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    /// Return the conversation's session, creating or recreating it as needed,
    /// together with the conversation's message lock.
    ///
    /// The lock is not taken here. Hold it around `execute`.
    pub async fn get_or_create_session(
        &self,
        conversation_id: &str,
        request: SessionRequest,
    ) -> Result<(Arc<dyn AgentSession>, ConversationLock)> {
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }

        let project = request.project_path().map(normalize_project_dir);
        let profile = self.inner.resolver.clone().resolve_async(project.clone()).await;

        if let Some(stale) = self.evict_drifted(conversation_id, &profile) {
            info!(
                conversation = %conversation_id,
                "Profile changed: '{}' -> '{}'. Recreating session.",
                stale.profile,
                profile
            );
            self.close_entry(conversation_id, &stale).await;
        }

        let existing = self.inner.sessions.read().get(conversation_id).cloned();
        if let Some(entry) = existing {
            return Ok((entry.session, self.inner.locks.get_lock(conversation_id)));
        }

        let project_label = project
            .as_deref()
            .map(path_to_display)
            .unwrap_or_else(|| "(default)".to_string());
        info!(
            conversation = %conversation_id,
            profile = %profile,
            project = %project_label,
            "Creating session"
        );

        let prepared = self
            .inner
            .profiles
            .get_or_create(&profile, project.as_deref())
            .await?;
        let session = self
            .instantiate(conversation_id, &prepared, project.as_deref(), &request)
            .await?;

        let entry = SessionEntry {
            session,
            profile,
            project,
            created_at: Utc::now(),
        };
        let session = self.register(conversation_id, entry).await?;
        Ok((session, self.inner.locks.get_lock(conversation_id)))
    }

    /// Remove the conversation's session if it was created for another profile
    fn evict_drifted(&self, conversation_id: &str, profile: &str) -> Option<SessionEntry> {
        let mut sessions = self.inner.sessions.write();
        match sessions.get(conversation_id) {
            Some(entry) if entry.profile != profile => sessions.remove(conversation_id),
            _ => None,
        }
    }

    async fn instantiate(
        &self,
        conversation_id: &str,
        prepared: &Arc<dyn PreparedProfile>,
        project: Option<&Path>,
        request: &SessionRequest,
    ) -> Result<Arc<dyn AgentSession>> {
        let working_dir = self.inner.workdirs.effective(conversation_id, project);
        debug!(conversation = %conversation_id, "Working directory: {}", working_dir.display());

        let spec = SessionSpec {
            session_id: conversation_id.to_string(),
            approval: request.approval.clone(),
            display: request.display.clone(),
            working_dir: working_dir.clone(),
        };
        let session = prepared.create_session(spec).await?;

        let working_dir = self
            .recover_working_dir(conversation_id, session.as_ref())
            .await
            .unwrap_or(working_dir);

        let capabilities = session.capabilities();
        capabilities.register(WORKING_DIR, Capability::WorkingDir(working_dir));

        if let Some(tool) = &request.platform_tool {
            let name = tool.name();
            debug!(conversation = %conversation_id, "Mounting platform tool '{}'", name);
            capabilities.register(name, Capability::Tool(tool.clone()));
        }

        capabilities.register(
            PROJECT_MANAGER,
            Capability::ProjectManager(Arc::new(ProjectManager::new(
                conversation_id,
                self.downgrade(),
                self.inner.allowed_roots.clone(),
            ))),
        );
        capabilities.register(
            SPAWN,
            Capability::Spawn(Arc::new(SubSessionSpawner::new(
                conversation_id,
                prepared.clone(),
                request.approval.clone(),
                project.map(Path::to_path_buf),
                self.downgrade(),
            ))),
        );

        Ok(session)
    }

    /// Adopt a working directory the session persisted in an earlier life,
    /// provided it still exists
    async fn recover_working_dir(
        &self,
        conversation_id: &str,
        session: &dyn AgentSession,
    ) -> Option<PathBuf> {
        let saved = match session.get_metadata(WORKING_DIRECTORY_KEY).await {
            Ok(Some(Value::String(saved))) => PathBuf::from(saved),
            Ok(_) => return None,
            Err(e) => {
                debug!(conversation = %conversation_id, "Could not read saved working directory: {}", e);
                return None;
            }
        };

        let is_dir = tokio::fs::metadata(&saved)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if !is_dir {
            debug!(
                conversation = %conversation_id,
                "Ignoring saved working directory {}: not a directory",
                saved.display()
            );
            return None;
        }

        let stored = self.inner.workdirs.set(conversation_id, &saved);
        info!(conversation = %conversation_id, "Restored working directory {}", stored.display());
        Some(stored)
    }

    /// Record a freshly built session.
    ///
    /// Two first messages for the same conversation can both get here. The
    /// entry that lands first wins when it has the same profile; the loser is
    /// closed so at most one session stays live per conversation.
    ///
    /// A `close_all` that ran while the session was being built wins too: the
    /// new session is closed and `NotInitialized` is returned.
    async fn register(
        &self,
        conversation_id: &str,
        entry: SessionEntry,
    ) -> Result<Arc<dyn AgentSession>> {
        enum Outcome {
            Inserted,
            Lost(SessionEntry, Arc<dyn AgentSession>),
            Replaced(SessionEntry),
            ShutDown,
        }

        let outcome = {
            let mut sessions = self.inner.sessions.write();
            // close_all clears the flag before it drains under this lock
            if !self.inner.initialized.load(Ordering::SeqCst) {
                Outcome::ShutDown
            } else {
                match sessions.get(conversation_id).cloned() {
                    None => {
                        sessions.insert(conversation_id.to_string(), entry.clone());
                        Outcome::Inserted
                    }
                    Some(current) if current.profile == entry.profile => {
                        Outcome::Lost(entry.clone(), current.session.clone())
                    }
                    Some(_) => match sessions.insert(conversation_id.to_string(), entry.clone()) {
                        Some(old) => Outcome::Replaced(old),
                        None => Outcome::Inserted,
                    },
                }
            }
        };

        match outcome {
            Outcome::Inserted => Ok(entry.session),
            Outcome::Lost(duplicate, winner) => {
                debug!(conversation = %conversation_id, "Concurrent creation detected; discarding duplicate session");
                self.close_entry(conversation_id, &duplicate).await;
                Ok(winner)
            }
            Outcome::Replaced(old) => {
                self.close_entry(conversation_id, &old).await;
                Ok(entry.session)
            }
            Outcome::ShutDown => {
                debug!(conversation = %conversation_id, "Router shut down during creation; closing new session");
                self.close_entry(conversation_id, &entry).await;
                Err(Error::NotInitialized)
            }
        }
    }

    async fn close_entry(&self, conversation_id: &str, entry: &SessionEntry) {
        match entry.session.close().await {
            Ok(()) => debug!(conversation = %conversation_id, "Closed session"),
            Err(e) => warn!(conversation = %conversation_id, "Error closing session: {}", e),
        }
    }

    /// Working directory override for a conversation, or the process default
    pub fn get_working_dir(&self, conversation_id: &str) -> PathBuf {
        self.inner.workdirs.get(conversation_id)
    }

    /// Override, else the live session's project, else the process default
    pub fn current_working_dir(&self, conversation_id: &str) -> PathBuf {
        let project = self.session_project(conversation_id);
        self.inner
            .workdirs
            .effective(conversation_id, project.as_deref())
    }

    /// Override, else `project`, else the process default
    pub(crate) fn working_dir_for(&self, conversation_id: &str, project: Option<&Path>) -> PathBuf {
        self.inner.workdirs.effective(conversation_id, project)
    }

    /// Store a working directory and push it into the live session, if any.
    ///
    /// Returns the absolute path that was stored.
    pub fn set_working_dir(&self, conversation_id: &str, path: impl AsRef<Path>) -> PathBuf {
        let stored = self.inner.workdirs.set(conversation_id, path.as_ref());
        info!(conversation = %conversation_id, "Set working directory: {}", stored.display());

        if let Some(session) = self.session(conversation_id) {
            session
                .capabilities()
                .register(WORKING_DIR, Capability::WorkingDir(stored.clone()));
            debug!(conversation = %conversation_id, "Synced working directory into live session");
        }
        stored
    }

    /// Close every session and drop all per-conversation and profile state.
    ///
    /// Close failures are logged and do not stop the others. The router must
    /// be initialized again afterwards.
    pub async fn close_all(&self) {
        self.inner.initialized.store(false, Ordering::SeqCst);

        let entries: Vec<(String, SessionEntry)> = self.inner.sessions.write().drain().collect();
        info!("Closing {} session(s)", entries.len());

        let results = join_all(
            entries
                .iter()
                .map(|(conversation_id, entry)| async move {
                    (conversation_id, entry.session.close().await)
                }),
        )
        .await;

        let mut failed = 0;
        for (conversation_id, result) in results {
            if let Err(e) = result {
                failed += 1;
                warn!(conversation = %conversation_id, "Error closing session: {}", e);
            }
        }

        self.inner.locks.clear();
        self.inner.workdirs.clear();
        self.inner.profiles.clear();

        if failed > 0 {
            warn!("All sessions closed ({} with errors)", failed);
        } else {
            info!("All sessions closed");
        }
    }

    pub fn session(&self, conversation_id: &str) -> Option<Arc<dyn AgentSession>> {
        self.inner
            .sessions
            .read()
            .get(conversation_id)
            .map(|entry| entry.session.clone())
    }

    pub fn has_session(&self, conversation_id: &str) -> bool {
        self.inner.sessions.read().contains_key(conversation_id)
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.read().len()
    }

    /// Profile the conversation's live session was created for
    pub fn session_profile(&self, conversation_id: &str) -> Option<String> {
        self.inner
            .sessions
            .read()
            .get(conversation_id)
            .map(|entry| entry.profile.clone())
    }

    pub fn session_project(&self, conversation_id: &str) -> Option<PathBuf> {
        self.inner
            .sessions
            .read()
            .get(conversation_id)
            .and_then(|entry| entry.project.clone())
    }

    /// Conversations with a live session, sorted
    pub fn list_conversations(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn session_info(&self, conversation_id: &str) -> Option<SessionInfo> {
        let entry = self.inner.sessions.read().get(conversation_id).cloned()?;
        Some(SessionInfo {
            conversation_id: conversation_id.to_string(),
            session_id: entry.session.session_id().to_string(),
            profile: entry.profile,
            working_dir: self
                .inner
                .workdirs
                .effective(conversation_id, entry.project.as_deref()),
            project: entry.project,
            capabilities: entry.session.capabilities().names(),
            created_at: entry.created_at,
        })
    }

    /// Number of message locks handed out since the last shutdown
    pub fn lock_count(&self) -> usize {
        self.inner.locks.len()
    }

    /// Number of working directory overrides
    pub fn working_dir_count(&self) -> usize {
        self.inner.workdirs.len()
    }
}
