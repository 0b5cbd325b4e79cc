//! Switchyard Core - conversation to agent-session routing for chat bots
//!
//! This crate provides the layer between a chat platform adapter and an agent
//! runtime:
//! - Layered settings and the profile waterfall
//! - Single-flight profile preparation and caching
//! - Per-conversation sessions with drift detection and recreation
//! - Per-conversation message locks and working directories
//! - Sub-session spawning and in-session directory changes
//! - Approval collaborators with bounded waits

pub mod approval;
pub mod associations;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod paths;
pub mod profile;
pub mod session;
pub mod settings;

pub use approval::{
    ApprovalHandler, ApprovalRequest, ChannelApproval, DisplayHandler, StaticApproval,
    TimedApproval,
};
pub use associations::ThreadAssociations;
pub use config::{Config, ConfigManager, DEFAULT_PROFILE};
pub use dispatch::{Dispatcher, InboundMessage, Reply};
pub use error::{Error, ErrorCategory, LoadError, Result};

// Profile exports
pub use profile::{
    FileProfileLoader, LoadTarget, ManifestProfile, PreparedProfile, ProfileCache, ProfileLoader,
    ProfileManifest, RuntimeFactory,
};

// Session exports
pub use session::{
    AgentSession, Capability, CapabilityMap, ConversationLock, PlatformTool, SessionRequest,
    SessionRouter, SessionSpec, SpawnConfig, SubSessionSpawner,
};

// Settings exports
pub use settings::{
    AppSettings, FileSettingsSource, ProfileResolver, Resolution, SettingsLayer, SettingsSource,
};
