//! Switchyard CLI - inspect how conversations are routed to profiles
//!
//! Reads the same configuration and layered settings as a running connector,
//! so it answers "which profile would this project get, and from where?".

mod dry_run;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use tracing::{debug, info};

use dry_run::DryRunRuntime;
use switchyard_core::approval::{StaticApproval, TimedApproval};
use switchyard_core::associations::{project_slug, resolve_project_path, ThreadAssociations};
use switchyard_core::config::{Config, ConfigManager};
use switchyard_core::dispatch::{Dispatcher, InboundMessage, Reply};
use switchyard_core::profile::{FileProfileLoader, LoadTarget};
use switchyard_core::session::SessionRouter;
use switchyard_core::settings::{normalize_project_dir, FileSettingsSource, ProfileResolver};

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect conversation to profile routing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which profile a project resolves to and which layer declared it
    Resolve {
        #[arg(short, long)]
        project: Option<PathBuf>,
    },

    /// Show the merged settings for a project
    Settings {
        #[arg(short, long)]
        project: Option<PathBuf>,
    },

    /// Locate and print a profile manifest
    Load {
        /// Profile name
        name: String,

        #[arg(short, long)]
        project: Option<PathBuf>,
    },

    /// Route one message through a dry-run session
    Route {
        /// Conversation id
        conversation: String,

        /// Message text
        message: String,

        #[arg(short, long)]
        project: Option<PathBuf>,
    },

    /// Show configuration
    Config,

    /// Manage conversation -> project associations
    #[command(subcommand)]
    Threads(ThreadCommands),
}

#[derive(Subcommand)]
enum ThreadCommands {
    /// List associations
    List,

    /// Point a conversation at a project directory
    Associate {
        conversation: String,
        path: String,
    },

    /// Remove a conversation's association
    Clear { conversation: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // warn by default so log lines don't drown the output
    tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose {
            "info,switchyard_core=debug"
        } else {
            "warn"
        })
        .init();

    let manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    }
    .context("Failed to load configuration")?;
    debug!(path = %manager.config_path().display(), "Loaded configuration");
    let config = manager.config().clone();

    match cli.command {
        Commands::Resolve { project } => resolve(&config, project.as_deref()),
        Commands::Settings { project } => show_settings(&config, project.as_deref())?,
        Commands::Load { name, project } => load(&config, &name, project.as_deref()).await?,
        Commands::Route {
            conversation,
            message,
            project,
        } => route(&config, conversation, message, project).await?,
        Commands::Config => show_config(&manager)?,
        Commands::Threads(cmd) => handle_thread_command(&config, cmd)?,
    }

    Ok(())
}

fn resolver(config: &Config) -> ProfileResolver {
    let source = Arc::new(FileSettingsSource::new(config.router.effective_settings_home()));
    ProfileResolver::new(source, config.router.default_profile.clone())
        .with_well_known(config.router.well_known_profiles.iter().cloned())
}

fn loader(config: &Config) -> FileProfileLoader {
    FileProfileLoader::new(config.router.effective_settings_home(), Arc::new(DryRunRuntime))
        .with_search_dirs(config.router.bundle_dirs.iter().cloned())
}

fn project_dir(project: Option<&Path>) -> Option<PathBuf> {
    project.map(normalize_project_dir)
}

fn resolve(config: &Config, project: Option<&Path>) {
    let project = project_dir(project);
    let resolution = resolver(config).resolve_detailed(project.as_deref());

    let source = match resolution.layer {
        Some(layer) => format!("{} settings", layer),
        None => "hardcoded default".to_string(),
    };
    println!("{}", style(&resolution.profile).bold().green());
    println!("  {} {}", style("from:").dim(), source);
    if let Some(project) = project {
        println!("  {} {}", style("project:").dim(), project.display());
        println!("  {} {}", style("slug:").dim(), project_slug(&project));
    }
}

fn show_settings(config: &Config, project: Option<&Path>) -> anyhow::Result<()> {
    let project = project_dir(project);
    let settings = resolver(config)
        .load_settings(project.as_deref())
        .context("Failed to read settings")?;

    let layers: Vec<String> = settings
        .present_layers()
        .iter()
        .map(ToString::to_string)
        .collect();
    println!("{}", style("Settings:").bold());
    println!(
        "  Layers: {}",
        if layers.is_empty() {
            style("none".to_string()).dim()
        } else {
            style(layers.join(", ")).green()
        }
    );

    let registered = settings.registered_profiles();
    if !registered.is_empty() {
        println!("  Registered profiles:");
        for (name, uri) in &registered {
            println!("    {} -> {}", style(name).cyan(), uri);
        }
    }

    println!();
    print!("{}", serde_yml::to_string(settings.merged())?);
    Ok(())
}

async fn load(config: &Config, name: &str, project: Option<&Path>) -> anyhow::Result<()> {
    let project = project_dir(project);
    let resolver = resolver(config);
    let settings = resolver
        .load_settings(project.as_deref())
        .context("Failed to read settings")?;

    let target = LoadTarget::select(
        name,
        project.as_deref(),
        &settings,
        resolver.default_profile(),
    );
    let path = loader(config)
        .locate(&target, project.as_deref())
        .with_context(|| format!("Could not locate profile '{}'", name))?;
    let manifest = FileProfileLoader::read_manifest(&path)
        .await
        .with_context(|| format!("Could not read {}", path.display()))?;

    println!("{} {}", style("Source:").bold(), path.display());
    println!("{}", serde_json::to_string_pretty(&manifest)?);
    Ok(())
}

async fn route(
    config: &Config,
    conversation: String,
    message: String,
    project: Option<PathBuf>,
) -> anyhow::Result<()> {
    let router = SessionRouter::from_config(config, Arc::new(loader(config)));
    router
        .initialize()
        .await
        .context("Failed to load the default profile")?;

    let associations = Arc::new(ThreadAssociations::open(
        config.workspace.effective_associations_path(),
    ));
    let approval = Arc::new(TimedApproval::new(
        Arc::new(StaticApproval::deny_all()),
        std::time::Duration::from_secs(config.router.approval_timeout_secs),
    ));
    let dispatcher = Dispatcher::new(router.clone(), approval).with_associations(associations);
    info!(conversation = %conversation, "Routing message through dry-run runtime");

    let mut inbound = InboundMessage::new(conversation.clone(), message);
    if let Some(project) = project {
        inbound = inbound.with_project(project);
    }

    match dispatcher.dispatch(inbound).await {
        Reply::Response(text) => println!("{}", text),
        Reply::Failure { message, category } => {
            println!("{} ({:?})", style(message).red(), category)
        }
    }

    if let Some(info) = router.session_info(&conversation) {
        println!();
        println!("{}", serde_json::to_string_pretty(&info)?);
    }

    router.close_all().await;
    Ok(())
}

fn show_config(manager: &ConfigManager) -> anyhow::Result<()> {
    let config = manager.config();
    println!("{}", style("Configuration:").bold());
    println!();
    println!("  Config file: {}", style(manager.config_path().display()).dim());
    println!(
        "  Settings home: {}",
        style(config.router.effective_settings_home().display()).green()
    );
    println!(
        "  Default workdir: {}",
        style(config.router.effective_default_workdir().display()).green()
    );
    println!(
        "  Associations: {}",
        style(config.workspace.effective_associations_path().display()).green()
    );
    println!();
    print!(
        "{}",
        toml::to_string_pretty(config).context("Failed to render configuration")?
    );
    Ok(())
}

fn handle_thread_command(config: &Config, cmd: ThreadCommands) -> anyhow::Result<()> {
    let associations = ThreadAssociations::open(config.workspace.effective_associations_path());

    match cmd {
        ThreadCommands::List => {
            let entries = associations.list();
            println!("{}", style("Thread associations:").bold());
            if entries.is_empty() {
                println!("  {}", style("No associations").dim());
            }
            for (conversation, path) in entries {
                println!("  {} -> {}", style(conversation).cyan(), path.display());
            }
        }
        ThreadCommands::Associate { conversation, path } => {
            let (resolved, display_name) = resolve_project_path(&path)?;
            associations.associate(&conversation, &resolved)?;
            info!(conversation = %conversation, "Associated with {}", resolved.display());
            println!(
                "{} {} -> {} ({})",
                style("✓").green(),
                conversation,
                style(display_name).bold(),
                resolved.display()
            );
        }
        ThreadCommands::Clear { conversation } => {
            if associations.clear(&conversation)? {
                println!("{} Cleared {}", style("✓").green(), conversation);
            } else {
                println!("{}", style(format!("{} has no association", conversation)).dim());
            }
        }
    }

    Ok(())
}
