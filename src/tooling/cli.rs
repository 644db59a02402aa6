//! CLI Tooling
//!
//! Command-line interface for one workspace. Every command runs against the
//! configured local adapters: sled for device trees and the authoritative tree,
//! a directory tree for objects, and the workspace itself for files.

use super::format::{
    diff_json, format_descriptor_text, format_diff_text, format_gc_text, format_report_text,
    format_status_text, PendingRow, StatusView,
};
use crate::config::{ConfigLoader, ResolvedStorage, SyncConfig, WORKSPACE_CONFIG_FILE};
use crate::diff::diff;
use crate::error::SyncError;
use crate::gc::collect_garbage;
use crate::logging::LoggingConfig;
use crate::store::objects::FsObjectStore;
use crate::store::persistence::{SledAuthority, SledTreeStore};
use crate::store::AuthoritativeService;
use crate::sync::{Collaborators, SyncCoordinator, SyncOptions};
use crate::types::RequestContext;
use crate::workspace::{WatchFeed, WorkspaceFs};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// hashsync - multi-device file reconciliation over content-addressed hash trees
#[derive(Parser)]
#[command(name = "hashsync")]
#[command(about = "Keep a workspace in sync through content-addressed hash trees")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, both)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Configured logging with command-line overrides applied
    pub fn logging_config(&self, configured: &LoggingConfig) -> LoggingConfig {
        let mut config = configured.clone();
        if self.verbose {
            config.enabled = true;
            config.level = "debug".to_string();
            if config.output == "file" {
                config.output = "file+stderr".to_string();
            }
        }
        if let Some(level) = &self.log_level {
            config.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.format = format.clone();
        }
        if let Some(output) = &self.log_output {
            config.output = output.clone();
        }
        if let Some(file) = &self.log_file {
            config.file = Some(file.clone());
        }
        config
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter .hashsync.toml for this workspace
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Hash the workspace and update the local tree
    Scan,
    /// Show local, base and authoritative tree state
    Status {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show local and remote changes since the last sync
    Diff {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Run one reconciliation cycle
    Sync {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Watch the workspace and sync continuously until interrupted
    Watch {
        /// Debounce window in milliseconds
        #[arg(long)]
        debounce_ms: Option<u64>,
        /// Batch window in milliseconds
        #[arg(long)]
        batch_window_ms: Option<u64>,
    },
    /// Issue a time-limited access URL for a synced file
    Share {
        /// Workspace-relative path
        path: String,
        /// Lifetime in seconds (clamped to the configured maximum)
        #[arg(long, default_value = "3600")]
        ttl_secs: u64,
    },
    /// Delete stored objects no known tree references
    Gc {
        /// Report what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },
}

/// Name used in logs for each command
fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Init { .. } => "init",
        Commands::Scan => "scan",
        Commands::Status { .. } => "status",
        Commands::Diff { .. } => "diff",
        Commands::Sync { .. } => "sync",
        Commands::Watch { .. } => "watch",
        Commands::Share { .. } => "share",
        Commands::Gc { .. } => "gc",
    }
}

fn wants_json(format: &str) -> Result<bool, SyncError> {
    match format {
        "text" => Ok(false),
        "json" => Ok(true),
        other => Err(SyncError::ConfigError(format!(
            "Unknown output format '{}' (expected text or json)",
            other
        ))),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, SyncError> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Opened backends for one command
struct Engine {
    coordinator: Arc<SyncCoordinator>,
    authority: Arc<SledAuthority>,
    objects: Arc<FsObjectStore>,
}

/// CLI context for executing commands
pub struct CliContext {
    workspace_root: PathBuf,
    config: SyncConfig,
}

impl CliContext {
    /// Create a new CLI context, loading layered configuration
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, SyncError> {
        let workspace_root = dunce::canonicalize(&workspace_root).map_err(|e| {
            SyncError::ConfigError(format!("Workspace {:?} is not accessible: {}", workspace_root, e))
        })?;
        let config = match &config_path {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(&workspace_root)?,
        };
        Ok(Self {
            workspace_root,
            config,
        })
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn device_id(&self) -> String {
        self.config.device_id_for(&self.workspace_root)
    }

    fn open_engine(&self) -> Result<Engine, SyncError> {
        let ResolvedStorage {
            state_db,
            authority_db,
            objects_root,
            signing_secret,
        } = self.config.storage.resolve_paths(&self.workspace_root)?;
        std::fs::create_dir_all(&state_db)?;
        std::fs::create_dir_all(&authority_db)?;
        std::fs::create_dir_all(&objects_root)?;

        let tree_store = Arc::new(SledTreeStore::open(&state_db)?);
        let authority = Arc::new(SledAuthority::open(&authority_db)?);
        let objects = Arc::new(FsObjectStore::new(objects_root, signing_secret.as_bytes()));
        let files = Arc::new(WorkspaceFs::new(
            self.workspace_root.clone(),
            self.config.watch.ignore.clone(),
        ));

        let options = SyncOptions::from_config(&self.config, self.device_id());
        let coordinator = SyncCoordinator::new(
            options,
            Collaborators {
                authority: authority.clone(),
                objects: objects.clone(),
                tree_store,
                files,
            },
        );
        Ok(Engine {
            coordinator: Arc::new(coordinator),
            authority,
            objects,
        })
    }

    /// Open the engine, restore persisted state and pick up on-disk changes
    async fn prepared_engine(&self) -> Result<Engine, SyncError> {
        let engine = self.open_engine()?;
        engine.coordinator.load().await?;
        engine.coordinator.rebuild_from_scan().await?;
        Ok(engine)
    }

    /// Execute a command
    pub fn execute(&self, command: &Commands) -> Result<String, SyncError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        info!(command = command_name(command), workspace = ?self.workspace_root, "Running command");
        runtime.block_on(self.execute_inner(command))
    }

    async fn execute_inner(&self, command: &Commands) -> Result<String, SyncError> {
        match command {
            Commands::Init { force } => self.init(*force),
            Commands::Scan => {
                let engine = self.open_engine()?;
                engine.coordinator.load().await?;
                let changed = engine.coordinator.rebuild_from_scan().await?;
                engine.coordinator.persist().await?;
                let tree = engine.coordinator.local_tree();
                Ok(format!(
                    "Scanned {} entries ({} changed)\nRoot hash: {}\nPending uploads: {}",
                    tree.len(),
                    changed,
                    tree.root_hash().short(),
                    engine.coordinator.pending_uploads().len()
                ))
            }
            Commands::Status { format } => {
                let json = wants_json(format)?;
                let engine = self.prepared_engine().await?;
                let view = self.status_view(&engine).await?;
                engine.coordinator.persist().await?;
                if json {
                    to_json(&view)
                } else {
                    Ok(format_status_text(&view))
                }
            }
            Commands::Diff { format } => {
                let json = wants_json(format)?;
                let engine = self.prepared_engine().await?;
                let ctx = RequestContext::new(self.device_id());
                let remote = engine.authority.get_remote_tree(&ctx).await?;
                let outbound = engine.coordinator.local_changes();
                let inbound = diff(&engine.coordinator.base_tree(), &remote);
                engine.coordinator.persist().await?;
                if json {
                    to_json(&serde_json::json!({
                        "local": diff_json(&outbound),
                        "remote": diff_json(&inbound),
                    }))
                } else {
                    Ok(format_diff_text(&outbound, &inbound))
                }
            }
            Commands::Sync { format } => {
                let json = wants_json(format)?;
                let engine = self.prepared_engine().await?;
                let report = engine.coordinator.sync_now().await?;
                if json {
                    to_json(&report)
                } else {
                    Ok(format_report_text(&report))
                }
            }
            Commands::Watch {
                debounce_ms,
                batch_window_ms,
            } => self.watch(*debounce_ms, *batch_window_ms).await,
            Commands::Share { path, ttl_secs } => {
                let engine = self.open_engine()?;
                engine.coordinator.load().await?;
                let descriptor = engine
                    .coordinator
                    .share(path, Duration::from_secs(*ttl_secs))
                    .await?;
                Ok(format_descriptor_text(&descriptor))
            }
            Commands::Gc { dry_run } => {
                let engine = self.open_engine()?;
                engine.coordinator.load().await?;
                let ctx = RequestContext::new(self.device_id());
                let remote = engine.authority.get_remote_tree(&ctx).await?;
                let local = engine.coordinator.local_tree();
                let base = engine.coordinator.base_tree();
                let report =
                    collect_garbage(engine.objects.as_ref(), [&remote, local.as_ref(), &base], *dry_run)
                        .await?;
                Ok(format_gc_text(&report))
            }
        }
    }

    fn init(&self, force: bool) -> Result<String, SyncError> {
        let path = self.workspace_root.join(WORKSPACE_CONFIG_FILE);
        if path.exists() && !force {
            return Err(SyncError::ConfigError(format!(
                "{} already exists (use --force to overwrite)",
                path.display()
            )));
        }
        let starter = SyncConfig {
            device_id: Some(self.device_id()),
            ..self.config.clone()
        };
        std::fs::write(&path, starter.to_toml()?)?;
        Ok(format!("Wrote {}", path.display()))
    }

    async fn status_view(&self, engine: &Engine) -> Result<StatusView, SyncError> {
        let ctx = RequestContext::new(self.device_id());
        let remote = engine.authority.get_remote_tree(&ctx).await?;
        let local = engine.coordinator.local_tree();
        let base = engine.coordinator.base_tree();
        Ok(StatusView {
            device_id: self.device_id(),
            workspace: self.workspace_root.display().to_string(),
            local_entries: local.len(),
            local_version: local.version(),
            local_root: local.root_hash().short(),
            base_version: base.version(),
            base_root: base.root_hash().short(),
            remote_version: remote.version(),
            remote_root: remote.root_hash().short(),
            local_changes: engine.coordinator.local_changes().len(),
            pending: engine
                .coordinator
                .pending_uploads()
                .iter()
                .map(PendingRow::from)
                .collect(),
        })
    }

    async fn watch(
        &self,
        debounce_ms: Option<u64>,
        batch_window_ms: Option<u64>,
    ) -> Result<String, SyncError> {
        let mut watch_config = self.config.watch.clone();
        watch_config.workspace_root = self.workspace_root.clone();
        if let Some(ms) = debounce_ms {
            watch_config.debounce_ms = ms;
        }
        if let Some(ms) = batch_window_ms {
            watch_config.batch_window_ms = ms;
        }

        let engine = self.prepared_engine().await?;
        let coordinator = engine.coordinator.clone();
        let feed = WatchFeed::start(&self.workspace_root, watch_config.ignore.clone())?;
        let (stop_tx, stop_rx) = watch::channel(false);

        let runner = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run(stop_rx).await })
        };
        let feeder = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.consume_feed(feed, &watch_config).await })
        };
        coordinator.request_sync();
        info!(workspace = ?self.workspace_root, "Watching workspace, press Ctrl-C to stop");

        tokio::signal::ctrl_c().await?;
        info!("Interrupt received, stopping");
        let _ = stop_tx.send(true);
        coordinator.shutdown();

        for (name, handle) in [("sync loop", runner), ("change feed", feeder)] {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(task = name, error = %e, "Task ended with an error"),
                Err(e) => warn!(task = name, error = %e, "Task panicked"),
            }
        }
        coordinator.persist().await?;
        Ok("Stopped watching".to_string())
    }
}
