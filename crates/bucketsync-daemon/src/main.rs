//! BucketSync Daemon - background upload service
//!
//! This binary runs as a user service and:
//! - watches the enabled folders of the watch set
//! - uploads changed files to the configured bucket after the settle delay
//! - logs every transfer status change
//! - reloads preferences and credentials on SIGHUP
//! - shuts down gracefully on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! ```text
//! DirectoryEventSource ──changed(path)──► ChangeDispatcher ──► UploadCoordinator
//!          ▲                                     │                    │
//!          └──────────── WatchSet ◄──── covers ──┘        BroadcastNotifier ──► status log
//! ```
//!
//! All tasks share one `CancellationToken` that is cancelled on receipt of
//! SIGTERM or SIGINT.

mod store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bucketsync_audit::FileErrorLog;
use bucketsync_core::config::Config;
use bucketsync_core::domain::{TransferStatus, TransferTemplate};
use bucketsync_s3::S3StoreFactory;
use bucketsync_sync::coordinator::CoordinatorOptions;
use bucketsync_sync::{
    BroadcastNotifier, ChangeDispatcher, DirectoryEventSource, UploadCoordinator, WatchSet,
};
use clap::Parser;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::store::ConfigWatchStore;

/// Command-line arguments for `bucketsyncd`
#[derive(Debug, Parser)]
#[command(
    name = "bucketsyncd",
    version,
    about = "Uploads changed files in watched folders to S3-compatible storage"
)]
struct Cli {
    /// Use alternate config file
    #[arg(long)]
    config: Option<PathBuf>,
}

// ============================================================================
// DaemonService
// ============================================================================

/// Owns the wired-up components for the lifetime of the process
struct DaemonService {
    config_path: PathBuf,
    config: Config,
    notifier: Arc<BroadcastNotifier>,
    coordinator: UploadCoordinator,
    watch_set: Arc<WatchSet>,
    /// Kept alive so the OS watches stay registered
    _source: Arc<DirectoryEventSource>,
    changes: Option<mpsc::Receiver<PathBuf>>,
    shutdown: CancellationToken,
}

impl DaemonService {
    /// Builds every component and registers the enabled watch entries
    async fn new(config_path: PathBuf, config: Config, shutdown: CancellationToken) -> Result<Self> {
        if !config.credentials.is_configured() {
            warn!(
                config_path = %config_path.display(),
                "No bucket credentials configured; uploads will fail until the file is edited and reloaded"
            );
        }

        let notifier = Arc::new(BroadcastNotifier::default());
        let error_log = Arc::new(FileErrorLog::new(&config.logging.error_log));
        info!(error_log = %config.logging.error_log.display(), "Using error log");

        let coordinator = UploadCoordinator::new(
            &config.credentials,
            Arc::new(S3StoreFactory),
            error_log,
            notifier.clone(),
            CoordinatorOptions::from_config(&config),
        )
        .context("Failed to create upload coordinator")?;

        let (source, changes) = DirectoryEventSource::new(&config.watcher, shutdown.child_token())
            .context("Failed to start directory event source")?;
        let source = Arc::new(source);

        let store = Arc::new(ConfigWatchStore::new(&config_path));
        let watch_set = WatchSet::load(store, source.clone())
            .await
            .context("Failed to load watch entries")?;

        Ok(Self {
            config_path,
            config,
            notifier,
            coordinator,
            watch_set: Arc::new(watch_set),
            _source: source,
            changes: Some(changes),
            shutdown,
        })
    }

    /// Runs until the shutdown token is cancelled
    async fn run(mut self) -> Result<()> {
        let changes = self
            .changes
            .take()
            .context("Daemon service was already started")?;

        let status_task = tokio::spawn(log_status_changes(
            self.notifier.subscribe(),
            self.shutdown.clone(),
        ));

        let dispatcher = ChangeDispatcher::new(
            changes,
            Arc::clone(&self.watch_set),
            self.coordinator.clone(),
        );
        let dispatch_task = tokio::spawn(dispatcher.run(self.shutdown.clone()));

        let watched = self.watch_set.list().await;
        info!(
            entries = watched.len(),
            enabled = watched.iter().filter(|e| e.is_enabled()).count(),
            "Daemon running"
        );

        let mut reload = ReloadSignal::new();
        loop {
            tokio::select! {
                _ = reload.recv() => {
                    info!("Received SIGHUP, reloading configuration");
                    self.reload().await;
                }
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        if let Err(e) = dispatch_task.await {
            warn!(error = %e, "Dispatcher task ended abnormally");
        }
        if let Err(e) = status_task.await {
            warn!(error = %e, "Status log task ended abnormally");
        }

        let unfinished = self.coordinator.get_transfer_list(Some(TransferStatus::Queued)).len()
            + self
                .coordinator
                .get_transfer_list(Some(TransferStatus::Uploading))
                .len();
        if unfinished > 0 {
            warn!(unfinished, "Shutting down with transfers still pending");
        }
        Ok(())
    }

    /// Re-reads the configuration file and applies what can change live
    async fn reload(&mut self) {
        let next = match Config::load(&self.config_path) {
            Ok(next) => next,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Keeping current configuration");
                return;
            }
        };

        match apply_config(&self.coordinator, &self.config, &next) {
            Ok(summary) => {
                info!(
                    delay_changed = summary.delay_changed,
                    credentials_changed = summary.credentials_changed,
                    "Configuration reloaded"
                );
                for section in &summary.restart_required {
                    warn!(section, "Change takes effect after a restart");
                }
                self.config = next;
            }
            Err(errors) => {
                for e in &errors {
                    warn!(error = %e, "Invalid configuration");
                }
                warn!(count = errors.len(), "Keeping current configuration");
            }
        }

        // Re-register roots that failed earlier (e.g. an unmounted disk).
        self.watch_set.reconcile().await;
    }
}

// ============================================================================
// Configuration reload
// ============================================================================

/// What a reload changed
#[derive(Debug, Default, PartialEq, Eq)]
struct ReloadSummary {
    delay_changed: bool,
    credentials_changed: bool,
    restart_required: Vec<&'static str>,
}

/// Pushes preference and credential changes into the coordinator
///
/// Nothing is applied if `next` fails validation or its credentials
/// cannot build a client.
fn apply_config(
    coordinator: &UploadCoordinator,
    current: &Config,
    next: &Config,
) -> std::result::Result<ReloadSummary, Vec<String>> {
    let errors = next.validate();
    if !errors.is_empty() {
        return Err(errors.iter().map(ToString::to_string).collect());
    }

    let mut summary = ReloadSummary::default();

    if next.credentials != current.credentials {
        coordinator
            .set_credentials(&next.credentials)
            .map_err(|e| vec![format!("credentials: {e:#}")])?;
        summary.credentials_changed = true;
    }

    if next.preferences != current.preferences {
        coordinator.set_delay(next.preferences.transfer_delay());
        summary.delay_changed = true;
    }

    if next.uploads != current.uploads {
        summary.restart_required.push("uploads");
    }
    if next.watcher != current.watcher {
        summary.restart_required.push("watcher");
    }
    if next.logging != current.logging {
        summary.restart_required.push("logging");
    }

    Ok(summary)
}

/// Refuses to start with a configuration that fails validation
fn check_startup_config(config: &Config) -> Result<()> {
    let problems = config.validate();
    if problems.is_empty() {
        return Ok(());
    }
    for problem in &problems {
        error!(error = %problem, "Configuration problem");
    }
    anyhow::bail!(
        "invalid configuration ({} problem(s)): {}",
        problems.len(),
        problems
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    )
}

// ============================================================================
// Status log
// ============================================================================

/// Logs every transfer status change until cancelled
async fn log_status_changes(
    mut updates: broadcast::Receiver<TransferTemplate>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            update = updates.recv() => match update {
                Ok(transfer) => log_transfer(&transfer),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Status log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

fn log_transfer(transfer: &TransferTemplate) {
    match transfer.status {
        TransferStatus::Error => {
            warn!(path = %transfer.path.display(), status = %transfer.status, "Transfer failed");
        }
        TransferStatus::Complete => info!(
            path = %transfer.path.display(),
            status = %transfer.status,
            completed_at = ?transfer.completed_at,
            "Transfer complete"
        ),
        _ => info!(path = %transfer.path.display(), status = %transfer.status, "Transfer status changed"),
    }
}

// ============================================================================
// Signals
// ============================================================================

/// SIGHUP listener; never fires where SIGHUP does not exist
struct ReloadSignal {
    #[cfg(unix)]
    inner: Option<tokio::signal::unix::Signal>,
}

impl ReloadSignal {
    #[cfg(unix)]
    fn new() -> Self {
        use tokio::signal::unix::{signal, SignalKind};
        let inner = match signal(SignalKind::hangup()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                error!(error = %e, "Failed to install SIGHUP handler; reload disabled");
                None
            }
        };
        Self { inner }
    }

    #[cfg(not(unix))]
    fn new() -> Self {
        Self {}
    }

    #[cfg(unix)]
    async fn recv(&mut self) {
        if let Some(sig) = self.inner.as_mut() {
            if sig.recv().await.is_some() {
                return;
            }
            self.inner = None;
        }
        std::future::pending::<()>().await
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) {
        std::future::pending::<()>().await
    }
}

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Config::default_path);

    let (config, load_error) = if config_path.exists() {
        match Config::load(&config_path) {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        }
    } else {
        (Config::default(), None)
    };

    // RUST_LOG wins over the configured level.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    info!(config_path = %config_path.display(), "BucketSync daemon starting (bucketsyncd)");
    if let Some(e) = load_error {
        warn!(error = %format!("{e:#}"), "Failed to load configuration, using defaults");
    }
    check_startup_config(&config)?;

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(config_path, config, shutdown_token.clone()).await?;
    let result = service.run().await;

    match &result {
        Ok(()) => info!("BucketSync daemon shut down gracefully"),
        Err(e) => error!(error = %e, "BucketSync daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
