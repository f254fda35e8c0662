//! Upload coordinator - per-path debounced transfer queue
//!
//! The [`UploadCoordinator`] owns one transfer record per distinct file
//! path. Change signals for a path coalesce into a single upload attempt
//! once the path has been quiet for the transfer delay.
//!
//! ## Flow
//!
//! ```text
//! queue_for_upload(path)
//!        │  create/refresh record, status = Queued, notify
//!        ▼
//!   delay timer ──(new signal: abort + re-arm)──┐
//!        │ fires                                │
//!        ▼                                      │
//!   semaphore permit ──► Uploading, notify ──► put(bucket, key, file)
//!                                                  │
//!                                   ┌──────────────┴──────────────┐
//!                                   ▼                             ▼
//!                         Complete(now), notify      error log, Error, notify
//! ```
//!
//! ## Concurrency
//!
//! All record state lives behind one `std::sync::Mutex` that is never held
//! across an `.await`. Every record carries a generation counter bumped by
//! each change signal; timers and finished uploads compare the generation
//! they were started for against the current one, so a stale timer that
//! escaped its abort does nothing.
//!
//! A record with an upload in flight never starts a second one. A signal
//! arriving mid-upload resets the record to `Queued`; once the in-flight
//! attempt reaches its terminal state a fresh cycle uploads the latest
//! content.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use bucketsync_core::config::{Config, CredentialsConfig};
use bucketsync_core::domain::{object_key, TransferStatus, TransferTemplate, UploadError};
use bucketsync_core::ports::{
    ErrorLogEntry, IErrorLog, IObjectStore, IObjectStoreFactory, IStatusNotifier,
};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

// ============================================================================
// Options
// ============================================================================

/// Tunables for an [`UploadCoordinator`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Quiet period after the last change before uploading
    pub delay: Duration,
    /// Maximum number of uploads running at once
    pub max_concurrent: usize,
    /// Maximum records kept; `None` keeps all of them
    pub max_retained: Option<usize>,
}

impl CoordinatorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            delay: config.preferences.transfer_delay(),
            max_concurrent: config.uploads.max_concurrent,
            max_retained: config.uploads.max_retained_records,
        }
    }
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// ============================================================================
// TransferRecord
// ============================================================================

/// Live state of one path; never leaves the coordinator
#[derive(Debug, Default)]
struct TransferRecord {
    status: TransferStatus,
    completed_at: Option<DateTime<Utc>>,
    /// Bumped by every change signal
    generation: u64,
    /// Pending delay timer
    timer: Option<AbortHandle>,
    /// An upload task (waiting for a permit or sending) exists
    in_flight: bool,
    /// A start was requested while `in_flight`
    deferred: bool,
}

impl TransferRecord {
    fn snapshot(&self, path: &Path) -> TransferTemplate {
        TransferTemplate {
            path: path.to_path_buf(),
            status: self.status,
            completed_at: self.completed_at,
        }
    }

    fn is_evictable(&self) -> bool {
        self.status.is_terminal() && !self.in_flight && self.timer.is_none()
    }
}

/// Object store and bucket used for new uploads
#[derive(Clone)]
struct UploadTarget {
    store: Arc<dyn IObjectStore>,
    bucket: String,
}

// ============================================================================
// UploadCoordinator
// ============================================================================

struct Inner {
    records: Mutex<IndexMap<PathBuf, TransferRecord>>,
    delay: Mutex<Duration>,
    target: RwLock<UploadTarget>,
    factory: Arc<dyn IObjectStoreFactory>,
    error_log: Arc<dyn IErrorLog>,
    notifier: Arc<dyn IStatusNotifier>,
    permits: Arc<Semaphore>,
    max_retained: Option<usize>,
}

/// Cheaply cloneable handle to the transfer queue
///
/// All clones share the same records. Methods that schedule work
/// (`queue_for_upload`) must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct UploadCoordinator {
    inner: Arc<Inner>,
}

impl UploadCoordinator {
    /// Creates a coordinator uploading with a client built from
    /// `credentials`
    ///
    /// # Errors
    /// Returns an error if `factory` cannot build a client.
    pub fn new(
        credentials: &CredentialsConfig,
        factory: Arc<dyn IObjectStoreFactory>,
        error_log: Arc<dyn IErrorLog>,
        notifier: Arc<dyn IStatusNotifier>,
        options: CoordinatorOptions,
    ) -> anyhow::Result<Self> {
        let store = factory.connect(credentials)?;
        let max_concurrent = options.max_concurrent.max(1);

        info!(
            bucket = %credentials.bucket,
            delay_secs = options.delay.as_secs(),
            max_concurrent,
            max_retained = ?options.max_retained,
            "Creating upload coordinator"
        );

        let inner = Inner {
            records: Mutex::new(IndexMap::new()),
            delay: Mutex::new(options.delay),
            target: RwLock::new(UploadTarget {
                store,
                bucket: credentials.bucket.clone(),
            }),
            factory,
            error_log,
            notifier,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_retained: options.max_retained,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Signals that `path` changed and should be uploaded
    ///
    /// Creates the record or refreshes it in place: any pending timer is
    /// cancelled, the status returns to `Queued` and `completed_at` is
    /// cleared. With a zero delay the upload starts at once; otherwise a
    /// timer is armed for the current delay.
    pub fn queue_for_upload(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let delay = self.delay();

        let mut records = self.lock_records();
        let record = records.entry(path.clone()).or_default();

        if let Some(timer) = record.timer.take() {
            timer.abort();
        }
        record.status = TransferStatus::Queued;
        record.completed_at = None;
        record.generation += 1;
        let generation = record.generation;

        debug!(
            path = %path.display(),
            generation,
            delay_ms = delay.as_millis() as u64,
            "Queued for upload"
        );
        self.inner.notifier.notify(&record.snapshot(&path));

        if delay.is_zero() {
            self.begin_upload(record, &path);
        } else {
            let this = self.clone();
            let timer_path = path.clone();
            let task = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                this.on_timer(&timer_path, generation);
            });
            record.timer = Some(task.abort_handle());
        }

        self.enforce_retention(&mut records);
    }

    /// Snapshot of all records in first-seen order, optionally restricted
    /// to one status
    pub fn get_transfer_list(&self, filter: Option<TransferStatus>) -> Vec<TransferTemplate> {
        self.lock_records()
            .iter()
            .filter(|(_, r)| filter.map_or(true, |status| r.status == status))
            .map(|(path, r)| r.snapshot(path))
            .collect()
    }

    /// Snapshot of a single record
    pub fn get_transfer(&self, path: &Path) -> Option<TransferTemplate> {
        self.lock_records().get(path).map(|r| r.snapshot(path))
    }

    /// Sets the delay used by cycles armed from now on
    pub fn set_delay(&self, delay: Duration) {
        info!(delay_secs = delay.as_secs(), "Transfer delay updated");
        *self.inner.delay.lock().unwrap_or_else(|p| p.into_inner()) = delay;
    }

    pub fn delay(&self) -> Duration {
        *self.inner.delay.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Replaces the object-store client used by uploads started from now on
    ///
    /// Uploads already sending keep the client they started with.
    ///
    /// # Errors
    /// Returns an error if the factory rejects the credentials; the
    /// previous client stays in use.
    pub fn set_credentials(&self, credentials: &CredentialsConfig) -> anyhow::Result<()> {
        let store = self.inner.factory.connect(credentials)?;
        *self.inner.target.write().unwrap_or_else(|p| p.into_inner()) = UploadTarget {
            store,
            bucket: credentials.bucket.clone(),
        };
        info!(bucket = %credentials.bucket, "Object store credentials updated");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn lock_records(&self) -> MutexGuard<'_, IndexMap<PathBuf, TransferRecord>> {
        self.inner
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn target(&self) -> UploadTarget {
        self.inner
            .target
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn on_timer(&self, path: &Path, generation: u64) {
        let mut records = self.lock_records();
        let Some(record) = records.get_mut(path) else {
            return;
        };
        if record.generation != generation {
            debug!(path = %path.display(), generation, "Ignoring stale timer");
            return;
        }
        record.timer = None;
        self.begin_upload(record, path);
    }

    /// Spawns the upload task unless one is already in flight, in which
    /// case the start is deferred until it finishes
    fn begin_upload(&self, record: &mut TransferRecord, path: &Path) {
        if record.in_flight {
            debug!(path = %path.display(), "Upload in flight, deferring");
            record.deferred = true;
            return;
        }
        record.in_flight = true;
        record.deferred = false;

        let this = self.clone();
        let path = path.to_path_buf();
        let generation = record.generation;
        tokio::spawn(async move { this.run_upload(path, generation).await });
    }

    async fn run_upload(self, path: PathBuf, generation: u64) {
        let Ok(_permit) = self.inner.permits.clone().acquire_owned().await else {
            warn!(path = %path.display(), "Upload permits closed");
            self.finish_without_upload(&path);
            return;
        };

        let target = {
            let mut records = self.lock_records();
            let Some(record) = records.get_mut(&path) else {
                return;
            };
            if record.generation != generation {
                // Re-signalled while waiting for a permit.
                record.in_flight = false;
                if std::mem::take(&mut record.deferred) {
                    self.begin_upload(record, &path);
                }
                return;
            }
            record.status = TransferStatus::Uploading;
            self.inner.notifier.notify(&record.snapshot(&path));
            self.target()
        };

        let key = object_key(&path);
        info!(path = %path.display(), bucket = %target.bucket, key = %key, "Uploading");
        let result = target.store.put(&target.bucket, &key, &path).await;

        if let Err(err) = &result {
            let upload_err = UploadError::from_anyhow(&path, err);
            warn!(path = %path.display(), error = %upload_err.detail, "Upload failed");
            if let Err(log_err) = self
                .inner
                .error_log
                .append(&ErrorLogEntry::from(&upload_err))
                .await
            {
                warn!(path = %path.display(), error = %log_err, "Failed to write error log entry");
            }
        }

        let mut records = self.lock_records();
        let Some(record) = records.get_mut(&path) else {
            return;
        };
        record.in_flight = false;
        match result {
            Ok(()) => {
                record.status = TransferStatus::Complete;
                record.completed_at = Some(Utc::now());
                info!(path = %path.display(), "Upload complete");
            }
            Err(_) => {
                record.status = TransferStatus::Error;
                record.completed_at = None;
            }
        }
        self.inner.notifier.notify(&record.snapshot(&path));

        if record.generation != generation {
            record.status = TransferStatus::Queued;
            record.completed_at = None;
            self.inner.notifier.notify(&record.snapshot(&path));
            if std::mem::take(&mut record.deferred) {
                self.begin_upload(record, &path);
            }
        }

        self.enforce_retention(&mut records);
    }

    fn finish_without_upload(&self, path: &Path) {
        if let Some(record) = self.lock_records().get_mut(path) {
            record.in_flight = false;
            record.deferred = false;
        }
    }

    /// Evicts the oldest idle terminal records while over the retention cap
    fn enforce_retention(&self, records: &mut IndexMap<PathBuf, TransferRecord>) {
        let Some(max) = self.inner.max_retained else {
            return;
        };
        while records.len() > max {
            let Some(index) = records.values().position(TransferRecord::is_evictable) else {
                break;
            };
            if let Some((path, _)) = records.shift_remove_index(index) {
                debug!(path = %path.display(), "Evicted transfer record");
            }
        }
    }
}

// ============================================================================
// Unit tests
// ============================================================================
