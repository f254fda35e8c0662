//! Directory event source and write-settling queue
//!
//! Provides a [`DirectoryEventSource`] that wraps the `notify` crate to
//! monitor directories recursively and reports one settled path per file
//! mutation. A tree containing unreadable directories is watched piecewise,
//! skipping the unreadable parts.
//!
//! The [`SettleQueue`] holds candidate paths until their size has stayed the
//! same for the configured settle window, so a file that is still being
//! copied or downloaded is only reported once the writer is done.
//!
//! ## Architecture
//!
//! ```text
//! inotify / kqueue / ReadDirectoryChangesW
//!       │
//!       ▼
//!  notify callback ──→ raw mpsc ──→ settle loop (SettleQueue) ──→ changed(path) mpsc
//!       │
//!       └── new directories ──→ directory loop (registers them when needed)
//! ```

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bucketsync_core::config::WatcherConfig;
use bucketsync_core::ports::IEventSource;
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::WatchSourceError;

/// Capacity of the raw and settled event channels
const CHANNEL_CAPACITY: usize = 1024;

// ============================================================================
// DirectoryEventSource
// ============================================================================

/// A registered root
#[derive(Debug, Clone)]
struct WatchRoot {
    /// The path as requested
    requested: PathBuf,
    /// The path with symlinks resolved; events carry this prefix
    resolved: PathBuf,
    /// Directories handed to the OS watcher for this root. Empty when an
    /// enclosing root already covers it.
    registered: Vec<PathBuf>,
}

/// The OS watcher and everything registered on it
struct Registry {
    watcher: RecommendedWatcher,
    roots: Vec<WatchRoot>,
    /// Directories watched on their own because part of their subtree is
    /// unreadable. Subdirectories created in them are registered by hand.
    shallow: HashSet<PathBuf>,
}

/// Watches directories for settled file changes using the OS-native
/// mechanism
///
/// Roots can be added and removed while running. Symbolic links in a root
/// are resolved before registration. Unreadable directories below a root
/// are skipped; the rest of the tree is still watched.
///
/// ## Usage
///
/// ```ignore
/// let (source, mut changed) = DirectoryEventSource::new(&config.watcher, cancel.clone())?;
/// source.watch(Path::new("/home/ana/docs"))?;
/// while let Some(path) = changed.recv().await { /* ... */ }
/// ```
pub struct DirectoryEventSource {
    registry: Arc<Mutex<Registry>>,
}

impl DirectoryEventSource {
    /// Creates the event source and spawns its background loops
    ///
    /// Must be called from within a Tokio runtime. Returns the source and
    /// the receiver of settled `changed(path)` signals. The loops stop when
    /// `cancel` fires or the source is dropped.
    ///
    /// # Errors
    /// Returns an error if the underlying OS watcher cannot be created.
    pub fn new(
        config: &WatcherConfig,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::Receiver<PathBuf>), WatchSourceError> {
        let (raw_tx, raw_rx) = mpsc::channel::<PathBuf>(CHANNEL_CAPACITY);
        let (changed_tx, changed_rx) = mpsc::channel::<PathBuf>(CHANNEL_CAPACITY);
        // Unbounded: the notify thread must never wait on the registry lock.
        let (dir_tx, dir_rx) = mpsc::unbounded_channel::<PathBuf>();

        info!(
            settle_ms = config.settle_ms,
            poll_interval_ms = config.poll_interval_ms,
            "Initializing directory event source"
        );

        let watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    let Some(path) = candidate_path(&event) else {
                        return;
                    };
                    if path.is_dir() {
                        if dir_tx.send(path).is_err() {
                            debug!("Dropping directory event (registry loop stopped)");
                        }
                    } else if let Err(e) = raw_tx.blocking_send(path) {
                        debug!(error = %e, "Dropping change event (settle loop stopped)");
                    }
                }
                Err(err) if is_permission_error(&err) => {
                    debug!(error = %err, "Skipping unreadable entry");
                }
                Err(err) => {
                    warn!(error = %err, "File watcher error");
                }
            },
            notify::Config::default(),
        )
        .map_err(WatchSourceError::Init)?;

        let registry = Arc::new(Mutex::new(Registry {
            watcher,
            roots: Vec::new(),
            shallow: HashSet::new(),
        }));

        tokio::spawn(run_settle_loop(
            raw_rx,
            changed_tx,
            config.settle(),
            config.poll_interval(),
            cancel.clone(),
        ));
        tokio::spawn(run_directory_loop(
            dir_rx,
            Arc::downgrade(&registry),
            cancel,
        ));

        Ok((Self { registry }, changed_rx))
    }

    /// Starts watching `path` recursively
    ///
    /// Unreadable directories below `path` are skipped with a debug log.
    ///
    /// # Errors
    /// `Missing` if the directory does not exist, `PermissionDenied` if it
    /// cannot be read, `Backend` for OS watcher failures (e.g. the inotify
    /// watch limit). Nothing stays registered on error.
    pub fn add_root(&self, path: &Path) -> Result<(), WatchSourceError> {
        let mut registry = lock(&self.registry);
        let Registry {
            watcher,
            roots,
            shallow,
        } = &mut *registry;

        if roots.iter().any(|r| r.requested == path) {
            debug!(path = %path.display(), "Path already watched");
            return Ok(());
        }

        let resolved = std::fs::canonicalize(path).map_err(|e| WatchSourceError::from_io(path, e))?;
        if !resolved.is_dir() {
            return Err(WatchSourceError::NotADirectory(path.to_path_buf()));
        }

        let mut registered = Vec::new();
        if roots.iter().any(|r| resolved.starts_with(&r.resolved)) {
            debug!(path = %path.display(), "Path lies inside a watched root");
        } else if let Err(source) = register_tree(watcher, &resolved, shallow, &mut registered) {
            for dir in &registered {
                watcher.unwatch(dir).ok();
            }
            shallow.retain(|d| !d.starts_with(&resolved));
            return Err(if is_permission_error(&source) {
                WatchSourceError::PermissionDenied(path.to_path_buf())
            } else {
                WatchSourceError::Backend {
                    path: path.to_path_buf(),
                    source,
                }
            });
        }

        info!(
            path = %path.display(),
            resolved = %resolved.display(),
            registrations = registered.len(),
            "Started recursive watch"
        );
        roots.push(WatchRoot {
            requested: path.to_path_buf(),
            resolved,
            registered,
        });
        Ok(())
    }

    /// Stops watching `path`; a no-op if it is not watched
    ///
    /// Watches shared with another root stay in place.
    ///
    /// # Errors
    /// Returns `Backend` if the OS watcher refuses to drop a watch. The
    /// root is forgotten either way.
    pub fn remove_root(&self, path: &Path) -> Result<(), WatchSourceError> {
        let mut registry = lock(&self.registry);
        let Registry {
            watcher,
            roots,
            shallow,
        } = &mut *registry;

        let Some(index) = roots.iter().position(|r| r.requested == path) else {
            return Ok(());
        };
        let root = roots.remove(index);

        // An enclosing root (or one resolving to the same directory) still
        // relies on these watches.
        if roots.iter().any(|r| root.resolved.starts_with(&r.resolved)) {
            debug!(path = %path.display(), "Watches kept for enclosing root");
            return Ok(());
        }

        info!(path = %path.display(), "Stopping watch");
        let mut result = Ok(());
        for dir in &root.registered {
            match watcher.unwatch(dir) {
                Ok(()) => {}
                Err(e) if matches!(e.kind, notify::ErrorKind::WatchNotFound) => {}
                Err(source) if result.is_ok() => {
                    result = Err(WatchSourceError::Backend {
                        path: path.to_path_buf(),
                        source,
                    });
                }
                Err(source) => warn!(path = %dir.display(), error = %source, "Failed to drop watch"),
            }
        }
        shallow.retain(|d| !d.starts_with(&root.resolved));

        // Nested roots shared the watches just dropped.
        for i in 0..roots.len() {
            let nested = &roots[i];
            if !nested.resolved.starts_with(&root.resolved) {
                continue;
            }
            let covered = roots.iter().enumerate().any(|(j, other)| {
                j != i
                    && nested.resolved.starts_with(&other.resolved)
                    && (other.resolved != nested.resolved || j < i)
            });
            if covered {
                continue;
            }

            let resolved = nested.resolved.clone();
            let mut registered = Vec::new();
            if let Err(e) = register_tree(watcher, &resolved, shallow, &mut registered) {
                warn!(path = %resolved.display(), error = %e, "Failed to restore nested watch");
            }
            roots[i].registered = registered;
        }

        result
    }

    /// Paths currently registered, as they were requested
    pub fn roots(&self) -> Vec<PathBuf> {
        lock(&self.registry)
            .roots
            .iter()
            .map(|r| r.requested.clone())
            .collect()
    }

    /// The symlink-resolved directory of the registered root `path`
    pub fn resolved_root(&self, path: &Path) -> Option<PathBuf> {
        lock(&self.registry)
            .roots
            .iter()
            .find(|r| r.requested == path)
            .map(|r| r.resolved.clone())
    }
}

impl IEventSource for DirectoryEventSource {
    fn watch(&self, path: &Path) -> anyhow::Result<()> {
        self.add_root(path)?;
        Ok(())
    }

    fn unwatch(&self, path: &Path) -> anyhow::Result<()> {
        self.remove_root(path)?;
        Ok(())
    }

    fn watched(&self) -> Vec<PathBuf> {
        self.roots()
    }

    fn resolved(&self, path: &Path) -> Option<PathBuf> {
        self.resolved_root(path)
    }
}

impl Registry {
    /// Registers a directory created inside a shallow-watched directory
    fn adopt_directory(&mut self, dir: &Path) {
        let Some(parent) = dir.parent() else {
            return;
        };
        if !self.shallow.contains(parent) {
            return;
        }

        let Registry {
            watcher,
            roots,
            shallow,
        } = self;
        let Some(root) = roots
            .iter_mut()
            .find(|r| !r.registered.is_empty() && dir.starts_with(&r.resolved))
        else {
            return;
        };

        match register_tree(watcher, dir, shallow, &mut root.registered) {
            Ok(()) => debug!(path = %dir.display(), "Watching new directory"),
            Err(err) if is_permission_error(&err) => {
                debug!(path = %dir.display(), "Skipping unreadable new directory");
            }
            Err(err) => warn!(path = %dir.display(), error = %err, "Failed to watch new directory"),
        }
    }
}

/// Registers `dir` and every readable directory below it
///
/// A single recursive watch is tried first. If part of the tree cannot be
/// read, that partial registration is rolled back, `dir` is watched on its
/// own and each child directory is registered the same way. Unreadable
/// children are skipped. Every path handed to the OS watcher is appended
/// to `registered`.
fn register_tree(
    watcher: &mut RecommendedWatcher,
    dir: &Path,
    shallow: &mut HashSet<PathBuf>,
    registered: &mut Vec<PathBuf>,
) -> Result<(), notify::Error> {
    let err = match watcher.watch(dir, RecursiveMode::Recursive) {
        Ok(()) => {
            registered.push(dir.to_path_buf());
            return Ok(());
        }
        Err(err) => err,
    };

    // notify keeps whatever it registered before the failure.
    watcher.unwatch(dir).ok();
    if !is_permission_error(&err) {
        return Err(err);
    }
    debug!(path = %dir.display(), error = %err, "Unreadable entries below directory");

    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    registered.push(dir.to_path_buf());
    shallow.insert(dir.to_path_buf());

    let children = match std::fs::read_dir(dir) {
        Ok(children) => children,
        Err(e) => {
            debug!(path = %dir.display(), error = %e, "Cannot list directory");
            return Ok(());
        }
    };

    // Symlinked subdirectories are only followed by a recursive watch.
    for child in children.flatten() {
        if !child.file_type().is_ok_and(|t| t.is_dir()) {
            continue;
        }
        let path = child.path();
        match register_tree(watcher, &path, shallow, registered) {
            Ok(()) => {}
            Err(err) if is_permission_error(&err) => {
                debug!(path = %path.display(), "Skipping unreadable directory");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Registers directories created under shallow-watched parents
///
/// Holds only a weak handle so dropping the source stops the loop.
async fn run_directory_loop(
    mut dir_rx: mpsc::UnboundedReceiver<PathBuf>,
    registry: Weak<Mutex<Registry>>,
    cancel: CancellationToken,
) {
    loop {
        let dir = tokio::select! {
            _ = cancel.cancelled() => break,
            dir = dir_rx.recv() => match dir {
                Some(dir) => dir,
                None => break,
            },
        };
        let Some(registry) = registry.upgrade() else {
            break;
        };
        let adopted = tokio::task::spawn_blocking(move || {
            let mut registry = lock(&registry);
            registry.adopt_directory(&dir);
        })
        .await;
        if let Err(e) = adopted {
            warn!(error = %e, "Directory registration task failed");
        }
    }
    debug!("Directory loop stopped");
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn is_permission_error(err: &notify::Error) -> bool {
    matches!(&err.kind, notify::ErrorKind::Io(io) if io.kind() == ErrorKind::PermissionDenied)
}

// ============================================================================
// Event mapping - notify::Event → candidate path
// ============================================================================

/// Extracts the path that may need uploading from a raw `notify` event
///
/// - `Create(*)` → the created path
/// - `Modify(Data(*))` / `Modify(Any)` → the modified path
/// - `Modify(Name(To))` → the destination
/// - `Modify(Name(Both))` → the second (destination) path
///
/// Removals, rename sources, metadata-only changes and access events
/// produce `None`. Directories are filtered later by the settle loop.
fn candidate_path(event: &notify::Event) -> Option<PathBuf> {
    let paths = &event.paths;

    let path = match &event.kind {
        EventKind::Create(_) => paths.first(),
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            paths.first()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => paths.first(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => paths.get(1).or(paths.first()),
        _ => {
            debug!(kind = ?event.kind, "Ignoring event kind");
            None
        }
    }?;

    debug!(path = %path.display(), kind = ?event.kind, "Change candidate");
    Some(path.clone())
}

// ============================================================================
// SettleQueue
// ============================================================================

/// Result of inspecting a pending path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// A regular file with the given size in bytes
    File(u64),
    /// A directory; never reported
    Directory,
    /// The path disappeared before settling
    Gone,
    /// The path cannot be read
    Unreadable,
}

/// Inspects `path` for the settle loop
pub async fn probe(path: &Path) -> Probe {
    match tokio::fs::metadata(path).await {
        Ok(m) if m.is_dir() => Probe::Directory,
        Ok(m) => Probe::File(m.len()),
        Err(err) if err.kind() == ErrorKind::NotFound => Probe::Gone,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "Cannot read file metadata");
            Probe::Unreadable
        }
    }
}

/// Queue that holds candidate paths until their writes have settled
///
/// A path settles once its size has been observed unchanged for the
/// whole settle window. Any new raw event for the path restarts the
/// window.
#[derive(Debug)]
pub struct SettleQueue {
    /// Last observed size and the instant it was first seen
    pending: HashMap<PathBuf, (Option<u64>, Instant)>,
    settle: Duration,
}

impl SettleQueue {
    pub fn new(settle: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            settle,
        }
    }

    /// Inserts `path` or restarts its settle window
    pub fn push(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path, (None, now));
    }

    /// Paths awaiting a probe
    pub fn paths(&self) -> Vec<PathBuf> {
        self.pending.keys().cloned().collect()
    }

    /// Records a probe result for `path`
    ///
    /// Returns `true` when the path has settled; settled, vanished,
    /// unreadable and directory paths leave the queue.
    pub fn observe(&mut self, path: &Path, probe: Probe, now: Instant) -> bool {
        let size = match probe {
            Probe::File(size) => size,
            Probe::Directory | Probe::Gone | Probe::Unreadable => {
                self.pending.remove(path);
                return false;
            }
        };

        let Some((last_size, since)) = self.pending.get_mut(path) else {
            return false;
        };

        if *last_size != Some(size) {
            *last_size = Some(size);
            *since = now;
            return false;
        }

        if now.duration_since(*since) >= self.settle {
            self.pending.remove(path);
            return true;
        }
        false
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Main loop of the settle stage
///
/// Runs until `cancel` fires, the raw channel closes (source dropped) or
/// the consumer of settled paths goes away.
async fn run_settle_loop(
    mut raw_rx: mpsc::Receiver<PathBuf>,
    changed_tx: mpsc::Sender<PathBuf>,
    settle: Duration,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    debug!("Settle loop starting");

    let mut queue = SettleQueue::new(settle);
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            raw = raw_rx.recv() => match raw {
                Some(path) => queue.push(path, Instant::now()),
                None => break,
            },

            _ = ticker.tick(), if !queue.is_empty() => {
                for path in queue.paths() {
                    let result = probe(&path).await;
                    if queue.observe(&path, result, Instant::now()) {
                        debug!(path = %path.display(), "File settled");
                        if changed_tx.send(path).await.is_err() {
                            debug!("Change receiver dropped, settle loop stopping");
                            return;
                        }
                    }
                }
            }
        }
    }

    debug!(pending = queue.pending_count(), "Settle loop stopped");
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind, paths: &[&str]) -> notify::Event {
        notify::Event {
            kind,
            paths: paths.iter().map(PathBuf::from).collect(),
            attrs: Default::default(),
        }
    }

    // ------------------------------------------------------------------
    // Event mapping
    // ------------------------------------------------------------------

    #[test]
    fn test_create_is_candidate() {
        let e = event(EventKind::Create(notify::event::CreateKind::File), &["/a.txt"]);
        assert_eq!(candidate_path(&e), Some(PathBuf::from("/a.txt")));
    }

    #[test]
    fn test_modify_data_is_candidate() {
        let e = event(
            EventKind::Modify(ModifyKind::Data(notify::event::DataChange::Content)),
            &["/a.txt"],
        );
        assert_eq!(candidate_path(&e), Some(PathBuf::from("/a.txt")));
    }

    #[test]
    fn test_rename_reports_destination() {
        let both = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/old.txt", "/new.txt"],
        );
        assert_eq!(candidate_path(&both), Some(PathBuf::from("/new.txt")));

        let to = event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["/new.txt"]);
        assert_eq!(candidate_path(&to), Some(PathBuf::from("/new.txt")));

        let from = event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["/old.txt"]);
        assert_eq!(candidate_path(&from), None);
    }

    #[test]
    fn test_remove_and_access_ignored() {
        let remove = event(EventKind::Remove(notify::event::RemoveKind::File), &["/a.txt"]);
        assert_eq!(candidate_path(&remove), None);

        let access = event(EventKind::Access(notify::event::AccessKind::Read), &["/a.txt"]);
        assert_eq!(candidate_path(&access), None);
    }

    #[test]
    fn test_metadata_only_ignored() {
        let e = event(
            EventKind::Modify(ModifyKind::Metadata(notify::event::MetadataKind::Permissions)),
            &["/a.txt"],
        );
        assert_eq!(candidate_path(&e), None);
    }

    #[test]
    fn test_event_without_paths() {
        let e = event(EventKind::Create(notify::event::CreateKind::File), &[]);
        assert_eq!(candidate_path(&e), None);
    }

    // ------------------------------------------------------------------
    // SettleQueue
    // ------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_settles_after_stable_window() {
        let mut queue = SettleQueue::new(Duration::from_millis(200));
        let path = PathBuf::from("/a.txt");
        let t0 = Instant::now();

        queue.push(path.clone(), t0);
        assert!(!queue.observe(&path, Probe::File(10), t0));
        assert!(!queue.observe(&path, Probe::File(10), t0 + Duration::from_millis(100)));
        assert!(queue.observe(&path, Probe::File(10), t0 + Duration::from_millis(200)));
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_growing_file_restarts_window() {
        let mut queue = SettleQueue::new(Duration::from_millis(200));
        let path = PathBuf::from("/big.iso");
        let t0 = Instant::now();

        queue.push(path.clone(), t0);
        queue.observe(&path, Probe::File(10), t0);
        assert!(!queue.observe(&path, Probe::File(20), t0 + Duration::from_millis(150)));
        assert!(!queue.observe(&path, Probe::File(20), t0 + Duration::from_millis(300)));
        assert!(queue.observe(&path, Probe::File(20), t0 + Duration::from_millis(350)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_event_restarts_window() {
        let mut queue = SettleQueue::new(Duration::from_millis(200));
        let path = PathBuf::from("/a.txt");
        let t0 = Instant::now();

        queue.push(path.clone(), t0);
        queue.observe(&path, Probe::File(10), t0);
        queue.push(path.clone(), t0 + Duration::from_millis(150));
        queue.observe(&path, Probe::File(10), t0 + Duration::from_millis(150));
        assert!(!queue.observe(&path, Probe::File(10), t0 + Duration::from_millis(250)));
        assert_eq!(queue.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gone_directory_and_unreadable_are_dropped() {
        let mut queue = SettleQueue::new(Duration::from_millis(0));
        let now = Instant::now();
        for (name, probe) in [
            ("/gone", Probe::Gone),
            ("/dir", Probe::Directory),
            ("/locked", Probe::Unreadable),
        ] {
            queue.push(PathBuf::from(name), now);
            assert!(!queue.observe(Path::new(name), probe, now));
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_probe_reports_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, b"hello").unwrap();

        assert_eq!(probe(&file).await, Probe::File(5));
        assert_eq!(probe(dir.path()).await, Probe::Directory);
        assert_eq!(probe(&dir.path().join("missing")).await, Probe::Gone);
    }

    // ------------------------------------------------------------------
    // Settle loop
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_settle_loop_reports_written_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, b"content").unwrap();

        let (raw_tx, raw_rx) = mpsc::channel(16);
        let (changed_tx, mut changed_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_settle_loop(
            raw_rx,
            changed_tx,
            Duration::from_millis(30),
            Duration::from_millis(10),
            cancel.clone(),
        ));

        raw_tx.send(file.clone()).await.unwrap();
        raw_tx.send(file.clone()).await.unwrap();

        let settled = tokio::time::timeout(Duration::from_secs(5), changed_rx.recv())
            .await
            .expect("file should settle")
            .unwrap();
        assert_eq!(settled, file);

        let second = tokio::time::timeout(Duration::from_millis(200), changed_rx.recv()).await;
        assert!(second.is_err(), "duplicate raw events must coalesce");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_settle_loop_exits_when_raw_channel_closes() {
        let (raw_tx, raw_rx) = mpsc::channel::<PathBuf>(16);
        let (changed_tx, _changed_rx) = mpsc::channel(16);
        drop(raw_tx);

        tokio::time::timeout(
            Duration::from_secs(2),
            run_settle_loop(
                raw_rx,
                changed_tx,
                Duration::from_millis(10),
                Duration::from_millis(10),
                CancellationToken::new(),
            ),
        )
        .await
        .expect("settle loop should exit when the source is dropped");
    }

    // ------------------------------------------------------------------
    // DirectoryEventSource
    // ------------------------------------------------------------------

    fn fast_config() -> WatcherConfig {
        WatcherConfig {
            settle_ms: 50,
            poll_interval_ms: 10,
        }
    }

    #[tokio::test]
    async fn test_add_root_rejects_missing_directory() {
        let (source, _rx) = DirectoryEventSource::new(&fast_config(), CancellationToken::new()).unwrap();
        let err = source.add_root(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, WatchSourceError::Missing(_)));
        assert!(source.roots().is_empty());
    }

    #[tokio::test]
    async fn test_add_and_remove_roots() {
        let dir = tempfile::tempdir().unwrap();
        let (source, _rx) = DirectoryEventSource::new(&fast_config(), CancellationToken::new()).unwrap();

        source.add_root(dir.path()).unwrap();
        source.add_root(dir.path()).unwrap();
        assert_eq!(source.roots(), vec![dir.path().to_path_buf()]);

        source.remove_root(dir.path()).unwrap();
        source.remove_root(dir.path()).unwrap();
        assert!(source.watched().is_empty());
    }

    /// Waits until `file` comes out of the settle loop
    async fn expect_reported(rx: &mut mpsc::Receiver<PathBuf>, file: &Path) {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match rx.recv().await {
                    Some(path) if path == file => return,
                    Some(_) => continue,
                    None => panic!("event source closed"),
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{} should be reported", file.display()));
    }

    fn canonical_tempdir() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        (dir, root)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reports_file_written_under_root() {
        let (_dir, root) = canonical_tempdir();
        let nested = root.join("nested");
        std::fs::create_dir(&nested).unwrap();

        let cancel = CancellationToken::new();
        let (source, mut rx) = DirectoryEventSource::new(&fast_config(), cancel.clone()).unwrap();
        source.add_root(&root).unwrap();

        let file = nested.join("report.txt");
        std::fs::write(&file, b"quarterly numbers").unwrap();
        expect_reported(&mut rx, &file).await;

        cancel.cancel();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_zero_poll_interval_keeps_reporting() {
        let (_dir, root) = canonical_tempdir();
        let config = WatcherConfig {
            settle_ms: 50,
            poll_interval_ms: 0,
        };

        let cancel = CancellationToken::new();
        let (source, mut rx) = DirectoryEventSource::new(&config, cancel.clone()).unwrap();
        source.add_root(&root).unwrap();

        let file = root.join("a.txt");
        std::fs::write(&file, b"a").unwrap();
        expect_reported(&mut rx, &file).await;

        cancel.cancel();
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_symlinked_root_reports_resolved_paths() {
        let (_dir, base) = canonical_tempdir();
        let target = base.join("real");
        std::fs::create_dir(&target).unwrap();
        let link = base.join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let cancel = CancellationToken::new();
        let (source, mut rx) = DirectoryEventSource::new(&fast_config(), cancel.clone()).unwrap();
        source.add_root(&link).unwrap();
        assert_eq!(source.roots(), vec![link.clone()]);
        assert_eq!(source.resolved(&link), Some(target.clone()));
        assert_eq!(source.resolved(&base), None);

        let file = link.join("notes.txt");
        std::fs::write(&file, b"via link").unwrap();
        expect_reported(&mut rx, &target.join("notes.txt")).await;

        cancel.cancel();
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unreadable_subdirectory_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, root) = canonical_tempdir();
        let readable = root.join("ok");
        std::fs::create_dir(&readable).unwrap();
        let locked = root.join("lost+found");
        std::fs::create_dir(&locked).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        // Root bypasses permission checks; nothing to exercise then.
        if std::fs::read_dir(&locked).is_ok() {
            std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let cancel = CancellationToken::new();
        let (source, mut rx) = DirectoryEventSource::new(&fast_config(), cancel.clone()).unwrap();
        let added = source.add_root(&root);
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
        added.unwrap();
        assert_eq!(source.roots(), vec![root.clone()]);

        let file = readable.join("kept.txt");
        std::fs::write(&file, b"still synced").unwrap();
        expect_reported(&mut rx, &file).await;

        let top = root.join("top.txt");
        std::fs::write(&top, b"top level").unwrap();
        expect_reported(&mut rx, &top).await;

        // Directories created later in the root are picked up as well.
        let created = root.join("later");
        std::fs::create_dir(&created).unwrap();
        let late = created.join("late.txt");
        let found = tokio::time::timeout(Duration::from_secs(10), async {
            for round in 0u32.. {
                std::fs::write(&late, round.to_string()).unwrap();
                let got = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
                if let Ok(Some(path)) = got {
                    if path == late {
                        return;
                    }
                }
            }
        })
        .await;
        assert!(found.is_ok(), "file in new directory should be reported");

        source.remove_root(&root).unwrap();
        assert!(source.roots().is_empty());
        cancel.cancel();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_root_is_rejected() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, base) = canonical_tempdir();
        let locked = base.join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
        if std::fs::read_dir(&locked).is_ok() {
            std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let (source, _rx) = DirectoryEventSource::new(&fast_config(), CancellationToken::new()).unwrap();
        let err = source.add_root(&locked).unwrap_err();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert!(matches!(err, WatchSourceError::PermissionDenied(_)));
        assert!(source.roots().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_removing_nested_root_keeps_enclosing_watch() {
        let (_dir, root) = canonical_tempdir();
        let photos = root.join("photos");
        std::fs::create_dir(&photos).unwrap();

        let cancel = CancellationToken::new();
        let (source, mut rx) = DirectoryEventSource::new(&fast_config(), cancel.clone()).unwrap();
        source.add_root(&photos).unwrap();
        source.add_root(&root).unwrap();
        source.remove_root(&photos).unwrap();
        assert_eq!(source.roots(), vec![root.clone()]);

        let file = photos.join("img.jpg");
        std::fs::write(&file, b"jpeg").unwrap();
        expect_reported(&mut rx, &file).await;

        cancel.cancel();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_removing_enclosing_root_keeps_nested_watch() {
        let (_dir, root) = canonical_tempdir();
        let photos = root.join("photos");
        std::fs::create_dir(&photos).unwrap();

        let cancel = CancellationToken::new();
        let (source, mut rx) = DirectoryEventSource::new(&fast_config(), cancel.clone()).unwrap();
        source.add_root(&root).unwrap();
        source.add_root(&photos).unwrap();
        source.remove_root(&root).unwrap();
        assert_eq!(source.roots(), vec![photos.clone()]);

        let file = photos.join("img.jpg");
        std::fs::write(&file, b"jpeg").unwrap();
        expect_reported(&mut rx, &file).await;

        cancel.cancel();
    }
}
