//! Watch session internals: debounce, event classification, refcounting,
//! and re-subscription after structural changes or subscription errors.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

use crate::discovery::ResourceRoot;
use crate::error::{lock_poisoned_error, ResourceError, Result};
use crate::scan;

/// Default trailing-edge debounce window.
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;
/// Minimum spacing between logged subscription errors per path.
pub const ERROR_LOG_WINDOW_MS: u64 = 5_000;
/// Delay before a failed session is automatically re-subscribed.
pub const WATCH_RESTART_DELAY_MS: u64 = 5_000;

/// Options for one watch session.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub debounce: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
        }
    }
}

/// One coalesced notification delivered per debounce window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    /// Changed paths, deduplicated and sorted.
    pub paths: Vec<PathBuf>,
    /// Whether any event touched a watched directory itself, meaning the
    /// directory listing may have changed.
    pub needs_rebuild: bool,
}

/// Invoked once per coalesced batch.
pub type ChangeCallback = Arc<dyn Fn(ChangeBatch) + Send + Sync>;

enum SessionEvent {
    Paths(Vec<PathBuf>),
    SubscribeError {
        path: Option<PathBuf>,
        message: String,
    },
}

struct SessionInner {
    signature: String,
    roots: Vec<ResourceRoot>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

struct SessionHandle {
    inner: Arc<SessionInner>,
    task: tokio::task::JoinHandle<()>,
    refcount: usize,
}

/// Owns native filesystem subscriptions per root-set signature.
///
/// Sessions are reference-counted: N consumers attaching to the same
/// signature share one set of native handles, and teardown happens when
/// the last consumer releases (or unconditionally via [`WatchManager::stop`]).
#[derive(Default)]
pub struct WatchManager {
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl WatchManager {
    /// Starts (or attaches to) the session for `signature`.
    ///
    /// Must be called from within a tokio runtime; the debounce loop runs
    /// as a spawned task.
    pub fn start(
        &self,
        signature: &str,
        roots: &[ResourceRoot],
        on_change: ChangeCallback,
        options: WatchOptions,
    ) -> Result<String> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| lock_poisoned_error("watch sessions"))?;

        if let Some(handle) = sessions.get_mut(signature) {
            handle.refcount += 1;
            return Ok(signature.to_string());
        }

        let (events, receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(SessionInner {
            signature: signature.to_string(),
            roots: roots.to_vec(),
            watcher: Mutex::new(None),
            events,
        });

        subscribe(&inner)?;
        let task = tokio::spawn(run_session(inner.clone(), receiver, on_change, options));

        log::debug!("watch session started for {signature}");
        sessions.insert(
            signature.to_string(),
            SessionHandle {
                inner,
                task,
                refcount: 1,
            },
        );
        Ok(signature.to_string())
    }

    /// Whether a live session exists for `signature`.
    pub fn is_watching(&self, signature: &str) -> bool {
        self.sessions
            .lock()
            .map(|sessions| sessions.contains_key(signature))
            .unwrap_or(false)
    }

    /// Current consumer count for `signature` (0 when absent).
    pub fn refcount(&self, signature: &str) -> usize {
        self.sessions
            .lock()
            .map(|sessions| {
                sessions
                    .get(signature)
                    .map(|handle| handle.refcount)
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    /// Releases one consumer; tears the session down only at refcount zero.
    /// Returns true when the session was torn down.
    pub fn release(&self, signature: &str) -> bool {
        let Ok(mut sessions) = self.sessions.lock() else {
            return false;
        };
        let Some(handle) = sessions.get_mut(signature) else {
            return false;
        };
        handle.refcount = handle.refcount.saturating_sub(1);
        if handle.refcount > 0 {
            return false;
        }
        if let Some(handle) = sessions.remove(signature) {
            teardown(handle);
        }
        true
    }

    /// Unconditional teardown of one session, or of every session.
    pub fn stop(&self, signature: Option<&str>) {
        let Ok(mut sessions) = self.sessions.lock() else {
            return;
        };
        match signature {
            Some(signature) => {
                if let Some(handle) = sessions.remove(signature) {
                    teardown(handle);
                }
            }
            None => {
                for (_, handle) in sessions.drain() {
                    teardown(handle);
                }
            }
        }
    }
}

fn teardown(handle: SessionHandle) {
    handle.task.abort();
    if let Ok(mut watcher) = handle.inner.watcher.lock() {
        watcher.take();
    }
    log::debug!("watch session stopped for {}", handle.inner.signature);
}

/// (Re)creates the native watcher for the session's current path set,
/// replacing any previous handles. Individual `watch` failures are routed
/// through the event channel so the debounce loop can retry; only failing
/// to create the watcher at all is a hard error.
fn subscribe(inner: &Arc<SessionInner>) -> Result<()> {
    let paths = scan::watch_paths(&inner.roots);
    let events = inner.events.clone();

    let mut watcher = recommended_watcher(move |result: notify::Result<Event>| match result {
        Ok(event) => {
            if matches!(event.kind, EventKind::Access(_)) {
                return;
            }
            if !event.paths.is_empty() {
                let _ = events.send(SessionEvent::Paths(event.paths));
            }
        }
        Err(error) => {
            let path = error.paths.first().cloned();
            let message = error.to_string();
            let _ = events.send(SessionEvent::SubscribeError { path, message });
        }
    })
    .map_err(|error| ResourceError::Watch(format!("failed to create watcher: {error}")))?;

    for path in paths.directories.iter().chain(paths.files.iter()) {
        if let Err(error) = watcher.watch(path, RecursiveMode::NonRecursive) {
            let _ = inner.events.send(SessionEvent::SubscribeError {
                path: Some(path.clone()),
                message: error.to_string(),
            });
        }
    }

    let mut slot = inner
        .watcher
        .lock()
        .map_err(|_| lock_poisoned_error("watch handles"))?;
    *slot = Some(watcher);
    Ok(())
}

/// Directories whose own change events mean the listing may have changed.
fn structural_dirs(roots: &[ResourceRoot]) -> HashSet<PathBuf> {
    let paths = scan::watch_paths(roots);
    paths.directories.into_iter().collect()
}

/// Pending state accumulated between debounce firings.
#[derive(Default)]
struct PendingBatch {
    paths: BTreeSet<PathBuf>,
    structural: bool,
}

impl PendingBatch {
    /// The watched-directory set is computed at subscribe time, so a
    /// directory created afterwards is not in it yet; checking the disk
    /// catches those too and forces the re-subscription that starts
    /// watching them.
    fn record(&mut self, structural: &HashSet<PathBuf>, paths: Vec<PathBuf>) {
        for path in paths {
            if structural.contains(&path) || path.is_dir() {
                self.structural = true;
            }
            self.paths.insert(path);
        }
    }

    fn has_pending(&self) -> bool {
        !self.paths.is_empty() || self.structural
    }

    fn take(&mut self) -> ChangeBatch {
        let batch = ChangeBatch {
            paths: std::mem::take(&mut self.paths).into_iter().collect(),
            needs_rebuild: self.structural,
        };
        self.structural = false;
        batch
    }
}

/// Per-path throttle for subscription error logging.
#[derive(Default)]
struct ErrorThrottle {
    last_logged: HashMap<String, std::time::Instant>,
}

impl ErrorThrottle {
    fn should_log(&mut self, path: Option<&Path>) -> bool {
        let key = path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "<session>".to_string());
        let window = Duration::from_millis(ERROR_LOG_WINDOW_MS);
        let now = std::time::Instant::now();
        match self.last_logged.get(&key) {
            Some(last) if now.duration_since(*last) < window => false,
            _ => {
                self.last_logged.insert(key, now);
                true
            }
        }
    }
}

/// The debounce loop: accumulates events, fires the callback once per
/// trailing-edge window, re-subscribes after structural batches, and
/// schedules delayed restarts after subscription errors.
async fn run_session(
    inner: Arc<SessionInner>,
    mut receiver: mpsc::UnboundedReceiver<SessionEvent>,
    on_change: ChangeCallback,
    options: WatchOptions,
) {
    let mut pending = PendingBatch::default();
    let mut fire_at: Option<Instant> = None;
    let mut retry_at: Option<Instant> = None;
    let mut throttle = ErrorThrottle::default();
    let mut structural = structural_dirs(&inner.roots);
    let restart_delay = Duration::from_millis(WATCH_RESTART_DELAY_MS);

    loop {
        let event = match earliest(fire_at, retry_at) {
            Some(deadline) => match timeout_at(deadline, receiver.recv()).await {
                Ok(event) => event,
                Err(_) => {
                    let now = Instant::now();
                    if fire_at.is_some_and(|at| at <= now) {
                        fire_at = None;
                        let batch = pending.take();
                        let was_structural = batch.needs_rebuild;
                        on_change(batch);
                        if was_structural {
                            // The watched path set may have changed.
                            match subscribe(&inner) {
                                Ok(()) => structural = structural_dirs(&inner.roots),
                                Err(error) => {
                                    if throttle.should_log(None) {
                                        log::warn!(
                                            "watch re-subscription failed for {}: {error}",
                                            inner.signature
                                        );
                                    }
                                    retry_at = Some(Instant::now() + restart_delay);
                                }
                            }
                        }
                    }
                    if retry_at.is_some_and(|at| at <= now) {
                        retry_at = None;
                        match subscribe(&inner) {
                            Ok(()) => {
                                structural = structural_dirs(&inner.roots);
                                log::info!("watch session restarted for {}", inner.signature);
                            }
                            Err(error) => {
                                if throttle.should_log(None) {
                                    log::warn!(
                                        "watch restart failed for {}: {error}",
                                        inner.signature
                                    );
                                }
                                retry_at = Some(Instant::now() + restart_delay);
                            }
                        }
                    }
                    continue;
                }
            },
            None => receiver.recv().await,
        };

        let Some(event) = event else {
            break;
        };

        match event {
            SessionEvent::Paths(paths) => {
                pending.record(&structural, paths);
                if pending.has_pending() {
                    // Trailing edge: every event pushes the firing out again.
                    fire_at = Some(Instant::now() + options.debounce);
                }
            }
            SessionEvent::SubscribeError { path, message } => {
                if throttle.should_log(path.as_deref()) {
                    log::warn!(
                        "watch subscription error for {}: {message}",
                        path.as_deref()
                            .map(|path| path.display().to_string())
                            .unwrap_or_else(|| inner.signature.clone())
                    );
                }
                if retry_at.is_none() {
                    retry_at = Some(Instant::now() + restart_delay);
                }
            }
        }
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}
