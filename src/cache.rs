//! Process-wide cache store and freshness gate.
//!
//! `ResourceCache` owns one snapshot slot and at most one watch session
//! per root-set signature. It is an explicit value injected into every
//! entry point; there is no ambient/static state. Rebuilds overwrite the
//! snapshot inside the existing slot so holders of the slot are never
//! orphaned, and a per-slot build lane guarantees a rebuild is never
//! started twice concurrently for one signature.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::discovery::{resolve_roots, root_set_signature, ResourceRoot};
use crate::error::{lock_poisoned_error, Result};
use crate::index::{self, SharedSnapshot};
use crate::scan;
use crate::watcher::{ChangeBatch, ChangeCallback, WatchManager, WatchOptions};

/// While a watch session is live, the structural signature is re-verified
/// at most this often, guarding against missed or coalesced native events.
pub const REVALIDATE_INTERVAL_MS: u64 = 1_000;

#[derive(Default)]
struct CacheInner {
    snapshots: RwLock<HashMap<String, Arc<SharedSnapshot>>>,
    watches: WatchManager,
}

impl CacheInner {
    fn slot(&self, signature: &str) -> Result<Arc<SharedSnapshot>> {
        if let Some(existing) = self
            .snapshots
            .read()
            .map_err(|_| lock_poisoned_error("resource cache"))?
            .get(signature)
            .cloned()
        {
            return Ok(existing);
        }

        let mut snapshots = self
            .snapshots
            .write()
            .map_err(|_| lock_poisoned_error("resource cache"))?;
        if let Some(existing) = snapshots.get(signature).cloned() {
            return Ok(existing);
        }
        let shared = Arc::new(SharedSnapshot::new(signature.to_string()));
        snapshots.insert(signature.to_string(), shared.clone());
        Ok(shared)
    }

    fn lookup(&self, signature: &str) -> Option<Arc<SharedSnapshot>> {
        self.snapshots
            .read()
            .ok()
            .and_then(|snapshots| snapshots.get(signature).cloned())
    }

    fn mark_signature_dirty(&self, signature: &str) {
        if let Some(shared) = self.lookup(signature) {
            if let Ok(mut data) = shared.write() {
                data.dirty = true;
            }
        }
    }

    /// Incremental update entry point shared by the public API and the
    /// internal watch routing. A `needs_rebuild` outcome marks the
    /// snapshot dirty instead of partially applying the batch.
    fn apply_batch(&self, signature: &str, changed: &[PathBuf]) -> Result<(bool, bool)> {
        let Some(shared) = self.lookup(signature) else {
            return Ok((false, true));
        };
        let mut data = shared.write()?;
        if data.dirty {
            return Ok((false, true));
        }
        let outcome = index::apply_changes(&mut data, changed);
        if outcome.needs_rebuild {
            log::debug!("incremental update insufficient for {signature}, marking dirty");
            data.dirty = true;
        }
        Ok((outcome.applied, outcome.needs_rebuild))
    }
}

/// In-process cache of resource indexes, keyed by root-set signature.
#[derive(Default)]
pub struct ResourceCache {
    inner: Arc<CacheInner>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh snapshot for the roots visible from `start_dir`,
    /// rebuilding only when the cached one fails validation.
    ///
    /// The returned slot is shared and may be overwritten in place by a
    /// later rebuild; callers needing stability across calls should
    /// re-fetch rather than hold a read guard.
    pub async fn ensure_index(&self, start_dir: &Path) -> Result<Arc<SharedSnapshot>> {
        let roots = resolve_roots(start_dir);
        let signature = root_set_signature(&roots);
        let shared = self.inner.slot(&signature)?;
        self.validate_or_rebuild(&shared, &roots).await?;
        Ok(shared)
    }

    async fn validate_or_rebuild(
        &self,
        shared: &Arc<SharedSnapshot>,
        roots: &[ResourceRoot],
    ) -> Result<()> {
        let watching = self.inner.watches.is_watching(&shared.signature);
        if self.is_fresh(shared, watching)? {
            return Ok(());
        }

        let _lane = shared.build_lane().await;
        // Another caller may have rebuilt while we waited for the lane.
        if self.is_fresh(shared, watching)? {
            return Ok(());
        }

        log::debug!("rebuilding resource index for '{}'", shared.signature);
        let snapshot = index::build_index(roots).await;
        *shared.write()? = snapshot;
        Ok(())
    }

    /// The two-tier freshness gate. With a live watch session the watcher
    /// is trusted and the structural signature is re-verified only once
    /// per interval; without one, every access re-checks the signature
    /// and every tracked file's mtime.
    fn is_fresh(&self, shared: &SharedSnapshot, watching: bool) -> Result<bool> {
        {
            let data = shared.read()?;
            if data.dirty {
                return Ok(false);
            }
            let Some(checked_at) = data.checked_at else {
                return Ok(false);
            };
            if watching
                && checked_at.elapsed() < Duration::from_millis(REVALIDATE_INTERVAL_MS)
            {
                return Ok(true);
            }
            if scan::structural_signature(&data.roots) != data.structural_signature {
                log::debug!("structural signature changed for '{}'", shared.signature);
                return Ok(false);
            }
            if !watching {
                for (file, mtime) in &data.files {
                    match scan::file_mtime(file) {
                        Ok(current) if current == *mtime => {}
                        _ => return Ok(false),
                    }
                }
            }
        }
        shared.write()?.checked_at = Some(Instant::now());
        Ok(true)
    }

    /// Invalidates the snapshot(s) whose roots contain `path`, or all
    /// snapshots when no path is given. Called by collaborators after
    /// writing resource files behind the watcher's back.
    pub fn mark_dirty(&self, path: Option<&Path>) -> Result<()> {
        let normalized = path.map(|p| std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf()));
        let snapshots = self
            .inner
            .snapshots
            .read()
            .map_err(|_| lock_poisoned_error("resource cache"))?;
        for shared in snapshots.values() {
            let mut data = shared.write()?;
            let affected = match &normalized {
                None => true,
                Some(path) => data.covers(path),
            };
            if affected {
                data.dirty = true;
            }
        }
        Ok(())
    }

    /// Applies an exact set of changed files to the snapshot for
    /// `signature`, avoiding a full rebuild for small edits. Returns
    /// `(applied, needs_rebuild)`.
    pub fn apply_changes(&self, signature: &str, changed: &[PathBuf]) -> Result<(bool, bool)> {
        self.inner.apply_batch(signature, changed)
    }

    /// Starts (or attaches to) a watch session for the roots visible from
    /// `start_dir` and returns the session key.
    ///
    /// Batches route through the incremental updater first, mutating the
    /// stored snapshot or flagging it dirty, and are then forwarded to
    /// `on_change`, if provided. Must be called within a tokio runtime.
    pub fn start_watch(
        &self,
        start_dir: &Path,
        on_change: Option<ChangeCallback>,
        options: WatchOptions,
    ) -> Result<String> {
        let roots = resolve_roots(start_dir);
        let signature = root_set_signature(&roots);

        let inner = self.inner.clone();
        let routed_signature = signature.clone();
        let routed: ChangeCallback = Arc::new(move |batch: ChangeBatch| {
            if batch.needs_rebuild {
                inner.mark_signature_dirty(&routed_signature);
            } else if let Err(error) = inner.apply_batch(&routed_signature, &batch.paths) {
                log::warn!("failed to apply watch batch for {routed_signature}: {error}");
                inner.mark_signature_dirty(&routed_signature);
            }
            if let Some(callback) = &on_change {
                callback(batch);
            }
        });

        self.inner.watches.start(&signature, &roots, routed, options)
    }

    /// Releases one consumer of a session; native handles are torn down
    /// only when the last consumer releases.
    pub fn stop_for_consumer(&self, session_key: &str) -> bool {
        self.inner.watches.release(session_key)
    }

    /// Unconditionally stops one session, or all sessions.
    pub fn stop_watch(&self, session_key: Option<&str>) {
        self.inner.watches.stop(session_key)
    }
}
