//! Snapshot types owned by the cache store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use crate::discovery::{ResourceRoot, RootKind};
use crate::error::{lock_poisoned_error, Result};
use crate::index::data::{ActiveEntry, EntryTable};

/// Priority band for flat per-namespace files.
pub const PRIORITY_FLAT: u32 = 30;
/// Priority band for a merged root `<lang>.json` file.
pub const PRIORITY_MERGED_ROOT: u32 = 40;
/// Priority band for per-namespace files under a merged root.
///
/// Note the merged root file (40) outranks these (50): lower wins, so an
/// "override" file only supplies keys the merged file does not define.
/// This is the historical behavior and is preserved deliberately.
pub const PRIORITY_OVERRIDE: u32 = 50;

/// How a tracked file's content is interpreted when (re)parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub root: PathBuf,
    pub kind: RootKind,
    pub language: String,
    /// `None` for merged root files, whose namespaces come from the
    /// top-level keys of the file itself.
    pub namespace: Option<String>,
    pub is_merged_root: bool,
}

impl FileMeta {
    pub fn priority(&self) -> u32 {
        match self.kind {
            RootKind::FlatPerNamespace => PRIORITY_FLAT,
            RootKind::MergedWithOverrides if self.is_merged_root => PRIORITY_MERGED_ROOT,
            RootKind::MergedWithOverrides => PRIORITY_OVERRIDE,
        }
    }
}

/// A read or parse failure for one tracked file. The file contributes no
/// entries but stays tracked so the error clears once it parses again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileError {
    pub message: String,
    pub mtime: u64,
}

/// One full index of a root set plus the bookkeeping needed to validate
/// and incrementally update it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSnapshot {
    /// Active index and reverse indexes.
    pub table: EntryTable,
    /// Tracked file -> mtime (nanoseconds since epoch).
    pub files: HashMap<PathBuf, u64>,
    /// Tracked file -> interpretation.
    pub file_meta: HashMap<PathBuf, FileMeta>,
    /// Files whose last read or parse failed.
    pub file_errors: HashMap<PathBuf, FileError>,
    /// Sorted languages with at least one entry.
    pub languages: Vec<String>,
    /// Sorted namespaces observed across all keys.
    pub namespaces: Vec<String>,
    pub roots: Vec<ResourceRoot>,
    pub structural_signature: String,
    /// Set by external invalidation; a dirty snapshot is never mutated
    /// further until rebuilt.
    pub dirty: bool,
    /// When freshness was last verified. `None` until the first build.
    pub checked_at: Option<Instant>,
}

impl Default for ResourceSnapshot {
    fn default() -> Self {
        Self {
            table: EntryTable::default(),
            files: HashMap::new(),
            file_meta: HashMap::new(),
            file_errors: HashMap::new(),
            languages: Vec::new(),
            namespaces: Vec::new(),
            roots: Vec::new(),
            structural_signature: String::new(),
            dirty: true,
            checked_at: None,
        }
    }
}

impl ResourceSnapshot {
    /// The active entry for `(language, key)`, if any.
    pub fn lookup(&self, language: &str, key: &str) -> Option<&ActiveEntry> {
        self.table.lookup(language, key)
    }

    /// Recomputes `languages` and `namespaces` from the entry table.
    pub fn refresh_derived(&mut self) {
        self.languages = self.table.languages().into_iter().collect();
        self.namespaces = self.table.namespaces().into_iter().collect();
    }

    /// Whether any root of this snapshot contains `path`.
    pub fn covers(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| path.starts_with(&root.path))
    }
}

/// One cache slot. The store overwrites the inner snapshot in place on
/// rebuild so existing holders of the slot observe the refresh; consumers
/// wanting a stable view must not hold a read across `ensure_index` calls.
#[derive(Debug)]
pub struct SharedSnapshot {
    pub signature: String,
    data: RwLock<ResourceSnapshot>,
    build_lane: tokio::sync::Mutex<()>,
}

impl SharedSnapshot {
    pub fn new(signature: String) -> Self {
        Self {
            signature,
            data: RwLock::new(ResourceSnapshot::default()),
            build_lane: tokio::sync::Mutex::new(()),
        }
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, ResourceSnapshot>> {
        self.data
            .read()
            .map_err(|_| lock_poisoned_error("resource snapshot"))
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, ResourceSnapshot>> {
        self.data
            .write()
            .map_err(|_| lock_poisoned_error("resource snapshot"))
    }

    /// Serializes rebuilds for this slot so a build in progress is never
    /// started twice for the same signature.
    pub(crate) async fn build_lane(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.build_lane.lock().await
    }
}
