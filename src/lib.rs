//! Localization resource index with cache invalidation.
//!
//! Discovers localization resource roots near a starting directory, builds
//! a conflict-resolved key index over them, and keeps that index fresh:
//!
//! - `discovery` - root discovery and root-set signatures
//! - `scan` - tree enumeration, structural signatures, file IO
//! - `flatten` - nested JSON to dotted leaf keys
//! - `index` - full builds, the entry table, incremental updates
//! - `cache` - the snapshot store and freshness gate
//! - `watcher` - debounced, reference-counted watch sessions
//!
//! `ResourceCache` is the main entry point. `ensure_index` returns a fresh
//! snapshot for the roots visible from a directory, rebuilding only when
//! validation fails; `start_watch` keeps snapshots current in the
//! background and forwards change batches to an optional callback.

pub mod cache;
pub mod discovery;
pub mod error;
pub mod flatten;
pub mod index;
pub mod scan;
pub mod watcher;

pub use cache::{ResourceCache, REVALIDATE_INTERVAL_MS};
pub use discovery::{resolve_roots, root_set_signature, ResourceRoot, RootKind};
pub use error::{ResourceError, Result};
pub use index::{
    apply_changes, build_index, ActiveEntry, ApplyOutcome, EntryTable, FileError, FileMeta,
    ResourceSnapshot, SharedSnapshot,
};
pub use watcher::{ChangeBatch, ChangeCallback, WatchManager, WatchOptions};
