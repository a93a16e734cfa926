//! Resource index construction and maintenance.
//!
//! - `data` - conflict-resolved entry storage with reverse indexes
//! - `snapshot` - snapshot types owned by the cache store
//! - `build` - full index construction with cooperative pacing
//! - `update` - incremental updates for change batches

mod build;
mod data;
mod snapshot;
mod update;

pub use build::{build_index, PARSE_YIELD_EVERY};
pub use data::{ActiveEntry, EntryTable, FileContribution, KeySource};
pub use snapshot::{
    FileError, FileMeta, ResourceSnapshot, SharedSnapshot, PRIORITY_FLAT, PRIORITY_MERGED_ROOT,
    PRIORITY_OVERRIDE,
};
pub use update::{apply_changes, ApplyOutcome};
