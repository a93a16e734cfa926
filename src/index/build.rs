//! Full index construction.

use std::path::Path;
use std::time::Instant;

use serde_json::Value;

use crate::discovery::{ResourceRoot, RootKind};
use crate::flatten::flatten_value;
use crate::index::snapshot::{FileError, FileMeta, ResourceSnapshot};
use crate::scan;

/// Parsed-file cadence at which the builder yields back to the scheduler,
/// so a very large scan does not monopolize the runtime thread.
pub const PARSE_YIELD_EVERY: usize = 50;

/// Builds a full snapshot for a root set.
///
/// Enumeration is deterministic: roots in the given (canonical) order,
/// then language directories and files in sorted name order, which makes
/// equal-priority conflict resolution stable across rebuilds. A file that
/// fails to read or parse contributes a `file_errors` record and nothing
/// else; the build always completes.
pub async fn build_index(roots: &[ResourceRoot]) -> ResourceSnapshot {
    let mut snapshot = ResourceSnapshot {
        roots: roots.to_vec(),
        ..Default::default()
    };
    let mut parsed = 0usize;

    for root in roots {
        match root.kind {
            RootKind::FlatPerNamespace => build_flat_root(root, &mut snapshot, &mut parsed).await,
            RootKind::MergedWithOverrides => {
                build_merged_root(root, &mut snapshot, &mut parsed).await
            }
        }
    }

    snapshot.refresh_derived();
    snapshot.structural_signature = scan::structural_signature(roots);
    snapshot.dirty = false;
    snapshot.checked_at = Some(Instant::now());
    snapshot
}

/// `<root>/<lang>/<ns>.json`, every file one namespace at flat priority.
async fn build_flat_root(root: &ResourceRoot, snapshot: &mut ResourceSnapshot, parsed: &mut usize) {
    for lang_dir in scan::language_dirs(&root.path) {
        let Some(language) = dir_name(&lang_dir) else {
            continue;
        };
        for file in scan::resource_files(&lang_dir) {
            let Some(namespace) = file_stem(&file) else {
                continue;
            };
            let meta = FileMeta {
                root: root.path.clone(),
                kind: root.kind,
                language: language.clone(),
                namespace: Some(namespace),
                is_merged_root: false,
            };
            ingest_file(snapshot, &file, meta);
            pace(parsed).await;
        }
    }
}

/// `<root>/<lang>.json` merged files plus `<root>/<lang>/<ns>.json`
/// per-namespace files.
async fn build_merged_root(
    root: &ResourceRoot,
    snapshot: &mut ResourceSnapshot,
    parsed: &mut usize,
) {
    for file in scan::root_level_files(&root.path) {
        let Some(language) = file_stem(&file) else {
            continue;
        };
        let meta = FileMeta {
            root: root.path.clone(),
            kind: root.kind,
            language,
            namespace: None,
            is_merged_root: true,
        };
        ingest_file(snapshot, &file, meta);
        pace(parsed).await;
    }

    for lang_dir in scan::language_dirs(&root.path) {
        let Some(language) = dir_name(&lang_dir) else {
            continue;
        };
        for file in scan::resource_files(&lang_dir) {
            let Some(namespace) = file_stem(&file) else {
                continue;
            };
            let meta = FileMeta {
                root: root.path.clone(),
                kind: root.kind,
                language: language.clone(),
                namespace: Some(namespace),
                is_merged_root: false,
            };
            ingest_file(snapshot, &file, meta);
            pace(parsed).await;
        }
    }
}

/// Parses one file and folds its entries into the snapshot.
///
/// Shared by the full builder and the incremental updater; the updater
/// removes the file's previous contributions before calling this. The
/// mtime is recorded whether or not the parse succeeds so the freshness
/// gate notices when a broken file changes.
pub(crate) fn ingest_file(snapshot: &mut ResourceSnapshot, file: &Path, meta: FileMeta) {
    let mtime = scan::file_mtime(file).unwrap_or(0);
    snapshot.files.insert(file.to_path_buf(), mtime);

    match scan::read_json_file(file) {
        Ok(value) => {
            snapshot.file_errors.remove(file);
            if meta.is_merged_root {
                match &value {
                    Value::Object(map) => {
                        for (namespace, child) in map {
                            snapshot.table.insert_file(
                                file,
                                &meta.language,
                                namespace,
                                &flatten_value(child),
                                meta.priority(),
                            );
                        }
                    }
                    _ => {
                        snapshot.file_errors.insert(
                            file.to_path_buf(),
                            FileError {
                                message: "expected top-level JSON object".to_string(),
                                mtime,
                            },
                        );
                    }
                }
            } else {
                let namespace = meta.namespace.clone().unwrap_or_default();
                snapshot.table.insert_file(
                    file,
                    &meta.language,
                    &namespace,
                    &flatten_value(&value),
                    meta.priority(),
                );
            }
        }
        Err(error) => {
            log::debug!("resource file skipped: {error}");
            snapshot.file_errors.insert(
                file.to_path_buf(),
                FileError {
                    message: error.to_string(),
                    mtime,
                },
            );
        }
    }

    snapshot.file_meta.insert(file.to_path_buf(), meta);
}

async fn pace(parsed: &mut usize) {
    *parsed += 1;
    if *parsed % PARSE_YIELD_EVERY == 0 {
        tokio::task::yield_now().await;
    }
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}
