//! Incremental snapshot updates for watcher and writer change batches.
//!
//! Changes are applied in two phases: every path is classified first, and
//! only when the whole batch is incrementally applicable does any mutation
//! happen. A single structural path (directory, non-resource file, path
//! outside the known roots, unexpected depth) fails the batch over to a
//! full rebuild instead of leaving the snapshot partially updated.

use std::fs;
use std::path::{Path, PathBuf};

use crate::discovery::{root_containing, ResourceRoot, RootKind};
use crate::index::build::ingest_file;
use crate::index::snapshot::{FileMeta, ResourceSnapshot};
use crate::scan;

/// Result of one change batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Whether the batch was applied to the snapshot.
    pub applied: bool,
    /// Whether the caller must schedule a full rebuild instead.
    pub needs_rebuild: bool,
}

enum PlannedChange {
    Upsert { path: PathBuf, meta: FileMeta },
    Remove { path: PathBuf },
}

/// Applies a batch of changed or deleted paths to the snapshot.
///
/// An empty batch is a no-op. When any path cannot be handled
/// incrementally the snapshot is left untouched and `needs_rebuild` is
/// returned; otherwise every path is applied as a single-file update and
/// the derived lists and structural signature are refreshed in place.
pub fn apply_changes(snapshot: &mut ResourceSnapshot, changed: &[PathBuf]) -> ApplyOutcome {
    if changed.is_empty() {
        return ApplyOutcome {
            applied: true,
            needs_rebuild: false,
        };
    }

    let mut plan = Vec::with_capacity(changed.len());
    for path in changed {
        match classify(&snapshot.roots, path) {
            Some(change) => plan.push(change),
            None => {
                log::debug!(
                    "change to {} is structural, falling back to rebuild",
                    path.display()
                );
                return ApplyOutcome {
                    applied: false,
                    needs_rebuild: true,
                };
            }
        }
    }

    for change in plan {
        match change {
            PlannedChange::Upsert { path, meta } => {
                snapshot.table.remove_file(&path);
                ingest_file(snapshot, &path, meta);
            }
            PlannedChange::Remove { path } => {
                snapshot.table.remove_file(&path);
                snapshot.files.remove(&path);
                snapshot.file_meta.remove(&path);
                snapshot.file_errors.remove(&path);
            }
        }
    }

    snapshot.refresh_derived();
    snapshot.structural_signature = scan::structural_signature(&snapshot.roots);
    ApplyOutcome {
        applied: true,
        needs_rebuild: false,
    }
}

/// Decides how one path can be handled; `None` means full rebuild.
fn classify(roots: &[ResourceRoot], path: &Path) -> Option<PlannedChange> {
    let normalized = normalize(path)?;
    if normalized.is_dir() {
        return None;
    }
    let root = root_containing(roots, &normalized)?;
    if !scan::is_resource_file(&normalized) {
        return None;
    }
    let meta = interpret(root, &normalized)?;

    if normalized.is_file() {
        Some(PlannedChange::Upsert {
            path: normalized,
            meta,
        })
    } else {
        Some(PlannedChange::Remove { path: normalized })
    }
}

/// Resolves symlinks and case. A deleted file cannot be canonicalized
/// itself, so its parent is resolved and the file name re-appended.
fn normalize(path: &Path) -> Option<PathBuf> {
    if let Ok(resolved) = fs::canonicalize(path) {
        return Some(resolved);
    }
    let name = path.file_name()?;
    let parent = path.parent()?;
    fs::canonicalize(parent).ok().map(|dir| dir.join(name))
}

/// Derives the file's interpretation from its position under the root.
/// Unexpected nesting depth means the layout changed under us.
fn interpret(root: &ResourceRoot, path: &Path) -> Option<FileMeta> {
    let relative = path.strip_prefix(&root.path).ok()?;
    let components: Vec<&str> = relative
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;

    match (root.kind, components.as_slice()) {
        (RootKind::FlatPerNamespace, [language, _file]) => Some(FileMeta {
            root: root.path.clone(),
            kind: root.kind,
            language: (*language).to_string(),
            namespace: Some(stem(path)?),
            is_merged_root: false,
        }),
        (RootKind::MergedWithOverrides, [_file]) => Some(FileMeta {
            root: root.path.clone(),
            kind: root.kind,
            language: stem(path)?,
            namespace: None,
            is_merged_root: true,
        }),
        (RootKind::MergedWithOverrides, [language, _file]) => Some(FileMeta {
            root: root.path.clone(),
            kind: root.kind,
            language: (*language).to_string(),
            namespace: Some(stem(path)?),
            is_merged_root: false,
        }),
        _ => None,
    }
}

fn stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::build::build_index;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        base: PathBuf,
        roots: Vec<ResourceRoot>,
    }

    fn flat_fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let base = temp.path().canonicalize().unwrap();
        fs::create_dir(base.join("en")).unwrap();
        fs::write(base.join("en/common.json"), r#"{"a":"1","b":"2"}"#).unwrap();
        let roots = vec![ResourceRoot {
            kind: RootKind::FlatPerNamespace,
            path: base.clone(),
        }];
        Fixture {
            _temp: temp,
            base,
            roots,
        }
    }

    #[tokio::test]
    async fn empty_batch_is_a_deep_equal_noop() {
        let fixture = flat_fixture();
        let mut snapshot = build_index(&fixture.roots).await;
        let before = snapshot.clone();

        let outcome = apply_changes(&mut snapshot, &[]);
        assert!(outcome.applied);
        assert!(!outcome.needs_rebuild);
        assert_eq!(snapshot, before);
    }

    #[tokio::test]
    async fn content_change_applies_incrementally() {
        let fixture = flat_fixture();
        let mut snapshot = build_index(&fixture.roots).await;
        let signature_before = snapshot.structural_signature.clone();

        let file = fixture.base.join("en/common.json");
        fs::write(&file, r#"{"a":"changed","b":"2"}"#).unwrap();

        let outcome = apply_changes(&mut snapshot, &[file]);
        assert!(outcome.applied);
        assert!(!outcome.needs_rebuild);
        assert_eq!(
            snapshot.lookup("en", "common:a").unwrap().value.as_deref(),
            Some("changed")
        );
        assert_eq!(snapshot.structural_signature, signature_before);
    }

    #[tokio::test]
    async fn new_file_in_known_language_dir_applies_incrementally() {
        let fixture = flat_fixture();
        let mut snapshot = build_index(&fixture.roots).await;

        let file = fixture.base.join("en/auth.json");
        fs::write(&file, r#"{"login":"Sign in"}"#).unwrap();

        let outcome = apply_changes(&mut snapshot, &[file]);
        assert!(outcome.applied);
        assert_eq!(
            snapshot.lookup("en", "auth:login").unwrap().value.as_deref(),
            Some("Sign in")
        );
        assert_eq!(
            snapshot.namespaces,
            vec!["auth".to_string(), "common".to_string()]
        );
    }

    #[tokio::test]
    async fn deleting_sole_file_removes_keys_and_language() {
        let fixture = flat_fixture();
        let mut snapshot = build_index(&fixture.roots).await;

        let file = fixture.base.join("en/common.json");
        fs::remove_file(&file).unwrap();

        let outcome = apply_changes(&mut snapshot, &[file.clone()]);
        assert!(outcome.applied);
        assert!(snapshot.lookup("en", "common:a").is_none());
        assert!(snapshot.languages.is_empty());
        assert!(!snapshot.files.contains_key(&file));
    }

    #[tokio::test]
    async fn deleting_merged_file_promotes_per_namespace_entries() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().canonicalize().unwrap();
        fs::write(base.join("en.json"), r#"{"common":{"x":"merged"}}"#).unwrap();
        fs::create_dir(base.join("en")).unwrap();
        fs::write(base.join("en/common.json"), r#"{"x":"namespace"}"#).unwrap();
        let roots = vec![ResourceRoot {
            kind: RootKind::MergedWithOverrides,
            path: base.clone(),
        }];
        let mut snapshot = build_index(&roots).await;
        assert_eq!(
            snapshot.lookup("en", "common:x").unwrap().value.as_deref(),
            Some("merged")
        );

        fs::remove_file(base.join("en.json")).unwrap();
        let outcome = apply_changes(&mut snapshot, &[base.join("en.json")]);
        assert!(outcome.applied);
        assert_eq!(
            snapshot.lookup("en", "common:x").unwrap().value.as_deref(),
            Some("namespace")
        );
    }

    #[tokio::test]
    async fn delete_and_recreate_round_trips_to_identical_index() {
        let fixture = flat_fixture();
        let mut snapshot = build_index(&fixture.roots).await;
        let table_before = snapshot.table.clone();

        let file = fixture.base.join("en/common.json");
        let content = fs::read_to_string(&file).unwrap();
        fs::remove_file(&file).unwrap();
        apply_changes(&mut snapshot, std::slice::from_ref(&file));
        fs::write(&file, content).unwrap();
        apply_changes(&mut snapshot, std::slice::from_ref(&file));

        assert_eq!(snapshot.lookup("en", "common:a"), table_before.lookup("en", "common:a"));
        assert_eq!(snapshot.lookup("en", "common:b"), table_before.lookup("en", "common:b"));
        assert_eq!(snapshot.languages, vec!["en".to_string()]);
    }

    #[tokio::test]
    async fn directory_change_signals_rebuild_without_mutation() {
        let fixture = flat_fixture();
        let mut snapshot = build_index(&fixture.roots).await;
        let before = snapshot.clone();

        fs::create_dir(fixture.base.join("de")).unwrap();
        let outcome = apply_changes(&mut snapshot, &[fixture.base.join("de")]);
        assert!(!outcome.applied);
        assert!(outcome.needs_rebuild);
        assert_eq!(snapshot, before);
    }

    #[tokio::test]
    async fn non_resource_file_signals_rebuild() {
        let fixture = flat_fixture();
        let mut snapshot = build_index(&fixture.roots).await;

        let file = fixture.base.join("en/readme.txt");
        fs::write(&file, "hi").unwrap();
        let outcome = apply_changes(&mut snapshot, &[file]);
        assert!(outcome.needs_rebuild);
    }

    #[tokio::test]
    async fn path_outside_roots_signals_rebuild() {
        let fixture = flat_fixture();
        let mut snapshot = build_index(&fixture.roots).await;

        let elsewhere = TempDir::new().unwrap();
        let outside = elsewhere.path().canonicalize().unwrap().join("other.json");
        fs::write(&outside, "{}").unwrap();
        let outcome = apply_changes(&mut snapshot, &[outside]);
        assert!(outcome.needs_rebuild);
    }

    #[tokio::test]
    async fn one_structural_path_fails_whole_batch_unapplied() {
        let fixture = flat_fixture();
        let mut snapshot = build_index(&fixture.roots).await;
        let before = snapshot.clone();

        let good = fixture.base.join("en/common.json");
        fs::write(&good, r#"{"a":"new"}"#).unwrap();
        let bad = fixture.base.join("en/notes.txt");
        fs::write(&bad, "x").unwrap();

        let outcome = apply_changes(&mut snapshot, &[good, bad]);
        assert!(outcome.needs_rebuild);
        assert_eq!(snapshot, before);
    }

    #[tokio::test]
    async fn reparse_failure_keeps_other_files_and_records_error() {
        let fixture = flat_fixture();
        let file = fixture.base.join("en/auth.json");
        fs::write(&file, r#"{"login":"Sign in"}"#).unwrap();
        let mut snapshot = build_index(&fixture.roots).await;

        fs::write(&file, "{ broken").unwrap();
        let outcome = apply_changes(&mut snapshot, &[file.clone()]);
        assert!(outcome.applied);
        assert!(snapshot.lookup("en", "auth:login").is_none());
        assert!(snapshot.file_errors.contains_key(&file));
        // The unrelated file's entries survive.
        assert_eq!(
            snapshot.lookup("en", "common:a").unwrap().value.as_deref(),
            Some("1")
        );

        // Fixing the file clears the error again.
        fs::write(&file, r#"{"login":"Sign in"}"#).unwrap();
        let outcome = apply_changes(&mut snapshot, &[file.clone()]);
        assert!(outcome.applied);
        assert!(!snapshot.file_errors.contains_key(&file));
        assert_eq!(
            snapshot.lookup("en", "auth:login").unwrap().value.as_deref(),
            Some("Sign in")
        );
    }
}
