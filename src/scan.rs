//! Resource tree enumeration and cheap filesystem helpers.
//!
//! Pure listing of language directories and leaf resource files under a
//! root, plus the structural signature and watch path set derived from
//! them. All listings are sorted by name so index construction and
//! signatures are deterministic regardless of directory iteration order.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::discovery::{ResourceRoot, RootKind};
use crate::error::{ResourceError, Result};

/// Upper bound on individually watched (and signature-tracked) resource
/// files per root. Directory-level watches cover the remainder.
pub const WATCH_FILE_CAP: usize = 200;

/// Returns true for paths with the resource file extension.
pub fn is_resource_file(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("json")
}

/// Sorted immediate subdirectories of `root`. Every subdirectory name is
/// treated as a language code; no validation against a language list.
pub fn language_dirs(root: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(entries) = std::fs::read_dir(root) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
    }
    dirs.sort();
    dirs
}

/// Sorted `.json` files directly under `dir`.
pub fn resource_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && is_resource_file(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

/// Sorted `.json` files directly under a merged root (the `<lang>.json`
/// merged files).
pub fn root_level_files(root: &Path) -> Vec<PathBuf> {
    resource_files(root)
}

/// The paths a watch session subscribes to.
#[derive(Debug, Clone, Default)]
pub struct WatchPaths {
    pub directories: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
}

fn root_watch_files(root: &ResourceRoot) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if root.kind == RootKind::MergedWithOverrides {
        files.extend(root_level_files(&root.path));
    }
    for lang_dir in language_dirs(&root.path) {
        files.extend(resource_files(&lang_dir));
    }
    files.truncate(WATCH_FILE_CAP);
    files
}

/// Computes the watch path set for a root set: each root directory, every
/// language directory, and up to [`WATCH_FILE_CAP`] resource files per
/// root. The hybrid of directory- and file-level subscriptions keeps the
/// set portable across platforms with different native notification
/// granularity.
pub fn watch_paths(roots: &[ResourceRoot]) -> WatchPaths {
    let mut paths = WatchPaths::default();
    for root in roots {
        paths.directories.push(root.path.clone());
        paths.directories.extend(language_dirs(&root.path));
        paths.files.extend(root_watch_files(root));
    }
    paths
}

/// Summarizes the watched path set as a single comparable string.
///
/// The signature changes when a language directory or a resource file is
/// added or removed, and stays constant when only file contents change.
pub fn structural_signature(roots: &[ResourceRoot]) -> String {
    let paths = watch_paths(roots);
    let mut lines: Vec<String> = paths
        .directories
        .iter()
        .chain(paths.files.iter())
        .map(|path| path.display().to_string())
        .collect();
    lines.sort();
    lines.join("\n")
}

/// Reads and parses one resource file.
pub fn read_json_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|error| ResourceError::Read {
        path: path.to_path_buf(),
        message: error.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|error| ResourceError::Parse {
        path: path.to_path_buf(),
        message: error.to_string(),
    })
}

/// Modification time of a file as nanoseconds since the UNIX epoch.
pub fn file_mtime(path: &Path) -> Result<u64> {
    let metadata = std::fs::metadata(path)?;
    let modified = metadata.modified()?;
    let duration = modified
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    Ok(duration
        .as_secs()
        .saturating_mul(1_000_000_000)
        .saturating_add(u64::from(duration.subsec_nanos())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn flat_root(base: &Path) -> ResourceRoot {
        ResourceRoot {
            kind: RootKind::FlatPerNamespace,
            path: base.to_path_buf(),
        }
    }

    #[test]
    fn language_dirs_sorted_and_files_only_json() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().canonicalize().unwrap();
        fs::create_dir(base.join("ja")).unwrap();
        fs::create_dir(base.join("en")).unwrap();
        fs::write(base.join("en/common.json"), "{}").unwrap();
        fs::write(base.join("en/notes.txt"), "ignored").unwrap();

        let dirs = language_dirs(&base);
        assert_eq!(dirs, vec![base.join("en"), base.join("ja")]);

        let files = resource_files(&base.join("en"));
        assert_eq!(files, vec![base.join("en/common.json")]);
    }

    #[test]
    fn signature_changes_on_new_file_or_dir() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().canonicalize().unwrap();
        fs::create_dir(base.join("en")).unwrap();
        fs::write(base.join("en/common.json"), r#"{"a":"1"}"#).unwrap();
        let roots = vec![flat_root(&base)];

        let before = structural_signature(&roots);

        fs::write(base.join("en/extra.json"), "{}").unwrap();
        let with_file = structural_signature(&roots);
        assert_ne!(before, with_file);

        fs::create_dir(base.join("de")).unwrap();
        let with_dir = structural_signature(&roots);
        assert_ne!(with_file, with_dir);
    }

    #[test]
    fn signature_constant_on_content_change() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().canonicalize().unwrap();
        fs::create_dir(base.join("en")).unwrap();
        fs::write(base.join("en/common.json"), r#"{"a":"1"}"#).unwrap();
        let roots = vec![flat_root(&base)];

        let before = structural_signature(&roots);
        fs::write(base.join("en/common.json"), r#"{"a":"2"}"#).unwrap();
        assert_eq!(before, structural_signature(&roots));
    }

    #[test]
    fn watch_paths_cover_root_dirs_and_files() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().canonicalize().unwrap();
        fs::create_dir(base.join("en")).unwrap();
        fs::write(base.join("en/common.json"), "{}").unwrap();
        let roots = vec![flat_root(&base)];

        let paths = watch_paths(&roots);
        assert!(paths.directories.contains(&base));
        assert!(paths.directories.contains(&base.join("en")));
        assert!(paths.files.contains(&base.join("en/common.json")));
    }

    #[test]
    fn read_json_file_reports_parse_errors() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        let error = read_json_file(&path).unwrap_err();
        assert!(matches!(error, ResourceError::Parse { .. }));
    }
}
