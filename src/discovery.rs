//! Resource root discovery.
//!
//! Walks upward from a starting directory looking for the conventional
//! directory names of the two supported layouts. A project may carry both
//! at once (one legacy tree and one current tree); each is reported as its
//! own root. Discovery is pure filesystem inspection and an empty result is
//! a valid, cacheable state rather than an error.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Directory layout of a resource root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum RootKind {
    /// `<root>/<language>/<namespace>.json`, one file per namespace.
    FlatPerNamespace,
    /// `<root>/<language>.json` merged files plus optional
    /// `<root>/<language>/<namespace>.json` per-namespace files.
    MergedWithOverrides,
}

impl RootKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RootKind::FlatPerNamespace => "flat",
            RootKind::MergedWithOverrides => "merged",
        }
    }
}

/// One discovered resource tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceRoot {
    pub kind: RootKind,
    pub path: PathBuf,
}

/// Walks up from `start_dir` looking for a subdirectory named `target`.
fn find_up(start_dir: &Path, target: &str) -> Option<PathBuf> {
    let mut current = start_dir.to_path_buf();
    loop {
        let candidate = current.join(target);
        if candidate.is_dir() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Canonicalizes a path, returning the original if canonicalization fails.
fn canonicalize_existing_path(path: PathBuf) -> PathBuf {
    fs::canonicalize(&path).unwrap_or(path)
}

/// Resolves the resource roots visible from `start_dir`.
///
/// For the flat layout `public/locales/` is checked before `locales/` and
/// the first hit wins; the merged layout (`messages/`) is checked
/// independently, so both kinds can be present simultaneously. Returned
/// roots are canonicalized and in canonical order (kind, then path).
pub fn resolve_roots(start_dir: &Path) -> Vec<ResourceRoot> {
    let mut roots = Vec::new();

    // public/locales/ is more specific than locales/, so it wins.
    let flat = find_up(start_dir, "public/locales").or_else(|| find_up(start_dir, "locales"));
    if let Some(path) = flat {
        roots.push(ResourceRoot {
            kind: RootKind::FlatPerNamespace,
            path: canonicalize_existing_path(path),
        });
    }

    if let Some(path) = find_up(start_dir, "messages") {
        roots.push(ResourceRoot {
            kind: RootKind::MergedWithOverrides,
            path: canonicalize_existing_path(path),
        });
    }

    roots.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.path.cmp(&b.path)));
    roots
}

/// Canonical string for a root set, used as the cache and watch-session key.
pub fn root_set_signature(roots: &[ResourceRoot]) -> String {
    let mut pairs: Vec<String> = roots
        .iter()
        .map(|root| format!("{}:{}", root.kind.as_str(), root.path.display()))
        .collect();
    pairs.sort();
    pairs.join(";")
}

/// Finds the root that contains `path`, if any.
pub fn root_containing<'a>(roots: &'a [ResourceRoot], path: &Path) -> Option<&'a ResourceRoot> {
    roots.iter().find(|root| path.starts_with(&root.path))
}
