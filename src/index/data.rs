//! Conflict-resolved entry storage with reverse indexes.
//!
//! `EntryTable` is the one structure that owns the active index and both
//! reverse indexes. All mutation goes through `insert_file` and
//! `remove_file`, which keep the invariant that the active entry for every
//! `(language, key)` equals the minimum-priority contributor, with
//! insertion order breaking ties. Removing one file's contributions is
//! O(entries-in-file) via the per-file contribution list.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::Serialize;

/// The entry currently visible for one `(language, key)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveEntry {
    pub value: Option<String>,
    pub file: PathBuf,
    pub priority: u32,
}

/// One file's contribution to a key, kept in the reverse multimap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySource {
    pub value: Option<String>,
    pub file: PathBuf,
    pub priority: u32,
    /// Parse order, used to break priority ties (earliest wins).
    seq: u64,
}

/// Locator for one entry a file contributed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileContribution {
    pub language: String,
    pub key: String,
    pub priority: u32,
}

/// Active index plus reverse indexes, mutated only as a unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryTable {
    /// language -> canonical key -> best entry.
    active: HashMap<String, HashMap<String, ActiveEntry>>,
    /// language -> canonical key -> every contributing file.
    by_key: HashMap<String, HashMap<String, Vec<KeySource>>>,
    /// file -> entries it contributed.
    by_file: HashMap<PathBuf, Vec<FileContribution>>,
    next_seq: u64,
}

impl EntryTable {
    /// Inserts the flattened entries of one parsed file for one namespace.
    ///
    /// A merged root file calls this once per top-level namespace; all
    /// calls for one parse share the contributing file path. Callers that
    /// re-parse an existing file must call [`EntryTable::remove_file`]
    /// first.
    pub fn insert_file(
        &mut self,
        file: &Path,
        language: &str,
        namespace: &str,
        flat: &std::collections::BTreeMap<String, String>,
        priority: u32,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;

        let contributions = self.by_file.entry(file.to_path_buf()).or_default();
        let lang_sources = self.by_key.entry(language.to_string()).or_default();

        for (suffix, value) in flat {
            let key = format!("{namespace}:{suffix}");
            lang_sources.entry(key.clone()).or_default().push(KeySource {
                value: Some(value.clone()),
                file: file.to_path_buf(),
                priority,
                seq,
            });
            contributions.push(FileContribution {
                language: language.to_string(),
                key: key.clone(),
                priority,
            });
            Self::recompute_active(&mut self.active, lang_sources, language, &key);
        }
    }

    /// Removes every entry contributed by `file`, promoting the next-best
    /// source for each affected key or dropping the key when none remain.
    pub fn remove_file(&mut self, file: &Path) {
        let Some(contributions) = self.by_file.remove(file) else {
            return;
        };

        for contribution in contributions {
            let Some(lang_sources) = self.by_key.get_mut(&contribution.language) else {
                continue;
            };
            let Some(sources) = lang_sources.get_mut(&contribution.key) else {
                continue;
            };
            sources.retain(|source| source.file != file);

            if sources.is_empty() {
                lang_sources.remove(&contribution.key);
                if let Some(lang_active) = self.active.get_mut(&contribution.language) {
                    lang_active.remove(&contribution.key);
                }
            } else {
                Self::recompute_active(
                    &mut self.active,
                    lang_sources,
                    &contribution.language,
                    &contribution.key,
                );
            }
        }

        // Prune now-empty language buckets so `languages` stays honest.
        self.by_key.retain(|_, keys| !keys.is_empty());
        self.active.retain(|_, keys| !keys.is_empty());
    }

    fn recompute_active(
        active: &mut HashMap<String, HashMap<String, ActiveEntry>>,
        lang_sources: &HashMap<String, Vec<KeySource>>,
        language: &str,
        key: &str,
    ) {
        let Some(sources) = lang_sources.get(key) else {
            return;
        };
        let Some(best) = sources.iter().min_by_key(|source| (source.priority, source.seq)) else {
            return;
        };
        active.entry(language.to_string()).or_default().insert(
            key.to_string(),
            ActiveEntry {
                value: best.value.clone(),
                file: best.file.clone(),
                priority: best.priority,
            },
        );
    }

    /// The active entry for `(language, key)`, if any.
    pub fn lookup(&self, language: &str, key: &str) -> Option<&ActiveEntry> {
        self.active.get(language)?.get(key)
    }

    /// All active entries for one language.
    pub fn language_index(&self, language: &str) -> Option<&HashMap<String, ActiveEntry>> {
        self.active.get(language)
    }

    /// Every source contributing to `(language, key)`.
    pub fn sources(&self, language: &str, key: &str) -> Option<&[KeySource]> {
        self.by_key.get(language)?.get(key).map(Vec::as_slice)
    }

    /// Entries contributed by one file.
    pub fn contributions(&self, file: &Path) -> Option<&[FileContribution]> {
        self.by_file.get(file).map(Vec::as_slice)
    }

    /// Languages with at least one active entry, sorted.
    pub fn languages(&self) -> BTreeSet<String> {
        self.active.keys().cloned().collect()
    }

    /// Namespaces observed across all active keys, sorted.
    pub fn namespaces(&self) -> BTreeSet<String> {
        let mut namespaces = BTreeSet::new();
        for keys in self.active.values() {
            for key in keys.keys() {
                if let Some((namespace, _)) = key.split_once(':') {
                    namespaces.insert(namespace.to_string());
                }
            }
        }
        namespaces
    }

    /// Total number of active entries.
    pub fn len(&self) -> usize {
        self.active.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
