use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::digest::normalize_hash;
use crate::manifest::{fold_name, normalize_name};

/// Timestamp recorded for a file whose download has been planned but not
/// yet completed.
pub const INTERRUPTED_TIMESTAMP: i64 = 0;

/// Locally remembered digest and modification time for one path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkingFile {
    pub name: String,
    /// Last verified digest; `None` until the file has been fetched.
    pub hash: Option<String>,
    /// Digest promised by the latest reconciliation.
    pub expected_hash: String,
    /// Modification time (nanoseconds since the Unix epoch) that `hash` was
    /// computed against.
    pub timestamp: i64,
}

impl WorkingFile {
    /// Entry for a file that is about to be downloaded.
    pub fn pending(name: &str, expected_hash: &str) -> Self {
        Self {
            name: normalize_name(name),
            hash: None,
            expected_hash: normalize_hash(expected_hash),
            timestamp: INTERRUPTED_TIMESTAMP,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.timestamp == INTERRUPTED_TIMESTAMP
    }

    /// The local copy no longer matches what the last sync produced.
    pub fn is_tampered(&self) -> bool {
        self.hash.as_deref() != Some(self.expected_hash.as_str())
    }

    pub fn key(&self) -> String {
        fold_name(&self.name)
    }
}

/// Ordered collection of working files, keyed case-insensitively by name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkingState {
    files: BTreeMap<String, WorkingFile>,
}

impl WorkingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the entry for `file.name`.
    pub fn insert(&mut self, file: WorkingFile) {
        self.files.insert(file.key(), file);
    }

    pub fn get(&self, name: &str) -> Option<&WorkingFile> {
        self.files.get(&fold_name(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut WorkingFile> {
        self.files.get_mut(&fold_name(name))
    }

    pub fn remove(&mut self, name: &str) -> Option<WorkingFile> {
        self.files.remove(&fold_name(name))
    }

    pub fn files(&self) -> impl Iterator<Item = &WorkingFile> {
        self.files.values()
    }

    pub fn into_files(self) -> impl Iterator<Item = WorkingFile> {
        self.files.into_values()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn to_document(&self) -> WorkingStateDocument {
        WorkingStateDocument {
            files: self
                .files
                .values()
                .map(|file| WorkingFileEntry {
                    name: file.name.clone(),
                    hash: file.hash.clone(),
                    expected_hash: Some(file.expected_hash.clone()),
                    timestamp: file.timestamp,
                })
                .collect(),
        }
    }

    /// Entries without an `ExpectedHash` take their `Hash`; entries with
    /// neither are dropped.
    pub fn from_document(doc: WorkingStateDocument) -> Self {
        let mut state = Self::new();
        for entry in doc.files {
            let hash = entry.hash.as_deref().map(normalize_hash);
            let Some(expected) = entry
                .expected_hash
                .as_deref()
                .map(normalize_hash)
                .or_else(|| hash.clone())
            else {
                continue;
            };
            if entry.name.trim().is_empty() {
                continue;
            }
            state.insert(WorkingFile {
                name: normalize_name(&entry.name),
                hash,
                expected_hash: expected,
                timestamp: entry.timestamp,
            });
        }
        state
    }
}

impl FromIterator<WorkingFile> for WorkingState {
    fn from_iter<I: IntoIterator<Item = WorkingFile>>(iter: I) -> Self {
        let mut state = Self::new();
        for file in iter {
            state.insert(file);
        }
        state
    }
}

/// Persisted form of [`WorkingState`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkingStateDocument {
    #[serde(default)]
    pub files: Vec<WorkingFileEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkingFileEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_hash: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
}
