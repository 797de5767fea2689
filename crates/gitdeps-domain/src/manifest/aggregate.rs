use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};
use url::Url;

use super::{
    fold_name, normalize_name, Blob, ManifestDocument, Pack, TargetFile, MANIFEST_SUFFIX,
};
use crate::digest::normalize_hash;

/// Canonical target state merged from every manifest document of a run.
///
/// Files are keyed by folded name, blobs and packs by normalized hash; a later
/// document replaces entries sharing a key with an earlier one.
#[derive(Clone, Debug, Default)]
pub struct DependencySet {
    files: BTreeMap<String, TargetFile>,
    blobs: BTreeMap<String, Blob>,
    packs: BTreeMap<String, Pack>,
    ignore_proxy: bool,
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates `doc` and folds it into the set. Nothing is merged when the
    /// document is rejected.
    pub fn merge_document(&mut self, doc: ManifestDocument, origin: &Path) -> Result<()> {
        validate_document(&doc, origin)?;
        let base_url = doc.base_url.trim().to_string();
        self.ignore_proxy |= doc.ignore_proxy;

        for file in doc.files {
            let name = normalize_name(&file.name);
            let target = TargetFile {
                hash: normalize_hash(&file.hash),
                is_executable: file.is_executable,
                name,
            };
            if let Some(previous) = self.files.insert(fold_name(&target.name), target) {
                warn!(
                    file = %previous.name,
                    manifest = %origin.display(),
                    "file declared by more than one manifest; keeping the later entry"
                );
            }
        }
        for blob in doc.blobs {
            let blob = Blob {
                hash: normalize_hash(&blob.hash),
                size: blob.size,
                pack_hash: normalize_hash(&blob.pack_hash),
                pack_offset: blob.pack_offset,
            };
            self.blobs.insert(blob.hash.clone(), blob);
        }
        for pack in doc.packs {
            let pack = Pack {
                hash: normalize_hash(&pack.hash),
                size: pack.size,
                compressed_size: pack.compressed_size,
                remote_path: pack.remote_path.trim().to_string(),
                base_url: base_url.clone(),
                remote_name: pack.hash.trim().to_string(),
            };
            self.packs.insert(pack.hash.clone(), pack);
        }
        Ok(())
    }

    pub fn files(&self) -> impl Iterator<Item = &TargetFile> {
        self.files.values()
    }

    pub fn file(&self, name: &str) -> Option<&TargetFile> {
        self.files.get(&fold_name(name))
    }

    pub fn blob(&self, hash: &str) -> Option<&Blob> {
        self.blobs.get(&normalize_hash(hash))
    }

    pub fn pack(&self, hash: &str) -> Option<&Pack> {
        self.packs.get(&normalize_hash(hash))
    }

    pub fn blobs(&self) -> impl Iterator<Item = &Blob> {
        self.blobs.values()
    }

    pub fn packs(&self) -> impl Iterator<Item = &Pack> {
        self.packs.values()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// True when any merged manifest asked for a direct connection.
    pub fn ignore_proxy(&self) -> bool {
        self.ignore_proxy
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Lists manifest documents under each module location, in declared order
/// and sorted by file name within a location. Missing locations are skipped.
pub fn discover_manifests(root: &Path, locations: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for location in locations {
        let dir = root.join(location);
        if !dir.is_dir() {
            debug!(location = %dir.display(), "manifest location missing; skipping");
            continue;
        }
        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("failed to scan {}", dir.display()))?
        {
            let path = entry?.path();
            let is_manifest = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(MANIFEST_SUFFIX));
            if is_manifest && path.is_file() {
                entries.push(path);
            }
        }
        entries.sort();
        found.extend(entries);
    }
    Ok(found)
}

/// Reads and merges every document; any unreadable or malformed document
/// fails the whole load.
pub fn load_dependency_set(paths: &[PathBuf]) -> Result<DependencySet> {
    let mut set = DependencySet::new();
    for path in paths {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        let doc: ManifestDocument = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse manifest {}", path.display()))?;
        set.merge_document(doc, path)?;
    }
    debug!(
        manifests = paths.len(),
        files = set.files.len(),
        blobs = set.blobs.len(),
        packs = set.packs.len(),
        "aggregated dependency manifests"
    );
    Ok(set)
}

fn validate_document(doc: &ManifestDocument, origin: &Path) -> Result<()> {
    if !doc.packs.is_empty() || !doc.files.is_empty() {
        Url::parse(doc.base_url.trim()).with_context(|| {
            format!(
                "invalid BaseUrl '{}' in manifest {}",
                doc.base_url,
                origin.display()
            )
        })?;
    }
    for file in &doc.files {
        validate_name(&file.name, origin)?;
        validate_hash(&file.hash, "file", &file.name, origin)?;
    }
    for blob in &doc.blobs {
        validate_hash(&blob.hash, "blob", &blob.hash, origin)?;
        validate_hash(&blob.pack_hash, "blob pack", &blob.hash, origin)?;
    }
    for pack in &doc.packs {
        validate_hash(&pack.hash, "pack", &pack.hash, origin)?;
        if pack.remote_path.trim().is_empty() {
            bail!(
                "pack {} has an empty RemotePath in manifest {}",
                pack.hash,
                origin.display()
            );
        }
    }
    Ok(())
}

fn validate_name(name: &str, origin: &Path) -> Result<()> {
    let normalized = normalize_name(name);
    let path = Path::new(&normalized);
    let escapes = normalized.is_empty()
        || path.is_absolute()
        || normalized.starts_with('/')
        || path
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
    if escapes {
        bail!(
            "file name '{name}' in manifest {} is not a relative path inside the root",
            origin.display()
        );
    }
    Ok(())
}

fn validate_hash(hash: &str, kind: &str, owner: &str, origin: &Path) -> Result<()> {
    let hash = hash.trim();
    if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!(
            "{kind} hash '{hash}' for '{owner}' in manifest {} is not a hex digest",
            origin.display()
        );
    }
    Ok(())
}
