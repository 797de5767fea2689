use std::collections::{BTreeMap, HashMap};

use anyhow::{bail, Result};
use gitdeps_domain::{Blob, DependencySet, Pack, TargetFile};

/// Minimal set of packs covering a download list, plus the indexes the
/// extractor needs to fan each pack back out to files.
#[derive(Debug, Default)]
pub struct FetchPlan {
    packs: Vec<Pack>,
    files_by_hash: HashMap<String, Vec<TargetFile>>,
    blobs_by_pack: HashMap<String, Vec<Blob>>,
    file_count: usize,
}

impl FetchPlan {
    /// Unique packs to download, ordered by hash.
    pub fn packs(&self) -> &[Pack] {
        &self.packs
    }

    pub fn blobs_for_pack(&self, pack_hash: &str) -> &[Blob] {
        self.blobs_by_pack
            .get(pack_hash)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn files_for_blob(&self, blob_hash: &str) -> &[TargetFile] {
        self.files_by_hash
            .get(blob_hash)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of files the extractor must write for the stage to complete.
    pub fn file_count(&self) -> usize {
        self.file_count
    }

    pub fn compressed_bytes(&self) -> u64 {
        self.packs.iter().map(|pack| pack.compressed_size).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.packs.is_empty()
    }
}

/// Resolves `downloads` to the packs that contain their content.
///
/// Fails when a file's blob or a blob's pack is not declared, or a blob
/// does not fit inside its pack.
pub fn plan_fetch(downloads: &[TargetFile], deps: &DependencySet) -> Result<FetchPlan> {
    let mut files_by_hash: HashMap<String, Vec<TargetFile>> = HashMap::new();
    for file in downloads {
        files_by_hash
            .entry(file.hash.clone())
            .or_default()
            .push(file.clone());
    }

    let mut blobs_by_pack: BTreeMap<String, Vec<Blob>> = BTreeMap::new();
    for (hash, files) in &files_by_hash {
        let Some(blob) = deps.blob(hash) else {
            bail!(
                "no blob declared for {} (hash {hash})",
                files.first().map_or("<unknown>", |file| file.name.as_str())
            );
        };
        blobs_by_pack
            .entry(blob.pack_hash.clone())
            .or_default()
            .push(blob.clone());
    }

    let mut packs = Vec::with_capacity(blobs_by_pack.len());
    for (pack_hash, blobs) in &mut blobs_by_pack {
        let Some(pack) = deps.pack(pack_hash) else {
            bail!("no pack declared for blob {} (pack {pack_hash})", blobs[0].hash);
        };
        blobs.sort_by_key(|blob| blob.pack_offset);
        for blob in blobs.iter() {
            if blob.pack_offset.saturating_add(blob.size) > pack.size {
                bail!(
                    "blob {} (offset {}, size {}) lies outside pack {} of size {}",
                    blob.hash,
                    blob.pack_offset,
                    blob.size,
                    pack.hash,
                    pack.size
                );
            }
        }
        packs.push(pack.clone());
    }

    Ok(FetchPlan {
        packs,
        file_count: downloads.len(),
        files_by_hash,
        blobs_by_pack: blobs_by_pack.into_iter().collect(),
    })
}
