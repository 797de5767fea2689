//! Dependency manifest documents and the target-state model they describe.

use serde::{Deserialize, Serialize};

mod aggregate;

pub use aggregate::{discover_manifests, load_dependency_set, DependencySet};

/// File-name suffix identifying a manifest document inside a module location.
pub const MANIFEST_SUFFIX: &str = ".gitdeps.json";

/// Desired final state of one file in the working tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetFile {
    pub name: String,
    pub hash: String,
    pub is_executable: bool,
}

/// Content-addressed byte range inside exactly one pack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Blob {
    pub hash: String,
    pub size: u64,
    pub pack_hash: String,
    pub pack_offset: u64,
}

/// Downloadable compressed container of concatenated blob bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pack {
    pub hash: String,
    pub size: u64,
    pub compressed_size: u64,
    pub remote_path: String,
    /// Base address of the manifest that declared this pack.
    pub base_url: String,
    /// Hash as spelled in the manifest; the server path uses it verbatim.
    pub remote_name: String,
}

impl Pack {
    /// Address the compressed pack body is served from.
    pub fn remote_url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.remote_path.trim_matches('/'),
            self.remote_name
        )
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManifestDocument {
    pub base_url: String,
    #[serde(default)]
    pub ignore_proxy: bool,
    #[serde(default)]
    pub files: Vec<ManifestFile>,
    #[serde(default)]
    pub blobs: Vec<ManifestBlob>,
    #[serde(default)]
    pub packs: Vec<ManifestPack>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManifestFile {
    pub name: String,
    pub hash: String,
    #[serde(default)]
    pub is_executable: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManifestBlob {
    pub hash: String,
    pub size: u64,
    pub pack_hash: String,
    pub pack_offset: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManifestPack {
    pub hash: String,
    pub size: u64,
    pub compressed_size: u64,
    pub remote_path: String,
}

/// Relative path with forward slashes, as stored in manifests and state.
pub fn normalize_name(raw: &str) -> String {
    raw.trim().replace('\\', "/")
}

/// Case-insensitive lookup key for a relative path.
pub fn fold_name(raw: &str) -> String {
    normalize_name(raw).to_lowercase()
}
