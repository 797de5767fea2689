#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod digest;
pub mod manifest;
pub mod state;

pub use digest::{hash_bytes, hash_file, normalize_hash};
pub use manifest::{
    discover_manifests, fold_name, load_dependency_set, normalize_name, Blob, DependencySet,
    ManifestDocument, Pack, TargetFile, MANIFEST_SUFFIX,
};
pub use state::{WorkingFile, WorkingState, WorkingStateDocument, INTERRUPTED_TIMESTAMP};
