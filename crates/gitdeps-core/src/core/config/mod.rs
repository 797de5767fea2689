pub mod settings;

pub use settings::{
    Config, FilterConfig, ManifestConfig, NetworkConfig, OverwritePolicy, SyncSettings,
    DEFAULT_MANIFEST_LOCATION, DEFAULT_MAX_RETRIES,
};
