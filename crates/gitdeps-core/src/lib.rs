#![deny(clippy::all)]

mod core;

pub use crate::core::config::{
    Config, FilterConfig, ManifestConfig, NetworkConfig, OverwritePolicy, SyncSettings,
    DEFAULT_MANIFEST_LOCATION, DEFAULT_MAX_RETRIES,
};
pub use crate::core::error::{SyncError, SyncResult};
pub use crate::core::store::{load_working_state, working_state_path};
pub use crate::core::sync::{
    plan_fetch, sync_dependencies, CancelToken, FetchPlan, HttpFetcher, OverwritePrompt,
    PackFetcher, StdinPrompt, SyncContext, SyncReport,
};
pub use crate::core::tooling::diagnostics::codes as error_codes;
pub use crate::core::tooling::outcome::{CommandStatus, ExecutionOutcome};

pub const GITDEPS_VERSION: &str = env!("CARGO_PKG_VERSION");
