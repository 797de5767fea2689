use crate::core::tooling::diagnostics::codes;

/// Terminal failures of a sync run.
///
/// Workers never return these directly; they record the last error in the
/// shared run state and the orchestrator decides which variant ends the run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("[GD100] configuration error: {0:#}")]
    Configuration(anyhow::Error),
    #[error("[GD200] {what} digest mismatch (expected {expected}, got {actual})")]
    Integrity {
        what: String,
        expected: String,
        actual: String,
    },
    #[error("[GD300] download failed after all workers exhausted their retries: {last_error}")]
    Download { last_error: String },
    #[error("[GD400] extraction failed: {0}")]
    Decompression(String),
    #[error("[GD500] failed to persist working state: {0:#}")]
    StatePersistence(anyhow::Error),
    #[error("[GD600] sync cancelled")]
    Cancelled,
}

impl SyncError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => codes::CONFIGURATION,
            Self::Integrity { .. } => codes::INTEGRITY,
            Self::Download { .. } => codes::DOWNLOAD,
            Self::Decompression(_) => codes::DECOMPRESSION,
            Self::StatePersistence(_) => codes::STATE,
            Self::Cancelled => codes::CANCELLED,
        }
    }

    /// Failures caused by the caller's inputs rather than the environment.
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
