//! Wall-clock time spent in each stage of a sync run.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SyncStage {
    Manifests,
    Reconcile,
    Cleanup,
    Fetch,
    Permissions,
}

impl SyncStage {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Manifests => "manifests",
            Self::Reconcile => "reconcile",
            Self::Cleanup => "cleanup",
            Self::Fetch => "fetch",
            Self::Permissions => "permissions",
        }
    }
}

/// Stage clock for one run. Starting a stage closes the previous one.
#[derive(Debug, Default)]
pub(crate) struct StageTimings {
    finished: Vec<(SyncStage, Duration)>,
    current: Option<(SyncStage, Instant)>,
}

impl StageTimings {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn start(&mut self, stage: SyncStage) {
        self.stop();
        self.current = Some((stage, Instant::now()));
    }

    fn stop(&mut self) {
        if let Some((stage, started)) = self.current.take() {
            let elapsed = started.elapsed();
            debug!(stage = stage.as_str(), elapsed_ms = millis(elapsed), "stage finished");
            self.finished.push((stage, elapsed));
        }
    }

    /// Closes the open stage and returns milliseconds per stage. With
    /// `verbose` every stage is also logged at info level.
    pub(crate) fn summary(&mut self, verbose: bool) -> BTreeMap<String, u64> {
        self.stop();
        let mut total = BTreeMap::new();
        for (stage, elapsed) in &self.finished {
            *total.entry(stage.as_str().to_string()).or_insert(0) += millis(*elapsed);
        }
        if verbose {
            for (stage, ms) in &total {
                info!(stage = %stage, elapsed_ms = ms, "timing");
            }
        }
        total
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
