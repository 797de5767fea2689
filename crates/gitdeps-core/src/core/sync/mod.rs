//! The sync pipeline: reconcile the working tree against the manifests,
//! fetch the packs it is missing, extract them, and repair permissions.

mod download;
mod extract;
pub mod fetch;
mod monitor;
mod permissions;
mod reconcile;
pub mod schedule;
mod shared;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use gitdeps_domain::{discover_manifests, fold_name, load_dependency_set, TargetFile};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::config::Config;
use crate::core::error::{SyncError, SyncResult};
use crate::core::filter::FileFilter;
use crate::core::fs::{clear_dir, modified_ticks, safe_delete, target_path};
use crate::core::net::http_client;
use crate::core::store::{load_working_state, recover_interrupted, save_working_state};
use crate::core::tooling::progress::ProgressLine;
use crate::core::tooling::timings::{StageTimings, SyncStage};

use download::{run_download_worker, DownloadContext};
use extract::{run_extractor, ExtractContext};
use monitor::MonitorVerdict;
use permissions::{fix_permissions, platform_executable_bits};
use reconcile::{reconcile, refresh_working_state};
use shared::{join_bounded, RunState, WorkQueue};

pub use fetch::{HttpFetcher, PackFetcher};
pub use reconcile::{OverwritePrompt, StdinPrompt};
pub use schedule::{plan_fetch, FetchPlan};
pub use shared::CancelToken;

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);
const PACK_TEMP_DIR: &str = "tmp";

/// Caller-supplied collaborators for one sync run.
#[derive(Clone)]
pub struct SyncContext {
    prompt: Arc<dyn OverwritePrompt>,
    fetcher: Option<Arc<dyn PackFetcher>>,
    cancel: CancelToken,
}

impl Default for SyncContext {
    fn default() -> Self {
        Self {
            prompt: Arc::new(StdinPrompt),
            fetcher: None,
            cancel: CancelToken::new(),
        }
    }
}

impl SyncContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_prompt(mut self, prompt: Arc<dyn OverwritePrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Replaces the HTTP fetcher, e.g. with a mirror or an in-memory store.
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn PackFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

/// What a sync run did, or in dry-run mode what it would do.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub dry_run: bool,
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    pub modified_kept: Vec<String>,
    pub modified_overwritten: Vec<String>,
    pub files_downloaded: usize,
    pub packs_downloaded: usize,
    pub bytes_downloaded: u64,
    pub permissions_fixed: usize,
    pub recovered_incoming: usize,
    /// Milliseconds spent per stage, keyed by stage name.
    pub stage_ms: BTreeMap<String, u64>,
}

impl SyncReport {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.added.is_empty()
            && self.updated.is_empty()
            && self.removed.is_empty()
            && self.files_downloaded == 0
    }
}

/// Brings `config.root` in line with the manifests found under it.
///
/// The working state is saved before any network I/O with every planned
/// download marked as interrupted, and saved again once every file has been
/// extracted, so a run stopped at any point reruns to the same result.
pub fn sync_dependencies(config: &Config, ctx: &SyncContext) -> SyncResult<SyncReport> {
    let root = config.root.as_path();
    let dry_run = config.sync.dry_run;
    let mut timings = StageTimings::new();
    timings.start(SyncStage::Manifests);

    let manifests =
        discover_manifests(root, &config.manifests.locations).map_err(SyncError::Configuration)?;
    let deps = load_dependency_set(&manifests).map_err(SyncError::Configuration)?;
    let filter = FileFilter::load(root, &config.filters).map_err(SyncError::Configuration)?;
    let targets: Vec<TargetFile> = deps
        .files()
        .filter(|file| !filter.is_excluded(&file.name))
        .cloned()
        .collect();
    info!(
        manifests = manifests.len(),
        files = targets.len(),
        excluded = deps.file_count() - targets.len(),
        "loaded dependency manifests"
    );

    timings.start(SyncStage::Reconcile);
    let prior = load_working_state(root);
    let recovered = if dry_run {
        0
    } else {
        recover_interrupted(root, &prior)
    };
    let current = refresh_working_state(root, prior);
    let mut plan = reconcile(
        root,
        &targets,
        current,
        config.sync.overwrite,
        ctx.prompt.as_ref(),
        dry_run,
    );
    let fetch_plan = plan_fetch(&plan.downloads, &deps).map_err(SyncError::Configuration)?;

    let mut report = SyncReport {
        dry_run,
        added: std::mem::take(&mut plan.added),
        updated: std::mem::take(&mut plan.updated),
        removed: std::mem::take(&mut plan.removed),
        modified_kept: std::mem::take(&mut plan.modified_kept),
        modified_overwritten: std::mem::take(&mut plan.modified_overwritten),
        recovered_incoming: recovered,
        ..SyncReport::default()
    };
    if !report.modified_kept.is_empty() {
        warn!(
            files = report.modified_kept.len(),
            policy = config.sync.overwrite.as_str(),
            "keeping locally modified files"
        );
    }
    if dry_run {
        info!(
            added = report.added.len(),
            updated = report.updated.len(),
            removed = report.removed.len(),
            packs = fetch_plan.packs().len(),
            bytes = fetch_plan.compressed_bytes(),
            "dry run; no changes made"
        );
        report.stage_ms = timings.summary(config.timings);
        return Ok(report);
    }
    if ctx.cancel.is_cancelled() {
        return Err(SyncError::Cancelled);
    }

    timings.start(SyncStage::Cleanup);
    for file in &plan.removals {
        if safe_delete(&target_path(root, &file.name)) {
            debug!(file = %file.name, "deleted");
        }
    }
    save_working_state(root, &plan.new_state).map_err(SyncError::StatePersistence)?;

    if !fetch_plan.is_empty() {
        timings.start(SyncStage::Fetch);
        let fetcher = match &ctx.fetcher {
            Some(fetcher) => Arc::clone(fetcher),
            None => {
                let client = http_client(&config.network, deps.ignore_proxy())
                    .map_err(SyncError::Configuration)?;
                Arc::new(HttpFetcher::new(client)) as Arc<dyn PackFetcher>
            }
        };
        let stats = run_fetch(config, fetch_plan, fetcher, &ctx.cancel)?;
        report.packs_downloaded = stats.packs;
        report.bytes_downloaded = stats.bytes;

        for file in &plan.downloads {
            let timestamp = modified_ticks(&target_path(root, &file.name))
                .with_context(|| format!("failed to stat {}", file.name))
                .map_err(SyncError::StatePersistence)?;
            if let Some(entry) = plan.new_state.get_mut(&file.name) {
                entry.hash = Some(file.hash.clone());
                entry.timestamp = timestamp;
            }
        }
        save_working_state(root, &plan.new_state).map_err(SyncError::StatePersistence)?;
        report.files_downloaded = plan.downloads.len();
    }

    timings.start(SyncStage::Permissions);
    // files the user chose to keep are left exactly as they are
    let kept: BTreeSet<String> = report.modified_kept.iter().map(|name| fold_name(name)).collect();
    let managed = targets
        .iter()
        .filter(|file| !kept.contains(&fold_name(&file.name)));
    report.permissions_fixed =
        fix_permissions(root, managed, &filter, &platform_executable_bits());
    info!(
        added = report.added.len(),
        updated = report.updated.len(),
        removed = report.removed.len(),
        downloaded = report.files_downloaded,
        packs = report.packs_downloaded,
        "dependencies up to date"
    );
    report.stage_ms = timings.summary(config.timings);
    Ok(report)
}

struct FetchStats {
    packs: usize,
    bytes: u64,
}

/// Runs the concurrent stage: N download threads, one extraction thread,
/// and the monitor on the calling thread.
fn run_fetch(
    config: &Config,
    plan: FetchPlan,
    fetcher: Arc<dyn PackFetcher>,
    cancel: &CancelToken,
) -> SyncResult<FetchStats> {
    let temp_dir = config.state_dir().join(PACK_TEMP_DIR);
    fs::create_dir_all(&temp_dir)
        .with_context(|| format!("failed to create {}", temp_dir.display()))
        .map_err(SyncError::StatePersistence)?;
    clear_dir(&temp_dir);

    let workers = config.sync.threads.clamp(1, plan.packs().len().max(1));
    let bytes_total = plan.compressed_bytes();
    let state = Arc::new(RunState::new(plan.file_count(), workers, cancel.clone()));
    let pending = Arc::new(WorkQueue::from_items(plan.packs().iter().cloned()));
    let ready = Arc::new(WorkQueue::new());
    let plan = Arc::new(plan);
    info!(
        packs = plan.packs().len(),
        files = plan.file_count(),
        bytes = bytes_total,
        workers,
        "fetching packs"
    );

    let download = DownloadContext {
        state: Arc::clone(&state),
        fetcher,
        pending: Arc::clone(&pending),
        ready: Arc::clone(&ready),
        temp_dir: temp_dir.clone(),
        max_retries: config.sync.max_retries,
    };
    let extract = ExtractContext {
        state: Arc::clone(&state),
        plan: Arc::clone(&plan),
        ready: Arc::clone(&ready),
        root: config.root.clone(),
    };

    let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(workers + 1);
    let mut spawn_error = None;
    for id in 0..workers {
        let ctx = download.clone();
        match thread::Builder::new()
            .name(format!("gitdeps-download-{id}"))
            .spawn(move || run_download_worker(id, &ctx))
        {
            Ok(handle) => handles.push(handle),
            Err(err) => {
                spawn_error = Some(err);
                break;
            }
        }
    }
    if spawn_error.is_none() {
        match thread::Builder::new()
            .name("gitdeps-extract".into())
            .spawn(move || run_extractor(&extract))
        {
            Ok(handle) => handles.push(handle),
            Err(err) => spawn_error = Some(err),
        }
    }

    let mut progress = ProgressLine::new(config.progress);
    let verdict = match spawn_error {
        Some(err) => MonitorVerdict::DownloadFailed(format!("failed to start sync threads: {err}")),
        None => monitor::watch(&state, bytes_total, &mut progress),
    };
    state.abort();
    join_bounded(handles, JOIN_TIMEOUT);
    debug!(
        attempts = state.download_attempts.load(Ordering::SeqCst),
        queued = pending.len(),
        "fetch stage stopped"
    );
    drop(ready.drain());
    drop(pending.drain());
    clear_dir(&temp_dir);

    match verdict {
        MonitorVerdict::Complete => {
            progress.finish(format!("Updated {} files", state.required));
            Ok(FetchStats {
                packs: state.packs_fetched.load(Ordering::SeqCst),
                bytes: state.bytes_received.load(Ordering::SeqCst),
            })
        }
        MonitorVerdict::DownloadFailed(last_error) => Err(SyncError::Download { last_error }),
        MonitorVerdict::ExtractFailed(message) => Err(SyncError::Decompression(message)),
        MonitorVerdict::Cancelled => Err(SyncError::Cancelled),
    }
}
