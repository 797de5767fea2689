use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use super::shared::{RunState, POLL_INTERVAL};
use crate::core::tooling::progress::{ProgressLine, ProgressSnapshot};

const THROUGHPUT_WINDOW: Duration = Duration::from_secs(2);

/// Rolling byte-rate estimate over the last couple of seconds.
#[derive(Debug, Default)]
pub(crate) struct ThroughputWindow {
    samples: VecDeque<(Instant, u64)>,
}

impl ThroughputWindow {
    pub(crate) fn record(&mut self, at: Instant, bytes: u64) -> f64 {
        self.samples.push_back((at, bytes));
        while let Some(&(oldest, _)) = self.samples.front() {
            if at.duration_since(oldest) > THROUGHPUT_WINDOW && self.samples.len() > 2 {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        let (Some(&(start, first)), Some(&(end, last))) =
            (self.samples.front(), self.samples.back())
        else {
            return 0.0;
        };
        let elapsed = end.duration_since(start).as_secs_f64();
        if elapsed <= f64::EPSILON {
            return 0.0;
        }
        last.saturating_sub(first) as f64 / elapsed
    }
}

/// How the fetch stage ended, as observed from the driving thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MonitorVerdict {
    Complete,
    DownloadFailed(String),
    ExtractFailed(String),
    Cancelled,
}

/// Polls the shared counters until a terminal condition holds, redrawing the
/// progress line on every poll.
pub(crate) fn watch(state: &RunState, bytes_total: u64, progress: &mut ProgressLine) -> MonitorVerdict {
    let mut window = ThroughputWindow::default();
    loop {
        let received = state.bytes_received.load(Ordering::SeqCst);
        let snapshot = ProgressSnapshot {
            files_done: state.extracted.load(Ordering::SeqCst),
            files_total: state.required,
            bytes_received: received,
            bytes_total,
            bytes_per_sec: window.record(Instant::now(), received),
        };
        progress.update(&snapshot);
        debug!(
            files = snapshot.files_done,
            total = snapshot.files_total,
            bytes = snapshot.bytes_received,
            stuck = state.stuck_workers.load(Ordering::SeqCst),
            "sync progress"
        );

        if state.is_complete() {
            return MonitorVerdict::Complete;
        }
        if state.extract_failed.load(Ordering::SeqCst) {
            return MonitorVerdict::ExtractFailed(last_error(state));
        }
        if state.download_failed() {
            return MonitorVerdict::DownloadFailed(last_error(state));
        }
        if state.is_cancelled() {
            return MonitorVerdict::Cancelled;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn last_error(state: &RunState) -> String {
    state
        .last_error()
        .unwrap_or_else(|| "no error recorded".to_string())
}
