use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::warn;

/// Interval used by every thread when polling an empty queue.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cooperative cancellation shared between a caller and a running sync.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Thread-safe FIFO. The lock is only held to push or pop, never across I/O.
pub(crate) struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> WorkQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn from_items(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: Mutex::new(items.into_iter().collect()),
        }
    }

    pub(crate) fn push(&self, item: T) {
        lock(&self.items).push_back(item);
    }

    pub(crate) fn pop(&self) -> Option<T> {
        lock(&self.items).pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub(crate) fn drain(&self) -> Vec<T> {
        lock(&self.items).drain(..).collect()
    }
}

/// Counters and flags shared by the download pool, the extractor and the
/// monitor for the duration of one fetch stage.
pub(crate) struct RunState {
    pub(crate) required: usize,
    pub(crate) workers: usize,
    pub(crate) extracted: AtomicUsize,
    pub(crate) bytes_received: AtomicU64,
    pub(crate) stuck_workers: AtomicUsize,
    pub(crate) download_attempts: AtomicUsize,
    pub(crate) packs_fetched: AtomicUsize,
    pub(crate) extract_failed: AtomicBool,
    aborted: AtomicBool,
    cancel: CancelToken,
    last_error: Mutex<Option<String>>,
}

impl RunState {
    pub(crate) fn new(required: usize, workers: usize, cancel: CancelToken) -> Self {
        Self {
            required,
            workers,
            extracted: AtomicUsize::new(0),
            bytes_received: AtomicU64::new(0),
            stuck_workers: AtomicUsize::new(0),
            download_attempts: AtomicUsize::new(0),
            packs_fetched: AtomicUsize::new(0),
            extract_failed: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            cancel,
            last_error: Mutex::new(None),
        }
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.extracted.load(Ordering::SeqCst) >= self.required
    }

    /// Every worker has exhausted its retries on its current pack.
    pub(crate) fn download_failed(&self) -> bool {
        self.stuck_workers.load(Ordering::SeqCst) >= self.workers
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stops every thread of this run without touching the caller's token.
    pub(crate) fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst) || self.is_cancelled()
    }

    /// Download workers keep going until one of these holds.
    pub(crate) fn downloads_should_stop(&self) -> bool {
        self.is_complete()
            || self.download_failed()
            || self.extract_failed.load(Ordering::SeqCst)
            || self.is_aborted()
    }

    pub(crate) fn record_error(&self, message: impl Into<String>) {
        *lock(&self.last_error) = Some(message.into());
    }

    pub(crate) fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }
}

/// Joins `handles`, giving up on threads still running after `timeout`.
/// Returns the number of threads left detached.
pub(crate) fn join_bounded(handles: Vec<JoinHandle<()>>, timeout: Duration) -> usize {
    let deadline = Instant::now() + timeout;
    let mut pending = handles;
    while !pending.is_empty() && Instant::now() < deadline {
        let (finished, running): (Vec<_>, Vec<_>) =
            pending.into_iter().partition(JoinHandle::is_finished);
        for handle in finished {
            if handle.join().is_err() {
                warn!("sync worker thread panicked");
            }
        }
        pending = running;
        if !pending.is_empty() {
            thread::sleep(Duration::from_millis(10));
        }
    }
    if !pending.is_empty() {
        warn!(threads = pending.len(), "detaching sync workers that did not stop in time");
    }
    pending.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_is_fifo() {
        let queue = WorkQueue::from_items([1, 2]);
        queue.push(3);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.drain(), vec![2, 3]);
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn stop_conditions() {
        let cancel = CancelToken::new();
        let state = RunState::new(2, 2, cancel.clone());
        assert!(!state.downloads_should_stop());

        state.stuck_workers.fetch_add(1, Ordering::SeqCst);
        assert!(!state.download_failed());
        state.stuck_workers.fetch_add(1, Ordering::SeqCst);
        assert!(state.download_failed());
        state.stuck_workers.store(0, Ordering::SeqCst);

        state.extracted.store(2, Ordering::SeqCst);
        assert!(state.is_complete());
        state.extracted.store(0, Ordering::SeqCst);

        cancel.cancel();
        assert!(state.is_aborted());
        assert!(state.downloads_should_stop());
    }

    #[test]
    fn abort_does_not_cancel_caller_token() {
        let cancel = CancelToken::new();
        let state = RunState::new(1, 1, cancel.clone());
        state.abort();
        assert!(state.is_aborted());
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn bounded_join_detaches_stragglers() {
        let quick = thread::spawn(|| {});
        let release = CancelToken::new();
        let flag = release.clone();
        let slow = thread::spawn(move || {
            while !flag.is_cancelled() {
                thread::sleep(Duration::from_millis(5));
            }
        });
        assert_eq!(
            join_bounded(vec![quick, slow], Duration::from_millis(50)),
            1
        );
        release.cancel();
    }
}
