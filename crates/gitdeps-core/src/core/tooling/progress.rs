use std::io::{self, IsTerminal, Write};
use std::sync::Mutex;

const MIB: f64 = 1024.0 * 1024.0;

static OUTPUT_LOCK: Mutex<()> = Mutex::new(());

/// Whether the status line should be drawn. An explicit setting wins;
/// otherwise draw only when stderr is a terminal.
pub(crate) fn progress_enabled(setting: Option<bool>) -> bool {
    setting.unwrap_or_else(|| io::stderr().is_terminal())
}

fn clear_progress_line() {
    let _guard = OUTPUT_LOCK.lock().ok();
    let _ = io::stderr().write_all(b"\r\x1b[2K");
    let _ = io::stderr().flush();
}

/// Counters observed by the monitor at one poll.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ProgressSnapshot {
    pub files_done: usize,
    pub files_total: usize,
    pub bytes_received: u64,
    pub bytes_total: u64,
    pub bytes_per_sec: f64,
}

impl ProgressSnapshot {
    #[must_use]
    pub fn percent(&self) -> usize {
        if self.bytes_total == 0 {
            if self.files_total == 0 {
                return 100;
            }
            return (self.files_done * 100) / self.files_total;
        }
        let ratio = self.bytes_received as f64 / self.bytes_total as f64;
        ((ratio * 100.0) as usize).min(100)
    }

    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "Updating dependencies: {:>3}% ({}/{}), {:.1}/{:.1} MiB | {:.2} MiB/s",
            self.percent(),
            self.files_done,
            self.files_total,
            self.bytes_received as f64 / MIB,
            self.bytes_total as f64 / MIB,
            self.bytes_per_sec / MIB,
        )
    }
}

/// Single-line stderr status redrawn on every monitor poll.
pub struct ProgressLine {
    enabled: bool,
    rendered: bool,
    last: Option<String>,
}

impl ProgressLine {
    pub(crate) fn new(setting: Option<bool>) -> Self {
        Self {
            enabled: progress_enabled(setting),
            rendered: false,
            last: None,
        }
    }

    pub fn update(&mut self, snapshot: &ProgressSnapshot) {
        let line = snapshot.render();
        if self.last.as_deref() == Some(line.as_str()) {
            return;
        }
        if self.enabled {
            let _guard = OUTPUT_LOCK.lock().ok();
            let _ = io::stderr().write_all(format!("\r\x1b[2K{line}").as_bytes());
            let _ = io::stderr().flush();
            self.rendered = true;
        }
        self.last = Some(line);
    }

    pub fn finish(mut self, message: impl Into<String>) {
        self.stop();
        if self.enabled {
            eprintln!("gitdeps ▸ {}", message.into());
        }
    }

    fn stop(&mut self) {
        if self.rendered {
            clear_progress_line();
            self.rendered = false;
        }
    }
}

impl Drop for ProgressLine {
    fn drop(&mut self) {
        self.stop();
    }
}
