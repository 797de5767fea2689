//! Persistence for the working state under `<root>/.gitdeps/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use gitdeps_domain::{WorkingState, WorkingStateDocument};
use tracing::{debug, warn};

use crate::core::fs::{incoming_path, mark_protected, remove_protected};

const STATE_DIR: &str = ".gitdeps";
const WORKING_STATE_FILE: &str = "working.json";

pub fn working_state_path(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join(WORKING_STATE_FILE)
}

/// Loads the last persisted state. A missing or unreadable document yields
/// an empty state so the next reconciliation rehashes from scratch.
pub fn load_working_state(root: &Path) -> WorkingState {
    let path = working_state_path(root);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) => {
            if path.exists() {
                warn!(path = %path.display(), error = %err, "unable to read working state");
            }
            return WorkingState::new();
        }
    };
    match serde_json::from_str::<WorkingStateDocument>(&contents) {
        Ok(doc) => WorkingState::from_document(doc),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ignoring corrupt working state");
            WorkingState::new()
        }
    }
}

/// Deletes staging files left behind by downloads that never completed.
/// Returns the number of files removed.
pub fn recover_interrupted(root: &Path, state: &WorkingState) -> usize {
    let mut removed = 0;
    for file in state.files().filter(|file| file.is_interrupted()) {
        let incoming = incoming_path(root, &file.name);
        if !incoming.exists() {
            continue;
        }
        match remove_protected(&incoming) {
            Ok(()) => {
                debug!(file = %file.name, "removed interrupted download");
                removed += 1;
            }
            Err(err) => {
                warn!(path = %incoming.display(), error = %err, "failed to remove interrupted download");
            }
        }
    }
    removed
}

/// Writes the state so that readers only ever see a complete document:
/// write temp, protect it, drop the old file, rename the temp into place.
pub fn save_working_state(root: &Path, state: &WorkingState) -> Result<()> {
    let path = working_state_path(root);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let mut contents = serde_json::to_vec_pretty(&state.to_document())?;
    contents.push(b'\n');

    let tmp_path = path.with_extension("json.tmp");
    remove_protected(&tmp_path)
        .with_context(|| format!("removing stale {}", tmp_path.display()))?;
    fs::write(&tmp_path, &contents).with_context(|| format!("writing {}", tmp_path.display()))?;
    mark_protected(&tmp_path).with_context(|| format!("protecting {}", tmp_path.display()))?;
    remove_protected(&path).with_context(|| format!("removing {}", path.display()))?;
    fs::rename(&tmp_path, &path).with_context(|| format!("writing {}", path.display()))?;
    debug!(path = %path.display(), files = state.len(), "saved working state");
    Ok(())
}
