use std::collections::BTreeSet;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::Path;

use gitdeps_domain::{fold_name, hash_file, TargetFile, WorkingFile, WorkingState};
use tracing::{debug, warn};

use crate::core::config::OverwritePolicy;
use crate::core::fs::{modified_ticks, target_path};

/// Asks whether locally modified files may be overwritten or deleted.
pub trait OverwritePrompt: Send + Sync {
    fn confirm_overwrite(&self, modified: &[String]) -> bool;
}

/// Lists the modified files on stderr and reads a yes/no answer from stdin.
/// Without an interactive stdin the answer is no.
#[derive(Debug, Default)]
pub struct StdinPrompt;

impl OverwritePrompt for StdinPrompt {
    fn confirm_overwrite(&self, modified: &[String]) -> bool {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            warn!(
                files = modified.len(),
                "locally modified files found and stdin is not interactive; keeping them"
            );
            return false;
        }
        let mut stderr = io::stderr();
        let _ = writeln!(stderr, "The following files have been modified locally:");
        for name in modified {
            let _ = writeln!(stderr, "  {name}");
        }
        let _ = write!(stderr, "Overwrite them with the synced versions? [y/N] ");
        let _ = stderr.flush();
        let mut answer = String::new();
        if stdin.lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

/// Outcome of diffing the target files against the working tree.
#[derive(Debug, Default)]
pub(crate) struct Reconciliation {
    pub(crate) downloads: Vec<TargetFile>,
    /// Files to delete before fetching. Includes files about to be replaced.
    pub(crate) removals: Vec<WorkingFile>,
    pub(crate) added: Vec<String>,
    pub(crate) updated: Vec<String>,
    pub(crate) removed: Vec<String>,
    pub(crate) modified_kept: Vec<String>,
    pub(crate) modified_overwritten: Vec<String>,
    pub(crate) new_state: WorkingState,
}

/// Re-validates remembered digests against the files on disk.
///
/// Entries whose file is gone are dropped. A digest is recomputed whenever
/// the modification time moved. A file left behind by an interrupted update
/// is adopted as it is instead of being reported as modified.
pub(crate) fn refresh_working_state(root: &Path, prior: WorkingState) -> WorkingState {
    let mut refreshed = WorkingState::new();
    for mut file in prior.into_files() {
        let path = target_path(root, &file.name);
        if !path.is_file() {
            debug!(file = %file.name, "dropping state for missing file");
            continue;
        }
        let ticks = match modified_ticks(&path) {
            Ok(ticks) => ticks,
            Err(err) => {
                warn!(file = %file.name, error = %err, "unable to read modification time");
                continue;
            }
        };
        if ticks != file.timestamp {
            let interrupted = file.is_interrupted();
            match hash_file(&path) {
                Ok(hash) => {
                    debug!(file = %file.name, "rehashed changed file");
                    if interrupted {
                        file.expected_hash = hash.clone();
                    }
                    file.hash = Some(hash);
                    file.timestamp = ticks;
                }
                Err(err) => {
                    warn!(file = %file.name, error = %format!("{err:#}"), "unable to hash file");
                    continue;
                }
            }
        }
        refreshed.insert(file);
    }
    refreshed
}

/// Diffs `targets` against the refreshed working state and applies the
/// overwrite policy to locally modified files. Touches nothing on disk
/// except to hash untracked files that already sit at a target path.
pub(crate) fn reconcile(
    root: &Path,
    targets: &[TargetFile],
    mut prior: WorkingState,
    policy: OverwritePolicy,
    prompt: &dyn OverwritePrompt,
    dry_run: bool,
) -> Reconciliation {
    let mut plan = Reconciliation::default();
    for target in targets {
        // a case-only rename is an update so the declared spelling lands on disk
        let satisfied = prior.get(&target.name).is_some_and(|file| {
            file.name == target.name && file.hash.as_deref() == Some(target.hash.as_str())
        });
        if satisfied {
            if let Some(mut file) = prior.remove(&target.name) {
                file.expected_hash = target.hash.clone();
                plan.new_state.insert(file);
            }
            continue;
        }
        if prior.get(&target.name).is_none() {
            if let Some(file) = adopt_untracked(root, target) {
                plan.new_state.insert(file);
                continue;
            }
            plan.added.push(target.name.clone());
        } else {
            plan.updated.push(target.name.clone());
        }
        plan.downloads.push(target.clone());
        plan.new_state
            .insert(WorkingFile::pending(&target.name, &target.hash));
    }

    let modified: Vec<String> = prior
        .files()
        .filter(|file| file.is_tampered())
        .map(|file| file.name.clone())
        .collect();
    let overwrite = modified.is_empty()
        || match policy {
            OverwritePolicy::Force => true,
            OverwritePolicy::Unchanged => false,
            OverwritePolicy::Prompt => dry_run || prompt.confirm_overwrite(&modified),
        };

    if overwrite {
        plan.modified_overwritten = modified;
    } else {
        let kept: BTreeSet<String> = modified.iter().map(|name| fold_name(name)).collect();
        plan.downloads.retain(|file| !kept.contains(&fold_name(&file.name)));
        plan.updated.retain(|name| !kept.contains(&fold_name(name)));
        for name in &modified {
            if let Some(file) = prior.remove(name) {
                plan.new_state.insert(file);
            }
        }
        plan.modified_kept = modified;
    }

    let downloading: BTreeSet<String> = plan
        .downloads
        .iter()
        .map(|file| fold_name(&file.name))
        .collect();
    for file in prior.into_files() {
        if !downloading.contains(&file.key()) {
            plan.removed.push(file.name.clone());
        }
        plan.removals.push(file);
    }
    plan
}

/// A file with no working entry that already holds the target content is
/// taken over without downloading it again.
fn adopt_untracked(root: &Path, target: &TargetFile) -> Option<WorkingFile> {
    let path = target_path(root, &target.name);
    if !path.is_file() {
        return None;
    }
    let hash = hash_file(&path).ok()?;
    if hash != target.hash {
        return None;
    }
    let timestamp = modified_ticks(&path).ok()?;
    debug!(file = %target.name, "adopting existing file");
    Some(WorkingFile {
        name: target.name.clone(),
        hash: Some(hash),
        expected_hash: target.hash.clone(),
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitdeps_domain::hash_bytes;
    use std::fs;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPrompt {
        answer: bool,
        asked: Mutex<Vec<Vec<String>>>,
    }

    impl RecordingPrompt {
        fn answering(answer: bool) -> Self {
            Self {
                answer,
                ..Self::default()
            }
        }

        fn times_asked(&self) -> usize {
            self.asked.lock().expect("prompt lock").len()
        }
    }

    impl OverwritePrompt for RecordingPrompt {
        fn confirm_overwrite(&self, modified: &[String]) -> bool {
            self.asked
                .lock()
                .expect("prompt lock")
                .push(modified.to_vec());
            self.answer
        }
    }

    fn target(name: &str, content: &[u8]) -> TargetFile {
        TargetFile {
            name: name.into(),
            hash: hash_bytes(content),
            is_executable: false,
        }
    }

    /// Writes `content` to disk and returns the entry a previous sync of it
    /// would have left behind.
    fn synced(root: &Path, name: &str, content: &[u8]) -> WorkingFile {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("parent dir");
        }
        fs::write(&path, content).expect("write file");
        WorkingFile {
            name: name.into(),
            hash: Some(hash_bytes(content)),
            expected_hash: hash_bytes(content),
            timestamp: modified_ticks(&path).expect("mtime"),
        }
    }

    fn names(files: &[TargetFile]) -> Vec<&str> {
        files.iter().map(|file| file.name.as_str()).collect()
    }

    #[test]
    fn unchanged_files_are_carried_over() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let state: WorkingState = [synced(temp.path(), "A/x.bin", b"x")].into_iter().collect();
        let prompt = RecordingPrompt::default();
        let plan = reconcile(
            temp.path(),
            &[target("A/x.bin", b"x"), target("B/new.bin", b"new")],
            refresh_working_state(temp.path(), state),
            OverwritePolicy::Prompt,
            &prompt,
            false,
        );
        assert_eq!(names(&plan.downloads), vec!["B/new.bin"]);
        assert_eq!(plan.added, vec!["B/new.bin".to_string()]);
        assert!(plan.removals.is_empty());
        assert_eq!(plan.new_state.len(), 2);
        assert!(plan.new_state.get("B/new.bin").expect("stub").is_interrupted());
        assert_eq!(prompt.times_asked(), 0);
        Ok(())
    }

    #[test]
    fn case_only_rename_is_an_update() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let state: WorkingState = [synced(temp.path(), "a/X.bin", b"x")].into_iter().collect();
        let plan = reconcile(
            temp.path(),
            &[target("A/x.bin", b"x")],
            refresh_working_state(temp.path(), state),
            OverwritePolicy::Force,
            &RecordingPrompt::default(),
            false,
        );
        assert_eq!(names(&plan.downloads), vec!["A/x.bin"]);
        assert_eq!(plan.updated, vec!["A/x.bin".to_string()]);
        assert!(plan.removed.is_empty());
        assert_eq!(plan.removals.len(), 1);
        assert_eq!(plan.removals[0].name, "a/X.bin");
        let stub = plan.new_state.get("A/x.bin").expect("stub");
        assert_eq!(stub.name, "A/x.bin");
        assert!(stub.is_interrupted());
        Ok(())
    }

    #[test]
    fn changed_target_replaces_and_deletes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let state: WorkingState = [
            synced(temp.path(), "lib.so", b"v1"),
            synced(temp.path(), "old.bin", b"old"),
        ]
        .into_iter()
        .collect();
        let plan = reconcile(
            temp.path(),
            &[target("lib.so", b"v2")],
            refresh_working_state(temp.path(), state),
            OverwritePolicy::Unchanged,
            &RecordingPrompt::default(),
            false,
        );
        assert_eq!(names(&plan.downloads), vec!["lib.so"]);
        assert_eq!(plan.updated, vec!["lib.so".to_string()]);
        assert_eq!(plan.removed, vec!["old.bin".to_string()]);
        assert_eq!(plan.removals.len(), 2);
        Ok(())
    }

    #[test]
    fn tampered_files_follow_policy() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let entry = synced(temp.path(), "tool.exe", b"original");
        fs::write(temp.path().join("tool.exe"), b"patched locally")?;
        filetime::set_file_mtime(
            temp.path().join("tool.exe"),
            filetime::FileTime::from_unix_time(1_600_000_000, 0),
        )?;
        let state: WorkingState = [entry].into_iter().collect();
        let targets = [target("tool.exe", b"original")];

        let kept = reconcile(
            temp.path(),
            &targets,
            refresh_working_state(temp.path(), state.clone()),
            OverwritePolicy::Unchanged,
            &RecordingPrompt::default(),
            false,
        );
        assert!(kept.downloads.is_empty());
        assert!(kept.removals.is_empty());
        assert_eq!(kept.modified_kept, vec!["tool.exe".to_string()]);
        assert!(kept.new_state.get("tool.exe").expect("restored").is_tampered());

        let forced = reconcile(
            temp.path(),
            &targets,
            refresh_working_state(temp.path(), state.clone()),
            OverwritePolicy::Force,
            &RecordingPrompt::default(),
            false,
        );
        assert_eq!(names(&forced.downloads), vec!["tool.exe"]);
        assert_eq!(forced.modified_overwritten, vec!["tool.exe".to_string()]);
        assert_eq!(forced.removals.len(), 1);

        let prompt = RecordingPrompt::answering(false);
        let declined = reconcile(
            temp.path(),
            &targets,
            refresh_working_state(temp.path(), state),
            OverwritePolicy::Prompt,
            &prompt,
            false,
        );
        assert_eq!(prompt.times_asked(), 1);
        assert!(declined.downloads.is_empty());
        Ok(())
    }

    #[test]
    fn dry_run_never_prompts() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut entry = synced(temp.path(), "a.bin", b"a");
        entry.expected_hash = hash_bytes(b"something else");
        let state: WorkingState = [entry].into_iter().collect();
        let prompt = RecordingPrompt::default();
        let plan = reconcile(
            temp.path(),
            &[],
            refresh_working_state(temp.path(), state),
            OverwritePolicy::Prompt,
            &prompt,
            true,
        );
        assert_eq!(prompt.times_asked(), 0);
        assert_eq!(plan.removed, vec!["a.bin".to_string()]);
        Ok(())
    }

    #[test]
    fn refresh_drops_missing_and_adopts_interrupted() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(temp.path().join("kept.bin"), b"previous version")?;
        let state: WorkingState = [
            WorkingFile::pending("kept.bin", &hash_bytes(b"next version")),
            WorkingFile::pending("gone.bin", &hash_bytes(b"gone")),
        ]
        .into_iter()
        .collect();
        let refreshed = refresh_working_state(temp.path(), state);
        assert_eq!(refreshed.len(), 1);
        let kept = refreshed.get("kept.bin").expect("kept entry");
        assert_eq!(kept.hash.as_deref(), Some(hash_bytes(b"previous version").as_str()));
        assert!(!kept.is_tampered());
        assert!(!kept.is_interrupted());
        Ok(())
    }

    #[test]
    fn untracked_file_with_target_content_is_adopted() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(temp.path().join("present.bin"), b"same")?;
        let plan = reconcile(
            temp.path(),
            &[target("present.bin", b"same")],
            WorkingState::new(),
            OverwritePolicy::Force,
            &RecordingPrompt::default(),
            false,
        );
        assert!(plan.downloads.is_empty());
        assert!(!plan.new_state.get("present.bin").expect("adopted").is_tampered());
        Ok(())
    }
}
