use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use gitdeps_domain::INTERRUPTED_TIMESTAMP;
use tracing::warn;

pub(crate) const INCOMING_SUFFIX: &str = ".incoming";

pub(crate) fn target_path(root: &Path, name: &str) -> PathBuf {
    root.join(name)
}

/// Staging path a file is extracted to before it is renamed into place.
pub(crate) fn incoming_path(root: &Path, name: &str) -> PathBuf {
    root.join(format!("{name}{INCOMING_SUFFIX}"))
}

/// Modification time in nanoseconds since the Unix epoch. Never returns the
/// interrupted-download sentinel.
pub(crate) fn modified_ticks(path: &Path) -> io::Result<i64> {
    let meta = fs::metadata(path)?;
    let mtime = FileTime::from_last_modification_time(&meta);
    let ticks = mtime
        .unix_seconds()
        .saturating_mul(1_000_000_000)
        .saturating_add(i64::from(mtime.nanoseconds()));
    if ticks == INTERRUPTED_TIMESTAMP {
        Ok(INTERRUPTED_TIMESTAMP + 1)
    } else {
        Ok(ticks)
    }
}

/// Marks a file read-only so editors and other tools leave it alone.
pub(crate) fn mark_protected(path: &Path) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(true);
    fs::set_permissions(path, permissions)
}

/// Removes a file that may have been marked read-only. Missing files are fine.
#[allow(clippy::permissions_set_readonly_false)]
pub(crate) fn remove_protected(path: &Path) -> io::Result<()> {
    match fs::metadata(path) {
        Ok(meta) => {
            let mut permissions = meta.permissions();
            if permissions.readonly() {
                permissions.set_readonly(false);
                fs::set_permissions(path, permissions)?;
            }
            fs::remove_file(path)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Best-effort delete; failures are logged and reported as `false`.
pub(crate) fn safe_delete(path: &Path) -> bool {
    match remove_protected(path) {
        Ok(()) => true,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to delete file");
            false
        }
    }
}

/// Moves `src` over `dest`, clearing a read-only or locked-by-rename
/// destination first when a plain rename is refused.
pub(crate) fn replace_file(src: &Path, dest: &Path) -> io::Result<()> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(_err) if dest.exists() => {
            remove_protected(dest)?;
            fs::rename(src, dest)
        }
        Err(err) => Err(err),
    }
}

/// Best-effort removal of every file inside `dir`, leaving `dir` itself.
pub(crate) fn clear_dir(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() {
            safe_delete(&path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protected_files_can_be_replaced_and_removed() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let dest = temp.path().join("state.json");
        let src = temp.path().join("state.json.tmp");
        fs::write(&dest, b"old")?;
        mark_protected(&dest)?;
        fs::write(&src, b"new")?;
        replace_file(&src, &dest)?;
        assert_eq!(fs::read(&dest)?, b"new");
        mark_protected(&dest)?;
        remove_protected(&dest)?;
        assert!(!dest.exists());
        remove_protected(&dest)?;
        Ok(())
    }

    #[test]
    fn ticks_follow_modification_time() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("a.bin");
        fs::write(&path, b"a")?;
        filetime::set_file_mtime(&path, FileTime::from_unix_time(1_700_000_000, 5))?;
        assert_eq!(modified_ticks(&path)?, 1_700_000_000_000_000_005);
        filetime::set_file_mtime(&path, FileTime::from_unix_time(0, 0))?;
        assert_ne!(modified_ticks(&path)?, INTERRUPTED_TIMESTAMP);
        Ok(())
    }

    #[test]
    fn incoming_path_appends_suffix() {
        let root = Path::new("/tree");
        assert_eq!(
            incoming_path(root, "A/x.bin"),
            PathBuf::from("/tree/A/x.bin.incoming")
        );
    }
}
