use std::io;
use std::path::Path;

use gitdeps_domain::TargetFile;
use tracing::{debug, warn};

use crate::core::filter::FileFilter;
use crate::core::fs::target_path;

/// Platform capability for setting execute permission on synced files.
pub(crate) trait ExecutableBits {
    /// Returns `true` when the file's mode changed.
    fn mark_executable(&self, path: &Path) -> io::Result<bool>;
}

#[cfg(unix)]
pub(crate) struct PosixExecutableBits;

#[cfg(unix)]
impl ExecutableBits for PosixExecutableBits {
    fn mark_executable(&self, path: &Path) -> io::Result<bool> {
        use std::os::unix::fs::PermissionsExt;

        let mut permissions = std::fs::metadata(path)?.permissions();
        let mode = permissions.mode();
        let wanted = mode | ((mode & 0o444) >> 2);
        if wanted == mode {
            return Ok(false);
        }
        permissions.set_mode(wanted);
        std::fs::set_permissions(path, permissions)?;
        Ok(true)
    }
}

#[cfg(not(unix))]
pub(crate) struct NoExecutableBits;

#[cfg(not(unix))]
impl ExecutableBits for NoExecutableBits {
    fn mark_executable(&self, _path: &Path) -> io::Result<bool> {
        Ok(false)
    }
}

#[cfg(unix)]
pub(crate) fn platform_executable_bits() -> impl ExecutableBits {
    PosixExecutableBits
}

#[cfg(not(unix))]
pub(crate) fn platform_executable_bits() -> impl ExecutableBits {
    NoExecutableBits
}

/// Restores execute permission on executable targets that exist on disk.
/// Failures are logged and skipped. Returns the number of files changed.
pub(crate) fn fix_permissions<'a>(
    root: &Path,
    targets: impl IntoIterator<Item = &'a TargetFile>,
    filter: &FileFilter,
    bits: &dyn ExecutableBits,
) -> usize {
    let mut fixed = 0;
    for target in targets {
        if !target.is_executable || filter.is_excluded(&target.name) {
            continue;
        }
        let path = target_path(root, &target.name);
        if !path.is_file() {
            continue;
        }
        match bits.mark_executable(&path) {
            Ok(true) => {
                debug!(file = %target.name, "marked executable");
                fixed += 1;
            }
            Ok(false) => {}
            Err(err) => warn!(file = %target.name, error = %err, "failed to set execute permission"),
        }
    }
    fixed
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn target(name: &str, is_executable: bool) -> TargetFile {
        TargetFile {
            name: name.into(),
            hash: "aa".into(),
            is_executable,
        }
    }

    fn mode(path: &Path) -> u32 {
        fs::metadata(path).expect("metadata").permissions().mode() & 0o777
    }

    #[test]
    fn execute_follows_read_bits() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let tool = temp.path().join("tool");
        fs::write(&tool, b"#!/bin/sh\n")?;
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o640))?;
        let data = temp.path().join("data.bin");
        fs::write(&data, b"data")?;
        fs::set_permissions(&data, fs::Permissions::from_mode(0o644))?;

        let targets = [
            target("tool", true),
            target("data.bin", false),
            target("missing", true),
        ];
        let fixed = fix_permissions(
            temp.path(),
            &targets,
            &FileFilter::allow_all(),
            &platform_executable_bits(),
        );
        assert_eq!(fixed, 1);
        assert_eq!(mode(&tool), 0o750);
        assert_eq!(mode(&data), 0o644);

        let again = fix_permissions(
            temp.path(),
            &targets,
            &FileFilter::allow_all(),
            &platform_executable_bits(),
        );
        assert_eq!(again, 0);
        Ok(())
    }
}
