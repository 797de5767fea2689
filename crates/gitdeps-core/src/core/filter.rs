use std::path::Path;

use anyhow::{Context, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::core::config::FilterConfig;

pub(crate) const IGNORE_FILE: &str = ".gitdepsignore";

/// Decides which target files a run leaves alone.
///
/// Patterns come from `<root>/.gitdepsignore`, then configured excludes, then
/// configured includes as whitelist entries, so an include always wins.
#[derive(Debug)]
pub struct FileFilter {
    matcher: Gitignore,
}

impl FileFilter {
    pub fn load(root: &Path, filters: &FilterConfig) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(root);
        let ignore_file = root.join(IGNORE_FILE);
        if ignore_file.is_file() {
            if let Some(err) = builder.add(&ignore_file) {
                return Err(err).with_context(|| format!("failed to read {}", ignore_file.display()));
            }
        }
        for pattern in &filters.exclude {
            builder
                .add_line(None, pattern)
                .with_context(|| format!("invalid exclude pattern '{pattern}'"))?;
        }
        for pattern in &filters.include {
            builder
                .add_line(None, &format!("!{pattern}"))
                .with_context(|| format!("invalid include pattern '{pattern}'"))?;
        }
        let matcher = builder.build().context("failed to build file filter")?;
        Ok(Self { matcher })
    }

    pub fn allow_all() -> Self {
        Self {
            matcher: Gitignore::empty(),
        }
    }

    /// `name` is a root-relative path using forward slashes.
    pub fn is_excluded(&self, name: &str) -> bool {
        self.matcher
            .matched_path_or_any_parents(Path::new(name), false)
            .is_ignore()
    }
}
