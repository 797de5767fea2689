use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_RETRIES: u32 = 4;
pub const DEFAULT_MANIFEST_LOCATION: &str = "Build";
const MAX_THREADS: usize = 16;
/// Standard proxy variables; any of them being set turns system proxies on.
const PROXY_VARS: &[&str] = &[
    "HTTP_PROXY",
    "http_proxy",
    "HTTPS_PROXY",
    "https_proxy",
    "ALL_PROXY",
    "all_proxy",
];

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    pub(crate) fn flag(&self, key: &str) -> anyhow::Result<Option<bool>> {
        let Some(raw) = self.var(key) else {
            return Ok(None);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            other => bail!("{key} must be a boolean, got '{other}'"),
        }
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.var(key)
            .map(|raw| {
                raw.split(';')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// How to treat local files whose content no longer matches the last sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverwritePolicy {
    /// Replace or delete modified files without asking.
    Force,
    /// Keep modified files exactly as they are.
    Unchanged,
    /// Ask the caller once for the whole list of modified files.
    Prompt,
}

impl OverwritePolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Force => "force",
            Self::Unchanged => "unchanged",
            Self::Prompt => "prompt",
        }
    }
}

impl FromStr for OverwritePolicy {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "force" => Ok(Self::Force),
            "unchanged" | "keep" => Ok(Self::Unchanged),
            "prompt" => Ok(Self::Prompt),
            other => Err(anyhow!(
                "unknown overwrite policy '{other}' (expected force, unchanged or prompt)"
            )),
        }
    }
}

/// Fully resolved inputs for one sync run.
#[derive(Debug, Clone)]
pub struct Config {
    pub root: PathBuf,
    pub manifests: ManifestConfig,
    pub sync: SyncSettings,
    pub filters: FilterConfig,
    pub network: NetworkConfig,
    /// Force the status line on or off; `None` follows the terminal.
    pub progress: Option<bool>,
    /// Log per-stage durations at info level.
    pub timings: bool,
}

impl Config {
    /// Defaults for a working tree rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            manifests: ManifestConfig::default(),
            sync: SyncSettings::default(),
            filters: FilterConfig::default(),
            network: NetworkConfig::default(),
            progress: None,
            timings: false,
        }
    }

    /// Builds a configuration snapshot from the current process environment.
    ///
    /// # Errors
    /// Returns an error if the working directory cannot be resolved or a
    /// variable holds an invalid value.
    pub fn from_env() -> anyhow::Result<Self> {
        let cwd = env::current_dir().context("unable to determine current directory")?;
        Self::from_snapshot(&EnvSnapshot::capture(), &cwd)
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot, cwd: &Path) -> anyhow::Result<Self> {
        let root = match snapshot.var("GITDEPS_ROOT") {
            Some(raw) => absolutize(cwd, PathBuf::from(raw)),
            None => cwd.to_path_buf(),
        };
        let mut config = Self::new(root);

        let locations = snapshot.list("GITDEPS_MANIFEST_DIRS");
        if !locations.is_empty() {
            config.manifests.locations = locations.into_iter().map(PathBuf::from).collect();
        }
        if let Some(raw) = snapshot.var("GITDEPS_THREADS") {
            let threads: usize = raw
                .trim()
                .parse()
                .with_context(|| format!("GITDEPS_THREADS must be a number, got '{raw}'"))?;
            if threads == 0 {
                bail!("GITDEPS_THREADS must be at least 1");
            }
            config.sync.threads = threads.min(MAX_THREADS);
        }
        if let Some(raw) = snapshot.var("GITDEPS_MAX_RETRIES") {
            config.sync.max_retries = raw
                .trim()
                .parse()
                .with_context(|| format!("GITDEPS_MAX_RETRIES must be a number, got '{raw}'"))?;
        }
        if let Some(dry_run) = snapshot.flag("GITDEPS_DRY_RUN")? {
            config.sync.dry_run = dry_run;
        }
        if let Some(raw) = snapshot.var("GITDEPS_OVERWRITE") {
            config.sync.overwrite = raw.parse()?;
        }
        config.filters.exclude = snapshot.list("GITDEPS_EXCLUDE");
        config.filters.include = snapshot.list("GITDEPS_INCLUDE");
        config.network.proxy = snapshot.var("GITDEPS_PROXY").map(ToOwned::to_owned);
        config.network.system_proxies = match snapshot.flag("GITDEPS_KEEP_PROXIES")? {
            Some(keep) => keep,
            None => PROXY_VARS.iter().any(|key| snapshot.var(key).is_some()),
        };
        config.progress = snapshot.flag("GITDEPS_PROGRESS")?;
        config.timings = snapshot.flag("GITDEPS_TIMINGS")?.unwrap_or(false);
        Ok(config)
    }

    /// Directory holding the working state and pack temp files.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(".gitdeps")
    }
}

#[derive(Debug, Clone)]
pub struct ManifestConfig {
    /// Module locations, relative to the root, scanned for manifests.
    pub locations: Vec<PathBuf>,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            locations: vec![PathBuf::from(DEFAULT_MANIFEST_LOCATION)],
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    pub threads: usize,
    pub max_retries: u32,
    pub dry_run: bool,
    pub overwrite: OverwritePolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            max_retries: DEFAULT_MAX_RETRIES,
            dry_run: false,
            overwrite: OverwritePolicy::Prompt,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    /// Gitignore-style patterns for files that must not be synced.
    pub exclude: Vec<String>,
    /// Patterns re-admitting files an exclude would drop.
    pub include: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NetworkConfig {
    /// Proxy for every pack request; overrides the environment.
    pub proxy: Option<String>,
    /// Honor `HTTP_PROXY` and friends when no explicit proxy is set.
    pub system_proxies: bool,
}

fn default_threads() -> usize {
    thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
        .clamp(1, MAX_THREADS)
}

fn absolutize(cwd: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        cwd.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_environment() -> anyhow::Result<()> {
        let config = Config::from_snapshot(&EnvSnapshot::testing(&[]), Path::new("/work"))?;
        assert_eq!(config.root, PathBuf::from("/work"));
        assert_eq!(config.manifests.locations, vec![PathBuf::from("Build")]);
        assert_eq!(config.sync.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.sync.overwrite, OverwritePolicy::Prompt);
        assert!(!config.sync.dry_run);
        assert!((1..=MAX_THREADS).contains(&config.sync.threads));
        assert!(!config.network.system_proxies);
        assert!(!config.timings);
        assert_eq!(config.state_dir(), PathBuf::from("/work/.gitdeps"));
        Ok(())
    }

    #[test]
    fn reads_every_setting() -> anyhow::Result<()> {
        let snapshot = EnvSnapshot::testing(&[
            ("GITDEPS_ROOT", "tree"),
            ("GITDEPS_MANIFEST_DIRS", "Engine/Build; Plugins/Foo/Build"),
            ("GITDEPS_THREADS", "64"),
            ("GITDEPS_MAX_RETRIES", "2"),
            ("GITDEPS_DRY_RUN", "yes"),
            ("GITDEPS_OVERWRITE", "Force"),
            ("GITDEPS_EXCLUDE", "Binaries/Win32/;*.pdb"),
            ("GITDEPS_INCLUDE", "Binaries/Win32/keep.dll"),
            ("GITDEPS_PROXY", "http://proxy.local:3128"),
            ("GITDEPS_PROGRESS", "0"),
            ("GITDEPS_TIMINGS", "on"),
        ]);
        let config = Config::from_snapshot(&snapshot, Path::new("/work"))?;
        assert_eq!(config.root, PathBuf::from("/work/tree"));
        assert_eq!(
            config.manifests.locations,
            vec![
                PathBuf::from("Engine/Build"),
                PathBuf::from("Plugins/Foo/Build")
            ]
        );
        assert_eq!(config.sync.threads, MAX_THREADS);
        assert_eq!(config.sync.max_retries, 2);
        assert!(config.sync.dry_run);
        assert_eq!(config.sync.overwrite, OverwritePolicy::Force);
        assert_eq!(config.filters.exclude, vec!["Binaries/Win32/", "*.pdb"]);
        assert_eq!(config.filters.include, vec!["Binaries/Win32/keep.dll"]);
        assert_eq!(
            config.network.proxy.as_deref(),
            Some("http://proxy.local:3128")
        );
        assert_eq!(config.progress, Some(false));
        assert!(config.timings);
        Ok(())
    }

    #[test]
    fn system_proxies_follow_environment_unless_overridden() -> anyhow::Result<()> {
        let cwd = Path::new("/work");
        let detected = EnvSnapshot::testing(&[("https_proxy", "http://proxy.local:3128")]);
        assert!(Config::from_snapshot(&detected, cwd)?.network.system_proxies);

        let blank = EnvSnapshot::testing(&[("HTTP_PROXY", "  ")]);
        assert!(!Config::from_snapshot(&blank, cwd)?.network.system_proxies);

        let disabled = EnvSnapshot::testing(&[
            ("HTTP_PROXY", "http://proxy.local:3128"),
            ("GITDEPS_KEEP_PROXIES", "off"),
        ]);
        assert!(!Config::from_snapshot(&disabled, cwd)?.network.system_proxies);

        let forced = EnvSnapshot::testing(&[("GITDEPS_KEEP_PROXIES", "1")]);
        assert!(Config::from_snapshot(&forced, cwd)?.network.system_proxies);
        Ok(())
    }

    #[test]
    fn rejects_invalid_values() {
        for pairs in [
            [("GITDEPS_THREADS", "0")],
            [("GITDEPS_THREADS", "many")],
            [("GITDEPS_OVERWRITE", "sometimes")],
            [("GITDEPS_DRY_RUN", "perhaps")],
        ] {
            let snapshot = EnvSnapshot::testing(&pairs);
            assert!(
                Config::from_snapshot(&snapshot, Path::new("/work")).is_err(),
                "{pairs:?} should be rejected"
            );
        }
    }
}
