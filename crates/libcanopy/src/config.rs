use std::{
    env, fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    error::{CanopyError, Result},
    repospec::Protocol,
};

/// Environment variable naming the managed root.
pub const ROOT_ENV: &str = "CANOPY_ROOT";
/// Environment variable overriding the fetch grace window, in seconds.
pub const GRACE_ENV: &str = "CANOPY_FETCH_GRACE_SECONDS";
/// Settings file name under the root.
pub const SETTINGS_FILE: &str = "settings.yaml";

/// Directory name used under `$HOME` when no root is configured.
const DEFAULT_ROOT_DIR: &str = "canopy";
/// Default fetch grace window.
const DEFAULT_GRACE_SECONDS: u64 = 300;
/// Default shared prefetch timeout.
const DEFAULT_PREFETCH_TIMEOUT_SECONDS: u64 = 60;

/// On-disk `settings.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Schema version.
    pub version: u32,
    /// Repo defaults.
    pub repo: RepoSettings,
    /// Fetch tuning.
    pub fetch: FetchSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: 1,
            repo: RepoSettings::default(),
            fetch: FetchSettings::default(),
        }
    }
}

/// `repo:` section of the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoSettings {
    /// Protocol used when cloning from a bare key.
    pub default_protocol: Protocol,
    /// Host assumed for `owner/name` shorthands.
    pub default_host: String,
}

impl Default for RepoSettings {
    fn default() -> Self {
        Self {
            default_protocol: Protocol::Https,
            default_host: "github.com".to_string(),
        }
    }
}

/// `fetch:` section of the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Seconds a cached default-branch resolution is trusted.
    pub grace_seconds: u64,
    /// Seconds the whole prefetch batch may take.
    pub prefetch_timeout_seconds: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            grace_seconds: DEFAULT_GRACE_SECONDS,
            prefetch_timeout_seconds: DEFAULT_PREFETCH_TIMEOUT_SECONDS,
        }
    }
}

impl Settings {
    /// Load settings from `<root>/settings.yaml`, returning defaults when absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(SETTINGS_FILE);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(CanopyError::Config(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&contents)
            .map_err(|e| CanopyError::Config(format!("Failed to parse {}: {e}", path.display())))
    }

    /// Write settings to `<root>/settings.yaml`.
    pub fn save(&self, root: &Path) -> Result<()> {
        let path = root.join(SETTINGS_FILE);
        let encoded = serde_yaml::to_string(self)
            .map_err(|e| CanopyError::Config(format!("Failed to encode settings: {e}")))?;
        fs::write(&path, encoded)?;
        Ok(())
    }
}

/// Per-invocation configuration threaded through the engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Managed root directory.
    pub root: PathBuf,
    /// Protocol for cloning from bare repo keys.
    pub protocol: Protocol,
    /// Host for `owner/name` shorthands.
    pub default_host: String,
    /// How long a cached default branch is trusted.
    pub fetch_grace: Duration,
    /// Budget for the whole prefetch batch.
    pub prefetch_timeout: Duration,
    /// Echo VCS commands and engine steps.
    pub verbose: bool,
}

impl Config {
    /// Configuration with defaults for a given root, ignoring the environment.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self::from_settings(root.into(), &Settings::default(), None)
    }

    /// Resolve configuration from a root flag, the environment and `settings.yaml`.
    pub fn load(root_flag: Option<&Path>, verbose: bool) -> Result<Self> {
        let root = resolve_root(
            root_flag,
            env::var(ROOT_ENV).ok().as_deref(),
            env::var("HOME").ok().as_deref(),
        )?;
        let settings = Settings::load(&root)?;
        let mut config = Self::from_settings(root, &settings, env::var(GRACE_ENV).ok().as_deref());
        config.verbose = verbose;
        Ok(config)
    }

    /// Combine settings with an optional grace override from the environment.
    fn from_settings(root: PathBuf, settings: &Settings, grace_env: Option<&str>) -> Self {
        let grace = grace_override(grace_env).unwrap_or(settings.fetch.grace_seconds);
        Self {
            root,
            protocol: settings.repo.default_protocol,
            default_host: settings.repo.default_host.clone(),
            fetch_grace: Duration::from_secs(grace),
            prefetch_timeout: Duration::from_secs(settings.fetch.prefetch_timeout_seconds),
            verbose: false,
        }
    }
}

/// Parse the grace override, ignoring values that are not a non-negative integer.
fn grace_override(value: Option<&str>) -> Option<u64> {
    let raw = value?.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<u64>() {
        Ok(secs) => Some(secs),
        Err(_) => {
            warn!("ignoring invalid {GRACE_ENV}={raw:?}");
            None
        }
    }
}

/// Pick the root from the flag, then the environment, then `$HOME/canopy`.
pub fn resolve_root(flag: Option<&Path>, env_root: Option<&str>, home: Option<&str>) -> Result<PathBuf> {
    if let Some(flag) = flag
        && !flag.as_os_str().is_empty()
    {
        return expand_tilde(&flag.to_string_lossy(), home);
    }
    if let Some(env_root) = env_root.map(str::trim).filter(|s| !s.is_empty()) {
        return expand_tilde(env_root, home);
    }
    match home.filter(|h| !h.is_empty()) {
        Some(home) => Ok(Path::new(home).join(DEFAULT_ROOT_DIR)),
        None => Err(CanopyError::Config(format!(
            "cannot determine root: set {ROOT_ENV} or pass --root"
        ))),
    }
}

/// Expand a leading `~` using `home`.
fn expand_tilde(path: &str, home: Option<&str>) -> Result<PathBuf> {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => return Ok(PathBuf::from(path)),
    };
    let home = home
        .filter(|h| !h.is_empty())
        .ok_or_else(|| CanopyError::Config(format!("cannot expand {path}: HOME is not set")))?;
    Ok(PathBuf::from(format!("{home}{rest}")))
}
