//! Host configuration.
//!
//! A single TOML file configures both binaries. A missing file yields the
//! defaults; an unparseable file logs a warning and also yields the
//! defaults, so a bad edit never bricks the session.

use log::{debug, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/droidhost/droidhost.toml";
pub const DEFAULT_CONTAINER_NAME: &str = "droidhost";
pub const DEFAULT_REPO_CONFIG_DIR: &str = "/usr/lib/droidhost-store/repos";

/// What the guest's suspend request maps to on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuspendAction {
    /// Freeze the container cgroup; the session survives.
    #[default]
    Freeze,
    /// Tear the whole session down.
    Stop,
}

/// Raw on-disk layout of `droidhost.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub droidhost: HostSection,
    #[serde(default)]
    pub store: StoreSection,
    /// Host-side property overrides consulted before `getprop`.
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostSection {
    pub container_name: String,
    pub suspend_action: SuspendAction,
    /// Binary printing `WIDTHxHEIGHT` for the active output, if any.
    pub display_probe: Option<PathBuf>,
    /// Command emitting `lat lon alt` fixes on stdout for the tracker.
    pub location_provider: Option<String>,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            container_name: DEFAULT_CONTAINER_NAME.to_string(),
            suspend_action: SuspendAction::default(),
            display_probe: None,
            location_provider: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub repo_config_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub download_dir: Option<PathBuf>,
}

/// Resolved configuration with all paths filled in.
#[derive(Debug, Clone)]
pub struct Config {
    pub container_name: String,
    pub suspend_action: SuspendAction,
    pub display_probe: Option<PathBuf>,
    pub location_provider: Option<String>,
    pub properties: HashMap<String, String>,
    pub store: StoreConfig,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub repo_config_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub download_dir: PathBuf,
}

impl From<ConfigFile> for Config {
    fn from(file: ConfigFile) -> Self {
        let cache_root = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("droidhost-store");
        Self {
            container_name: file.droidhost.container_name,
            suspend_action: file.droidhost.suspend_action,
            display_probe: file.droidhost.display_probe,
            location_provider: file.droidhost.location_provider,
            properties: file.properties,
            store: StoreConfig {
                repo_config_dir: file
                    .store
                    .repo_config_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_REPO_CONFIG_DIR)),
                cache_dir: file
                    .store
                    .cache_dir
                    .unwrap_or_else(|| cache_root.join("repo")),
                download_dir: file
                    .store
                    .download_dir
                    .unwrap_or_else(|| cache_root.join("downloads")),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        ConfigFile::default().into()
    }
}

/// Load the configuration from `path`, falling back to defaults.
pub fn load(path: &Path) -> Config {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            debug!("no config at {}: {e}, using defaults", path.display());
            return Config::default();
        }
    };

    match toml::from_str::<ConfigFile>(&contents) {
        Ok(file) => file.into(),
        Err(e) => {
            warn!(
                "could not parse {}: {e}, falling back to defaults",
                path.display()
            );
            Config::default()
        }
    }
}
