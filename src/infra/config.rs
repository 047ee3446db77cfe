use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const SETTINGS_FILE_NAME: &str = "dockyard.toml";
pub const DEFAULT_RUNTIME_BINARY: &str = "podman";
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub fn default_config_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/root"))
        .join(".config/dockyard")
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Docker-compatible CLI to drive (`podman`, `docker`, a full path...)
    pub binary: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub applications_dir: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct GoalsConfig {
    pub transition_log_length: Option<usize>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct Settings {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub goals: GoalsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Settings {
    /// Values present in `other` win.
    pub fn merge(&mut self, other: Settings) {
        if let Some(binary) = other.runtime.binary {
            self.runtime.binary = Some(binary);
        }
        if let Some(dir) = other.storage.applications_dir {
            self.storage.applications_dir = Some(dir);
        }
        if let Some(length) = other.goals.transition_log_length {
            self.goals.transition_log_length = Some(length);
        }
        if let Some(level) = other.logging.level {
            self.logging.level = Some(level);
        }
    }

    pub fn runtime_binary(&self) -> &str {
        self.runtime
            .binary
            .as_deref()
            .unwrap_or(DEFAULT_RUNTIME_BINARY)
    }

    /// `[storage] applications_dir` with `~` expanded, else `<config_dir>/applications`
    pub fn applications_dir(&self, config_dir: &Path) -> PathBuf {
        match &self.storage.applications_dir {
            Some(dir) => PathBuf::from(shellexpand::tilde(dir).into_owned()),
            None => config_dir.join("applications"),
        }
    }

    pub fn transition_log_length(&self) -> Option<usize> {
        self.goals.transition_log_length.filter(|n| *n > 0)
    }

    pub fn log_level(&self) -> &str {
        self.logging.level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }
}

/// Loads `<config_dir>/dockyard.toml`, then overlays `./dockyard.toml` when present.
pub fn load_settings(config_dir: &Path) -> Result<Settings> {
    load_settings_from(config_dir, Path::new("./"))
}

fn load_settings_from(config_dir: &Path, local_dir: &Path) -> Result<Settings> {
    let mut settings = Settings::default();

    let global_path = config_dir.join(SETTINGS_FILE_NAME);
    if global_path.exists() {
        settings = read_settings(&global_path, "global")?;
    }

    let local_path = local_dir.join(SETTINGS_FILE_NAME);
    if local_path.exists() {
        settings.merge(read_settings(&local_path, "local")?);
    }

    Ok(settings)
}

fn read_settings(path: &Path, scope: &str) -> Result<Settings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading {scope} config at {:?}", path))?;
    toml::from_str(&content).with_context(|| format!("parsing {scope} config at {:?}", path))
}
