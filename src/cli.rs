pub mod down;
pub mod logs;
pub mod status;
pub mod up;
pub mod validate;

use anyhow::{Context, Result};
use dockyard::domain::{ApplicationConfiguration, ApplicationStatus};
use dockyard::infra::DescriptorStore;
use dockyard::infra::config::Settings;
use std::fs;
use std::path::{Path, PathBuf};

/// Reads a JSON descriptor, or YAML when the extension says so.
pub fn read_descriptor(path: &Path) -> Result<ApplicationConfiguration> {
    let content = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;

    match path.extension().and_then(|e| e.to_str()) {
        Some("yml") | Some("yaml") => {
            serde_yml::from_str(&content).with_context(|| format!("parsing {:?}", path))
        }
        _ => serde_json::from_str(&content).with_context(|| format!("parsing {:?}", path)),
    }
}

/// `--name`, else the descriptor's file stem
pub fn application_name(path: &Path, name: Option<String>) -> Result<String> {
    if let Some(name) = name {
        return Ok(name);
    }

    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .with_context(|| format!("cannot derive an application name from {:?}", path))
}

/// Directory relative volume sources of a descriptor resolve against
pub fn descriptor_dir(path: &Path) -> Result<PathBuf> {
    let path = fs::canonicalize(path).with_context(|| format!("resolving {:?}", path))?;
    Ok(path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/")))
}

pub fn descriptor_store(settings: &Settings, config_dir: &Path) -> DescriptorStore {
    DescriptorStore::new(settings.applications_dir(config_dir))
}

pub fn print_status(status: &ApplicationStatus) {
    println!("📦 {} (main goal: {})", status.name, status.main_goal);
    for goal in status.goals.values() {
        match goal.exit_code {
            Some(code) => println!("   {:<24} {} (exit {})", goal.name, goal.status, code),
            None => println!("   {:<24} {}", goal.name, goal.status),
        }
    }
}
