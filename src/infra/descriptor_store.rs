use crate::domain::ApplicationConfiguration;
use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const DESCRIPTOR_EXTENSION: &str = "json";

/// One JSON descriptor per application, named `<application>.json`
#[derive(Debug, Clone)]
pub struct DescriptorStore {
    dir: PathBuf,
}

impl DescriptorStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, application: &str) -> PathBuf {
        self.dir
            .join(format!("{application}.{DESCRIPTOR_EXTENSION}"))
    }

    pub fn save(&self, application: &str, config: &ApplicationConfiguration) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {:?}", self.dir))?;

        let path = self.path_for(application);
        let content = serde_json::to_string_pretty(config)
            .with_context(|| format!("serializing descriptor of {application}"))?;
        fs::write(&path, content).with_context(|| format!("writing {:?}", path))
    }

    pub fn load(&self, application: &str) -> Result<ApplicationConfiguration> {
        let path = self.path_for(application);
        let content =
            fs::read_to_string(&path).with_context(|| format!("reading {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("parsing {:?}", path))
    }

    /// Deleting a descriptor that does not exist is not an error.
    pub fn delete(&self, application: &str) -> Result<()> {
        let path = self.path_for(application);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {:?}", path)),
        }
    }

    /// Names of the persisted applications, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("listing {:?}", self.dir)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DESCRIPTOR_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }

        names.sort();
        Ok(names)
    }
}
