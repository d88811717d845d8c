//! Persisted key/value settings
//!
//! Remembers the last server url and filter between runs in a flat TOML
//! table.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const SERVER_URL: &str = "server_url";
pub const CATEGORY: &str = "category";
pub const LEVEL: &str = "level";

/// Key/value settings storage
pub trait SettingsStore {
    fn get(&self, key: &str) -> Option<String>;

    /// Store a value, persisting it immediately
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
struct SettingsFile {
    values: BTreeMap<String, String>,
}

/// Settings kept in a TOML file
#[derive(Debug)]
pub struct TomlSettings {
    path: PathBuf,
    file: SettingsFile,
}

impl TomlSettings {
    /// Load settings from `path`; a missing file yields empty settings
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = match fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content)
                .with_context(|| format!("Invalid settings file {}", path.display()))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => SettingsFile::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(&self.file).context("Failed to encode settings")?;
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

impl SettingsStore for TomlSettings {
    fn get(&self, key: &str) -> Option<String> {
        self.file.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.file.values.insert(key.to_string(), value.to_string());
        self.save()
    }
}
