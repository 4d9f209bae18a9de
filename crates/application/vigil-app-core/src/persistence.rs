use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;

use crate::domain::Settings;
use crate::ports::SettingsRepo;

const QUALIFIER: &str = "org";
const ORG: &str = "vigil";
const APP: &str = "vigil";

/// Settings stored as JSON in the platform config directory.
pub struct FilePersistence {
    base: Option<PathBuf>,
}

impl Default for FilePersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl FilePersistence {
    pub fn new() -> Self {
        Self { base: None }
    }

    /// Persistence rooted at `dir` instead of the platform config directory.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self {
            base: Some(dir.into()),
        }
    }

    fn config_dir(&self) -> Result<PathBuf> {
        let config_dir = match &self.base {
            Some(base) => base.clone(),
            None => ProjectDirs::from(QUALIFIER, ORG, APP)
                .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
                .config_dir()
                .to_path_buf(),
        };
        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)?;
        }
        Ok(config_dir)
    }

    pub fn settings_path(&self) -> Result<PathBuf> {
        Ok(self.config_dir()?.join("settings.json"))
    }

    pub fn load_settings(&self) -> Result<Settings> {
        let path = self.settings_path()?;
        if !path.exists() {
            return Ok(Settings::default());
        }
        let content = fs::read_to_string(&path).context("Failed to read settings")?;
        let settings: Settings = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(settings)
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        let path = self.settings_path()?;
        let json = serde_json::to_string_pretty(settings)?;
        atomic_write(&path, json.as_bytes()).context("Failed to write settings")?;
        Ok(())
    }
}

impl SettingsRepo for FilePersistence {
    fn load(&self) -> Result<Settings> {
        self.load_settings()
    }

    fn save(&self, settings: &Settings) -> Result<()> {
        self.save_settings(settings)
    }
}

fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp_path = {
        let mut name = path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    };

    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("Failed to create temp file {}", tmp_path.display()))?;
    file.write_all(contents)
        .with_context(|| format!("Failed to write temp file {}", tmp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync temp file {}", tmp_path.display()))?;
    drop(file);

    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "Failed to rename temp file {} to {}",
            tmp_path.display(),
            path.display()
        )
    })?;

    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}
