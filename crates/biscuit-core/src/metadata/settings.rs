//! User and project settings persisted as JSON.
//!
//! `Settings` holds application preferences; `ProjectSettings` holds the
//! per-project information used to generate a dataset README. Both live in
//! a settings directory (by default `<config dir>/biscuit`).

use crate::config::PathsConfig;
use crate::metadata::atomic::{atomic_read_json, atomic_write_json};
use crate::{BiscuitError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Application preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Settings {
    /// Show a reminder when raw files are associated with each other.
    pub show_assoc_message: bool,
    /// Destination used when sending a converted project to the archive.
    pub archive_path: Option<PathBuf>,
    /// Chunk frequency used when segmenting long recordings on conversion.
    pub chunk_freq: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            show_assoc_message: true,
            archive_path: None,
            chunk_freq: 2,
        }
    }
}

/// Information describing one research project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ProjectSettings {
    pub project_title: Option<String>,
    #[serde(rename = "ProjectID")]
    pub project_id: String,
    /// `[day, month, year]` as entered.
    pub start_date: Option<Vec<String>>,
    pub end_date: Option<Vec<String>>,
    pub description: Option<String>,
    pub groups: Vec<String>,
    /// Trigger channel -> event description.
    pub default_triggers: Vec<(String, String)>,
}

/// Loads and saves settings from a directory.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    dir: PathBuf,
}

impl SettingsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted in the platform config directory.
    pub fn user_default() -> Result<Self> {
        let base = dirs::config_dir().ok_or_else(|| {
            BiscuitError::Other("Could not determine the user config directory".to_string())
        })?;
        Ok(Self::new(base.join(PathsConfig::CONFIG_DIR_NAME)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load settings, falling back to defaults when none are saved.
    pub fn load_settings(&self) -> Result<Settings> {
        let path = self.dir.join(PathsConfig::SETTINGS_FILENAME);
        Ok(atomic_read_json(&path)?.unwrap_or_default())
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        let path = self.dir.join(PathsConfig::SETTINGS_FILENAME);
        debug!("Saving settings to {}", path.display());
        atomic_write_json(&path, settings, true)
    }

    /// All saved project settings keyed by project id.
    pub fn load_projects(&self) -> Result<BTreeMap<String, ProjectSettings>> {
        let path = self.dir.join(PathsConfig::PROJECT_SETTINGS_FILENAME);
        let projects: Option<Vec<ProjectSettings>> = atomic_read_json(&path)?;
        Ok(projects
            .unwrap_or_default()
            .into_iter()
            .map(|p| (p.project_id.clone(), p))
            .collect())
    }

    pub fn project(&self, project_id: &str) -> Result<Option<ProjectSettings>> {
        Ok(self.load_projects()?.remove(project_id))
    }

    /// Insert or replace the settings of one project.
    pub fn save_project(&self, project: &ProjectSettings) -> Result<()> {
        if project.project_id.trim().is_empty() {
            return Err(BiscuitError::Validation {
                field: "ProjectID".to_string(),
                message: "project id must not be empty".to_string(),
            });
        }
        let mut projects = self.load_projects()?;
        projects.insert(project.project_id.clone(), project.clone());
        let list: Vec<&ProjectSettings> = projects.values().collect();
        let path = self.dir.join(PathsConfig::PROJECT_SETTINGS_FILENAME);
        atomic_write_json(&path, &list, true)
    }
}
