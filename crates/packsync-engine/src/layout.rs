use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(".packsync")
    }

    pub fn state_file_path(&self) -> PathBuf {
        self.state_dir().join("state.toml")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.state_dir().join("cache")
    }

    pub fn cached_config_path(&self) -> PathBuf {
        self.cache_dir().join("remote-config.json")
    }

    pub fn settings_dir(&self) -> PathBuf {
        self.state_dir().join("settings")
    }

    pub fn feature_flags_path(&self, target: &str) -> PathBuf {
        self.settings_dir().join(format!("features-{target}.toml"))
    }

    pub fn tags_path(&self) -> PathBuf {
        self.settings_dir().join("tags.toml")
    }

    pub fn restart_marker_path(&self) -> PathBuf {
        self.state_dir().join("restart-pending")
    }

    pub fn default_manifest_path(&self) -> PathBuf {
        self.root.join("packages").join("manifest.json")
    }

    pub fn project_config_path(&self) -> PathBuf {
        self.root.join("packsync.toml")
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [self.state_dir(), self.cache_dir(), self.settings_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}
