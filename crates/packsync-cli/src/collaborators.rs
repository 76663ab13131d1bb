use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use packsync_core::ManifestDoc;
use packsync_engine::{
    FlagPropagator, ManifestIo, OperatorPrompt, ProjectLayout, RestartSignal, TagRegistry,
    UpdateDecision,
};
use serde::{Deserialize, Serialize};

pub struct FsManifestIo {
    path: PathBuf,
}

impl FsManifestIo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ManifestIo for FsManifestIo {
    fn read(&self) -> Result<ManifestDoc> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            // a fresh project has no manifest yet; the first apply creates it
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(ManifestDoc::default())
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read project manifest: {}", self.path.display())
                });
            }
        };
        ManifestDoc::from_json_str(&raw)
            .with_context(|| format!("failed to parse project manifest: {}", self.path.display()))
    }

    fn write(&self, doc: &ManifestDoc) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let payload = doc.to_json_string()?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, payload.as_bytes())
            .with_context(|| format!("failed to stage project manifest: {}", staging.display()))?;
        fs::rename(&staging, &self.path).with_context(|| {
            format!("failed to commit project manifest: {}", self.path.display())
        })?;
        Ok(())
    }
}

pub struct FsFlagPropagator {
    layout: ProjectLayout,
    targets: Vec<String>,
}

impl FsFlagPropagator {
    pub fn new(layout: ProjectLayout, targets: Vec<String>) -> Self {
        Self { layout, targets }
    }
}

impl FlagPropagator for FsFlagPropagator {
    fn targets(&self) -> Vec<String> {
        self.targets.clone()
    }

    fn set_feature_flag(&self, target: &str, name: &str, enabled: bool) -> Result<()> {
        let path = self.layout.feature_flags_path(target);
        let mut flags: BTreeMap<String, bool> = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read feature flags: {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("failed to parse feature flags: {}", path.display()))?
        } else {
            BTreeMap::new()
        };

        if flags.get(name) == Some(&enabled) {
            return Ok(());
        }
        flags.insert(name.to_string(), enabled);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let payload = toml::to_string_pretty(&flags).context("failed to serialize feature flags")?;
        fs::write(&path, payload.as_bytes())
            .with_context(|| format!("failed to write feature flags: {}", path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct TagsFile {
    #[serde(default)]
    tags: BTreeSet<String>,
}

pub struct FsTagRegistry {
    layout: ProjectLayout,
}

impl FsTagRegistry {
    pub fn new(layout: ProjectLayout) -> Self {
        Self { layout }
    }
}

impl TagRegistry for FsTagRegistry {
    fn ensure_tag_exists(&self, tag: &str) -> Result<()> {
        let path = self.layout.tags_path();
        let mut file: TagsFile = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read project tags: {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("failed to parse project tags: {}", path.display()))?
        } else {
            TagsFile::default()
        };

        if !file.tags.insert(tag.to_string()) {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let payload = toml::to_string_pretty(&file).context("failed to serialize project tags")?;
        fs::write(&path, payload.as_bytes())
            .with_context(|| format!("failed to write project tags: {}", path.display()))?;
        Ok(())
    }
}

pub struct FileRestartSignal {
    layout: ProjectLayout,
}

impl FileRestartSignal {
    pub fn new(layout: ProjectLayout) -> Self {
        Self { layout }
    }
}

impl RestartSignal for FileRestartSignal {
    fn request_restart(&self) -> Result<()> {
        let path = self.layout.restart_marker_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&path, b"restart pending\n")
            .with_context(|| format!("failed to write restart marker: {}", path.display()))?;
        Ok(())
    }
}

pub fn restart_marker_present(layout: &ProjectLayout) -> bool {
    layout.restart_marker_path().exists()
}

// returns true when a prior lifetime left a restart request behind,
// i.e. this invocation is a re-entry
pub fn clear_restart_marker(layout: &ProjectLayout) -> Result<bool> {
    let path = layout.restart_marker_path();
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(&path)
        .with_context(|| format!("failed to clear restart marker: {}", path.display()))?;
    Ok(true)
}

pub struct CliPrompt {
    pub accept_updates: Option<bool>,
    pub with_sets: Vec<String>,
}

impl CliPrompt {
    pub fn non_interactive() -> Self {
        Self {
            accept_updates: None,
            with_sets: Vec::new(),
        }
    }
}

impl OperatorPrompt for CliPrompt {
    fn select_optional_sets(&self, _available: &[String]) -> Result<Vec<String>> {
        Ok(self.with_sets.clone())
    }

    fn decide_update(&self, _installed: &str, _offered: &str) -> Result<UpdateDecision> {
        // without an explicit --accept the safe answer is to defer
        Ok(match self.accept_updates {
            Some(true) => UpdateDecision::Accept,
            _ => UpdateDecision::Defer,
        })
    }

    fn has_explicit_answer(&self) -> bool {
        self.accept_updates.is_some()
    }
}
