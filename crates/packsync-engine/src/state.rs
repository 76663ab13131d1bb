use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

// declaration order is execution priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseFlag {
    ManifestRefresh,
    FlagPropagation,
    DependentInit,
    DependentSettingsUpdate,
    DependentRebuild,
}

impl PhaseFlag {
    pub const PRIORITY_ORDER: [PhaseFlag; 5] = [
        PhaseFlag::ManifestRefresh,
        PhaseFlag::FlagPropagation,
        PhaseFlag::DependentInit,
        PhaseFlag::DependentSettingsUpdate,
        PhaseFlag::DependentRebuild,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ManifestRefresh => "manifest-refresh",
            Self::FlagPropagation => "flag-propagation",
            Self::DependentInit => "dependent-init",
            Self::DependentSettingsUpdate => "dependent-settings-update",
            Self::DependentRebuild => "dependent-rebuild",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "manifest-refresh" => Ok(Self::ManifestRefresh),
            "flag-propagation" => Ok(Self::FlagPropagation),
            "dependent-init" => Ok(Self::DependentInit),
            "dependent-settings-update" => Ok(Self::DependentSettingsUpdate),
            "dependent-rebuild" => Ok(Self::DependentRebuild),
            _ => Err(anyhow!("unknown phase flag: {value}")),
        }
    }

    pub fn full_apply_set() -> BTreeSet<PhaseFlag> {
        Self::PRIORITY_ORDER.into_iter().collect()
    }

    // dependent-module init and settings are one-time/full-apply work
    pub fn incremental_apply_set() -> BTreeSet<PhaseFlag> {
        [
            Self::ManifestRefresh,
            Self::FlagPropagation,
            Self::DependentRebuild,
        ]
        .into_iter()
        .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalState {
    #[serde(default)]
    pub setup_complete: bool,
    #[serde(default)]
    pub installed_config_version: String,
    #[serde(default)]
    pub config_update_available: bool,
    #[serde(default)]
    pub applying_update: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deferred_config_version: Option<String>,
    #[serde(default)]
    pub selected_optional_sets: BTreeSet<String>,
    #[serde(default)]
    pub pending_phase_flags: BTreeSet<PhaseFlag>,
}

impl LocalState {
    pub fn next_pending_phase(&self) -> Option<PhaseFlag> {
        self.pending_phase_flags.iter().next().copied()
    }
}

#[derive(Debug, Clone)]
pub struct LocalStateStore {
    path: PathBuf,
}

impl LocalStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<LocalState> {
        if !self.path.exists() {
            return Ok(LocalState::default());
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read local state: {}", self.path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse local state: {}", self.path.display()))
    }

    pub fn save(&self, state: &LocalState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let payload = toml::to_string_pretty(state).context("failed to serialize local state")?;

        // write-then-rename keeps the record whole across a mid-write kill
        let staging = self.path.with_extension("toml.tmp");
        fs::write(&staging, payload.as_bytes())
            .with_context(|| format!("failed to stage local state: {}", staging.display()))?;
        fs::rename(&staging, &self.path).with_context(|| {
            format!("failed to commit local state: {}", self.path.display())
        })?;
        Ok(())
    }
}
