use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use packsync_engine::ProjectLayout;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_config_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<String>,
    #[serde(default = "default_targets")]
    pub targets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub releases_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_release_url: Option<String>,
    #[serde(default, skip_serializing_if = "Hooks::is_empty")]
    pub hooks: Hooks,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hooks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependent_init: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependent_settings_update: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependent_rebuild: Option<String>,
}

impl Hooks {
    pub fn is_empty(&self) -> bool {
        self.dependent_init.is_none()
            && self.dependent_settings_update.is_none()
            && self.dependent_rebuild.is_none()
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            remote_config_url: None,
            manifest_path: None,
            targets: default_targets(),
            releases_url: None,
            latest_release_url: None,
            hooks: Hooks::default(),
        }
    }
}

impl ProjectConfig {
    pub fn load(layout: &ProjectLayout) -> Result<Self> {
        let path = layout.project_config_path();
        if !path.exists() {
            return Err(anyhow!(
                "no packsync.toml found at {}: run 'packsync init' first",
                path.display()
            ));
        }

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read project config: {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse project config: {}", path.display()))
    }

    pub fn write_template(layout: &ProjectLayout, remote: Option<&str>) -> Result<PathBuf> {
        let path = layout.project_config_path();
        if path.exists() {
            return Err(anyhow!(
                "project config already exists: {}",
                path.display()
            ));
        }

        let remote_line = match remote {
            Some(url) => format!("remote_config_url = \"{url}\"\n"),
            None => "# remote_config_url = \"https://example.test/appconfig/packsync.json\"\n"
                .to_string(),
        };
        let template = format!(
            "# packsync project configuration\n{remote_line}# manifest_path = \"packages/manifest.json\"\ntargets = [\"standalone\"]\n# releases_url = \"https://example.test/releases\"\n# latest_release_url = \"https://example.test/releases/latest.json\"\n\n# Optional commands run for the dependent-module phases, from the project root.\n# [hooks]\n# dependent_init = \"make module-init\"\n# dependent_settings_update = \"make module-settings\"\n# dependent_rebuild = \"make module-rebuild\"\n"
        );
        fs::write(&path, template.as_bytes())
            .with_context(|| format!("failed to write project config: {}", path.display()))?;
        Ok(path)
    }

    pub fn resolve_manifest_path(&self, layout: &ProjectLayout) -> PathBuf {
        match &self.manifest_path {
            Some(relative) => layout.root().join(relative),
            None => layout.default_manifest_path(),
        }
    }
}

fn default_targets() -> Vec<String> {
    vec!["standalone".to_string()]
}
