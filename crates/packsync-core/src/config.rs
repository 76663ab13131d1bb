use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::version::compare_versions;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    pub config_version: String,
    #[serde(default)]
    pub core_package_set: PackageSet,
    #[serde(default)]
    pub optional_package_sets: BTreeMap<String, PackageSet>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSet {
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub scoped_registries: Vec<ScopedRegistry>,
    #[serde(default)]
    pub feature_flags: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub conditional_flags: BTreeMap<String, ConditionalFlag>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopedRegistry {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalFlag {
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub match_any: bool,
}

impl RemoteConfig {
    pub fn from_json_str(input: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(input).context("failed to parse remote config document")?;

        compare_versions(&config.config_version, &config.config_version)
            .context("remote config carries an unusable configVersion")?;

        validate_package_set(&config.core_package_set).context("invalid core package set")?;
        for (name, set) in &config.optional_package_sets {
            if name.trim().is_empty() {
                return Err(anyhow!("optional package set with empty name"));
            }
            validate_package_set(set)
                .with_context(|| format!("invalid optional package set '{name}'"))?;
        }

        Ok(config)
    }

    pub fn optional_set(&self, name: &str) -> Option<&PackageSet> {
        self.optional_package_sets.get(name)
    }

    pub fn optional_set_names(&self) -> Vec<String> {
        self.optional_package_sets.keys().cloned().collect()
    }
}

fn validate_package_set(set: &PackageSet) -> Result<()> {
    for (name, version) in &set.dependencies {
        if name.trim().is_empty() {
            return Err(anyhow!("dependency with empty name"));
        }
        if version.trim().is_empty() {
            return Err(anyhow!("dependency '{name}' has an empty version"));
        }
    }

    for registry in &set.scoped_registries {
        if registry.name.trim().is_empty() {
            return Err(anyhow!("scoped registry with empty name"));
        }
        if registry.url.trim().is_empty() {
            return Err(anyhow!(
                "scoped registry '{}' has an empty url",
                registry.name
            ));
        }
    }

    for flag in &set.feature_flags {
        if flag.trim().is_empty() {
            return Err(anyhow!("feature flag with empty name"));
        }
    }

    for flag in set.conditional_flags.keys() {
        if flag.trim().is_empty() {
            return Err(anyhow!("conditional flag with empty name"));
        }
    }

    Ok(())
}
