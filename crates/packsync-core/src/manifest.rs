use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{ConditionalFlag, PackageSet, ScopedRegistry};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDoc {
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scoped_registries: Vec<ScopedRegistry>,
    // unrelated top-level keys survive a reconcile/write cycle untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ManifestDoc {
    pub fn from_json_str(input: &str) -> Result<Self> {
        serde_json::from_str(input).context("failed to parse project manifest")
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize project manifest")
    }
}

pub fn reconcile(doc: &mut ManifestDoc, set: &PackageSet) -> bool {
    let mut changed = false;

    for registry in &set.scoped_registries {
        let present = doc
            .scoped_registries
            .iter()
            .any(|existing| existing.name == registry.name || existing.url == registry.url);
        if !present {
            doc.scoped_registries.push(registry.clone());
            changed = true;
        }
    }

    for (name, version) in &set.dependencies {
        match doc.dependencies.get(name) {
            Some(existing) if existing == version => {}
            _ => {
                doc.dependencies.insert(name.clone(), version.clone());
                changed = true;
            }
        }
    }

    changed
}

pub fn reconcile_all<'a>(
    doc: &mut ManifestDoc,
    sets: impl IntoIterator<Item = &'a PackageSet>,
) -> bool {
    let mut changed = false;
    for set in sets {
        changed |= reconcile(doc, set);
    }
    changed
}

pub fn conditional_flag_satisfied(manifest_text: &str, rule: &ConditionalFlag) -> bool {
    if rule.requirements.is_empty() {
        return false;
    }

    if rule.match_any {
        rule.requirements
            .iter()
            .any(|needle| manifest_text.contains(needle.as_str()))
    } else {
        rule.requirements
            .iter()
            .all(|needle| manifest_text.contains(needle.as_str()))
    }
}
