use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use packsync_core::{
    conditional_flag_satisfied, is_newer, reconcile_all, PackageSet, RemoteConfig,
};

use crate::collaborators::{
    DependentModule, FlagPropagator, ManifestIo, RestartSignal, TagRegistry,
};
use crate::state::{LocalState, LocalStateStore, PhaseFlag};

pub struct PhaseEngine<'a> {
    pub store: &'a LocalStateStore,
    pub manifest_io: &'a dyn ManifestIo,
    pub flags: &'a dyn FlagPropagator,
    pub tags: &'a dyn TagRegistry,
    pub dependent: &'a dyn DependentModule,
    pub restart: &'a dyn RestartSignal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseStep {
    // the due phase re-verifies against the remote config, which is unavailable
    ConfigRequired,
    Completed { phase: PhaseFlag },
}

impl<'a> PhaseEngine<'a> {
    // runs at most the single lowest-priority pending phase; flag removal and
    // any coupled field change land in one durable write before the restart
    // request goes out
    pub fn run_next_pending(
        &self,
        state: &mut LocalState,
        config: Option<&RemoteConfig>,
    ) -> Result<Option<PhaseStep>> {
        let Some(phase) = state.next_pending_phase() else {
            return Ok(None);
        };

        match phase {
            PhaseFlag::ManifestRefresh => {
                let Some(config) = config else {
                    return Ok(Some(PhaseStep::ConfigRequired));
                };
                self.refresh_manifest(state, config)?;
            }
            PhaseFlag::FlagPropagation => {
                let Some(config) = config else {
                    return Ok(Some(PhaseStep::ConfigRequired));
                };
                self.propagate_flags(state, config)?;
            }
            PhaseFlag::DependentInit => self
                .dependent
                .initialize()
                .context("dependent module initialization failed")?,
            PhaseFlag::DependentSettingsUpdate => self
                .dependent
                .update_settings()
                .context("dependent settings update failed")?,
            PhaseFlag::DependentRebuild => self
                .dependent
                .rebuild()
                .context("dependent module rebuild failed")?,
        }

        state.pending_phase_flags.remove(&phase);
        if phase == PhaseFlag::DependentRebuild {
            state.applying_update = false;
        }
        self.store.save(state)?;

        // every phase effect only lands once the host reloads
        self.restart.request_restart()?;
        Ok(Some(PhaseStep::Completed { phase }))
    }

    // shared apply path for initial setup, accepted updates, and optional-set
    // installs: one manifest write, tag registration, version forward, and all
    // required phase flags seeded in a single persisted state write
    pub fn apply_sets(
        &self,
        state: &mut LocalState,
        config: &RemoteConfig,
        sets: &[&PackageSet],
        seed: BTreeSet<PhaseFlag>,
    ) -> Result<()> {
        let mut doc = self.manifest_io.read()?;
        if reconcile_all(&mut doc, sets.iter().copied()) {
            self.manifest_io.write(&doc)?;
        }

        for set in sets {
            for tag in &set.tags {
                self.tags
                    .ensure_tag_exists(tag)
                    .with_context(|| format!("failed to register project tag '{tag}'"))?;
            }
        }

        // the installed version only ever moves forward
        if state.installed_config_version.is_empty()
            || is_newer(&state.installed_config_version, &config.config_version)?
        {
            state.installed_config_version = config.config_version.clone();
        }
        state.pending_phase_flags.extend(seed);
        state.setup_complete = true;
        self.store.save(state)?;

        self.restart.request_restart()?;
        Ok(())
    }

    fn refresh_manifest(&self, state: &LocalState, config: &RemoteConfig) -> Result<()> {
        let mut doc = self.manifest_io.read()?;
        let sets = applied_sets(state, config);
        if reconcile_all(&mut doc, sets) {
            self.manifest_io.write(&doc)?;
        }
        Ok(())
    }

    fn propagate_flags(&self, state: &LocalState, config: &RemoteConfig) -> Result<()> {
        let doc = self.manifest_io.read()?;
        let manifest_text = doc.to_json_string()?;

        let mut decisions: BTreeMap<String, bool> = BTreeMap::new();
        for set in applied_sets(state, config) {
            for flag in &set.feature_flags {
                decisions.insert(flag.clone(), true);
            }
            for (flag, rule) in &set.conditional_flags {
                let satisfied = conditional_flag_satisfied(&manifest_text, rule);
                // an unconditional enable elsewhere wins over an unmet condition
                let entry = decisions.entry(flag.clone()).or_insert(satisfied);
                *entry = *entry || satisfied;
            }
        }

        for target in self.flags.targets() {
            for (flag, enabled) in &decisions {
                self.flags
                    .set_feature_flag(&target, flag, *enabled)
                    .with_context(|| {
                        format!("failed to propagate feature flag '{flag}' to target '{target}'")
                    })?;
            }
        }
        Ok(())
    }
}

pub(crate) fn applied_sets<'c>(state: &LocalState, config: &'c RemoteConfig) -> Vec<&'c PackageSet> {
    let mut sets = vec![&config.core_package_set];
    for name in &state.selected_optional_sets {
        // a selected set missing from the current config is skipped, not fatal
        if let Some(set) = config.optional_set(name) {
            sets.push(set);
        }
    }
    sets
}
