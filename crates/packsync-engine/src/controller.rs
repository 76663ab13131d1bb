use anyhow::{Context, Result};
use packsync_core::{is_newer, RemoteConfig};

use crate::collaborators::{ConfigSource, OperatorPrompt, UpdateDecision};
use crate::phases::{applied_sets, PhaseEngine, PhaseStep};
use crate::state::{LocalState, LocalStateStore, PhaseFlag};

pub struct ReconciliationController<'a> {
    store: &'a LocalStateStore,
    config_source: &'a dyn ConfigSource,
    prompt: &'a dyn OperatorPrompt,
    engine: PhaseEngine<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    // setup has never run and no remote config is reachable yet
    AwaitingRemoteConfig,
    ConfigUnavailable,
    PhaseCompleted {
        phase: PhaseFlag,
        remaining: usize,
    },
    SetupApplied {
        version: String,
        skipped_sets: Vec<String>,
    },
    UpdateApplied {
        version: String,
    },
    UpdateDeferred {
        offered: String,
    },
    Settled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    ConfigUnavailable,
    SetupRequired,
    UnknownSet {
        name: String,
        available: Vec<String>,
    },
    Applied {
        name: String,
    },
}

impl<'a> ReconciliationController<'a> {
    pub fn new(
        store: &'a LocalStateStore,
        config_source: &'a dyn ConfigSource,
        prompt: &'a dyn OperatorPrompt,
        engine: PhaseEngine<'a>,
    ) -> Self {
        Self {
            store,
            config_source,
            prompt,
            engine,
        }
    }

    pub fn on_tick(&self) -> Result<TickOutcome> {
        let mut state = self.store.load()?;
        let config = self.config_source.fetch()?;

        if !state.pending_phase_flags.is_empty() {
            return self.advance_phases(&mut state, config.as_ref());
        }

        let Some(config) = config else {
            return Ok(if state.setup_complete {
                TickOutcome::ConfigUnavailable
            } else {
                TickOutcome::AwaitingRemoteConfig
            });
        };

        if !state.setup_complete {
            return self.apply_initial_setup(&mut state, &config);
        }

        self.check_for_drift(&mut state, &config)
    }

    // resumption after a restart is just the normal priority evaluation;
    // leftover pending flags from the prior lifetime are picked up here
    pub fn on_reentry(&self) -> Result<TickOutcome> {
        self.on_tick()
    }

    pub fn install_optional_set(&self, name: &str) -> Result<InstallOutcome> {
        let mut state = self.store.load()?;
        let Some(config) = self.config_source.fetch()? else {
            return Ok(InstallOutcome::ConfigUnavailable);
        };

        if !state.setup_complete {
            return Ok(InstallOutcome::SetupRequired);
        }

        let Some(set) = config.optional_set(name) else {
            return Ok(InstallOutcome::UnknownSet {
                name: name.to_string(),
                available: config.optional_set_names(),
            });
        };

        state.selected_optional_sets.insert(name.to_string());
        self.engine.apply_sets(
            &mut state,
            &config,
            &[set],
            PhaseFlag::incremental_apply_set(),
        )?;
        Ok(InstallOutcome::Applied {
            name: name.to_string(),
        })
    }

    fn advance_phases(
        &self,
        state: &mut LocalState,
        config: Option<&RemoteConfig>,
    ) -> Result<TickOutcome> {
        match self.engine.run_next_pending(state, config)? {
            None => Ok(TickOutcome::Settled),
            Some(PhaseStep::ConfigRequired) => Ok(TickOutcome::ConfigUnavailable),
            Some(PhaseStep::Completed { phase }) => Ok(TickOutcome::PhaseCompleted {
                phase,
                remaining: state.pending_phase_flags.len(),
            }),
        }
    }

    fn apply_initial_setup(
        &self,
        state: &mut LocalState,
        config: &RemoteConfig,
    ) -> Result<TickOutcome> {
        let available = config.optional_set_names();
        let selected = self.prompt.select_optional_sets(&available)?;

        let mut skipped_sets = Vec::new();
        for name in selected {
            if config.optional_set(&name).is_some() {
                state.selected_optional_sets.insert(name);
            } else {
                skipped_sets.push(name);
            }
        }

        state.applying_update = false;
        let sets = applied_sets(state, config);
        self.engine
            .apply_sets(state, config, &sets, PhaseFlag::full_apply_set())?;
        Ok(TickOutcome::SetupApplied {
            version: config.config_version.clone(),
            skipped_sets,
        })
    }

    fn check_for_drift(&self, state: &mut LocalState, config: &RemoteConfig) -> Result<TickOutcome> {
        let drifted = is_newer(&state.installed_config_version, &config.config_version)
            .context("configuration drift check aborted")?;
        if !drifted {
            return Ok(TickOutcome::Settled);
        }

        // a deferral holds until the remote version moves past it, unless
        // the operator gave an explicit answer this invocation
        if state.config_update_available
            && state.deferred_config_version.as_deref() == Some(config.config_version.as_str())
            && !self.prompt.has_explicit_answer()
        {
            return Ok(TickOutcome::UpdateDeferred {
                offered: config.config_version.clone(),
            });
        }

        match self
            .prompt
            .decide_update(&state.installed_config_version, &config.config_version)?
        {
            UpdateDecision::Accept => {
                state.applying_update = true;
                state.config_update_available = false;
                state.deferred_config_version = None;
                // update re-applies against the currently selected sets, no re-prompt
                let sets = applied_sets(state, config);
                self.engine
                    .apply_sets(state, config, &sets, PhaseFlag::full_apply_set())?;
                Ok(TickOutcome::UpdateApplied {
                    version: config.config_version.clone(),
                })
            }
            UpdateDecision::Defer => {
                state.config_update_available = true;
                state.deferred_config_version = Some(config.config_version.clone());
                self.store.save(state)?;
                Ok(TickOutcome::UpdateDeferred {
                    offered: config.config_version.clone(),
                })
            }
        }
    }
}
