use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Result};
use packsync_core::{ManifestDoc, RemoteConfig};

use crate::{
    ConfigSource, DependentModule, FlagPropagator, InstallOutcome, LocalState, LocalStateStore,
    ManifestIo, OperatorPrompt, PhaseEngine, PhaseFlag, ProjectLayout, ReconciliationController,
    RestartSignal, TagRegistry, TickOutcome, UpdateDecision,
};

static TEST_DIR_SEQ: AtomicU64 = AtomicU64::new(0);

fn temp_state_file(label: &str) -> PathBuf {
    let seq = TEST_DIR_SEQ.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir()
        .join(format!(
            "packsync-engine-test-{}-{label}-{seq}",
            std::process::id()
        ))
        .join("state.toml")
}

struct MemManifest {
    doc: RefCell<ManifestDoc>,
    writes: Cell<usize>,
    fail_reads: Cell<bool>,
    // the write lands, then the tick dies before the state record follows
    die_after_next_write: Cell<bool>,
}

impl MemManifest {
    fn new() -> Self {
        Self {
            doc: RefCell::new(ManifestDoc::default()),
            writes: Cell::new(0),
            fail_reads: Cell::new(false),
            die_after_next_write: Cell::new(false),
        }
    }
}

impl ManifestIo for MemManifest {
    fn read(&self) -> Result<ManifestDoc> {
        if self.fail_reads.get() {
            return Err(anyhow!("manifest unavailable"));
        }
        Ok(self.doc.borrow().clone())
    }

    fn write(&self, doc: &ManifestDoc) -> Result<()> {
        *self.doc.borrow_mut() = doc.clone();
        self.writes.set(self.writes.get() + 1);
        if self.die_after_next_write.get() {
            self.die_after_next_write.set(false);
            return Err(anyhow!("process terminated"));
        }
        Ok(())
    }
}

#[derive(Default)]
struct MemFlags {
    calls: RefCell<Vec<(String, String, bool)>>,
}

impl FlagPropagator for MemFlags {
    fn targets(&self) -> Vec<String> {
        vec!["standalone".to_string()]
    }

    fn set_feature_flag(&self, target: &str, name: &str, enabled: bool) -> Result<()> {
        self.calls
            .borrow_mut()
            .push((target.to_string(), name.to_string(), enabled));
        Ok(())
    }
}

#[derive(Default)]
struct MemTags {
    tags: RefCell<BTreeSet<String>>,
}

impl TagRegistry for MemTags {
    fn ensure_tag_exists(&self, tag: &str) -> Result<()> {
        self.tags.borrow_mut().insert(tag.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct MemDependent {
    events: RefCell<Vec<&'static str>>,
}

impl DependentModule for MemDependent {
    fn initialize(&self) -> Result<()> {
        self.events.borrow_mut().push("initialize");
        Ok(())
    }

    fn update_settings(&self) -> Result<()> {
        self.events.borrow_mut().push("update_settings");
        Ok(())
    }

    fn rebuild(&self) -> Result<()> {
        self.events.borrow_mut().push("rebuild");
        Ok(())
    }
}

#[derive(Default)]
struct MemRestart {
    requests: Cell<usize>,
}

impl RestartSignal for MemRestart {
    fn request_restart(&self) -> Result<()> {
        self.requests.set(self.requests.get() + 1);
        Ok(())
    }
}

struct MemConfigSource {
    config: Option<RemoteConfig>,
}

impl ConfigSource for MemConfigSource {
    fn fetch(&self) -> Result<Option<RemoteConfig>> {
        Ok(self.config.clone())
    }
}

struct MemPrompt {
    selection: Vec<String>,
    decision: UpdateDecision,
    explicit: bool,
}

impl MemPrompt {
    fn silent() -> Self {
        Self {
            selection: Vec::new(),
            decision: UpdateDecision::Defer,
            explicit: false,
        }
    }
}

impl OperatorPrompt for MemPrompt {
    fn select_optional_sets(&self, _available: &[String]) -> Result<Vec<String>> {
        Ok(self.selection.clone())
    }

    fn decide_update(&self, _installed: &str, _offered: &str) -> Result<UpdateDecision> {
        Ok(self.decision)
    }

    fn has_explicit_answer(&self) -> bool {
        self.explicit
    }
}

struct Harness {
    store: LocalStateStore,
    manifest: MemManifest,
    flags: MemFlags,
    tags: MemTags,
    dependent: MemDependent,
    restart: MemRestart,
    source: MemConfigSource,
    prompt: MemPrompt,
}

impl Harness {
    fn new(label: &str, config: Option<RemoteConfig>) -> Self {
        Self {
            store: LocalStateStore::new(temp_state_file(label)),
            manifest: MemManifest::new(),
            flags: MemFlags::default(),
            tags: MemTags::default(),
            dependent: MemDependent::default(),
            restart: MemRestart::default(),
            source: MemConfigSource { config },
            prompt: MemPrompt::silent(),
        }
    }

    fn tick(&self) -> Result<TickOutcome> {
        self.controller().on_tick()
    }

    fn reenter(&self) -> Result<TickOutcome> {
        self.controller().on_reentry()
    }

    fn controller(&self) -> ReconciliationController<'_> {
        ReconciliationController::new(
            &self.store,
            &self.source,
            &self.prompt,
            PhaseEngine {
                store: &self.store,
                manifest_io: &self.manifest,
                flags: &self.flags,
                tags: &self.tags,
                dependent: &self.dependent,
                restart: &self.restart,
            },
        )
    }

    fn state(&self) -> LocalState {
        self.store.load().expect("must load state")
    }
}

fn core_config(version: &str) -> RemoteConfig {
    RemoteConfig::from_json_str(&format!(
        r#"{{
            "configVersion": "{version}",
            "corePackageSet": {{
                "dependencies": {{"pkg.core": "2.0.0"}},
                "featureFlags": ["CORE_READY"],
                "tags": ["managed"],
                "conditionalFlags": {{
                    "HAS_EXTRAS": {{"requirements": ["pkg.extras"], "matchAny": true}}
                }}
            }},
            "optionalPackageSets": {{
                "extras": {{"dependencies": {{"pkg.extras": "0.3.0"}}}}
            }}
        }}"#
    ))
    .expect("config must parse")
}

#[test]
fn phase_flags_round_trip_their_tokens() {
    for flag in PhaseFlag::PRIORITY_ORDER {
        assert_eq!(PhaseFlag::parse(flag.as_str()).expect("must parse"), flag);
    }
    assert!(PhaseFlag::parse("needs-coffee").is_err());
}

#[test]
fn load_returns_defaults_when_no_record_exists() {
    let store = LocalStateStore::new(temp_state_file("fresh-load"));
    let state = store.load().expect("must load");
    assert_eq!(state, LocalState::default());
    assert!(!state.setup_complete);
    assert!(state.pending_phase_flags.is_empty());
}

#[test]
fn state_round_trips_through_disk() {
    let store = LocalStateStore::new(temp_state_file("round-trip"));
    let mut state = LocalState::default();
    state.setup_complete = true;
    state.installed_config_version = "1.2.0".to_string();
    state.deferred_config_version = Some("1.3.0".to_string());
    state.selected_optional_sets.insert("extras".to_string());
    state.pending_phase_flags.insert(PhaseFlag::FlagPropagation);
    state
        .pending_phase_flags
        .insert(PhaseFlag::DependentRebuild);

    store.save(&state).expect("must save");
    assert_eq!(store.load().expect("must load"), state);
}

#[test]
fn old_records_load_with_additive_defaults() {
    let state: LocalState = toml::from_str(
        "setup_complete = true\ninstalled_config_version = \"1.0.0\"\n",
    )
    .expect("must parse");
    assert!(state.setup_complete);
    assert!(state.deferred_config_version.is_none());
    assert!(state.pending_phase_flags.is_empty());
}

#[test]
fn fresh_project_applies_core_set_and_requests_restart() {
    let harness = Harness::new("fresh-apply", Some(core_config("1.0.0")));

    let outcome = harness.tick().expect("tick must succeed");
    assert_eq!(
        outcome,
        TickOutcome::SetupApplied {
            version: "1.0.0".to_string(),
            skipped_sets: Vec::new(),
        }
    );

    let manifest = harness.manifest.doc.borrow();
    assert_eq!(
        manifest.dependencies.get("pkg.core"),
        Some(&"2.0.0".to_string())
    );
    drop(manifest);

    let state = harness.state();
    assert!(state.setup_complete);
    assert_eq!(state.installed_config_version, "1.0.0");
    assert!(!state.pending_phase_flags.is_empty());
    assert!(harness.restart.requests.get() >= 1);
    assert!(harness.tags.tags.borrow().contains("managed"));
}

#[test]
fn uninitialized_project_waits_for_remote_config() {
    let harness = Harness::new("await-config", None);
    assert_eq!(
        harness.tick().expect("tick must succeed"),
        TickOutcome::AwaitingRemoteConfig
    );
    assert_eq!(harness.state(), LocalState::default());
}

#[test]
fn drift_is_deferred_and_rearms_only_on_version_bump() {
    let mut harness = Harness::new("drift-defer", Some(core_config("1.1.0")));
    let mut state = LocalState::default();
    state.setup_complete = true;
    state.installed_config_version = "1.0.0".to_string();
    harness.store.save(&state).expect("must save");

    // operator defers
    assert_eq!(
        harness.tick().expect("tick must succeed"),
        TickOutcome::UpdateDeferred {
            offered: "1.1.0".to_string()
        }
    );
    let state = harness.state();
    assert!(state.config_update_available);
    assert_eq!(state.deferred_config_version.as_deref(), Some("1.1.0"));
    assert_eq!(state.installed_config_version, "1.0.0");

    // same offered version: no re-prompt, same report
    assert_eq!(
        harness.tick().expect("tick must succeed"),
        TickOutcome::UpdateDeferred {
            offered: "1.1.0".to_string()
        }
    );

    // version bump past the deferral: the operator decides again
    harness.source.config = Some(core_config("1.2.0"));
    harness.prompt.decision = UpdateDecision::Accept;
    assert_eq!(
        harness.tick().expect("tick must succeed"),
        TickOutcome::UpdateApplied {
            version: "1.2.0".to_string()
        }
    );
    let state = harness.state();
    assert!(state.applying_update);
    assert!(!state.config_update_available);
    assert!(state.deferred_config_version.is_none());
    assert_eq!(state.installed_config_version, "1.2.0");
    assert_eq!(state.pending_phase_flags, PhaseFlag::full_apply_set());
}

#[test]
fn explicit_accept_takes_a_held_deferred_update() {
    let mut harness = Harness::new("deferred-accept", Some(core_config("1.1.0")));
    let mut state = LocalState::default();
    state.setup_complete = true;
    state.installed_config_version = "1.0.0".to_string();
    state.config_update_available = true;
    state.deferred_config_version = Some("1.1.0".to_string());
    harness.store.save(&state).expect("must save");

    // explicitly deferring again changes nothing
    harness.prompt.decision = UpdateDecision::Defer;
    harness.prompt.explicit = true;
    assert_eq!(
        harness.tick().expect("tick must succeed"),
        TickOutcome::UpdateDeferred {
            offered: "1.1.0".to_string()
        }
    );
    assert_eq!(
        harness.state().deferred_config_version.as_deref(),
        Some("1.1.0")
    );

    // an explicit accept takes the very version that was deferred
    harness.prompt.decision = UpdateDecision::Accept;
    assert_eq!(
        harness.tick().expect("tick must succeed"),
        TickOutcome::UpdateApplied {
            version: "1.1.0".to_string()
        }
    );
    let state = harness.state();
    assert!(state.applying_update);
    assert!(!state.config_update_available);
    assert!(state.deferred_config_version.is_none());
    assert_eq!(state.installed_config_version, "1.1.0");
}

#[test]
fn installed_version_never_regresses() {
    let harness = Harness::new("no-regress", Some(core_config("1.0.0")));
    let mut state = LocalState::default();
    state.setup_complete = true;
    state.installed_config_version = "2.0.0".to_string();
    harness.store.save(&state).expect("must save");

    assert_eq!(harness.tick().expect("tick must succeed"), TickOutcome::Settled);
    assert_eq!(harness.state().installed_config_version, "2.0.0");
}

#[test]
fn malformed_installed_version_aborts_drift_check_without_mutation() {
    let harness = Harness::new("bad-version", Some(core_config("1.1.0")));
    let mut state = LocalState::default();
    state.setup_complete = true;
    state.installed_config_version = "not-a-version".to_string();
    harness.store.save(&state).expect("must save");

    let err = harness.tick().expect_err("tick must fail");
    assert!(format!("{err:#}").contains("malformed version"));
    assert_eq!(harness.state(), state);
}

#[test]
fn one_reentry_clears_exactly_the_first_pending_phase() {
    let harness = Harness::new("single-phase", Some(core_config("1.0.0")));
    let mut state = LocalState::default();
    state.setup_complete = true;
    state.installed_config_version = "1.0.0".to_string();
    state.pending_phase_flags.insert(PhaseFlag::FlagPropagation);
    state
        .pending_phase_flags
        .insert(PhaseFlag::DependentRebuild);
    harness.store.save(&state).expect("must save");

    let outcome = harness.reenter().expect("re-entry must succeed");
    assert_eq!(
        outcome,
        TickOutcome::PhaseCompleted {
            phase: PhaseFlag::FlagPropagation,
            remaining: 1,
        }
    );

    let state = harness.state();
    assert_eq!(
        state.pending_phase_flags.iter().copied().collect::<Vec<_>>(),
        vec![PhaseFlag::DependentRebuild]
    );
    // nothing tied to the rebuild phase ran in the same call
    assert!(harness.dependent.events.borrow().is_empty());
    assert_eq!(harness.restart.requests.get(), 1);
}

#[test]
fn repeated_reentry_converges_to_settled_without_duplicate_writes() {
    let harness = Harness::new("convergence", Some(core_config("1.0.0")));

    harness.tick().expect("initial apply must succeed");
    let writes_after_apply = harness.manifest.writes.get();
    assert_eq!(writes_after_apply, 1);

    let mut previous_pending = harness.state().pending_phase_flags.len();
    for _ in 0..16 {
        let outcome = harness.reenter().expect("re-entry must succeed");
        let pending = harness.state().pending_phase_flags.len();
        // a successful phase never grows the pending set
        assert!(pending <= previous_pending);
        previous_pending = pending;
        if outcome == TickOutcome::Settled {
            break;
        }
    }

    assert_eq!(harness.reenter().expect("must settle"), TickOutcome::Settled);
    let state = harness.state();
    assert!(state.setup_complete);
    assert!(state.pending_phase_flags.is_empty());
    assert!(!state.applying_update);
    // phase re-verification found the manifest already conformant
    assert_eq!(harness.manifest.writes.get(), writes_after_apply);
    assert_eq!(
        *harness.dependent.events.borrow(),
        vec!["initialize", "update_settings", "rebuild"]
    );
}

#[test]
fn flag_propagation_reports_enabled_and_disabled_flags() {
    let harness = Harness::new("flag-propagation", Some(core_config("1.0.0")));
    let mut state = LocalState::default();
    state.setup_complete = true;
    state.installed_config_version = "1.0.0".to_string();
    state.pending_phase_flags.insert(PhaseFlag::FlagPropagation);
    harness.store.save(&state).expect("must save");

    // manifest without pkg.extras: the conditional flag must be disabled
    let mut doc = ManifestDoc::default();
    doc.dependencies
        .insert("pkg.core".to_string(), "2.0.0".to_string());
    *harness.manifest.doc.borrow_mut() = doc;

    harness.reenter().expect("re-entry must succeed");

    let calls = harness.flags.calls.borrow();
    assert!(calls.contains(&(
        "standalone".to_string(),
        "CORE_READY".to_string(),
        true
    )));
    assert!(calls.contains(&(
        "standalone".to_string(),
        "HAS_EXTRAS".to_string(),
        false
    )));
}

#[test]
fn pending_phase_stalls_when_config_is_required_but_unavailable() {
    let harness = Harness::new("phase-no-config", None);
    let mut state = LocalState::default();
    state.setup_complete = true;
    state.installed_config_version = "1.0.0".to_string();
    state
        .pending_phase_flags
        .insert(PhaseFlag::ManifestRefresh);
    harness.store.save(&state).expect("must save");

    assert_eq!(
        harness.reenter().expect("re-entry must succeed"),
        TickOutcome::ConfigUnavailable
    );
    assert_eq!(harness.state(), state);
    assert_eq!(harness.restart.requests.get(), 0);
}

#[test]
fn manifest_failure_aborts_phase_without_state_mutation() {
    let harness = Harness::new("manifest-failure", Some(core_config("1.0.0")));
    let mut state = LocalState::default();
    state.setup_complete = true;
    state.installed_config_version = "1.0.0".to_string();
    state
        .pending_phase_flags
        .insert(PhaseFlag::ManifestRefresh);
    harness.store.save(&state).expect("must save");

    harness.manifest.fail_reads.set(true);
    assert!(harness.reenter().is_err());
    assert_eq!(harness.state(), state);

    // the same phase is retried cleanly once the manifest is back
    harness.manifest.fail_reads.set(false);
    assert_eq!(
        harness.reenter().expect("retry must succeed"),
        TickOutcome::PhaseCompleted {
            phase: PhaseFlag::ManifestRefresh,
            remaining: 0,
        }
    );
}

#[test]
fn apply_killed_between_manifest_write_and_state_save_resumes_cleanly() {
    let harness = Harness::new("apply-killed-midway", Some(core_config("1.0.0")));
    harness.manifest.die_after_next_write.set(true);

    assert!(harness.tick().is_err());
    // the manifest write landed, the state record did not follow
    assert_eq!(harness.manifest.writes.get(), 1);
    assert_eq!(harness.state(), LocalState::default());
    assert_eq!(harness.restart.requests.get(), 0);

    // the retry finds the manifest already conformant and does not rewrite it
    assert_eq!(
        harness.tick().expect("retry must succeed"),
        TickOutcome::SetupApplied {
            version: "1.0.0".to_string(),
            skipped_sets: Vec::new(),
        }
    );
    assert_eq!(harness.manifest.writes.get(), 1);

    loop {
        if harness.reenter().expect("must advance") == TickOutcome::Settled {
            break;
        }
    }
    assert_eq!(harness.manifest.writes.get(), 1);
    assert!(harness.state().pending_phase_flags.is_empty());
}

#[test]
fn manifest_refresh_killed_before_flag_clear_retries_without_rewriting() {
    let harness = Harness::new("refresh-killed-midway", Some(core_config("1.0.0")));
    let mut state = LocalState::default();
    state.setup_complete = true;
    state.installed_config_version = "1.0.0".to_string();
    state
        .pending_phase_flags
        .insert(PhaseFlag::ManifestRefresh);
    harness.store.save(&state).expect("must save");

    // the stale manifest forces a write, then the tick dies before the
    // flag clear persists
    harness.manifest.die_after_next_write.set(true);
    assert!(harness.reenter().is_err());
    assert_eq!(harness.manifest.writes.get(), 1);
    assert_eq!(harness.state(), state);
    assert_eq!(
        harness.manifest.doc.borrow().dependencies.get("pkg.core"),
        Some(&"2.0.0".to_string())
    );

    // re-entry re-verifies, finds nothing to change, and clears the flag
    assert_eq!(
        harness.reenter().expect("retry must succeed"),
        TickOutcome::PhaseCompleted {
            phase: PhaseFlag::ManifestRefresh,
            remaining: 0,
        }
    );
    assert_eq!(harness.manifest.writes.get(), 1);
    assert_eq!(
        harness.reenter().expect("must settle"),
        TickOutcome::Settled
    );
}

#[test]
fn settled_project_reports_config_unavailable_without_progress() {
    let harness = Harness::new("settled-no-config", None);
    let mut state = LocalState::default();
    state.setup_complete = true;
    state.installed_config_version = "1.0.0".to_string();
    harness.store.save(&state).expect("must save");

    assert_eq!(
        harness.tick().expect("tick must succeed"),
        TickOutcome::ConfigUnavailable
    );
    assert_eq!(harness.state(), state);
}

#[test]
fn preselected_optional_sets_fold_into_the_initial_apply() {
    let mut harness = Harness::new("preselected", Some(core_config("1.0.0")));
    harness.prompt.selection = vec!["extras".to_string(), "unknown".to_string()];

    let outcome = harness.tick().expect("tick must succeed");
    assert_eq!(
        outcome,
        TickOutcome::SetupApplied {
            version: "1.0.0".to_string(),
            skipped_sets: vec!["unknown".to_string()],
        }
    );

    // one manifest write covered core and the selected optional set
    assert_eq!(harness.manifest.writes.get(), 1);
    let manifest = harness.manifest.doc.borrow();
    assert_eq!(
        manifest.dependencies.get("pkg.extras"),
        Some(&"0.3.0".to_string())
    );
    drop(manifest);

    let state = harness.state();
    assert!(state.selected_optional_sets.contains("extras"));
    assert!(!state.selected_optional_sets.contains("unknown"));
}

#[test]
fn optional_set_install_follows_the_incremental_phase_discipline() {
    let harness = Harness::new("install-set", Some(core_config("1.0.0")));
    let mut state = LocalState::default();
    state.setup_complete = true;
    state.installed_config_version = "1.0.0".to_string();
    harness.store.save(&state).expect("must save");

    let outcome = harness
        .controller()
        .install_optional_set("extras")
        .expect("install must succeed");
    assert_eq!(
        outcome,
        InstallOutcome::Applied {
            name: "extras".to_string()
        }
    );

    let state = harness.state();
    assert!(state.selected_optional_sets.contains("extras"));
    assert_eq!(
        state.pending_phase_flags,
        PhaseFlag::incremental_apply_set()
    );
    assert_eq!(
        harness.manifest.doc.borrow().dependencies.get("pkg.extras"),
        Some(&"0.3.0".to_string())
    );
}

#[test]
fn unknown_optional_set_is_skipped_with_alternatives() {
    let harness = Harness::new("install-unknown", Some(core_config("1.0.0")));
    let mut state = LocalState::default();
    state.setup_complete = true;
    state.installed_config_version = "1.0.0".to_string();
    harness.store.save(&state).expect("must save");

    let outcome = harness
        .controller()
        .install_optional_set("nope")
        .expect("install must report");
    assert_eq!(
        outcome,
        InstallOutcome::UnknownSet {
            name: "nope".to_string(),
            available: vec!["extras".to_string()],
        }
    );
    assert_eq!(harness.state(), state);
}

#[test]
fn optional_set_install_requires_completed_setup() {
    let harness = Harness::new("install-before-setup", Some(core_config("1.0.0")));
    let outcome = harness
        .controller()
        .install_optional_set("extras")
        .expect("install must report");
    assert_eq!(outcome, InstallOutcome::SetupRequired);
}

#[test]
fn accepted_update_converges_and_clears_the_update_flag() {
    let mut harness = Harness::new("update-cycle", Some(core_config("1.0.0")));
    harness.tick().expect("initial apply must succeed");
    loop {
        if harness.reenter().expect("must advance") == TickOutcome::Settled {
            break;
        }
    }

    harness.source.config = Some(core_config("1.1.0"));
    harness.prompt.decision = UpdateDecision::Accept;
    assert_eq!(
        harness.tick().expect("tick must succeed"),
        TickOutcome::UpdateApplied {
            version: "1.1.0".to_string()
        }
    );
    assert!(harness.state().applying_update);

    loop {
        if harness.reenter().expect("must advance") == TickOutcome::Settled {
            break;
        }
    }
    let state = harness.state();
    assert!(!state.applying_update);
    assert_eq!(state.installed_config_version, "1.1.0");
    assert!(state.pending_phase_flags.is_empty());
}

#[test]
fn project_layout_builds_expected_paths() {
    let layout = ProjectLayout::new("/tmp/demo");
    assert_eq!(layout.root(), PathBuf::from("/tmp/demo").as_path());
    assert!(layout.state_file_path().ends_with(".packsync/state.toml"));
    assert!(layout
        .cached_config_path()
        .ends_with(".packsync/cache/remote-config.json"));
    assert!(layout
        .feature_flags_path("standalone")
        .ends_with(".packsync/settings/features-standalone.toml"));
    assert!(layout.tags_path().ends_with(".packsync/settings/tags.toml"));
    assert!(layout
        .restart_marker_path()
        .ends_with(".packsync/restart-pending"));
    assert!(layout
        .default_manifest_path()
        .ends_with("packages/manifest.json"));
    assert!(layout.project_config_path().ends_with("packsync.toml"));
}
