use anyhow::Result;
use packsync_core::{ManifestDoc, RemoteConfig};

// remote fetch is out of scope; None means "unreachable and no cached copy"
pub trait ConfigSource {
    fn fetch(&self) -> Result<Option<RemoteConfig>>;
}

pub trait ManifestIo {
    fn read(&self) -> Result<ManifestDoc>;
    fn write(&self, doc: &ManifestDoc) -> Result<()>;
}

// fire-and-forget; completion is only ever observed as a re-entry
pub trait RestartSignal {
    fn request_restart(&self) -> Result<()>;
}

pub trait FlagPropagator {
    fn targets(&self) -> Vec<String>;
    fn set_feature_flag(&self, target: &str, name: &str, enabled: bool) -> Result<()>;
}

pub trait TagRegistry {
    fn ensure_tag_exists(&self, tag: &str) -> Result<()>;
}

pub trait DependentModule {
    fn initialize(&self) -> Result<()>;
    fn update_settings(&self) -> Result<()>;
    fn rebuild(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateDecision {
    Accept,
    Defer,
}

pub trait OperatorPrompt {
    fn select_optional_sets(&self, available: &[String]) -> Result<Vec<String>>;
    fn decide_update(&self, installed: &str, offered: &str) -> Result<UpdateDecision>;

    // a held deferral only stands against the non-interactive default;
    // an operator who answered this invocation gets asked again
    fn has_explicit_answer(&self) -> bool {
        false
    }
}
