mod collaborators;
mod controller;
mod layout;
mod phases;
mod state;

pub use collaborators::{
    ConfigSource, DependentModule, FlagPropagator, ManifestIo, OperatorPrompt, RestartSignal,
    TagRegistry, UpdateDecision,
};
pub use controller::{InstallOutcome, ReconciliationController, TickOutcome};
pub use layout::ProjectLayout;
pub use phases::{PhaseEngine, PhaseStep};
pub use state::{LocalState, LocalStateStore, PhaseFlag};

#[cfg(test)]
mod tests;
