mod config;
mod manifest;
mod version;

pub use config::{ConditionalFlag, PackageSet, RemoteConfig, ScopedRegistry};
pub use manifest::{conditional_flag_satisfied, reconcile, reconcile_all, ManifestDoc};
pub use version::{compare_versions, is_newer};
