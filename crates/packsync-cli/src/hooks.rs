use std::path::PathBuf;
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use packsync_engine::DependentModule;

use crate::project::Hooks;

pub struct HookRunner {
    root: PathBuf,
    hooks: Hooks,
}

impl HookRunner {
    pub fn new(root: impl Into<PathBuf>, hooks: Hooks) -> Self {
        Self {
            root: root.into(),
            hooks,
        }
    }

    fn run(&self, label: &str, command: Option<&str>) -> Result<()> {
        // an unconfigured hook is a successful no-op
        let Some(command) = command else {
            return Ok(());
        };

        let output = shell_command(command)
            .current_dir(&self.root)
            .output()
            .with_context(|| format!("failed to run hook '{label}': {command}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "hook '{label}' failed with {}: {}",
                output.status,
                stderr.trim()
            ));
        }

        Ok(())
    }
}

impl DependentModule for HookRunner {
    fn initialize(&self) -> Result<()> {
        self.run("dependent-init", self.hooks.dependent_init.as_deref())
    }

    fn update_settings(&self) -> Result<()> {
        self.run(
            "dependent-settings-update",
            self.hooks.dependent_settings_update.as_deref(),
        )
    }

    fn rebuild(&self) -> Result<()> {
        self.run("dependent-rebuild", self.hooks.dependent_rebuild.as_deref())
    }
}

pub(crate) fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut shell = Command::new("cmd");
        shell.arg("/C").arg(command);
        shell
    } else {
        let mut shell = Command::new("sh");
        shell.arg("-c").arg(command);
        shell
    }
}
