mod collaborators;
mod completion;
mod fetch;
mod hooks;
mod project;
mod render;
mod selfupdate;


use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use packsync_core::is_newer;
use packsync_engine::{
    ConfigSource, LocalStateStore, PhaseEngine, ProjectLayout, ReconciliationController,
};

use crate::collaborators::{
    clear_restart_marker, restart_marker_present, CliPrompt, FileRestartSignal, FsFlagPropagator,
    FsManifestIo, FsTagRegistry,
};
use crate::fetch::HttpConfigSource;
use crate::hooks::HookRunner;
use crate::project::ProjectConfig;
use crate::render::{
    current_output_style, print_status, render_install_outcome, render_tick_outcome,
    wait_between_ticks, OutputStyle,
};
use crate::selfupdate::{check_for_update, UpdateCheck};

#[derive(Parser, Debug)]
#[command(name = "packsync")]
#[command(about = "Restart-safe project configuration reconciler", long_about = None)]
struct Cli {
    #[arg(long)]
    project_root: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Init {
        #[arg(long)]
        remote: Option<String>,
    },
    Sync {
        #[arg(long)]
        accept: bool,
        #[arg(long)]
        defer: bool,
        #[arg(long = "with")]
        with_sets: Vec<String>,
    },
    Status,
    Install {
        name: String,
    },
    Sets,
    Watch {
        #[arg(long, default_value_t = 300)]
        interval_secs: u64,
    },
    CheckUpdate,
    Completions {
        shell: Shell,
    },
}

struct Runtime {
    layout: ProjectLayout,
    config: ProjectConfig,
    store: LocalStateStore,
    source: HttpConfigSource,
    manifest_io: FsManifestIo,
    flags: FsFlagPropagator,
    tags: FsTagRegistry,
    dependent: HookRunner,
    restart: FileRestartSignal,
}

impl Runtime {
    fn open(project_root: Option<PathBuf>) -> Result<Self> {
        let layout = resolve_layout(project_root)?;
        let config = ProjectConfig::load(&layout)?;
        layout.ensure_base_dirs()?;

        let store = LocalStateStore::new(layout.state_file_path());
        let source = HttpConfigSource::new(
            config.remote_config_url.clone(),
            layout.cached_config_path(),
        );
        let manifest_io = FsManifestIo::new(config.resolve_manifest_path(&layout));
        let flags = FsFlagPropagator::new(layout.clone(), config.targets.clone());
        let tags = FsTagRegistry::new(layout.clone());
        let dependent = HookRunner::new(layout.root().to_path_buf(), config.hooks.clone());
        let restart = FileRestartSignal::new(layout.clone());

        Ok(Self {
            layout,
            config,
            store,
            source,
            manifest_io,
            flags,
            tags,
            dependent,
            restart,
        })
    }

    fn controller<'a>(&'a self, prompt: &'a CliPrompt) -> ReconciliationController<'a> {
        ReconciliationController::new(
            &self.store,
            &self.source,
            prompt,
            PhaseEngine {
                store: &self.store,
                manifest_io: &self.manifest_io,
                flags: &self.flags,
                tags: &self.tags,
                dependent: &self.dependent,
                restart: &self.restart,
            },
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    run_cli(cli)
}

fn run_cli(cli: Cli) -> Result<()> {
    let style = current_output_style();

    match cli.command {
        Commands::Init { remote } => {
            let layout = resolve_layout(cli.project_root)?;
            let path = ProjectConfig::write_template(&layout, remote.as_deref())?;
            layout.ensure_base_dirs()?;
            print_status(style, "created", &path.display().to_string());
            print_status(
                style,
                "hint",
                "set remote_config_url in packsync.toml, then run 'packsync sync'",
            );
        }
        Commands::Sync {
            accept,
            defer,
            with_sets,
        } => {
            if accept && defer {
                return Err(anyhow!("--accept and --defer are mutually exclusive"));
            }
            let runtime = Runtime::open(cli.project_root)?;
            // optional sets are chosen during initial setup only
            if !with_sets.is_empty() && runtime.store.load()?.setup_complete {
                return Err(anyhow!(
                    "--with only applies before the first apply; use 'packsync install <name>' to add a set now"
                ));
            }
            let reentry = clear_restart_marker(&runtime.layout)?;
            let prompt = CliPrompt {
                accept_updates: if accept {
                    Some(true)
                } else if defer {
                    Some(false)
                } else {
                    None
                },
                with_sets,
            };
            let controller = runtime.controller(&prompt);
            let outcome = if reentry {
                controller.on_reentry()?
            } else {
                controller.on_tick()?
            };
            for (status, message) in render_tick_outcome(&outcome) {
                print_status(style, status, &message);
            }
        }
        Commands::Status => {
            let runtime = Runtime::open(cli.project_root)?;
            print_project_status(&runtime, style)?;
        }
        Commands::Install { name } => {
            let runtime = Runtime::open(cli.project_root)?;
            clear_restart_marker(&runtime.layout)?;
            let prompt = CliPrompt::non_interactive();
            let outcome = runtime.controller(&prompt).install_optional_set(&name)?;
            for (status, message) in render_install_outcome(&outcome) {
                print_status(style, status, &message);
            }
        }
        Commands::Sets => {
            let runtime = Runtime::open(cli.project_root)?;
            let state = runtime.store.load()?;
            match runtime.source.fetch()? {
                None => print_status(style, "waiting", "remote configuration unavailable"),
                Some(config) => {
                    let names = config.optional_set_names();
                    if names.is_empty() {
                        print_status(style, "info", "the remote config defines no optional sets");
                    }
                    for name in names {
                        let marker = if state.selected_optional_sets.contains(&name) {
                            " (selected)"
                        } else {
                            ""
                        };
                        println!("{name}{marker}");
                    }
                }
            }
        }
        Commands::Watch { interval_secs } => {
            let runtime = Runtime::open(cli.project_root)?;
            let prompt = CliPrompt::non_interactive();
            loop {
                clear_restart_marker(&runtime.layout)?;
                // every failure here is recoverable by retry on a later tick
                match runtime.controller(&prompt).on_tick() {
                    Ok(outcome) => {
                        for (status, message) in render_tick_outcome(&outcome) {
                            print_status(style, status, &message);
                        }
                    }
                    Err(err) => print_status(style, "error", &format!("{err:#}")),
                }
                wait_between_ticks(style, interval_secs);
            }
        }
        Commands::CheckUpdate => {
            let layout = resolve_layout(cli.project_root)?;
            let config = ProjectConfig::load(&layout)?;
            let url = config
                .latest_release_url
                .as_deref()
                .ok_or_else(|| anyhow!("latest_release_url is not configured in packsync.toml"))?;
            match check_for_update(url)? {
                UpdateCheck::UpToDate { current } => {
                    print_status(style, "settled", &format!("packsync {current} is up to date"));
                }
                UpdateCheck::UpdateAvailable {
                    current,
                    latest,
                    download_url,
                } => {
                    print_status(
                        style,
                        "update",
                        &format!("packsync {latest} is available (running {current})"),
                    );
                    if let Some(download_url) = download_url {
                        print_status(style, "hint", &format!("download: {download_url}"));
                    }
                    if let Some(releases) = &config.releases_url {
                        print_status(style, "hint", &format!("releases: {releases}"));
                    }
                }
            }
        }
        Commands::Completions { shell } => {
            completion::write_completions(shell);
        }
    }

    Ok(())
}

fn resolve_layout(project_root: Option<PathBuf>) -> Result<ProjectLayout> {
    let root = match project_root {
        Some(root) => root,
        None => std::env::current_dir().context("failed to resolve current directory")?,
    };
    Ok(ProjectLayout::new(root))
}

fn print_project_status(runtime: &Runtime, style: OutputStyle) -> Result<()> {
    let state = runtime.store.load()?;

    println!("project: {}", runtime.layout.root().display());
    println!(
        "manifest: {}",
        runtime.config.resolve_manifest_path(&runtime.layout).display()
    );
    println!("setup complete: {}", yes_no(state.setup_complete));
    println!(
        "installed config version: {}",
        if state.installed_config_version.is_empty() {
            "none"
        } else {
            state.installed_config_version.as_str()
        }
    );
    println!("applying update: {}", yes_no(state.applying_update));
    if let Some(deferred) = &state.deferred_config_version {
        println!("deferred update: {deferred}");
    }
    if !state.selected_optional_sets.is_empty() {
        let names = state
            .selected_optional_sets
            .iter()
            .cloned()
            .collect::<Vec<_>>();
        println!("selected optional sets: {}", names.join(", "));
    }
    if state.pending_phase_flags.is_empty() {
        println!("pending phases: none");
    } else {
        let names = state
            .pending_phase_flags
            .iter()
            .map(|flag| flag.as_str())
            .collect::<Vec<_>>();
        println!("pending phases: {}", names.join(", "));
    }
    println!(
        "restart pending: {}",
        yes_no(restart_marker_present(&runtime.layout))
    );

    match runtime.source.fetch()? {
        None => print_status(style, "waiting", "remote configuration unavailable"),
        Some(config) => {
            if !state.setup_complete {
                print_status(
                    style,
                    "waiting",
                    &format!("setup pending against config {}", config.config_version),
                );
            } else if is_newer(&state.installed_config_version, &config.config_version)? {
                print_status(
                    style,
                    "drift",
                    &format!("remote config {} is newer", config.config_version),
                );
            } else {
                print_status(style, "settled", "no configuration drift");
            }
        }
    }

    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
