use std::io::IsTerminal;
use std::time::Duration;

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{ProgressBar, ProgressStyle};
use packsync_engine::{InstallOutcome, TickOutcome};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputStyle {
    Plain,
    Rich,
}

pub fn current_output_style() -> OutputStyle {
    if std::env::var_os("NO_COLOR").is_some() || !std::io::stdout().is_terminal() {
        OutputStyle::Plain
    } else {
        OutputStyle::Rich
    }
}

pub fn print_status(style: OutputStyle, status: &str, message: &str) {
    println!("{}", render_status_line(style, status, message));
}

pub fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    let label = format!("{status:>9}");
    match style {
        OutputStyle::Plain => format!("{label} {message}"),
        OutputStyle::Rich => format!("{} {message}", colorize(status_style(status), &label)),
    }
}

pub fn render_tick_outcome(outcome: &TickOutcome) -> Vec<(&'static str, String)> {
    match outcome {
        TickOutcome::AwaitingRemoteConfig => vec![(
            "waiting",
            "no remote configuration reachable yet; setup will start once it is".to_string(),
        )],
        TickOutcome::ConfigUnavailable => vec![(
            "waiting",
            "remote configuration unavailable; no progress this tick".to_string(),
        )],
        TickOutcome::PhaseCompleted { phase, remaining } => vec![(
            "phase",
            format!(
                "completed {}; {remaining} phase(s) pending; restart requested",
                phase.as_str()
            ),
        )],
        TickOutcome::SetupApplied {
            version,
            skipped_sets,
        } => {
            let mut lines = vec![(
                "applied",
                format!("core package set applied at config {version}; restart requested"),
            )];
            for name in skipped_sets {
                lines.push(("skipped", format!("unknown optional set '{name}'")));
            }
            lines
        }
        TickOutcome::UpdateApplied { version } => vec![(
            "applied",
            format!("configuration update {version} applied; restart requested"),
        )],
        TickOutcome::UpdateDeferred { offered } => vec![(
            "deferred",
            format!("update to {offered} deferred; will ask again on the next version bump"),
        )],
        TickOutcome::Settled => vec![(
            "settled",
            "project matches the installed configuration".to_string(),
        )],
    }
}

pub fn render_install_outcome(outcome: &InstallOutcome) -> Vec<(&'static str, String)> {
    match outcome {
        InstallOutcome::ConfigUnavailable => vec![(
            "waiting",
            "remote configuration unavailable; try again later".to_string(),
        )],
        InstallOutcome::SetupRequired => vec![(
            "blocked",
            "initial setup has not completed yet; run 'packsync sync' first".to_string(),
        )],
        InstallOutcome::UnknownSet { name, available } => {
            let mut lines = vec![("skipped", format!("unknown optional set '{name}'"))];
            if !available.is_empty() {
                lines.push(("hint", format!("available sets: {}", available.join(", "))));
            }
            lines
        }
        InstallOutcome::Applied { name } => vec![(
            "applied",
            format!("optional set '{name}' folded into the manifest; restart requested"),
        )],
    }
}

pub fn wait_between_ticks(style: OutputStyle, seconds: u64) {
    let delay = Duration::from_secs(seconds);
    if style == OutputStyle::Plain {
        std::thread::sleep(delay);
        return;
    }

    let spinner = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::with_template("{spinner:.cyan.bold} {msg}") {
        spinner.set_style(template);
    }
    spinner.set_message(format!("next reconciliation in {seconds}s"));
    spinner.enable_steady_tick(Duration::from_millis(120));
    std::thread::sleep(delay);
    spinner.finish_and_clear();
}

fn status_style(status: &str) -> Style {
    let color = match status {
        "applied" | "settled" => AnsiColor::Green,
        "deferred" | "waiting" | "skipped" | "hint" => AnsiColor::Yellow,
        "blocked" | "error" => AnsiColor::Red,
        _ => AnsiColor::BrightBlue,
    };
    Style::new()
        .fg_color(Some(color.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}
