// Flag parsing, logging setup, and signal handling: a `clap` v2
// builder-style `App`, an `env_logger::Builder` styled by level, and a
// `ctrlc` handler that flips an `Arc<AtomicBool>` rather than killing
// anything itself.

use crate::config::Config;
use crate::error::{JakeError, Result};
use clap::{App, AppSettings, Arg};
use colored::Colorize;
use env_logger::{fmt::Color, Builder, Env};
use log::Level;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const JAKEFILE_DEFAULT: &str = "Jakefile";

const JAKEFILE_ARG: &str = "file";
const TARGET_ARG: &str = "target";
const DRY_RUN_ARG: &str = "dry-run";
const VERBOSE_ARG: &str = "verbose";
const YES_ARG: &str = "yes";
const JOBS_ARG: &str = "jobs";
const WATCH_ARG: &str = "watch";
const LIST_ARG: &str = "list";
const SUMMARY_ARG: &str = "summary";
const SHOW_ARG: &str = "show";
const COMPLETIONS_ARG: &str = "completions";

/// Everything parsed out of `argv`, before any Jakefile has been read.
pub struct Invocation {
  pub jakefile_path: String,
  pub target: Option<String>,
  pub trailing_args: Vec<String>,
  pub dry_run: bool,
  pub verbose: bool,
  pub auto_yes: bool,
  pub watch_mode: bool,
  pub jobs: usize,
  pub list: bool,
  pub summary: bool,
  pub show: Option<String>,
  pub completions_shell: Option<String>,
  /// User-wide config, loaded once so logging setup and the orchestrator
  /// don't each re-read `~/.config/jake/config.yml`. CLI flags above
  /// already won their precedence battle against it in `parse_args`.
  pub config: Config,
}

/// Sets up `env_logger`: a `LOG_LEVEL`-driven
/// filter, `--verbose` forcing debug, and a level-colored `[LEVEL]` prefix.
/// `NO_COLOR`/`CI` disable coloring outright, matching `colored`'s own
/// convention rather than reimplementing it; the config file's `color`
/// setting is consulted only when neither env var is set.
pub fn set_up_logging(verbose: bool, config: &Config) {
  let default_level = if verbose { "debug" } else { "info" };
  colored::control::set_override(!no_color_requested() && config.color);

  Builder::from_env(Env::default().filter_or("LOG_LEVEL", default_level).write_style("LOG_STYLE"))
    .format(|buf, record| {
      let mut style = buf.style();
      style.set_bold(true);
      match record.level() {
        Level::Error => {
          style.set_color(Color::Red);
        }
        Level::Warn => {
          style.set_color(Color::Yellow);
        }
        Level::Info => {
          style.set_color(Color::Green);
        }
        Level::Debug | Level::Trace => {
          style.set_color(Color::Blue);
        }
      }
      writeln!(buf, "{} {}", style.value(format!("[{}]", record.level())), record.args())
    })
    .init();
}

fn no_color_requested() -> bool {
  std::env::var_os("NO_COLOR").is_some() || std::env::var_os("CI").is_some()
}

/// Installs a `ctrlc` handler that flips `interrupted` rather than killing
/// anything directly -- the running child is left to the timeout watchdog
/// or to finish on its own, per the documented interruption behavior.
pub fn set_up_signal_handler() -> Result<Arc<AtomicBool>> {
  let interrupted = Arc::new(AtomicBool::new(false));
  let handler_ref = interrupted.clone();
  ctrlc::set_handler(move || {
    handler_ref.store(true, Ordering::SeqCst);
    let _ = std::io::stdout().write(b"\n");
  })
  .map_err(|source| JakeError::SystemResources { message: format!("error installing signal handler: {}", source) })?;
  Ok(interrupted)
}

/// Parses `argv` into an `Invocation`. Trailing positionals after the
/// target recipe name are passed through untouched for the orchestrator to
/// split into named/positional recipe arguments.
fn build_app<'a, 'b>() -> App<'a, 'b> {
  App::new("Jake")
    .version(env!("CARGO_PKG_VERSION"))
    .version_short("v")
    .about("Jake runs tasks and builds file targets declared in a Jakefile.")
    .setting(AppSettings::ColoredHelp)
    .setting(AppSettings::NextLineHelp)
    .setting(AppSettings::UnifiedHelpMessage)
    .setting(AppSettings::TrailingVarArg)
    .arg(
      Arg::with_name(JAKEFILE_ARG)
        .short("f")
        .long("jakefile")
        .value_name("PATH")
        .help(&format!("Sets the path to the Jakefile (default: {})", JAKEFILE_DEFAULT))
        .takes_value(true),
    )
    .arg(Arg::with_name(DRY_RUN_ARG).long(DRY_RUN_ARG).help("Prints the commands that would run, without running them"))
    .arg(Arg::with_name(VERBOSE_ARG).short("V").long(VERBOSE_ARG).help("Echoes every command before running it"))
    .arg(Arg::with_name(YES_ARG).short("y").long(YES_ARG).help("Answers yes to every @confirm prompt"))
    .arg(
      Arg::with_name(JOBS_ARG)
        .short("j")
        .long(JOBS_ARG)
        .value_name("N")
        .help("Runs independent recipes in parallel across N workers (default: 1)")
        .takes_value(true),
    )
    .arg(Arg::with_name(WATCH_ARG).long(WATCH_ARG).help("Runs in watch mode"))
    .arg(Arg::with_name(LIST_ARG).short("l").long(LIST_ARG).help("Lists every recipe with its doc comment"))
    .arg(Arg::with_name(SUMMARY_ARG).long(SUMMARY_ARG).help("Prints a short summary of every recipe"))
    .arg(
      Arg::with_name(SHOW_ARG)
        .long(SHOW_ARG)
        .value_name("RECIPE")
        .help("Prints the full definition of one recipe")
        .takes_value(true),
    )
    .arg(
      Arg::with_name(COMPLETIONS_ARG)
        .long(COMPLETIONS_ARG)
        .value_name("SHELL")
        .help("Prints a shell completion script for the given shell")
        .takes_value(true),
    )
    .arg(
      Arg::with_name(TARGET_ARG)
        .value_name("TARGET")
        .help("The recipe to run, followed by any arguments it takes")
        .multiple(true),
    )
}

/// Prints a generated completion script for `shell` (one of `clap`'s
/// supported shell names) to stdout.
pub fn print_completions(shell: &str) -> Result<()> {
  let variant = shell.parse::<clap::Shell>().map_err(|_| {
    JakeError::Unexpected { message: format!("unknown shell `{}` for --completions", shell) }
  })?;
  build_app().gen_completions_to("jake", variant, &mut std::io::stdout());
  Ok(())
}

pub fn parse_args() -> Invocation {
  let matches = build_app().get_matches();
  let config = crate::config::load();

  let jakefile_path = matches.value_of(JAKEFILE_ARG).unwrap_or(JAKEFILE_DEFAULT).to_owned();
  // CLI flag wins, else the user's config file, else the built-in default
  // (already baked into `Config::default()`'s `jobs`).
  let jobs = matches.value_of(JOBS_ARG).and_then(|s| s.parse().ok()).unwrap_or(config.jobs);

  let mut trailing: Vec<String> = matches.values_of(TARGET_ARG).map(|v| v.map(str::to_owned).collect()).unwrap_or_default();
  let target = if trailing.is_empty() { None } else { Some(trailing.remove(0)) };

  Invocation {
    jakefile_path,
    target,
    trailing_args: trailing,
    dry_run: matches.is_present(DRY_RUN_ARG),
    verbose: matches.is_present(VERBOSE_ARG),
    auto_yes: matches.is_present(YES_ARG),
    watch_mode: matches.is_present(WATCH_ARG),
    jobs,
    list: matches.is_present(LIST_ARG),
    summary: matches.is_present(SUMMARY_ARG),
    show: matches.value_of(SHOW_ARG).map(str::to_owned),
    completions_shell: matches.value_of(COMPLETIONS_ARG).map(str::to_owned),
    config,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn no_color_respects_env_vars() {
    std::env::remove_var("NO_COLOR");
    std::env::remove_var("CI");
    assert!(!no_color_requested());
    std::env::set_var("NO_COLOR", "1");
    assert!(no_color_requested());
    std::env::remove_var("NO_COLOR");
  }
}
