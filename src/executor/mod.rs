// Shared execution machinery used by both the sequential and parallel
// executors: the directive interpreter that walks a recipe body, command
// expansion/spawning, the command-existence probe, and the timeout
// watchdog. DAG traversal itself lives in `sequential.rs` and
// `parallel.rs`.
//
// The timeout watchdog is modeled as two atomics plus a sleep loop, not as
// async cancellation -- the same style used elsewhere in this codebase for
// `running`/`interrupted` flags. Child spawning builds the command, spawns
// it, waits, and translates the exit status.

pub mod parallel;
pub mod sequential;

use crate::ast::{BodyDirective, Command, Jakefile, Recipe};
use crate::cache::Cache;
use crate::condition::{self, ConditionContext};
use crate::environment::Environment;
use crate::error::{JakeError, Result};
use crate::expand;
use crate::format::CodeStr;
use crate::globset;
use crate::hooks;
use crate::prompt;
use colored::Colorize;
use indexmap::IndexMap;
use log::{debug, warn};
use std::path::Path;
use std::process::{Command as ProcessCommand, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const MAX_CONDITIONAL_DEPTH: usize = 32;
const WATCHDOG_POLL_MS: u64 = 50;

/// Run-wide options threaded through both executors.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
  pub dry_run: bool,
  pub verbose: bool,
  pub auto_yes: bool,
  pub watch_mode: bool,
  pub jobs: usize,
  /// User-config default shell (`~/.config/jake/config.yml`'s `shell`
  /// field), consulted when a recipe doesn't set its own `@shell`. A
  /// recipe's own override always wins; the hardcoded `/bin/sh`/`COMSPEC`
  /// fallback only applies when neither is set.
  pub default_shell: Option<String>,
}

/// The arguments a caller (the orchestrator, or a dependency edge) passes
/// to a single recipe invocation: trailing `key=value` pairs bind to
/// params by name; everything else is positional and feeds `{{$1}}`,
/// `{{$2}}`, ... and `{{$@}}`.
#[derive(Debug, Clone, Default)]
pub struct RecipeArgs {
  pub positionals: Vec<String>,
  pub named: IndexMap<String, String>,
}

/// Is `recipe` allowed to run on the current platform? An empty `only_os`
/// set means "no restriction".
pub fn is_os_allowed(only_os: &std::collections::HashSet<String>) -> bool {
  if only_os.is_empty() {
    return true;
  }
  only_os.contains(current_os_tag())
}

fn current_os_tag() -> &'static str {
  if cfg!(target_os = "macos") {
    "macos"
  } else if cfg!(target_os = "windows") {
    "windows"
  } else if cfg!(target_os = "linux") {
    "linux"
  } else {
    "unix"
  }
}

/// State shared read-only (the Jakefile, the environment) or behind a mutex
/// (the cache) across every recipe invocation, sequential or parallel.
pub struct Shared<'a> {
  pub jakefile: &'a Jakefile,
  pub environment: &'a Environment,
  pub cache: Arc<Mutex<Cache>>,
  pub options: ExecOptions,
  pub interrupted: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Copy)]
struct ConditionalFrame {
  executing: bool,
  branch_taken: bool,
}

/// Executes one recipe's full lifecycle: param binding, pre-hooks, the
/// command body (with or without a timeout), post-hooks (always), and
/// on-error hooks (on failure). Does not recurse into dependencies -- the
/// caller (sequential or parallel) is responsible for ordering.
pub fn execute_recipe_body(shared: &Shared, recipe: &Recipe, args: &RecipeArgs) -> Result<()> {
  let mut variables: IndexMap<String, String> =
    shared.jakefile.variables.iter().map(|(k, v)| (k.clone(), v.value.clone())).collect();
  bind_params(recipe, args, &mut variables);
  let positionals = &args.positionals;

  print_banner(recipe);

  hooks::run_all(&hooks::pre_hooks(shared.jakefile, recipe), &recipe.name, |command| {
    run_single_line(shared, command, &variables, positionals, recipe)
  });

  let result = if let Some(timeout_seconds) = recipe.timeout_seconds {
    run_with_timeout(shared, recipe, &mut variables, positionals, timeout_seconds)
  } else {
    let mut interp = Interpreter {
      shared,
      recipe,
      variables: &mut variables,
      positionals,
      watchdog: None,
    };
    interp.run_commands(&recipe.commands, 0)
  };

  hooks::run_all(&hooks::post_hooks(shared.jakefile, recipe), &recipe.name, |command| {
    run_single_line(shared, command, &variables, positionals, recipe)
  });

  if result.is_err() {
    hooks::run_all(&hooks::on_error_hooks(shared.jakefile), &recipe.name, |command| {
      run_single_line(shared, command, &variables, positionals, recipe)
    });
  }

  if matches!(recipe.kind, crate::ast::RecipeKind::File) && result.is_ok() {
    let mut cache = shared.cache.lock().unwrap();
    if let Some(output) = &recipe.output {
      cache.update(output);
    }
    // Re-snapshot every input pattern too, not just the output: otherwise
    // `is_glob_stale` on a `file_deps` pattern would never go fresh and a
    // second back-to-back run would always re-execute.
    for pattern in &recipe.file_deps {
      cache.update(pattern);
    }
  }

  result
}

fn bind_params(recipe: &Recipe, args: &RecipeArgs, variables: &mut IndexMap<String, String>) {
  for (index, param) in recipe.params.iter().enumerate() {
    let value = args
      .named
      .get(&param.name)
      .cloned()
      .or_else(|| args.positionals.get(index).cloned())
      .or_else(|| param.default.clone())
      .unwrap_or_default();
    variables.insert(param.name.clone(), value);
  }
}

fn print_banner(recipe: &Recipe) {
  println!("{} {}", "==>".blue().bold(), recipe.name.code_str());
}

/// Runs a single raw command line (used for hook invocations, which aren't
/// part of a directive-interpreted body).
fn run_single_line(
  shared: &Shared,
  line: &str,
  variables: &IndexMap<String, String>,
  positionals: &[String],
  recipe: &Recipe,
) -> Result<()> {
  let command = Command { line: line.to_owned(), directive: None, line_no: 0 };
  run_command(shared, &command, variables, positionals, recipe, None)
}

/// Watchdog handle shared between the main command loop and the timeout
/// watchdog thread.
struct Watchdog {
  timeout_expired: Arc<AtomicBool>,
  current_child: Arc<AtomicU32>,
}

fn run_with_timeout(
  shared: &Shared,
  recipe: &Recipe,
  variables: &mut IndexMap<String, String>,
  positionals: &[String],
  timeout_seconds: u64,
) -> Result<()> {
  let timeout_expired = Arc::new(AtomicBool::new(false));
  let current_child = Arc::new(AtomicU32::new(0));
  let finished = Arc::new(AtomicBool::new(false));

  let deadline = Instant::now() + Duration::from_secs(timeout_seconds);
  let watchdog_timeout_expired = timeout_expired.clone();
  let watchdog_current_child = current_child.clone();
  let watchdog_finished = finished.clone();

  let handle = std::thread::spawn(move || {
    loop {
      if watchdog_finished.load(Ordering::SeqCst) {
        return;
      }
      if Instant::now() >= deadline {
        watchdog_timeout_expired.store(true, Ordering::SeqCst);
        let pid = watchdog_current_child.load(Ordering::SeqCst);
        if pid != 0 {
          kill_process(pid);
        }
        return;
      }
      std::thread::sleep(Duration::from_millis(WATCHDOG_POLL_MS));
    }
  });

  let watchdog = Watchdog { timeout_expired: timeout_expired.clone(), current_child };

  let mut interp = Interpreter {
    shared,
    recipe,
    variables,
    positionals,
    watchdog: Some(&watchdog),
  };
  let result = interp.run_commands(&recipe.commands, 0);

  finished.store(true, Ordering::SeqCst);
  // Guaranteed join before returning, regardless of outcome.
  let _ = handle.join();

  match result {
    Err(_) if timeout_expired.load(Ordering::SeqCst) => Err(JakeError::CommandFailed {
      recipe: recipe.name.clone(),
      message: format!("timed out after {}s", timeout_seconds),
    }),
    other => other,
  }
}

struct Interpreter<'a> {
  shared: &'a Shared<'a>,
  recipe: &'a Recipe,
  variables: &'a mut IndexMap<String, String>,
  positionals: &'a [String],
  watchdog: Option<&'a Watchdog>,
}

impl<'a> Interpreter<'a> {
  /// Runs `commands`, starting at `depth` (the current conditional/each
  /// nesting level), returning once the slice is exhausted or a command
  /// fails without `@ignore`.
  fn run_commands(&mut self, commands: &[Command], depth: usize) -> Result<()> {
    let mut cond_stack: Vec<ConditionalFrame> = Vec::new();
    let mut executing = true;
    let mut branch_taken = true;
    let mut ignore_next = false;

    let mut i = 0;
    while i < commands.len() {
      let command = &commands[i];

      match &command.directive {
        Some(BodyDirective::If(cond)) => {
          if cond_stack.len() + depth >= MAX_CONDITIONAL_DEPTH {
            return Err(JakeError::Unexpected {
              message: "conditional nesting exceeds the maximum depth of 32".to_owned(),
            });
          }
          cond_stack.push(ConditionalFrame { executing, branch_taken });
          if !executing {
            executing = false;
            branch_taken = true;
          } else {
            let value = self.eval_condition(cond);
            executing = value;
            branch_taken = value;
          }
        }
        Some(BodyDirective::Elif(cond)) => {
          let parent_executing = cond_stack.last().map_or(true, |f| f.executing);
          if parent_executing {
            if branch_taken {
              executing = false;
            } else {
              let value = self.eval_condition(cond);
              if value {
                executing = true;
                branch_taken = true;
              }
            }
          }
        }
        Some(BodyDirective::Else) => {
          let parent_executing = cond_stack.last().map_or(true, |f| f.executing);
          if parent_executing {
            if branch_taken {
              executing = false;
            } else {
              executing = true;
              branch_taken = true;
            }
          }
        }
        Some(BodyDirective::End) => {
          if let Some(frame) = cond_stack.pop() {
            executing = frame.executing;
            branch_taken = frame.branch_taken;
          } else {
            executing = true;
            branch_taken = true;
          }
        }
        Some(BodyDirective::Ignore) => {
          if executing {
            ignore_next = true;
          }
        }
        Some(BodyDirective::Needs(entries)) => {
          if executing {
            for entry in entries {
              if !command_exists(&entry.command) {
                return Err(JakeError::CommandFailed {
                  recipe: self.recipe.name.clone(),
                  message: needs_miss_message(entry),
                });
              }
            }
          }
        }
        Some(BodyDirective::Confirm(message)) => {
          if executing {
            let text = message.as_deref().unwrap_or("Continue?");
            let ok = prompt::confirm(text, self.shared.options.auto_yes, self.shared.options.dry_run);
            if !ok {
              return Err(JakeError::CommandFailed {
                recipe: self.recipe.name.clone(),
                message: "confirmation declined".to_owned(),
              });
            }
          }
        }
        Some(BodyDirective::Each(items_expr)) => {
          let end_index = find_matching_end(commands, i);
          if executing {
            let items = self.expand_each_items(items_expr);
            for item in items {
              self.variables.insert("item".to_owned(), item);
              self.run_commands(&commands[i + 1..end_index], depth + cond_stack.len() + 1)?;
            }
            self.variables.shift_remove("item");
          }
          i = end_index;
        }
        Some(BodyDirective::Cache(patterns)) => {
          if executing {
            i = self.handle_cache_directive(commands, i, patterns, ignore_next)?;
            ignore_next = false;
            continue;
          }
        }
        Some(BodyDirective::Watch(patterns)) => {
          if executing && self.shared.options.dry_run {
            println!("[would watch] {}", patterns.join(", "));
          }
        }
        Some(BodyDirective::Launch(target)) => {
          if executing {
            let expanded = self.expand_line(target);
            launch(&expanded);
          }
        }
        None => {
          if executing {
            let outcome = run_command(self.shared, command, self.variables, self.positionals, self.recipe, self.watchdog);
            if let Err(error) = outcome {
              if ignore_next {
                warn!("ignored failure in `{}`: {}", self.recipe.name, error);
              } else {
                return Err(error);
              }
            }
            ignore_next = false;
          }
        }
      }

      i += 1;
    }

    Ok(())
  }

  fn eval_condition(&self, raw: &str) -> bool {
    let expanded = self.expand_line(raw);
    let ctx = ConditionContext {
      watch_mode: self.shared.options.watch_mode,
      dry_run: self.shared.options.dry_run,
      verbose: self.shared.options.verbose,
    };
    condition::evaluate(&expanded, self.shared.environment, ctx)
  }

  fn expand_line(&self, line: &str) -> String {
    let braces = expand::expand_braces(line, self.variables, self.positionals);
    self.shared.environment.expand_command(&braces)
  }

  fn expand_each_items(&self, items_expr: &str) -> Vec<String> {
    let expanded = self.expand_line(items_expr);
    let mut items = Vec::new();
    for raw in expanded.split(|c: char| c == ',' || c.is_whitespace()).filter(|s| !s.is_empty()) {
      if globset::is_glob_pattern(raw) {
        let matches = globset::expand(raw);
        if matches.is_empty() {
          items.push(raw.to_owned());
        } else {
          for path in matches {
            items.push(path.to_string_lossy().into_owned());
          }
        }
      } else {
        items.push(raw.to_owned());
      }
    }
    items
  }

  fn handle_cache_directive(&mut self, commands: &[Command], i: usize, patterns: &[String], ignore_next: bool) -> Result<usize> {
    let fresh = !patterns.is_empty()
      && patterns.iter().all(|pattern| {
        let expanded = self.expand_line(pattern);
        !self.shared.cache.lock().unwrap().is_glob_stale(&expanded)
      });

    if fresh {
      println!("{} {}", "[cached]".green(), patterns.join(", "));
      let mut j = i + 1;
      while j < commands.len() && commands[j].directive.is_none() {
        j += 1;
      }
      return Ok(j.saturating_sub(1));
    }

    if let Some(next) = commands.get(i + 1) {
      if next.directive.is_none() {
        let outcome = run_command(self.shared, next, self.variables, self.positionals, self.recipe, self.watchdog);
        match outcome {
          Ok(()) => {
            for pattern in patterns {
              let expanded = self.expand_line(pattern);
              self.shared.cache.lock().unwrap().update(&expanded);
            }
          }
          Err(error) if ignore_next => {
            warn!("ignored failure in `{}`: {}", self.recipe.name, error);
          }
          Err(error) => return Err(error),
        }
        return Ok(i + 1);
      }
    }

    Ok(i)
  }
}

/// Scans forward from an `@if`/`@each` at `start`, tracking nested
/// directives, and returns the index of its matching `@end`. Falls back to
/// the last index if unmatched (the parser already diagnosed this case).
fn find_matching_end(commands: &[Command], start: usize) -> usize {
  let mut depth = 1;
  let mut j = start + 1;
  while j < commands.len() {
    match &commands[j].directive {
      Some(BodyDirective::If(_)) | Some(BodyDirective::Each(_)) => depth += 1,
      Some(BodyDirective::End) => {
        depth -= 1;
        if depth == 0 {
          return j;
        }
      }
      _ => {}
    }
    j += 1;
  }
  commands.len().saturating_sub(1)
}

/// Runs a single command line: expand, maybe strip the echo-suppress
/// `@`, print per dry-run/verbose mode, then spawn the configured shell.
fn run_command(
  shared: &Shared,
  command: &Command,
  variables: &IndexMap<String, String>,
  positionals: &[String],
  recipe: &Recipe,
  watchdog: Option<&Watchdog>,
) -> Result<()> {
  let braces_expanded = expand::expand_braces(&command.line, variables, positionals);
  let mut line = shared.environment.expand_command(&braces_expanded);

  let mut suppress_echo = false;
  let trimmed_start = line.trim_start();
  if let Some(rest) = trimmed_start.strip_prefix('@') {
    let leading_ws = line.len() - trimmed_start.len();
    line = format!("{}{}", &line[..leading_ws], rest);
    suppress_echo = true;
  }

  if shared.options.dry_run {
    println!("[dry-run] {}", line);
    return Ok(());
  }

  if shared.options.verbose && !recipe.quiet && !suppress_echo {
    println!("$ {}", line);
  }

  spawn_and_wait(shared, recipe, &line, watchdog)
}

fn spawn_and_wait(shared: &Shared, recipe: &Recipe, line: &str, watchdog: Option<&Watchdog>) -> Result<()> {
  let shell = recipe
    .shell
    .clone()
    .or_else(|| shared.options.default_shell.clone())
    .unwrap_or_else(default_shell);
  let env_map = shared.environment.build_env_map();

  let mut command = ProcessCommand::new(&shell);
  command.arg("-c").arg(line);
  command.env_clear();
  command.envs(env_map);
  if let Some(dir) = &recipe.working_dir {
    command.current_dir(dir);
  }
  command.stdin(Stdio::inherit()).stdout(Stdio::inherit()).stderr(Stdio::inherit());

  debug!("spawning `{}` via `{}`", line, shell);
  let mut child = command.spawn().map_err(|source| JakeError::CommandFailed {
    recipe: recipe.name.clone(),
    message: format!("failed to spawn `{}`: {}", shell, source),
  })?;

  if let Some(watchdog) = watchdog {
    watchdog.current_child.store(child.id(), Ordering::SeqCst);
  }

  let status = child.wait().map_err(|source| JakeError::CommandFailed {
    recipe: recipe.name.clone(),
    message: format!("failed to wait on child: {}", source),
  });

  if let Some(watchdog) = watchdog {
    watchdog.current_child.store(0, Ordering::SeqCst);
    if watchdog.timeout_expired.load(Ordering::SeqCst) {
      return Err(JakeError::CommandFailed {
        recipe: recipe.name.clone(),
        message: "timed out".to_owned(),
      });
    }
  }

  let status = status?;
  if status.success() {
    Ok(())
  } else {
    let message = match status.code() {
      Some(code) => format!("`{}` exited with code {}", line, code),
      None => format!("`{}` was killed by a signal", line),
    };
    Err(JakeError::CommandFailed { recipe: recipe.name.clone(), message })
  }
}

fn default_shell() -> String {
  if cfg!(windows) {
    std::env::var("COMSPEC").unwrap_or_else(|_| "cmd".to_owned())
  } else {
    "/bin/sh".to_owned()
  }
}

pub(crate) fn needs_miss_message(entry: &crate::ast::NeedsEntry) -> String {
  let mut message = format!("required command `{}` was not found", entry.command);
  if let Some(hint) = &entry.hint {
    message.push_str(&format!(" ({})", hint));
  }
  if let Some(install) = &entry.install_task {
    message.push_str(&format!(" -- try running `jake {}`", install));
  }
  message
}

/// The command-existence probe: absolute paths test
/// filesystem access directly; bare names are searched through `PATH`.
pub fn command_exists(command: &str) -> bool {
  let path = Path::new(command);
  if path.is_absolute() {
    return path.exists();
  }

  std::env::var_os("PATH")
    .map(|paths| {
      std::env::split_paths(&paths).any(|dir| {
        let candidate = dir.join(command);
        candidate.is_file() || (cfg!(windows) && dir.join(format!("{}.exe", command)).is_file())
      })
    })
    .unwrap_or(false)
}

fn launch(target: &str) {
  let result = if cfg!(target_os = "macos") {
    ProcessCommand::new("open").arg(target).spawn()
  } else if cfg!(target_os = "windows") {
    ProcessCommand::new("cmd").args(["/c", "start", "", target]).spawn()
  } else {
    ProcessCommand::new("xdg-open").arg(target).spawn()
  };
  if let Err(error) = result {
    warn!("`@launch {}` failed: {}", target, error);
  }
}

fn kill_process(pid: u32) {
  let result = if cfg!(windows) {
    ProcessCommand::new("taskkill").args(["/PID", &pid.to_string(), "/F"]).status()
  } else {
    ProcessCommand::new("kill").args(["-9", &pid.to_string()]).status()
  };
  if let Err(error) = result {
    warn!("failed to kill timed-out process {}: {}", pid, error);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ast::{Command, RecipeKind};

  fn shared_for_test<'a>(jakefile: &'a Jakefile, environment: &'a Environment) -> Shared<'a> {
    Shared {
      jakefile,
      environment,
      cache: Arc::new(Mutex::new(Cache::default())),
      options: ExecOptions::default(),
      interrupted: Arc::new(AtomicBool::new(false)),
    }
  }

  #[test]
  fn if_else_runs_exactly_one_branch() {
    let jakefile = Jakefile::default();
    let environment = Environment::new();
    let shared = shared_for_test(&jakefile, &environment);
    let mut recipe = Recipe::new("r".to_owned(), RecipeKind::Task, 1);
    recipe.commands = vec![
      Command { line: String::new(), directive: Some(BodyDirective::If("false".to_owned())), line_no: 1 },
      Command { line: "echo unreachable".to_owned(), directive: None, line_no: 2 },
      Command { line: String::new(), directive: Some(BodyDirective::Else), line_no: 3 },
      Command { line: "true".to_owned(), directive: None, line_no: 4 },
      Command { line: String::new(), directive: Some(BodyDirective::End), line_no: 5 },
    ];
    let mut variables = IndexMap::new();
    let mut interp = Interpreter { shared: &shared, recipe: &recipe, variables: &mut variables, positionals: &[], watchdog: None };
    let result = interp.run_commands(&recipe.commands, 0);
    assert!(result.is_ok());
  }

  #[test]
  fn find_matching_end_skips_nested_blocks() {
    let commands = vec![
      Command { line: String::new(), directive: Some(BodyDirective::Each("x".to_owned())), line_no: 1 },
      Command { line: String::new(), directive: Some(BodyDirective::If("true".to_owned())), line_no: 2 },
      Command { line: String::new(), directive: Some(BodyDirective::End), line_no: 3 },
      Command { line: String::new(), directive: Some(BodyDirective::End), line_no: 4 },
    ];
    assert_eq!(find_matching_end(&commands, 0), 3);
  }

  #[test]
  fn command_exists_finds_a_common_unix_binary() {
    if cfg!(unix) {
      assert!(command_exists("sh"));
    }
  }

  #[test]
  fn command_exists_rejects_unknown_binary() {
    assert!(!command_exists("definitely-not-a-real-binary-xyz"));
  }
}
