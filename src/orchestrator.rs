// The top-level pipeline: locate and read the Jakefile, lex/parse it,
// resolve imports, apply top-level directives, validate `@require`d
// environment variables, pick the target recipe, bind trailing CLI
// arguments, dispatch to the chosen executor, and persist the cache on
// every exit path. Logging/signal setup happens in `cli.rs`; this module
// picks up from "parse the Jakefile" onward.

use crate::ast::{Jakefile, TopDirective};
use crate::cache::Cache;
use crate::environment::Environment;
use crate::error::{user_error, JakeError, Result};
use crate::executor::{sequential, ExecOptions, RecipeArgs, Shared};
use crate::{imports, parser};
use log::info;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

/// Everything the CLI layer has parsed out of flags/config, handed down to
/// the orchestrator untouched.
pub struct RunRequest {
  pub jakefile_path: String,
  pub target: Option<String>,
  pub trailing_args: Vec<String>,
  pub dry_run: bool,
  pub verbose: bool,
  pub auto_yes: bool,
  pub watch_mode: bool,
  pub jobs: usize,
  pub interrupted: Arc<AtomicBool>,
  pub default_shell: Option<String>,
}

/// Reads, parses, and merges the Jakefile named by `request.jakefile_path`
/// (imports resolved). Exposed separately from `run` so `--list`/
/// `--summary`/`--show` can inspect the merged AST without executing
/// anything.
pub fn load(jakefile_path: &str) -> Result<Jakefile> {
  let path = Path::new(jakefile_path);
  let source = std::fs::read_to_string(path).map_err(|source| JakeError::from_io(jakefile_path, source))?;

  let (jakefile, diagnostics) = parser::parse(&source, jakefile_path);
  if let Some(first) = diagnostics.first() {
    return Err(JakeError::ParseError {
      message: first.message.clone(),
      file: first.file.clone(),
      line: first.line,
      column: first.column,
    });
  }

  imports::resolve(jakefile, path)
}

/// Runs the full pipeline end to end.
pub fn run(request: RunRequest) -> Result<()> {
  let jakefile = load(&request.jakefile_path)?;

  let mut environment = Environment::new();
  let cache = Arc::new(Mutex::new(Cache::load(&Cache::default_path())));

  apply_top_level_directives(&jakefile, &mut environment, &request);

  validate_required_env(&jakefile, &environment, request.dry_run)?;

  let target = choose_target(&jakefile, request.target.as_deref())?;
  let args = bind_trailing_args(&request.trailing_args);

  let options = ExecOptions {
    dry_run: request.dry_run,
    verbose: request.verbose,
    auto_yes: request.auto_yes,
    watch_mode: request.watch_mode,
    jobs: request.jobs,
    default_shell: request.default_shell.clone(),
  };
  let shared = Shared {
    jakefile: &jakefile,
    environment: &environment,
    cache: cache.clone(),
    options,
    interrupted: request.interrupted.clone(),
  };

  let result = sequential::execute(&shared, &target, &args);

  if let Err(error) = cache.lock().unwrap().save() {
    log::warn!("failed to persist cache: {}", error);
  }

  result
}

fn apply_top_level_directives(jakefile: &Jakefile, environment: &mut Environment, request: &RunRequest) {
  let base = Path::new(&request.jakefile_path).parent().unwrap_or_else(|| Path::new("."));
  for directive in &jakefile.directives {
    match directive {
      TopDirective::Dotenv(paths) => {
        for raw_path in paths {
          environment.load_dotenv(&base.join(raw_path));
        }
      }
      TopDirective::Export(pairs) => {
        for (key, value) in pairs {
          environment.set(key.clone(), environment.expand_command(value));
        }
      }
      TopDirective::Require(_) | TopDirective::Quiet | TopDirective::Hook(_) => {}
    }
  }
}

/// For every name in every `@require` directive, checks the Environment
/// then the process environment. Missing names abort the run, except in
/// dry-run mode, where the check is skipped entirely.
fn validate_required_env(jakefile: &Jakefile, environment: &Environment, dry_run: bool) -> Result<()> {
  if dry_run {
    return Ok(());
  }

  let mut missing = Vec::new();
  for directive in &jakefile.directives {
    if let TopDirective::Require(names) = directive {
      for name in names {
        if environment.get(name).is_none() && std::env::var(name).is_err() {
          missing.push(name.clone());
        }
      }
    }
  }

  if missing.is_empty() {
    Ok(())
  } else {
    Err(JakeError::MissingRequiredEnv { names: missing })
  }
}

/// Explicit CLI argument wins (resolved through `@alias` names to the
/// recipe's canonical name); otherwise the Jakefile's default recipe;
/// otherwise an error naming every defined recipe so the user can choose.
fn choose_target(jakefile: &Jakefile, explicit: Option<&str>) -> Result<String> {
  if let Some(name) = explicit {
    return Ok(jakefile.resolve_name(name).unwrap_or(name).to_owned());
  }
  if let Some(default) = jakefile.default_recipe() {
    return Ok(default.name.clone());
  }
  let available: Vec<String> = jakefile.recipes.keys().cloned().collect();
  Err(user_error(format!(
    "no recipe specified and no default recipe is defined. Available recipes: {}",
    available.join(", ")
  )))
}

/// Splits trailing CLI positionals into `key=value` pairs (bound to params
/// by name) and ordered positionals (bound to `{{$1}}`, `{{$2}}`, ...,
/// `{{$@}}`).
fn bind_trailing_args(trailing: &[String]) -> RecipeArgs {
  let mut args = RecipeArgs::default();
  for raw in trailing {
    if let Some((key, value)) = raw.split_once('=') {
      if is_identifier(key) {
        args.named.insert(key.to_owned(), value.to_owned());
        continue;
      }
    }
    args.positionals.push(raw.clone());
  }
  args
}

fn is_identifier(s: &str) -> bool {
  !s.is_empty()
    && s.chars().next().map_or(false, |c| c.is_alphabetic() || c == '_')
    && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Prints a recipe listing for `--list`/`--summary`: the merged AST's
/// recipe names alongside each one's doc comment, if any.
pub fn list_recipes(jakefile: &Jakefile) {
  let mut names: Vec<&String> = jakefile.recipes.keys().collect();
  names.sort();
  for name in names {
    let recipe = &jakefile.recipes[name];
    match recipe.description.as_ref().or(recipe.doc_comment.as_ref()) {
      Some(doc) => println!("{:<24} {}", name, doc),
      None => println!("{}", name),
    }
  }
}

/// Prints the full detail of one recipe for `--show <recipe>`.
pub fn show_recipe(jakefile: &Jakefile, name: &str) -> Result<()> {
  let recipe = jakefile.recipes.get(name).ok_or_else(|| JakeError::RecipeNotFound {
    name: name.to_owned(),
    candidates: jakefile.recipes.keys().cloned().collect(),
  })?;

  if let Some(doc) = &recipe.doc_comment {
    println!("# {}", doc);
  }
  if let Some(description) = &recipe.description {
    println!("{}", description);
  }
  println!("{}", name);
  if !recipe.dependencies.is_empty() {
    println!("  depends on: {}", recipe.dependencies.join(", "));
  }
  for command in &recipe.commands {
    if command.directive.is_none() {
      println!("  {}", command.line);
    }
  }
  info!("showed recipe `{}`", name);
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ast::Recipe;

  #[test]
  fn explicit_target_wins_over_default() {
    let mut jakefile = Jakefile::default();
    let mut default_recipe = Recipe::new("build".to_owned(), crate::ast::RecipeKind::Task, 1);
    default_recipe.is_default = true;
    jakefile.recipes.insert("build".to_owned(), default_recipe);
    jakefile.recipes.insert("test".to_owned(), Recipe::new("test".to_owned(), crate::ast::RecipeKind::Task, 2));

    assert_eq!(choose_target(&jakefile, Some("test")).unwrap(), "test");
    assert_eq!(choose_target(&jakefile, None).unwrap(), "build");
  }

  #[test]
  fn no_target_and_no_default_is_an_error() {
    let jakefile = Jakefile::default();
    assert!(choose_target(&jakefile, None).is_err());
  }

  #[test]
  fn show_recipe_with_a_description_succeeds() {
    let mut jakefile = Jakefile::default();
    let mut recipe = Recipe::new("build".to_owned(), crate::ast::RecipeKind::Task, 1);
    recipe.description = Some("Builds the release binary".to_owned());
    jakefile.recipes.insert("build".to_owned(), recipe);

    assert!(show_recipe(&jakefile, "build").is_ok());
  }

  #[test]
  fn explicit_target_resolves_through_an_alias() {
    let mut jakefile = Jakefile::default();
    let mut recipe = Recipe::new("build".to_owned(), crate::ast::RecipeKind::Task, 1);
    recipe.aliases = vec!["b".to_owned()];
    jakefile.recipes.insert("build".to_owned(), recipe);

    assert_eq!(choose_target(&jakefile, Some("b")).unwrap(), "build");
  }

  #[test]
  fn trailing_args_split_into_named_and_positional() {
    let args = bind_trailing_args(&["env=prod".to_owned(), "world".to_owned(), "1".to_owned()]);
    assert_eq!(args.named.get("env"), Some(&"prod".to_owned()));
    assert_eq!(args.positionals, vec!["world".to_owned(), "1".to_owned()]);
  }

  #[test]
  fn missing_required_env_is_reported() {
    let mut jakefile = Jakefile::default();
    jakefile.directives.push(TopDirective::Require(vec!["DOES_NOT_EXIST_XYZ".to_owned()]));
    let environment = Environment::new();
    let result = validate_required_env(&jakefile, &environment, false);
    assert!(matches!(result, Err(JakeError::MissingRequiredEnv { .. })));
  }

  #[test]
  fn missing_required_env_is_skipped_in_dry_run() {
    let mut jakefile = Jakefile::default();
    jakefile.directives.push(TopDirective::Require(vec!["DOES_NOT_EXIST_XYZ".to_owned()]));
    let environment = Environment::new();
    assert!(validate_required_env(&jakefile, &environment, true).is_ok());
  }
}
