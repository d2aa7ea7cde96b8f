// Sequential DAG traversal: a depth-first, left-to-right walk of the
// dependency graph with cycle detection, generalized from a flat
// topological sort into a recursive traversal that also runs each
// recipe's body as it's visited, checking the interrupted flag before
// doing anything expensive.

use super::{command_exists, execute_recipe_body, needs_miss_message, RecipeArgs, Shared};
use crate::ast::RecipeKind;
use crate::error::{JakeError, Result};
use log::info;
use std::collections::HashSet;

/// Entry point for a single recipe invocation. Delegates to the parallel
/// scheduler when `jobs > 1`; otherwise walks the DAG on the current
/// thread.
pub fn execute(shared: &Shared, name: &str, args: &RecipeArgs) -> Result<()> {
  if shared.options.jobs > 1 {
    return super::parallel::execute(shared, name, args);
  }
  let mut executor = SequentialExecutor {
    shared,
    executed: HashSet::new(),
    in_progress: HashSet::new(),
    stack: Vec::new(),
  };
  executor.execute_recipe(name, args)
}

struct SequentialExecutor<'a> {
  shared: &'a Shared<'a>,
  executed: HashSet<String>,
  in_progress: HashSet<String>,
  stack: Vec<String>,
}

impl<'a> SequentialExecutor<'a> {
  fn execute_recipe(&mut self, name: &str, args: &RecipeArgs) -> Result<()> {
    let resolved = self.shared.jakefile.resolve_name(name).map(str::to_owned);
    let name = resolved.as_deref().unwrap_or(name);

    if self.in_progress.contains(name) {
      let mut cycle = self.stack.clone();
      cycle.push(name.to_owned());
      if let Some(start) = cycle.iter().position(|n| n == name) {
        cycle = cycle[start..].to_vec();
      }
      return Err(JakeError::CyclicDependency { cycle });
    }
    if self.executed.contains(name) {
      return Ok(());
    }

    if self.shared.interrupted.load(std::sync::atomic::Ordering::SeqCst) {
      return Err(JakeError::Interrupted);
    }

    let recipe = self.shared.jakefile.recipes.get(name).ok_or_else(|| JakeError::RecipeNotFound {
      name: name.to_owned(),
      candidates: nearest_matches(self.shared, name),
    })?;

    if !super::is_os_allowed(&recipe.only_os) {
      info!("skipping `{}`: not enabled for this platform", name);
      self.executed.insert(name.to_owned());
      return Ok(());
    }

    for entry in &recipe.needs {
      if !command_exists(&entry.command) {
        return Err(JakeError::CommandFailed { recipe: name.to_owned(), message: needs_miss_message(entry) });
      }
    }

    self.in_progress.insert(name.to_owned());
    self.stack.push(name.to_owned());

    let empty_args = RecipeArgs::default();
    for dep in &recipe.dependencies {
      self.execute_recipe(dep, &empty_args)?;
    }

    if matches!(recipe.kind, RecipeKind::File) {
      for dep_path in &recipe.file_deps {
        if let Some(producer) = self.shared.jakefile.recipes.values().find(|r| r.output.as_deref() == Some(dep_path.as_str())) {
          let producer_name = producer.name.clone();
          self.execute_recipe(&producer_name, &empty_args)?;
        }
      }

      let output = recipe.output.as_deref().unwrap_or(name);
      let up_to_date = std::path::Path::new(output).exists()
        && !recipe
          .file_deps
          .iter()
          .any(|pattern| self.shared.cache.lock().unwrap().is_glob_stale(pattern));

      if up_to_date {
        self.executed.insert(name.to_owned());
        self.in_progress.remove(name);
        self.stack.pop();
        return Ok(());
      }
    }

    let result = execute_recipe_body(self.shared, recipe, args);

    self.in_progress.remove(name);
    self.stack.pop();
    if result.is_ok() {
      self.executed.insert(name.to_owned());
    }
    result
  }
}

/// A handful of "did you mean" suggestions for an unknown recipe name,
/// used to populate `JakeError::RecipeNotFound`'s hint.
fn nearest_matches(shared: &Shared, name: &str) -> Vec<String> {
  let mut candidates: Vec<String> = shared
    .jakefile
    .recipes
    .keys()
    .filter(|candidate| candidate.contains(name) || name.contains(candidate.as_str()))
    .cloned()
    .collect();
  candidates.sort();
  candidates.truncate(3);
  candidates
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ast::{Command, Jakefile, Recipe};
  use crate::cache::Cache;
  use crate::environment::Environment;
  use crate::executor::ExecOptions;
  use std::sync::atomic::AtomicBool;
  use std::sync::{Arc, Mutex};

  fn shared_for<'a>(jakefile: &'a Jakefile, environment: &'a Environment) -> Shared<'a> {
    Shared {
      jakefile,
      environment,
      cache: Arc::new(Mutex::new(Cache::default())),
      options: ExecOptions::default(),
      interrupted: Arc::new(AtomicBool::new(false)),
    }
  }

  fn recipe(name: &str, deps: &[&str]) -> Recipe {
    let mut r = Recipe::new(name.to_owned(), RecipeKind::Task, 1);
    r.dependencies = deps.iter().map(|s| s.to_string()).collect();
    r.commands = vec![Command { line: "true".to_owned(), directive: None, line_no: 1 }];
    r
  }

  #[test]
  fn diamond_dependency_runs_each_node_once() {
    let mut jakefile = Jakefile::default();
    jakefile.recipes.insert("d".to_owned(), recipe("d", &[]));
    jakefile.recipes.insert("b".to_owned(), recipe("b", &["d"]));
    jakefile.recipes.insert("c".to_owned(), recipe("c", &["d"]));
    jakefile.recipes.insert("a".to_owned(), recipe("a", &["b", "c"]));

    let environment = Environment::new();
    let shared = shared_for(&jakefile, &environment);
    let result = execute(&shared, "a", &RecipeArgs::default());
    assert!(result.is_ok(), "{:?}", result);
  }

  #[test]
  fn cycle_is_detected_without_running_anything() {
    let mut jakefile = Jakefile::default();
    jakefile.recipes.insert("a".to_owned(), recipe("a", &["b"]));
    jakefile.recipes.insert("b".to_owned(), recipe("b", &["a"]));

    let environment = Environment::new();
    let shared = shared_for(&jakefile, &environment);
    let result = execute(&shared, "a", &RecipeArgs::default());
    assert!(matches!(result, Err(JakeError::CyclicDependency { .. })));
  }

  #[test]
  fn running_by_alias_resolves_to_the_recipe() {
    let mut jakefile = Jakefile::default();
    let mut aliased = recipe("build", &[]);
    aliased.aliases = vec!["b".to_owned()];
    jakefile.recipes.insert("build".to_owned(), aliased);

    let environment = Environment::new();
    let shared = shared_for(&jakefile, &environment);
    let result = execute(&shared, "b", &RecipeArgs::default());
    assert!(result.is_ok(), "{:?}", result);
  }

  #[test]
  fn unknown_recipe_is_reported() {
    let jakefile = Jakefile::default();
    let environment = Environment::new();
    let shared = shared_for(&jakefile, &environment);
    let result = execute(&shared, "missing", &RecipeArgs::default());
    assert!(matches!(result, Err(JakeError::RecipeNotFound { .. })));
  }

  #[test]
  fn running_a_recipe_twice_executes_dependency_once() {
    let mut jakefile = Jakefile::default();
    jakefile.recipes.insert("d".to_owned(), recipe("d", &[]));
    jakefile.recipes.insert("a".to_owned(), recipe("a", &["d"]));

    let environment = Environment::new();
    let shared = shared_for(&jakefile, &environment);
    let mut executor = SequentialExecutor { shared: &shared, executed: HashSet::new(), in_progress: HashSet::new(), stack: Vec::new() };
    executor.execute_recipe("a", &RecipeArgs::default()).unwrap();
    assert_eq!(executor.executed.len(), 2);
    // Re-running "d" directly is a no-op: it's already in `executed`.
    executor.execute_recipe("d", &RecipeArgs::default()).unwrap();
    assert_eq!(executor.executed.len(), 2);
  }
}
