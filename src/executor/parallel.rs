// The worker-pool scheduler used when `jobs > 1`.
// Graph construction walks the dependency edges with the same
// frontier/visited shape `sequential.rs` uses, but instead of producing a
// flat order up front, it keeps the in-degree counts and dependent edges
// around so a pool of worker threads can race through the DAG themselves.
// The worker loop's "grab work, release the lock, do the slow part,
// reacquire" shape keeps the shared state's critical sections short.

use super::{command_exists, execute_recipe_body, needs_miss_message, RecipeArgs, Shared};
use crate::ast::RecipeKind;
use crate::error::{JakeError, Result};
use crossbeam::channel::{self, Receiver, Sender};
use log::info;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Scheduler metrics reported in verbose mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics {
  pub total_recipes: usize,
  pub max_parallel: usize,
  pub critical_path_length: usize,
}

struct Graph {
  /// Every recipe name reachable from the root, including file-dep
  /// producer edges.
  nodes: Vec<String>,
  /// name -> names it depends on (the edges actually walked to build the
  /// node set; used only to compute in-degree/dependents).
  deps: HashMap<String, Vec<String>>,
}

/// Builds the reachable subgraph rooted at `root`, detecting cycles with a
/// recursion-stack DFS (in_progress == "currently on the DFS stack").
fn build_graph(shared: &Shared, root: &str) -> Result<Graph> {
  let mut nodes = Vec::new();
  let mut deps: HashMap<String, Vec<String>> = HashMap::new();
  let mut visited = HashSet::new();
  let mut on_stack = HashSet::new();
  let mut stack_path = Vec::new();

  visit(shared, root, &mut nodes, &mut deps, &mut visited, &mut on_stack, &mut stack_path)?;

  Ok(Graph { nodes, deps })
}

fn visit(
  shared: &Shared,
  name: &str,
  nodes: &mut Vec<String>,
  deps: &mut HashMap<String, Vec<String>>,
  visited: &mut HashSet<String>,
  on_stack: &mut HashSet<String>,
  stack_path: &mut Vec<String>,
) -> Result<()> {
  let resolved = shared.jakefile.resolve_name(name).map(str::to_owned);
  let name = resolved.as_deref().unwrap_or(name);

  if on_stack.contains(name) {
    let mut cycle = stack_path.clone();
    cycle.push(name.to_owned());
    if let Some(start) = cycle.iter().position(|n| n == name) {
      cycle = cycle[start..].to_vec();
    }
    return Err(JakeError::CyclicDependency { cycle });
  }
  if visited.contains(name) {
    return Ok(());
  }

  let recipe = shared.jakefile.recipes.get(name).ok_or_else(|| JakeError::RecipeNotFound {
    name: name.to_owned(),
    candidates: Vec::new(),
  })?;

  on_stack.insert(name.to_owned());
  stack_path.push(name.to_owned());

  let mut edges = recipe.dependencies.clone();
  if matches!(recipe.kind, RecipeKind::File) {
    for dep_path in &recipe.file_deps {
      if let Some(producer) = shared.jakefile.recipes.values().find(|r| r.output.as_deref() == Some(dep_path.as_str())) {
        edges.push(producer.name.clone());
      }
    }
  }

  for dep in &edges {
    visit(shared, dep, nodes, deps, visited, on_stack, stack_path)?;
  }

  deps.insert(name.to_owned(), edges);
  visited.insert(name.to_owned());
  nodes.push(name.to_owned());
  on_stack.remove(name);
  stack_path.pop();

  Ok(())
}

struct SchedulerState {
  in_degree: HashMap<String, usize>,
  dependents: HashMap<String, Vec<String>>,
  ready: Vec<String>,
  done: HashSet<String>,
  active: usize,
  error: Option<JakeError>,
}

/// Runs the DAG rooted at `root` with a fixed-size worker pool bounded by
/// `shared.options.jobs`. Only the root recipe receives `args`; every
/// dependency runs with empty positionals, matching the sequential
/// executor.
///
/// Workers wait on a `crossbeam` channel rather than spinning: each state
/// change (a recipe finishing or failing) broadcasts one wakeup per worker.
pub fn execute(shared: &Shared, root: &str, args: &RecipeArgs) -> Result<()> {
  let resolved_root = shared.jakefile.resolve_name(root).map(str::to_owned);
  let root = resolved_root.as_deref().unwrap_or(root);
  let graph = build_graph(shared, root)?;

  let mut in_degree: HashMap<String, usize> = HashMap::new();
  let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
  for node in &graph.nodes {
    in_degree.entry(node.clone()).or_insert(0);
    dependents.entry(node.clone()).or_default();
  }
  for (name, edges) in &graph.deps {
    *in_degree.get_mut(name).unwrap() = edges.len();
    for dep in edges {
      dependents.get_mut(dep).unwrap().push(name.clone());
    }
  }

  let critical_path_length = longest_chain(&graph);
  let total = graph.nodes.len();

  let ready: Vec<String> = graph.nodes.iter().filter(|n| in_degree[*n] == 0).cloned().collect();

  let state = Mutex::new(SchedulerState {
    in_degree,
    dependents,
    ready,
    done: HashSet::new(),
    active: 0,
    error: None,
  });
  let (wake_tx, wake_rx) = channel::unbounded::<()>();
  let max_parallel = AtomicUsize::new(0);
  let worker_count = shared.options.jobs.max(1).min(total.max(1));

  // Kick off the workers that can start immediately.
  for _ in 0..worker_count {
    let _ = wake_tx.send(());
  }

  crossbeam::thread::scope(|scope| {
    for _ in 0..worker_count {
      let wake_rx = wake_rx.clone();
      let wake_tx = wake_tx.clone();
      scope.spawn(move |_| worker_loop(shared, root, args, total, &state, &wake_tx, &wake_rx, worker_count, &max_parallel));
    }
  })
  .expect("a worker thread panicked");

  if shared.options.verbose {
    let metrics =
      Metrics { total_recipes: total, max_parallel: max_parallel.load(Ordering::SeqCst), critical_path_length };
    info!(
      "parallel scheduler: {}, max {} concurrent, critical path {}",
      crate::format::number(metrics.total_recipes, "recipe"),
      metrics.max_parallel,
      metrics.critical_path_length
    );
  }

  let state = state.into_inner().unwrap();
  match state.error {
    Some(error) => Err(error),
    None => Ok(()),
  }
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
  shared: &Shared,
  root: &str,
  root_args: &RecipeArgs,
  total: usize,
  state: &Mutex<SchedulerState>,
  wake_tx: &Sender<()>,
  wake_rx: &Receiver<()>,
  worker_count: usize,
  max_parallel: &AtomicUsize,
) {
  loop {
    let name = loop {
      let mut guard = state.lock().unwrap();
      if guard.error.is_some() || guard.done.len() == total {
        return;
      }
      if let Some(name) = guard.ready.pop() {
        guard.active += 1;
        max_parallel.fetch_max(guard.active, Ordering::SeqCst);
        break name;
      }
      drop(guard);
      if wake_rx.recv().is_err() {
        return;
      }
    };

    if shared.interrupted.load(Ordering::SeqCst) {
      let mut guard = state.lock().unwrap();
      guard.error.get_or_insert(JakeError::Interrupted);
      guard.active -= 1;
      broadcast(wake_tx, worker_count);
      continue;
    }

    let recipe = shared.jakefile.recipes.get(name.as_str());
    let outcome = match recipe {
      None => Err(JakeError::RecipeNotFound { name: name.clone(), candidates: Vec::new() }),
      Some(recipe) if !super::is_os_allowed(&recipe.only_os) => {
        info!("skipping `{}`: not enabled for this platform", name);
        Ok(())
      }
      Some(recipe) => run_one(shared, recipe, &name, root, root_args),
    };

    let mut guard = state.lock().unwrap();
    guard.active -= 1;
    match outcome {
      Ok(()) => {
        guard.done.insert(name.clone());
        let ready_next: Vec<String> = guard
          .dependents
          .get(&name)
          .cloned()
          .unwrap_or_default()
          .into_iter()
          .filter(|dependent| {
            let degree = guard.in_degree.get_mut(dependent).unwrap();
            *degree -= 1;
            *degree == 0
          })
          .collect();
        for dependent in ready_next {
          guard.ready.push(dependent);
        }
      }
      Err(error) => {
        guard.error.get_or_insert(error);
      }
    }
    drop(guard);
    broadcast(wake_tx, worker_count);
  }
}

/// Wakes every potentially-blocked worker, the channel-based equivalent of
/// `Condvar::notify_all`.
fn broadcast(wake_tx: &Sender<()>, worker_count: usize) {
  for _ in 0..worker_count {
    let _ = wake_tx.send(());
  }
}

fn run_one(shared: &Shared, recipe: &crate::ast::Recipe, name: &str, root: &str, root_args: &RecipeArgs) -> Result<()> {
  for entry in &recipe.needs {
    if !command_exists(&entry.command) {
      return Err(JakeError::CommandFailed { recipe: name.to_owned(), message: needs_miss_message(entry) });
    }
  }

  if matches!(recipe.kind, RecipeKind::File) {
    let output = recipe.output.as_deref().unwrap_or(name);
    let up_to_date = std::path::Path::new(output).exists()
      && !recipe.file_deps.iter().any(|pattern| shared.cache.lock().unwrap().is_glob_stale(pattern));
    if up_to_date {
      return Ok(());
    }
  }

  let empty_args = RecipeArgs::default();
  let args = if name == root { root_args } else { &empty_args };
  execute_recipe_body(shared, recipe, args)
}

/// The longest chain of nodes (in node count) through the dependency DAG,
/// used for the verbose-mode `critical_path_length` metric. Computed by
/// memoized DFS over `graph.deps` -- independent of actual wall-clock
/// timing.
fn longest_chain(graph: &Graph) -> usize {
  let mut memo: HashMap<&str, usize> = HashMap::new();

  fn depth<'a>(name: &'a str, deps: &'a HashMap<String, Vec<String>>, memo: &mut HashMap<&'a str, usize>) -> usize {
    if let Some(&cached) = memo.get(name) {
      return cached;
    }
    let longest = deps
      .get(name)
      .map(|edges| edges.iter().map(|dep| depth(dep, deps, memo)).max().unwrap_or(0))
      .unwrap_or(0);
    let value = longest + 1;
    memo.insert(name, value);
    value
  }

  graph.nodes.iter().map(|node| depth(node, &graph.deps, &mut memo)).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ast::{Command, Jakefile, Recipe};
  use crate::cache::Cache;
  use crate::environment::Environment;
  use crate::executor::ExecOptions;
  use std::sync::atomic::AtomicBool;
  use std::sync::{Arc, Mutex as StdMutex};

  fn shared_for<'a>(jakefile: &'a Jakefile, environment: &'a Environment, jobs: usize) -> Shared<'a> {
    Shared {
      jakefile,
      environment,
      cache: Arc::new(StdMutex::new(Cache::default())),
      options: ExecOptions { jobs, ..ExecOptions::default() },
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
  fn diamond_runs_to_completion_with_multiple_workers() {
    let mut jakefile = Jakefile::default();
    jakefile.recipes.insert("d".to_owned(), recipe("d", &[]));
    jakefile.recipes.insert("b".to_owned(), recipe("b", &["d"]));
    jakefile.recipes.insert("c".to_owned(), recipe("c", &["d"]));
    jakefile.recipes.insert("a".to_owned(), recipe("a", &["b", "c"]));

    let environment = Environment::new();
    let shared = shared_for(&jakefile, &environment, 4);
    let result = execute(&shared, "a", &RecipeArgs::default());
    assert!(result.is_ok(), "{:?}", result);
  }

  #[test]
  fn running_by_alias_resolves_to_the_recipe() {
    let mut jakefile = Jakefile::default();
    let mut aliased = recipe("build", &[]);
    aliased.aliases = vec!["b".to_owned()];
    jakefile.recipes.insert("build".to_owned(), aliased);

    let environment = Environment::new();
    let shared = shared_for(&jakefile, &environment, 4);
    let result = execute(&shared, "b", &RecipeArgs::default());
    assert!(result.is_ok(), "{:?}", result);
  }

  #[test]
  fn cycle_is_caught_at_build_graph_time() {
    let mut jakefile = Jakefile::default();
    jakefile.recipes.insert("a".to_owned(), recipe("a", &["b"]));
    jakefile.recipes.insert("b".to_owned(), recipe("b", &["a"]));

    let environment = Environment::new();
    let shared = shared_for(&jakefile, &environment, 4);
    let result = execute(&shared, "a", &RecipeArgs::default());
    assert!(matches!(result, Err(JakeError::CyclicDependency { .. })));
  }

  #[test]
  fn critical_path_length_counts_the_longest_chain() {
    let mut jakefile = Jakefile::default();
    jakefile.recipes.insert("d".to_owned(), recipe("d", &[]));
    jakefile.recipes.insert("b".to_owned(), recipe("b", &["d"]));
    jakefile.recipes.insert("c".to_owned(), recipe("c", &["d"]));
    jakefile.recipes.insert("a".to_owned(), recipe("a", &["b", "c"]));
    let shared_jakefile = jakefile.clone();
    let graph = build_graph(&shared_for(&shared_jakefile, &Environment::new(), 1), "a").unwrap();
    assert_eq!(longest_chain(&graph), 3);
  }
}
