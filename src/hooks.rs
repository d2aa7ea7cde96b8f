// Dispatches pre/post/on-error hooks, global and targeted. A hook command
// runs exactly like a recipe command; hook failures are logged as
// warnings and never propagate.

use crate::ast::{HookKind, Jakefile, Recipe};
use log::warn;

/// A single hook invocation to run, already resolved to its concrete
/// command text and a label for logging.
pub struct HookCall<'a> {
  pub command: &'a str,
  pub label: &'static str,
}

/// Returns the ordered list of pre-hooks to run before `recipe`: every
/// global `pre` hook, then every `before <recipe>` hook, then the recipe's
/// own `pre_hooks`.
pub fn pre_hooks<'a>(jakefile: &'a Jakefile, recipe: &'a Recipe) -> Vec<HookCall<'a>> {
  let mut calls = Vec::new();
  for hook in jakefile.global_hooks(HookKind::Pre) {
    if hook.target.is_none() {
      calls.push(HookCall { command: &hook.command, label: "pre" });
    }
  }
  for hook in jakefile.targeted_hooks(HookKind::Pre, &recipe.name) {
    calls.push(HookCall { command: &hook.command, label: "before" });
  }
  for command in &recipe.pre_hooks {
    calls.push(HookCall { command, label: "pre" });
  }
  calls
}

/// Returns the ordered list of post-hooks to run after `recipe`, regardless
/// of success or failure: the recipe's own `post_hooks`, then every
/// `after <recipe>` hook, then every global `post` hook.
pub fn post_hooks<'a>(jakefile: &'a Jakefile, recipe: &'a Recipe) -> Vec<HookCall<'a>> {
  let mut calls = Vec::new();
  for command in &recipe.post_hooks {
    calls.push(HookCall { command, label: "post" });
  }
  for hook in jakefile.targeted_hooks(HookKind::Post, &recipe.name) {
    calls.push(HookCall { command: &hook.command, label: "after" });
  }
  for hook in jakefile.global_hooks(HookKind::Post) {
    if hook.target.is_none() {
      calls.push(HookCall { command: &hook.command, label: "post" });
    }
  }
  calls
}

/// Returns the global `on_error` hooks, fired only when a recipe fails.
pub fn on_error_hooks(jakefile: &Jakefile) -> Vec<HookCall<'_>> {
  jakefile
    .global_hooks(HookKind::OnError)
    .into_iter()
    .map(|hook| HookCall { command: &hook.command, label: "on_error" })
    .collect()
}

/// Runs every hook in `calls` using `run`, logging (not propagating) any
/// failure. Returns once all hooks have been attempted.
pub fn run_all(calls: &[HookCall], recipe_name: &str, mut run: impl FnMut(&str) -> crate::error::Result<()>) {
  for call in calls {
    if let Err(error) = run(call.command) {
      warn!("{} hook for `{}` failed: {}", call.label, recipe_name, error);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ast::{Hook, Recipe, RecipeKind, TopDirective};

  #[test]
  fn orders_pre_hooks_global_before_targeted_before_recipe_local() {
    let mut jakefile = Jakefile::default();
    jakefile.directives.push(TopDirective::Hook(Hook {
      kind: HookKind::Pre,
      target: None,
      command: "global".to_owned(),
      line: 0,
    }));
    jakefile.directives.push(TopDirective::Hook(Hook {
      kind: HookKind::Pre,
      target: Some("build".to_owned()),
      command: "targeted".to_owned(),
      line: 0,
    }));
    let mut recipe = Recipe::new("build".to_owned(), RecipeKind::Task, 1);
    recipe.pre_hooks.push("local".to_owned());

    let calls = pre_hooks(&jakefile, &recipe);
    let commands: Vec<_> = calls.iter().map(|c| c.command).collect();
    assert_eq!(commands, vec!["global", "targeted", "local"]);
  }

  #[test]
  fn orders_post_hooks_local_before_targeted_before_global() {
    let mut jakefile = Jakefile::default();
    jakefile.directives.push(TopDirective::Hook(Hook {
      kind: HookKind::Post,
      target: None,
      command: "global".to_owned(),
      line: 0,
    }));
    jakefile.directives.push(TopDirective::Hook(Hook {
      kind: HookKind::Post,
      target: Some("build".to_owned()),
      command: "targeted".to_owned(),
      line: 0,
    }));
    let mut recipe = Recipe::new("build".to_owned(), RecipeKind::Task, 1);
    recipe.post_hooks.push("local".to_owned());

    let calls = post_hooks(&jakefile, &recipe);
    let commands: Vec<_> = calls.iter().map(|c| c.command).collect();
    assert_eq!(commands, vec!["local", "targeted", "global"]);
  }

  #[test]
  fn run_all_swallows_failures() {
    let calls = vec![HookCall { command: "boom", label: "pre" }];
    run_all(&calls, "build", |_| Err(crate::error::user_error("boom")));
  }
}
